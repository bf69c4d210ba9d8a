use chrono::{FixedOffset, NaiveDate, NaiveDateTime};

use crate::DatetimeError;

/// A general-purpose date string parser used when the ISO-8601 fast path
/// does not apply.
pub trait DateStringParser {
    /// Parse `text` into wall-clock fields plus any UTC offset written in it.
    fn parse(
        &self,
        text: &str,
        dayfirst: bool,
        yearfirst: bool,
    ) -> Result<(NaiveDateTime, Option<FixedOffset>), DatetimeError>;
}

const TIME_SUFFIXES: [&str; 5] = [
    " %H:%M:%S%.f",
    "T%H:%M:%S%.f",
    " %H:%M",
    "T%H:%M",
    "",
];

const NAMED_LAYOUTS: [&str; 10] = [
    "%d %B %Y",
    "%B %d %Y",
    "%B %d, %Y",
    "%d-%B-%Y",
    "%d %B %Y %H:%M:%S%.f",
    "%B %d %Y %H:%M:%S%.f",
    "%B %d, %Y %H:%M:%S%.f",
    "%d-%B-%Y %H:%M:%S%.f",
    "%a, %d %b %Y %H:%M:%S",
    "%A, %B %d, %Y",
];

const COMPACT_LAYOUTS: [&str; 3] = ["%Y%m%dT%H%M%S", "%Y%m%d%H%M%S", "%Y%m%d"];

const DATE_SEPARATORS: [char; 3] = ['-', '/', '.'];

/// Largest whole-hour offset accepted in free-form text.
const MAX_OFFSET_HOURS: i32 = 14;

/// Tries a fixed list of `chrono` layouts in order, honoring `dayfirst` and
/// `yearfirst` for all-numeric dates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatListParser {
    preferred: Vec<String>,
}

impl FormatListParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try `layout` before the built-in layouts.
    #[must_use]
    pub fn with_layout(mut self, layout: impl Into<String>) -> Self {
        self.preferred.push(layout.into());
        self
    }

    fn layouts(&self, dayfirst: bool, yearfirst: bool) -> Vec<String> {
        let mut layouts = self.preferred.clone();

        let mut orders: Vec<[&str; 3]> = Vec::with_capacity(3);
        if yearfirst {
            orders.push(if dayfirst {
                ["%Y", "%d", "%m"]
            } else {
                ["%Y", "%m", "%d"]
            });
        }
        if dayfirst {
            orders.push(["%d", "%m", "%Y"]);
            orders.push(["%m", "%d", "%Y"]);
        } else {
            orders.push(["%m", "%d", "%Y"]);
            orders.push(["%d", "%m", "%Y"]);
        }
        if !yearfirst {
            orders.push(["%Y", "%m", "%d"]);
        }

        for suffix in TIME_SUFFIXES {
            for sep in DATE_SEPARATORS {
                for [a, b, c] in &orders {
                    // Two-digit years first: `%Y` would read "21" as year 21.
                    let short = [*a, *b, *c].map(|part| if part == "%Y" { "%y" } else { part });
                    layouts.push(format!("{}{sep}{}{sep}{}{suffix}", short[0], short[1], short[2]));
                    layouts.push(format!("{a}{sep}{b}{sep}{c}{suffix}"));
                }
            }
        }
        layouts.extend(NAMED_LAYOUTS.iter().map(|layout| (*layout).to_owned()));
        layouts.extend(COMPACT_LAYOUTS.iter().map(|layout| (*layout).to_owned()));
        layouts
    }
}

impl DateStringParser for FormatListParser {
    fn parse(
        &self,
        text: &str,
        dayfirst: bool,
        yearfirst: bool,
    ) -> Result<(NaiveDateTime, Option<FixedOffset>), DatetimeError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(DatetimeError::Unparseable(text.to_owned()));
        }
        let layouts = self.layouts(dayfirst, yearfirst);
        if let Some(local) = parse_with(trimmed, &layouts) {
            return Ok((local, None));
        }
        if let Some((body, offset)) = split_offset(trimmed)
            && let Some(local) = parse_with(body, &layouts)
        {
            return Ok((local, Some(offset)));
        }
        Err(DatetimeError::Unparseable(text.to_owned()))
    }
}

fn parse_with(text: &str, layouts: &[String]) -> Option<NaiveDateTime> {
    layouts.iter().find_map(|layout| {
        NaiveDateTime::parse_from_str(text, layout).ok().or_else(|| {
            NaiveDate::parse_from_str(text, layout)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
    })
}

/// Split a trailing `Z`, `UTC`, `GMT` or `±HH[:MM]` offset from `text`.
fn split_offset(text: &str) -> Option<(&str, FixedOffset)> {
    for marker in ["Z", "UTC", "GMT"] {
        if let Some(body) = text.strip_suffix(marker) {
            return Some((body.trim_end(), FixedOffset::east_opt(0)?));
        }
    }

    let at = text.rfind(['+', '-'])?;
    let (body, suffix) = text.split_at(at);
    let sign = if suffix.starts_with('-') { -1 } else { 1 };
    let digits: String = suffix[1..].chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    if hours > MAX_OFFSET_HOURS || minutes > 59 {
        return None;
    }
    let offset = FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))?;
    Some((body.trim_end(), offset))
}
