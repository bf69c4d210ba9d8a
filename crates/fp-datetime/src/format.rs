use std::fmt::{self, Write as _};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::tz::{TimezoneInfo, Tz};
use crate::{NAT, nanos_to_naive, shifted_naive};

/// An instant with an optional zone annotation and display frequency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    /// UTC nanoseconds.
    pub value: i64,
    pub tz: Option<Tz>,
    pub freq: Option<String>,
}

impl Timestamp {
    #[must_use]
    pub fn new(value: i64, tz: Option<Tz>) -> Self {
        Self {
            value,
            tz,
            freq: None,
        }
    }

    #[must_use]
    pub fn with_freq(mut self, freq: impl Into<String>) -> Self {
        self.freq = Some(freq.into());
        self
    }

    /// Offset from UTC at this instant, when annotated with a zone.
    #[must_use]
    pub fn offset(&self) -> Option<FixedOffset> {
        self.tz.as_ref().map(|tz| tz.utc_offset_at(self.value))
    }

    /// Wall-clock time in the annotated zone, or UTC.
    #[must_use]
    pub fn wall(&self) -> NaiveDateTime {
        match self.offset() {
            Some(offset) => shifted_naive(self.value, offset.local_minus_utc()),
            None => nanos_to_naive(self.value),
        }
    }

    /// Render with a strftime layout, or `None` when the layout is invalid.
    #[must_use]
    pub fn strftime(&self, layout: &str) -> Option<String> {
        let items: Vec<Item<'_>> = StrftimeItems::new(layout).collect();
        if items.iter().any(|item| matches!(item, Item::Error)) {
            return None;
        }
        let offset = self.offset().unwrap_or_else(|| crate::tz::offset_from_seconds(0));
        let aware = DateTime::<FixedOffset>::from_naive_utc_and_offset(nanos_to_naive(self.value), offset);
        let mut out = String::new();
        write!(out, "{}", aware.format_with_items(items.into_iter())).ok()?;
        Some(out)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let wall = self.wall();
        write!(f, "{}", wall.format("%Y-%m-%d %H:%M:%S"))?;
        let nanos = wall.nanosecond();
        if nanos % 1_000 != 0 {
            write!(f, ".{nanos:09}")?;
        } else if nanos != 0 {
            write!(f, ".{:06}", nanos / 1_000)?;
        }
        if let Some(offset) = self.offset() {
            write!(f, "{offset}")?;
        }
        Ok(())
    }
}

/// Options for [`format_array_from_datetime`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatOptions {
    pub tz: Option<Tz>,
    /// A strftime layout applied to every value.
    pub format: Option<String>,
    pub na_rep: String,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            tz: None,
            format: None,
            na_rep: "NaT".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Precision {
    Seconds,
    Micros,
    Nanos,
}

fn shared_precision(values: &[i64]) -> Precision {
    let present = || values.iter().copied().filter(|v| *v != NAT);
    if present().any(|v| v.rem_euclid(1_000) != 0) {
        Precision::Nanos
    } else if present().any(|v| v.div_euclid(1_000).rem_euclid(1_000_000) != 0) {
        // Millisecond-level arrays render with six digits as well.
        Precision::Micros
    } else {
        Precision::Seconds
    }
}

fn render_basic(value: i64, precision: Precision) -> String {
    let wall = nanos_to_naive(value);
    let mut out = wall.format("%Y-%m-%d %H:%M:%S").to_string();
    let nanos = wall.nanosecond();
    match precision {
        Precision::Nanos => {
            out.push_str(&format!(".{nanos:09}"));
        }
        Precision::Micros => {
            out.push_str(&format!(".{:06}", nanos / 1_000));
        }
        Precision::Seconds => {}
    }
    out
}

/// Render nanosecond values as strings.
///
/// With neither a zone nor a layout every value shares one precision chosen
/// from the whole array. Otherwise each value renders on its own, and an
/// invalid layout falls back to the [`Timestamp`] display.
#[must_use]
pub fn format_array_from_datetime(values: &[i64], options: &FormatOptions) -> Vec<String> {
    if options.tz.is_none() && options.format.is_none() {
        let precision = shared_precision(values);
        return values
            .iter()
            .map(|value| {
                if *value == NAT {
                    options.na_rep.clone()
                } else {
                    render_basic(*value, precision)
                }
            })
            .collect();
    }

    values
        .iter()
        .map(|value| {
            if *value == NAT {
                return options.na_rep.clone();
            }
            let ts = Timestamp::new(*value, options.tz.clone());
            options
                .format
                .as_deref()
                .and_then(|layout| ts.strftime(layout))
                .unwrap_or_else(|| ts.to_string())
        })
        .collect()
}
