use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};

/// Fields recovered from an ISO-8601 string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsoDatetime {
    /// Wall-clock fields as written.
    pub local: NaiveDateTime,
    /// Trailing UTC offset in minutes, when one was written.
    pub offset_minutes: Option<i32>,
}

impl IsoDatetime {
    #[must_use]
    pub fn offset(&self) -> Option<FixedOffset> {
        self.offset_minutes
            .and_then(|minutes| FixedOffset::east_opt(minutes * 60))
    }
}

struct Cursor<'s> {
    bytes: &'s [u8],
    pos: usize,
}

impl<'s> Cursor<'s> {
    fn new(text: &'s str) -> Self {
        Self {
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn peek_digit(&self) -> bool {
        self.peek().is_some_and(|b| b.is_ascii_digit())
    }

    /// Exactly `count` ASCII digits.
    fn digits(&mut self, count: usize) -> Option<u32> {
        let end = self.pos.checked_add(count)?;
        let chunk = self.bytes.get(self.pos..end)?;
        let mut value = 0_u32;
        for byte in chunk {
            if !byte.is_ascii_digit() {
                return None;
            }
            value = value * 10 + u32::from(byte - b'0');
        }
        self.pos = end;
        Some(value)
    }

    /// A fraction of a second in nanoseconds; digits past the ninth are
    /// truncated.
    fn fraction(&mut self) -> Option<u32> {
        let mut nanos = 0_u32;
        let mut seen = 0_usize;
        while let Some(byte) = self.peek().filter(u8::is_ascii_digit) {
            if seen < 9 {
                nanos = nanos * 10 + u32::from(byte - b'0');
            }
            seen += 1;
            self.pos += 1;
        }
        if seen == 0 {
            return None;
        }
        for _ in seen..9 {
            nanos *= 10;
        }
        Some(nanos)
    }
}

/// Parse the ISO-8601 subset accepted on the fast path.
///
/// Dates are `YYYY`, `YYYY-MM`, `YYYY-MM-DD` or `YYYYMMDD`, with `-` or `/`
/// used consistently. A time follows after `T` or a space as
/// `HH[:MM[:SS[.fraction]]]`, optionally followed by `Z`, `±HH`, `±HH:MM` or
/// `±HHMM`. Returns `None` when the text does not match.
#[must_use]
pub fn parse_iso8601(text: &str) -> Option<IsoDatetime> {
    let mut cursor = Cursor::new(text.trim());

    let year = i32::try_from(cursor.digits(4)?).ok()?;
    let (month, day) = if cursor.at_end() {
        (1, 1)
    } else if let Some(sep @ (b'-' | b'/')) = cursor.peek() {
        cursor.pos += 1;
        let month = cursor.digits(2)?;
        if cursor.at_end() {
            (month, 1)
        } else {
            if !cursor.eat(sep) {
                return None;
            }
            (month, cursor.digits(2)?)
        }
    } else if cursor.peek_digit() {
        (cursor.digits(2)?, cursor.digits(2)?)
    } else {
        return None;
    };
    let date = NaiveDate::from_ymd_opt(year, month, day)?;

    if cursor.at_end() {
        return Some(IsoDatetime {
            local: date.and_hms_opt(0, 0, 0)?,
            offset_minutes: None,
        });
    }

    if !(cursor.eat(b'T') || cursor.eat(b' ')) {
        return None;
    }
    let hour = cursor.digits(2)?;
    let (mut minute, mut second, mut nanos) = (0, 0, 0);
    if cursor.eat(b':') {
        minute = cursor.digits(2)?;
        if cursor.eat(b':') {
            second = cursor.digits(2)?;
            if cursor.eat(b'.') {
                nanos = cursor.fraction()?;
            }
        }
    }
    let time = NaiveTime::from_hms_nano_opt(hour, minute, second, nanos)?;

    let offset_minutes = match cursor.peek() {
        None => None,
        Some(b'Z') => {
            cursor.pos += 1;
            Some(0)
        }
        Some(sign @ (b'+' | b'-')) => {
            cursor.pos += 1;
            let hours = i32::try_from(cursor.digits(2)?).ok()?;
            let minutes = if cursor.eat(b':') || cursor.peek_digit() {
                i32::try_from(cursor.digits(2)?).ok()?
            } else {
                0
            };
            if hours > 23 || minutes > 59 {
                return None;
            }
            let total = hours * 60 + minutes;
            Some(if sign == b'-' { -total } else { total })
        }
        Some(_) => return None,
    };
    if !cursor.at_end() {
        return None;
    }

    Some(IsoDatetime {
        local: date.and_time(time),
        offset_minutes,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use super::parse_iso8601;

    fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32, ss: u32, nanos: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_nano_opt(hh, mm, ss, nanos))
            .expect("valid datetime")
    }

    #[test]
    fn date_forms() {
        let jan_first = at(2021, 1, 1, 0, 0, 0, 0);
        for text in ["2021", "2021-01", "2021-01-01", "2021/01/01", "20210101", " 2021-01-01 "] {
            let parsed = parse_iso8601(text).expect(text);
            assert_eq!(parsed.local, jan_first, "{text}");
            assert_eq!(parsed.offset_minutes, None);
        }
    }

    #[test]
    fn time_and_fraction() {
        let parsed = parse_iso8601("2021-03-04T05:06:07.123456789").expect("parses");
        assert_eq!(parsed.local, at(2021, 3, 4, 5, 6, 7, 123_456_789));

        let parsed = parse_iso8601("2021-03-04 05:06:07.5").expect("parses");
        assert_eq!(parsed.local, at(2021, 3, 4, 5, 6, 7, 500_000_000));

        let parsed = parse_iso8601("2021-03-04 05").expect("hour only");
        assert_eq!(parsed.local, at(2021, 3, 4, 5, 0, 0, 0));

        let parsed = parse_iso8601("2021-03-04T05:06:07.1234567891").expect("long fraction");
        assert_eq!(parsed.local, at(2021, 3, 4, 5, 6, 7, 123_456_789));
    }

    #[test]
    fn offsets() {
        let cases = [
            ("2021-01-01T00:00:00Z", 0),
            ("2021-01-01T00:00:00+02:00", 120),
            ("2021-01-01T00:00:00-0530", -330),
            ("2021-01-01 00:00+03", 180),
        ];
        for (text, minutes) in cases {
            let parsed = parse_iso8601(text).expect(text);
            assert_eq!(parsed.offset_minutes, Some(minutes), "{text}");
        }
        let parsed = parse_iso8601("2021-01-01T00:00:00+02:00").expect("parses");
        assert_eq!(
            parsed.offset().map(|o| o.local_minus_utc()),
            Some(2 * 3600)
        );
    }

    #[test]
    fn rejects_non_iso_text() {
        for text in [
            "",
            "bad-string",
            "01/02/2021",
            "2021-01/01",
            "2021-13-01",
            "2021-02-30",
            "2021-01-01+02:00",
            "2021-01-01T25:00",
            "2021-01-01T00:00:00+24:00",
            "2021-01-01T00:00:00 junk",
            "Jan 1 2021",
        ] {
            assert!(parse_iso8601(text).is_none(), "{text:?} should not parse");
        }
    }
}
