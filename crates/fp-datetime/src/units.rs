use std::fmt;
use std::str::FromStr;

use chrono::{Months, NaiveDate, NaiveDateTime, TimeDelta};
use fp_runtime::{ConversionLedger, ErrorPolicy, FailureKind, Resolution};
use serde::{Deserialize, Serialize};

use crate::convert::{ArrayToDatetimeOptions, DatetimeArray, array_to_datetime_with};
use crate::parser::FormatListParser;
use crate::{DateLike, DatetimeError, NAT, NAT_STRINGS, naive_to_nanos};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    #[serde(rename = "Y")]
    Year,
    #[serde(rename = "M")]
    Month,
    #[serde(rename = "W")]
    Week,
    #[serde(rename = "D")]
    Day,
    #[serde(rename = "h")]
    Hour,
    #[serde(rename = "m")]
    Minute,
    #[serde(rename = "s")]
    Second,
    #[serde(rename = "ms")]
    Millisecond,
    #[serde(rename = "us")]
    Microsecond,
    #[serde(rename = "ns")]
    Nanosecond,
}

impl TimeUnit {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Year => "Y",
            Self::Month => "M",
            Self::Week => "W",
            Self::Day => "D",
            Self::Hour => "h",
            Self::Minute => "m",
            Self::Second => "s",
            Self::Millisecond => "ms",
            Self::Microsecond => "us",
            Self::Nanosecond => "ns",
        }
    }

    /// Nanoseconds per unit. Years and months use their mean lengths.
    #[must_use]
    pub fn multiplier(self) -> i64 {
        match self {
            Self::Year => 31_556_952_000_000_000,
            Self::Month => 2_629_746_000_000_000,
            Self::Week => 604_800_000_000_000,
            Self::Day => 86_400_000_000_000,
            Self::Hour => 3_600_000_000_000,
            Self::Minute => 60_000_000_000,
            Self::Second => 1_000_000_000,
            Self::Millisecond => 1_000_000,
            Self::Microsecond => 1_000,
            Self::Nanosecond => 1,
        }
    }

    /// Decimal digits kept from the fractional part of a float.
    #[must_use]
    pub fn precision(self) -> i32 {
        match self {
            Self::Millisecond => 6,
            Self::Microsecond => 3,
            Self::Nanosecond => 0,
            _ => 9,
        }
    }

    /// Wall time of a datetime64 count of this unit, without the nanosecond
    /// bounds. Years and months count calendar periods from the epoch.
    pub(crate) fn datetime64_to_naive(self, value: i64) -> Option<NaiveDateTime> {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?.and_hms_opt(0, 0, 0)?;
        let delta = match self {
            Self::Year | Self::Month => {
                let months = if self == Self::Year {
                    value.checked_mul(12)?
                } else {
                    value
                };
                let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
                return if months >= 0 {
                    epoch.checked_add_months(magnitude)
                } else {
                    epoch.checked_sub_months(magnitude)
                };
            }
            Self::Week => TimeDelta::try_weeks(value)?,
            Self::Day => TimeDelta::try_days(value)?,
            Self::Hour => TimeDelta::try_hours(value)?,
            Self::Minute => TimeDelta::try_minutes(value)?,
            Self::Second => TimeDelta::try_seconds(value)?,
            Self::Millisecond => TimeDelta::try_milliseconds(value)?,
            Self::Microsecond => TimeDelta::microseconds(value),
            Self::Nanosecond => TimeDelta::nanoseconds(value),
        };
        epoch.checked_add_signed(delta)
    }

    /// Nanoseconds for a datetime64 count of this unit.
    pub(crate) fn datetime64_to_nanos(self, value: i64) -> Result<i64, DatetimeError> {
        if value == NAT {
            return Ok(NAT);
        }
        let out_of_bounds = || DatetimeError::OutOfBounds(format!("{value} {self}"));
        match self {
            Self::Year | Self::Month => {
                let local = self.datetime64_to_naive(value).ok_or_else(out_of_bounds)?;
                naive_to_nanos(local)
            }
            _ => value
                .checked_mul(self.multiplier())
                .filter(|v| *v != NAT)
                .ok_or_else(out_of_bounds),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = DatetimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Y" => Ok(Self::Year),
            "M" => Ok(Self::Month),
            "W" => Ok(Self::Week),
            "D" | "d" => Ok(Self::Day),
            "h" => Ok(Self::Hour),
            "m" => Ok(Self::Minute),
            "s" => Ok(Self::Second),
            "ms" => Ok(Self::Millisecond),
            "us" => Ok(Self::Microsecond),
            "ns" => Ok(Self::Nanosecond),
            other => Err(DatetimeError::InvalidUnit(other.to_owned())),
        }
    }
}

// ── Scalar scaling ─────────────────────────────────────────────────────

fn scale_int(value: i64, unit: TimeUnit) -> Option<i64> {
    value.checked_mul(unit.multiplier()).filter(|v| *v != NAT)
}

fn scale_float(value: f64, unit: TimeUnit) -> Option<i64> {
    if !value.is_finite() {
        return None;
    }
    let base = value.trunc();
    // i64::MAX is not exactly representable; 2^63 is the first float past it.
    if base >= 9_223_372_036_854_775_808.0 || base < -9_223_372_036_854_775_808.0 {
        return None;
    }
    let multiplier = unit.multiplier();
    let mut frac = value - base;
    let digits = unit.precision();
    if digits > 0 {
        let scale = 10_f64.powi(digits);
        frac = (frac * scale).round() / scale;
    }
    let scaled_frac = (frac * multiplier as f64).trunc() as i64;
    (base as i64)
        .checked_mul(multiplier)?
        .checked_add(scaled_frac)
        .filter(|v| *v != NAT)
}

/// Scale a numeric `value` counted in `unit` to nanoseconds.
///
/// The fractional part is rounded to the unit's precision before scaling.
pub fn cast_from_unit(value: f64, unit: &str) -> Result<i64, DatetimeError> {
    let unit = unit.parse::<TimeUnit>()?;
    scale_float(value, unit).ok_or_else(|| {
        DatetimeError::OutOfBounds(format!("cannot convert input {value} with the unit '{unit}'"))
    })
}

// ── Array conversion ───────────────────────────────────────────────────

/// Input to [`array_with_unit_to_datetime`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericInput<'a> {
    Int64(&'a [i64]),
    Float64(&'a [f64]),
    Object(&'a [DateLike]),
}

impl NumericInput<'_> {
    fn len(&self) -> usize {
        match self {
            Self::Int64(values) => values.len(),
            Self::Float64(values) => values.len(),
            Self::Object(values) => values.len(),
        }
    }

    fn get(&self, i: usize) -> DateLike {
        match self {
            Self::Int64(values) => DateLike::Int(values[i]),
            Self::Float64(values) => DateLike::Float(values[i]),
            Self::Object(values) => values[i].clone(),
        }
    }

    fn to_objects(self) -> Vec<DateLike> {
        (0..self.len()).map(|i| self.get(i)).collect()
    }
}

/// Convert numbers counted in `unit` to nanoseconds.
pub fn array_with_unit_to_datetime(
    values: NumericInput<'_>,
    unit: &str,
    errors: ErrorPolicy,
) -> Result<DatetimeArray, DatetimeError> {
    array_with_unit_to_datetime_with_ledger(values, unit, errors, None)
}

pub fn array_with_unit_to_datetime_with_ledger(
    values: NumericInput<'_>,
    unit: &str,
    errors: ErrorPolicy,
    mut ledger: Option<&mut ConversionLedger>,
) -> Result<DatetimeArray, DatetimeError> {
    let unit = unit.parse::<TimeUnit>()?;

    if unit == TimeUnit::Nanosecond {
        if let NumericInput::Int64(ints) = values {
            return Ok(DatetimeArray::Int64 {
                values: ints.to_vec(),
                tz: None,
            });
        }
        let options = ArrayToDatetimeOptions {
            errors,
            ..ArrayToDatetimeOptions::default()
        };
        return array_to_datetime_with(&values.to_objects(), &options, &FormatListParser::new(), ledger);
    }

    if let (NumericInput::Int64(ints), ErrorPolicy::Raise) = (values, errors) {
        return scale_ints_fast(ints, unit).map(|values| DatetimeArray::Int64 { values, tz: None });
    }

    let mut out = Vec::with_capacity(values.len());
    for position in 0..values.len() {
        let value = values.get(position);
        let (kind, scaled, message) = match &value {
            DateLike::Null(_) | DateLike::NaT => {
                out.push(NAT);
                continue;
            }
            DateLike::Int(v) if *v == NAT => {
                out.push(NAT);
                continue;
            }
            DateLike::Float(v) if v.is_nan() => {
                out.push(NAT);
                continue;
            }
            DateLike::Int(v) => (
                FailureKind::OutOfBounds,
                scale_int(*v, unit),
                format!("cannot convert input {v} with the unit '{unit}'"),
            ),
            DateLike::Float(v) => (
                FailureKind::OutOfBounds,
                scale_float(*v, unit),
                format!("cannot convert input {v} with the unit '{unit}'"),
            ),
            DateLike::Str(text) if text.is_empty() || NAT_STRINGS.contains(&text.as_str()) => {
                out.push(NAT);
                continue;
            }
            DateLike::Str(text) => match text.trim().parse::<f64>() {
                Ok(number) => (
                    FailureKind::OutOfBounds,
                    scale_float(number, unit),
                    format!("cannot convert input {text} with the unit '{unit}'"),
                ),
                Err(_) => (
                    FailureKind::NonConvertible,
                    None,
                    format!("non convertible value {text} with the unit '{unit}'"),
                ),
            },
            other => (
                FailureKind::NonConvertible,
                None,
                format!("unit='{unit}' not valid with non-numerical val='{other}'"),
            ),
        };

        if let Some(scaled) = scaled {
            out.push(scaled);
            continue;
        }
        match errors.decide(kind, Some(position), message.clone(), ledger.as_deref_mut()) {
            Resolution::Substitute => out.push(NAT),
            Resolution::Propagate => {
                return Err(if kind == FailureKind::OutOfBounds {
                    DatetimeError::OutOfBounds(message)
                } else {
                    DatetimeError::NonConvertible(message)
                });
            }
            Resolution::Fallback => return Ok(DatetimeArray::Object(redo_as_objects(values, unit))),
        }
    }
    Ok(DatetimeArray::Int64 {
        values: out,
        tz: None,
    })
}

/// Raise-mode integer path: NaT entries are masked out of the bounds check.
fn scale_ints_fast(ints: &[i64], unit: TimeUnit) -> Result<Vec<i64>, DatetimeError> {
    let multiplier = unit.multiplier();
    let limit = i64::MAX as f64;
    let overflow = ints
        .iter()
        .filter(|v| **v != NAT)
        .find(|v| (**v as f64 * multiplier as f64).abs() > limit);
    if let Some(value) = overflow {
        return Err(DatetimeError::OutOfBounds(format!(
            "cannot convert input {value} with the unit '{unit}'"
        )));
    }
    ints.iter()
        .map(|v| {
            if *v == NAT {
                return Ok(NAT);
            }
            scale_int(*v, unit).ok_or_else(|| {
                DatetimeError::OutOfBounds(format!("cannot convert input {v} with the unit '{unit}'"))
            })
        })
        .collect()
}

/// Ignore-mode redo: numbers become timestamps when they fit and stay
/// themselves otherwise; missing values become NaT.
fn redo_as_objects(values: NumericInput<'_>, unit: TimeUnit) -> Vec<DateLike> {
    (0..values.len())
        .map(|i| {
            let value = values.get(i);
            let scaled = match &value {
                DateLike::Null(_) | DateLike::NaT => return DateLike::NaT,
                DateLike::Int(v) if *v == NAT => return DateLike::NaT,
                DateLike::Float(v) if v.is_nan() => return DateLike::NaT,
                DateLike::Int(v) => scale_int(*v, unit),
                DateLike::Float(v) => scale_float(*v, unit),
                DateLike::Str(text) if text.is_empty() || NAT_STRINGS.contains(&text.as_str()) => {
                    return DateLike::NaT;
                }
                _ => None,
            };
            scaled.map_or(value, DateLike::from_nanos)
        })
        .collect()
}
