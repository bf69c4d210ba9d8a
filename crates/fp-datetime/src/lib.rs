#![forbid(unsafe_code)]

//! Conversion between heterogeneous date-like values and 64-bit nanosecond
//! timestamps.
//!
//! Every instant is an `i64` count of nanoseconds since the UNIX epoch in
//! UTC. [`NAT`] marks a missing value, which leaves `[i64::MIN + 1, i64::MAX]`
//! as the representable range.

mod boxing;
mod convert;
mod format;
mod iso8601;
mod parser;
mod tz;
mod units;

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use fp_types::{NullKind, Scalar};
use thiserror::Error;

pub use boxing::{BoxKind, BoxedDatetime, ints_to_pydatetime};
pub use convert::{
    ArrayToDatetimeOptions, DatetimeArray, ParsedDatelike, array_to_datetime,
    array_to_datetime_object, array_to_datetime_with, ignore_out_of_bounds_fallback,
    parse_datelike,
};
pub use format::{FormatOptions, Timestamp, format_array_from_datetime};
pub use iso8601::{IsoDatetime, parse_iso8601};
pub use parser::{DateStringParser, FormatListParser};
pub use tz::{TableKind, TimezoneInfo, TransitionTable, Tz, TzKind};
pub use units::{
    NumericInput, TimeUnit, array_with_unit_to_datetime, array_with_unit_to_datetime_with_ledger,
    cast_from_unit,
};

/// The missing-timestamp sentinel.
pub const NAT: i64 = i64::MIN;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Strings that read as a missing timestamp.
pub const NAT_STRINGS: [&str; 6] = ["NaT", "nat", "NAT", "nan", "NaN", "NAN"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatetimeError {
    #[error("Out of bounds nanosecond timestamp: {0}")]
    OutOfBounds(String),
    #[error("cannot cast unit {0}")]
    InvalidUnit(String),
    #[error("{0}")]
    NonConvertible(String),
    #[error("mixed datetimes and integers in passed array")]
    MixedDatetimesAndIntegers,
    #[error("tz-aware datetime cannot be converted to datetime64 unless utc is set")]
    TzAwareRequiresUtc,
    #[error("mixed timezone offsets: {0}")]
    MixedOffsets(String),
    #[error("tz should be None when converting to date")]
    DateBoxWithTz,
    #[error("Unknown string format: {0}")]
    Unparseable(String),
    #[error("box must be one of 'datetime', 'date', 'time' or 'timestamp', got {0:?}")]
    InvalidBox(String),
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}

/// One element of a date-like input array.
#[derive(Debug, Clone, PartialEq)]
pub enum DateLike {
    Null(NullKind),
    NaT,
    /// A wall-clock datetime, optionally tz-aware.
    Datetime {
        local: NaiveDateTime,
        offset: Option<FixedOffset>,
    },
    Date(NaiveDate),
    Datetime64 {
        value: i64,
        unit: TimeUnit,
    },
    Int(i64),
    Float(f64),
    Str(String),
    /// A value that is not date-like at all, carrying its type name.
    Other(String),
}

impl DateLike {
    #[must_use]
    pub fn naive(local: NaiveDateTime) -> Self {
        Self::Datetime {
            local,
            offset: None,
        }
    }

    #[must_use]
    pub fn aware(local: NaiveDateTime, offset: FixedOffset) -> Self {
        Self::Datetime {
            local,
            offset: Some(offset),
        }
    }

    /// A UTC datetime for `value`, or NaT when `value` is [`NAT`].
    #[must_use]
    pub fn from_nanos(value: i64) -> Self {
        if value == NAT {
            Self::NaT
        } else {
            Self::naive(nanos_to_naive(value))
        }
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Null(_) | Self::NaT)
    }
}

impl From<&str> for DateLike {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<i64> for DateLike {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for DateLike {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&Scalar> for DateLike {
    fn from(value: &Scalar) -> Self {
        match value {
            Scalar::Null(NullKind::NaT) => Self::NaT,
            Scalar::Null(kind) => Self::Null(*kind),
            Scalar::Bool(_) => Self::Other("bool".to_owned()),
            Scalar::Int64(v) => Self::Int(*v),
            Scalar::Float64(v) => Self::Float(*v),
            Scalar::Utf8(v) => Self::Str(v.clone()),
            Scalar::Datetime64(v) => Self::Datetime64 {
                value: *v,
                unit: TimeUnit::Nanosecond,
            },
        }
    }
}

impl fmt::Display for DateLike {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null(NullKind::NaN) => f.write_str("nan"),
            Self::Null(_) => f.write_str("None"),
            Self::NaT => f.write_str("NaT"),
            Self::Datetime { local, offset } => match offset {
                Some(offset) => write!(f, "{local} {offset}"),
                None => write!(f, "{local}"),
            },
            Self::Date(date) => write!(f, "{date}"),
            Self::Datetime64 { value, unit } => write!(f, "datetime64({value}, '{unit}')"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
            Self::Other(type_name) => write!(f, "<{type_name}>"),
        }
    }
}

// ── Nanosecond arithmetic ──────────────────────────────────────────────

/// Nanoseconds since the epoch for a naive UTC wall time.
pub(crate) fn naive_to_nanos(local: NaiveDateTime) -> Result<i64, DatetimeError> {
    local
        .and_utc()
        .timestamp_nanos_opt()
        .filter(|value| *value != NAT)
        .ok_or_else(|| DatetimeError::OutOfBounds(local.to_string()))
}

/// Nanoseconds since the epoch for a wall time observed at `offset`.
pub(crate) fn local_to_nanos(
    local: NaiveDateTime,
    offset: FixedOffset,
) -> Result<i64, DatetimeError> {
    let shift = i64::from(offset.local_minus_utc()) * NANOS_PER_SECOND;
    naive_to_nanos(local)?
        .checked_sub(shift)
        .filter(|value| *value != NAT)
        .ok_or_else(|| DatetimeError::OutOfBounds(format!("{local} {offset}")))
}

#[must_use]
pub(crate) fn nanos_to_naive(value: i64) -> NaiveDateTime {
    DateTime::from_timestamp_nanos(value).naive_utc()
}

/// Wall time of `value` shifted by `offset_seconds`, saturating at the
/// representable edges.
#[must_use]
pub(crate) fn shifted_naive(value: i64, offset_seconds: i32) -> NaiveDateTime {
    let shift = i64::from(offset_seconds) * NANOS_PER_SECOND;
    let shifted = value.saturating_add(shift);
    nanos_to_naive(if shifted == NAT { NAT + 1 } else { shifted })
}
