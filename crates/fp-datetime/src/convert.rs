use std::collections::BTreeSet;

use chrono::{FixedOffset, Local, Utc};
use fp_runtime::{ConversionLedger, ErrorPolicy, FailureKind, Resolution};
use fp_types::NullKind;
use serde::{Deserialize, Serialize};

use crate::iso8601::parse_iso8601;
use crate::parser::{DateStringParser, FormatListParser};
use crate::tz::offset_from_seconds;
use crate::{
    DateLike, DatetimeError, NAT, NAT_STRINGS, local_to_nanos, naive_to_nanos,
};

/// Options for [`array_to_datetime`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrayToDatetimeOptions {
    pub errors: ErrorPolicy,
    pub dayfirst: bool,
    pub yearfirst: bool,
    /// Convert tz-aware inputs to UTC instead of rejecting them.
    pub utc: bool,
    /// Only accept ISO-8601 strings.
    pub require_iso8601: bool,
}

impl ArrayToDatetimeOptions {
    #[must_use]
    pub fn with_errors(errors: ErrorPolicy) -> Self {
        Self {
            errors,
            ..Self::default()
        }
    }
}

/// Result of an array conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum DatetimeArray {
    /// Nanosecond values, with the offset every aware input shared.
    Int64 {
        values: Vec<i64>,
        tz: Option<FixedOffset>,
    },
    /// Boxed values from one of the object fallbacks.
    Object(Vec<DateLike>),
}

impl DatetimeArray {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Int64 { values, .. } => values.len(),
            Self::Object(values) => values.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn values(&self) -> Option<&[i64]> {
        match self {
            Self::Int64 { values, .. } => Some(values),
            Self::Object(_) => None,
        }
    }

    #[must_use]
    pub fn tz(&self) -> Option<FixedOffset> {
        match self {
            Self::Int64 { tz, .. } => *tz,
            Self::Object(_) => None,
        }
    }

    #[must_use]
    pub fn objects(&self) -> Option<&[DateLike]> {
        match self {
            Self::Object(values) => Some(values),
            Self::Int64 { .. } => None,
        }
    }
}

/// One converted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedDatelike {
    /// UTC nanoseconds, or [`NAT`].
    pub value: i64,
    /// The offset the input was written with, if any.
    pub offset: Option<FixedOffset>,
}

// ── Per-element conversion ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum OffsetMark {
    Naive,
    Fixed(i32),
}

#[derive(Debug, Default)]
struct Seen {
    datetime: bool,
    integer: bool,
    datetime_offset: bool,
    offsets: BTreeSet<OffsetMark>,
}

enum Failure {
    OutOfBounds(DatetimeError),
    /// Diverts the array to the object fallback unless coercing.
    Invalid(FailureKind, DatetimeError),
    NotIso(DatetimeError),
    /// Fails the call under every policy.
    Fatal(DatetimeError),
}

impl Failure {
    fn into_error(self) -> DatetimeError {
        match self {
            Self::OutOfBounds(err) | Self::Invalid(_, err) | Self::NotIso(err) | Self::Fatal(err) => {
                err
            }
        }
    }
}

fn missing() -> ParsedDatelike {
    ParsedDatelike {
        value: NAT,
        offset: None,
    }
}

fn naive(value: i64) -> ParsedDatelike {
    ParsedDatelike {
        value,
        offset: None,
    }
}

/// Nanoseconds from a float count, truncating toward zero.
fn float_to_nanos(value: f64) -> Option<i64> {
    let truncated = value.trunc();
    if !(-9_223_372_036_854_775_808.0..9_223_372_036_854_775_808.0).contains(&truncated) {
        return None;
    }
    Some(truncated as i64).filter(|v| *v != NAT)
}

fn convert_one(
    value: &DateLike,
    options: &ArrayToDatetimeOptions,
    parser: &dyn DateStringParser,
    seen: &mut Seen,
) -> Result<ParsedDatelike, Failure> {
    match value {
        DateLike::Null(_) | DateLike::NaT => Ok(missing()),
        DateLike::Datetime { local, offset } => {
            seen.datetime = true;
            match offset {
                Some(_) if !options.utc => Err(Failure::Fatal(DatetimeError::TzAwareRequiresUtc)),
                Some(offset) => local_to_nanos(*local, *offset)
                    .map(|value| ParsedDatelike {
                        value,
                        offset: Some(*offset),
                    })
                    .map_err(Failure::OutOfBounds),
                None => naive_to_nanos(*local).map(naive).map_err(Failure::OutOfBounds),
            }
        }
        DateLike::Date(date) => {
            seen.datetime = true;
            let midnight = date
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| Failure::OutOfBounds(DatetimeError::OutOfBounds(date.to_string())))?;
            naive_to_nanos(midnight).map(naive).map_err(Failure::OutOfBounds)
        }
        DateLike::Datetime64 { value, unit } => {
            seen.datetime = true;
            unit.datetime64_to_nanos(*value)
                .map(naive)
                .map_err(Failure::OutOfBounds)
        }
        DateLike::Int(v) => {
            seen.integer = true;
            Ok(naive(*v))
        }
        DateLike::Float(v) => {
            if v.is_nan() {
                return Ok(missing());
            }
            seen.integer = true;
            float_to_nanos(*v)
                .map(naive)
                .ok_or_else(|| Failure::OutOfBounds(DatetimeError::OutOfBounds(v.to_string())))
        }
        DateLike::Str(text) => convert_string(text, options, parser, seen),
        DateLike::Other(type_name) => Err(Failure::Invalid(
            FailureKind::NonConvertible,
            DatetimeError::NonConvertible(format!("<{type_name}> is not convertible to datetime")),
        )),
    }
}

fn convert_string(
    text: &str,
    options: &ArrayToDatetimeOptions,
    parser: &dyn DateStringParser,
    seen: &mut Seen,
) -> Result<ParsedDatelike, Failure> {
    if text.is_empty() || NAT_STRINGS.contains(&text) {
        return Ok(missing());
    }

    if let Some(iso) = parse_iso8601(text) {
        return match iso.offset() {
            Some(offset) => {
                seen.datetime_offset = true;
                seen.offsets.insert(OffsetMark::Fixed(offset.local_minus_utc()));
                local_to_nanos(iso.local, offset)
                    .map(|value| ParsedDatelike {
                        value,
                        offset: Some(offset),
                    })
                    .map_err(Failure::OutOfBounds)
            }
            None => {
                seen.offsets.insert(OffsetMark::Naive);
                naive_to_nanos(iso.local).map(naive).map_err(Failure::OutOfBounds)
            }
        };
    }

    match text {
        "now" => return Utc::now().timestamp_nanos_opt().map(naive).ok_or_else(|| {
            Failure::OutOfBounds(DatetimeError::OutOfBounds(text.to_owned()))
        }),
        "today" => {
            return naive_to_nanos(Local::now().naive_local())
                .map(naive)
                .map_err(Failure::OutOfBounds);
        }
        _ => {}
    }

    if options.require_iso8601 {
        return Err(Failure::NotIso(DatetimeError::NonConvertible(format!(
            "time data {text} doesn't match format specified"
        ))));
    }

    let (local, offset) = parser
        .parse(text, options.dayfirst, options.yearfirst)
        .map_err(|err| Failure::Invalid(FailureKind::Unparseable, err))?;
    match offset {
        Some(offset) => {
            seen.datetime_offset = true;
            seen.offsets.insert(OffsetMark::Fixed(offset.local_minus_utc()));
            local_to_nanos(local, offset)
                .map(|value| ParsedDatelike {
                    value,
                    offset: Some(offset),
                })
                .map_err(Failure::OutOfBounds)
        }
        None => {
            seen.offsets.insert(OffsetMark::Naive);
            naive_to_nanos(local).map(naive).map_err(Failure::OutOfBounds)
        }
    }
}

/// Convert a single date-like value.
///
/// Strings try the ISO-8601 fast path, then `"now"` and `"today"`, then the
/// default [`FormatListParser`]. The error policy in `options` is not
/// consulted: every failure is returned.
pub fn parse_datelike(
    value: &DateLike,
    options: &ArrayToDatetimeOptions,
) -> Result<ParsedDatelike, DatetimeError> {
    let mut seen = Seen::default();
    convert_one(value, options, &FormatListParser::new(), &mut seen).map_err(Failure::into_error)
}

// ── Array conversion ───────────────────────────────────────────────────

/// Convert `values` to nanoseconds with the default string parser.
pub fn array_to_datetime(
    values: &[DateLike],
    options: &ArrayToDatetimeOptions,
) -> Result<DatetimeArray, DatetimeError> {
    array_to_datetime_with(values, options, &FormatListParser::new(), None)
}

/// Convert `values` to nanoseconds, recording every policy decision in
/// `ledger` when one is supplied.
pub fn array_to_datetime_with(
    values: &[DateLike],
    options: &ArrayToDatetimeOptions,
    parser: &dyn DateStringParser,
    mut ledger: Option<&mut ConversionLedger>,
) -> Result<DatetimeArray, DatetimeError> {
    let policy = options.errors;
    let mut seen = Seen::default();
    let mut result = Vec::with_capacity(values.len());

    for (position, value) in values.iter().enumerate() {
        let failure = match convert_one(value, options, parser, &mut seen) {
            Ok(parsed) => {
                result.push(parsed.value);
                continue;
            }
            Err(failure) => failure,
        };
        match failure {
            Failure::Fatal(err) => return Err(err),
            Failure::OutOfBounds(err) => {
                match policy.decide(FailureKind::OutOfBounds, Some(position), err.to_string(), ledger.as_deref_mut()) {
                    Resolution::Propagate => return Err(err),
                    Resolution::Substitute => result.push(NAT),
                    Resolution::Fallback => {
                        return Ok(DatetimeArray::Object(ignore_out_of_bounds_fallback(values)));
                    }
                }
            }
            Failure::Invalid(kind, err) => {
                match policy.decide(kind, Some(position), err.to_string(), ledger.as_deref_mut()) {
                    Resolution::Substitute => result.push(NAT),
                    Resolution::Propagate | Resolution::Fallback => {
                        return object_fallback(values, options, parser, ledger);
                    }
                }
            }
            Failure::NotIso(err) => {
                match policy.decide(FailureKind::NonConvertible, Some(position), err.to_string(), ledger.as_deref_mut()) {
                    Resolution::Propagate => return Err(err),
                    Resolution::Substitute => result.push(NAT),
                    Resolution::Fallback => return Ok(DatetimeArray::Object(values.to_vec())),
                }
            }
        }
    }

    if seen.datetime && seen.integer {
        let detail = DatetimeError::MixedDatetimesAndIntegers.to_string();
        match policy.decide(FailureKind::MixedTypes, None, detail, ledger.as_deref_mut()) {
            Resolution::Propagate => return Err(DatetimeError::MixedDatetimesAndIntegers),
            Resolution::Fallback => return object_fallback(values, options, parser, ledger),
            Resolution::Substitute => {
                for (slot, value) in result.iter_mut().zip(values) {
                    if matches!(value, DateLike::Int(_) | DateLike::Float(_)) {
                        *slot = NAT;
                    }
                }
            }
        }
    }

    let mut tz = None;
    if seen.datetime_offset {
        if seen.offsets.len() > 1 {
            let marks: Vec<String> = seen
                .offsets
                .iter()
                .map(|mark| match mark {
                    OffsetMark::Naive => "naive".to_owned(),
                    OffsetMark::Fixed(seconds) => offset_from_seconds(*seconds).to_string(),
                })
                .collect();
            let err = DatetimeError::MixedOffsets(marks.join(", "));
            return match policy.decide(FailureKind::MixedOffsets, None, err.to_string(), ledger.as_deref_mut()) {
                Resolution::Propagate => Err(err),
                Resolution::Fallback | Resolution::Substitute => object_fallback(values, options, parser, ledger),
            };
        }
        if !options.utc
            && let Some(OffsetMark::Fixed(seconds)) = seen.offsets.first()
        {
            tz = Some(offset_from_seconds(*seconds));
            tracing::debug!("all {} values share offset {seconds}s", values.len());
        }
    }

    Ok(DatetimeArray::Int64 { values: result, tz })
}

fn object_fallback(
    values: &[DateLike],
    options: &ArrayToDatetimeOptions,
    parser: &dyn DateStringParser,
    ledger: Option<&mut ConversionLedger>,
) -> Result<DatetimeArray, DatetimeError> {
    tracing::debug!("converting {} values through the object fallback", values.len());
    array_to_datetime_object(values, options, parser, ledger).map(DatetimeArray::Object)
}

/// Box every value as a datetime object, parsing strings individually.
///
/// Strings keep their own offsets. Under `ignore` any failure returns the
/// input unchanged.
pub fn array_to_datetime_object(
    values: &[DateLike],
    options: &ArrayToDatetimeOptions,
    parser: &dyn DateStringParser,
    mut ledger: Option<&mut ConversionLedger>,
) -> Result<Vec<DateLike>, DatetimeError> {
    let policy = options.errors;
    let mut out = Vec::with_capacity(values.len());

    for (position, value) in values.iter().enumerate() {
        match value {
            DateLike::Null(_) | DateLike::NaT | DateLike::Datetime { .. } => out.push(value.clone()),
            DateLike::Float(v) if v.is_nan() => out.push(value.clone()),
            DateLike::Str(text) if text.is_empty() || NAT_STRINGS.contains(&text.as_str()) => {
                out.push(DateLike::Str("NaT".to_owned()));
            }
            DateLike::Str(text) => {
                let parsed = parser
                    .parse(text, options.dayfirst, options.yearfirst)
                    .and_then(|(local, offset)| {
                        naive_to_nanos(local)?;
                        Ok(DateLike::Datetime { local, offset })
                    });
                match parsed {
                    Ok(boxed) => out.push(boxed),
                    Err(err) => {
                        let kind = if matches!(err, DatetimeError::OutOfBounds(_)) {
                            FailureKind::OutOfBounds
                        } else {
                            FailureKind::Unparseable
                        };
                        match policy.decide(kind, Some(position), err.to_string(), ledger.as_deref_mut()) {
                            Resolution::Propagate => return Err(err),
                            Resolution::Substitute => out.push(DateLike::NaT),
                            Resolution::Fallback => return Ok(values.to_vec()),
                        }
                    }
                }
            }
            other => {
                if policy.is_raise() {
                    return Err(DatetimeError::NonConvertible(format!(
                        "{other} is not convertible to datetime"
                    )));
                }
                tracing::warn!("object fallback returns the input unchanged at {position}: {other}");
                return Ok(values.to_vec());
            }
        }
    }
    Ok(out)
}

/// Box every value after an out-of-bounds failure under `ignore`.
///
/// Float NaN stays NaN, other nulls become NaT, datetime64 values become
/// datetimes when they fit a wall time, everything else passes through.
#[must_use]
pub fn ignore_out_of_bounds_fallback(values: &[DateLike]) -> Vec<DateLike> {
    tracing::warn!("out-of-bounds value under ignore, boxing {} values", values.len());
    values
        .iter()
        .map(|value| match value {
            DateLike::Null(NullKind::NaN) | DateLike::Float(_) => value.clone(),
            DateLike::Null(_) | DateLike::NaT => DateLike::NaT,
            DateLike::Datetime64 { value: raw, .. } if *raw == NAT => DateLike::NaT,
            DateLike::Datetime64 { value: raw, unit } => unit
                .datetime64_to_naive(*raw)
                .map_or_else(|| value.clone(), DateLike::naive),
            other => other.clone(),
        })
        .collect()
}
