use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::format::Timestamp;
use crate::tz::{TimezoneInfo, Tz, TzKind};
use crate::{DatetimeError, NAT, nanos_to_naive, shifted_naive};

/// The boxed type produced by [`ints_to_pydatetime`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxKind {
    #[default]
    Datetime,
    Timestamp,
    Date,
    Time,
}

impl FromStr for BoxKind {
    type Err = DatetimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "datetime" => Ok(Self::Datetime),
            "timestamp" => Ok(Self::Timestamp),
            "date" => Ok(Self::Date),
            "time" => Ok(Self::Time),
            other => Err(DatetimeError::InvalidBox(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoxedDatetime {
    NaT,
    /// Wall time at microsecond precision.
    Datetime {
        wall: NaiveDateTime,
        tz: Option<Tz>,
    },
    Timestamp(Timestamp),
    Date(NaiveDate),
    /// Time of day at microsecond precision.
    Time {
        time: NaiveTime,
        tz: Option<Tz>,
    },
}

impl BoxedDatetime {
    #[must_use]
    pub fn is_nat(&self) -> bool {
        matches!(self, Self::NaT)
    }
}

type Constructor = fn(i64, NaiveDateTime, Option<Tz>, Option<&str>) -> BoxedDatetime;

fn truncate_to_micros(wall: NaiveDateTime) -> NaiveDateTime {
    wall.with_nanosecond(wall.nanosecond() / 1_000 * 1_000)
        .unwrap_or(wall)
}

fn create_datetime(_: i64, wall: NaiveDateTime, tz: Option<Tz>, _: Option<&str>) -> BoxedDatetime {
    BoxedDatetime::Datetime {
        wall: truncate_to_micros(wall),
        tz,
    }
}

fn create_timestamp(value: i64, _: NaiveDateTime, tz: Option<Tz>, freq: Option<&str>) -> BoxedDatetime {
    BoxedDatetime::Timestamp(Timestamp {
        value,
        tz,
        freq: freq.map(str::to_owned),
    })
}

fn create_date(_: i64, wall: NaiveDateTime, _: Option<Tz>, _: Option<&str>) -> BoxedDatetime {
    BoxedDatetime::Date(wall.date())
}

fn create_time(_: i64, wall: NaiveDateTime, tz: Option<Tz>, _: Option<&str>) -> BoxedDatetime {
    BoxedDatetime::Time {
        time: truncate_to_micros(wall).time(),
        tz,
    }
}

/// Box nanosecond values as datetimes, timestamps, dates or times.
///
/// Wall fields are computed in `tz` when one is given; the boxed value
/// carries the zone annotation in effect at its instant. NaT boxes to
/// [`BoxedDatetime::NaT`] for every kind.
pub fn ints_to_pydatetime<Z: TimezoneInfo>(
    values: &[i64],
    tz: Option<&Z>,
    freq: Option<&str>,
    kind: BoxKind,
) -> Result<Vec<BoxedDatetime>, DatetimeError> {
    let create: Constructor = match kind {
        BoxKind::Date if tz.is_some() => return Err(DatetimeError::DateBoxWithTz),
        BoxKind::Date => create_date,
        BoxKind::Datetime => create_datetime,
        BoxKind::Timestamp => create_timestamp,
        BoxKind::Time => create_time,
    };

    let box_each = |wall_at: &dyn Fn(i64) -> (NaiveDateTime, Option<Tz>)| {
        values
            .iter()
            .map(|value| {
                if *value == NAT {
                    return BoxedDatetime::NaT;
                }
                let (wall, annotation) = wall_at(*value);
                create(*value, wall, annotation, freq)
            })
            .collect::<Vec<_>>()
    };

    let Some(zone) = tz else {
        return Ok(box_each(&|value| (nanos_to_naive(value), None)));
    };

    let boxed = match zone.kind() {
        TzKind::Utc => {
            let annotation = zone.annotation();
            box_each(&|value| (nanos_to_naive(value), Some(annotation.clone())))
        }
        TzKind::Local => {
            let annotation = zone.annotation();
            box_each(&|value| {
                let offset = zone.utc_offset_at(value).local_minus_utc();
                (shifted_naive(value, offset), Some(annotation.clone()))
            })
        }
        TzKind::Static => {
            let delta = zone.transitions().1.first().copied().unwrap_or(0);
            let annotation = zone.annotation();
            box_each(&|value| (shifted_naive(value, delta), Some(annotation.clone())))
        }
        TzKind::SingleZone => {
            let (transitions, deltas) = zone.transitions();
            let annotation = zone.annotation();
            box_each(&|value| {
                let position = transitions.partition_point(|t| *t <= value).saturating_sub(1);
                let delta = deltas.get(position).copied().unwrap_or(0);
                (shifted_naive(value, delta), Some(annotation.clone()))
            })
        }
        TzKind::PerTransition => {
            let (transitions, deltas) = zone.transitions();
            box_each(&|value| {
                let position = transitions.partition_point(|t| *t <= value).saturating_sub(1);
                let delta = deltas.get(position).copied().unwrap_or(0);
                (shifted_naive(value, delta), Some(zone.annotation_at(position)))
            })
        }
    };
    tracing::debug!("boxed {} values as {kind:?} in {:?}", values.len(), zone.kind());
    Ok(boxed)
}
