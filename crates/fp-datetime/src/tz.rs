use std::fmt;

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::DatetimeError;

const SECONDS_PER_DAY: i32 = 86_400;

/// How a zone maps UTC instants to wall time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TzKind {
    Utc,
    /// The process-local zone, asked per instant.
    Local,
    /// A single fixed delta.
    Static,
    /// A transition table whose annotation changes at every transition.
    PerTransition,
    /// A transition table annotated by the zone itself.
    SingleZone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    PerTransition,
    SingleZone,
}

/// The timezone service consumed by the conversion routines.
pub trait TimezoneInfo {
    fn kind(&self) -> TzKind;

    /// Offset from UTC in effect at the UTC instant `utc_ns`.
    fn utc_offset_at(&self, utc_ns: i64) -> FixedOffset;

    /// Transition instants and the offset seconds in effect from each one.
    fn transitions(&self) -> (&[i64], &[i32]);

    /// The zone annotation in effect from transition `position`.
    fn annotation_at(&self, position: usize) -> Tz;

    /// The zone annotation when it does not vary by transition.
    fn annotation(&self) -> Tz;
}

/// A sorted table of UTC transition instants and the offsets that follow them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionTable {
    name: String,
    kind: TableKind,
    transitions: Vec<i64>,
    offsets: Vec<i32>,
}

impl TransitionTable {
    pub fn new(
        name: impl Into<String>,
        kind: TableKind,
        transitions: Vec<i64>,
        offsets: Vec<i32>,
    ) -> Result<Self, DatetimeError> {
        let name = name.into();
        if transitions.is_empty() || transitions.len() != offsets.len() {
            return Err(DatetimeError::InvalidTimezone(format!(
                "{name}: {} transitions for {} offsets",
                transitions.len(),
                offsets.len()
            )));
        }
        if transitions.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(DatetimeError::InvalidTimezone(format!(
                "{name}: transitions are not sorted"
            )));
        }
        if let Some(bad) = offsets.iter().find(|s| s.abs() >= SECONDS_PER_DAY) {
            return Err(DatetimeError::InvalidTimezone(format!(
                "{name}: offset {bad}s is a day or more"
            )));
        }
        Ok(Self {
            name,
            kind,
            transitions,
            offsets,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> TableKind {
        self.kind
    }

    /// Index of the last transition at or before `utc_ns`, clamped to the
    /// first entry.
    #[must_use]
    pub fn position(&self, utc_ns: i64) -> usize {
        self.transitions
            .partition_point(|t| *t <= utc_ns)
            .saturating_sub(1)
    }
}

/// Concrete zones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Tz {
    Utc,
    /// A fixed offset in seconds east of UTC.
    Fixed(i32),
    /// The local zone, pinned to an offset in seconds east of UTC.
    Local(i32),
    Table(TransitionTable),
}

impl Tz {
    /// A fixed-offset zone, rejecting offsets of a day or more.
    pub fn fixed(seconds: i32) -> Result<Self, DatetimeError> {
        if seconds.abs() >= SECONDS_PER_DAY {
            return Err(DatetimeError::InvalidTimezone(format!(
                "offset {seconds}s is a day or more"
            )));
        }
        Ok(Self::Fixed(seconds))
    }

    #[must_use]
    pub fn is_utc(&self) -> bool {
        matches!(self, Self::Utc)
    }
}

impl From<FixedOffset> for Tz {
    fn from(offset: FixedOffset) -> Self {
        Self::Fixed(offset.local_minus_utc())
    }
}

pub(crate) fn offset_from_seconds(seconds: i32) -> FixedOffset {
    FixedOffset::east_opt(seconds).unwrap_or_else(|| Utc.fix())
}

impl TimezoneInfo for Tz {
    fn kind(&self) -> TzKind {
        match self {
            Self::Utc => TzKind::Utc,
            Self::Fixed(_) => TzKind::Static,
            Self::Local(_) => TzKind::Local,
            Self::Table(table) => match table.kind {
                TableKind::PerTransition => TzKind::PerTransition,
                TableKind::SingleZone => TzKind::SingleZone,
            },
        }
    }

    fn utc_offset_at(&self, utc_ns: i64) -> FixedOffset {
        match self {
            Self::Utc => Utc.fix(),
            Self::Fixed(seconds) | Self::Local(seconds) => offset_from_seconds(*seconds),
            Self::Table(table) => table
                .offsets
                .get(table.position(utc_ns))
                .map_or_else(|| Utc.fix(), |seconds| offset_from_seconds(*seconds)),
        }
    }

    fn transitions(&self) -> (&[i64], &[i32]) {
        match self {
            Self::Utc => (&[], &[0]),
            Self::Fixed(seconds) | Self::Local(seconds) => (&[], std::slice::from_ref(seconds)),
            Self::Table(table) => (&table.transitions, &table.offsets),
        }
    }

    fn annotation_at(&self, position: usize) -> Tz {
        match self {
            Self::Table(table) if table.kind == TableKind::PerTransition => table
                .offsets
                .get(position)
                .map_or_else(|| self.clone(), |seconds| Self::Fixed(*seconds)),
            _ => self.clone(),
        }
    }

    fn annotation(&self) -> Tz {
        self.clone()
    }
}

impl fmt::Display for Tz {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Utc => f.write_str("UTC"),
            Self::Fixed(seconds) => write!(f, "{}", offset_from_seconds(*seconds)),
            Self::Local(_) => f.write_str("tzlocal()"),
            Self::Table(table) => f.write_str(&table.name),
        }
    }
}
