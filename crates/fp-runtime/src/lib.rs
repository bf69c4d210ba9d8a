#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How per-element conversion failures are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Fail the whole call.
    #[default]
    Raise,
    /// Return the input (or an object fallback) unchanged.
    Ignore,
    /// Replace the failing element with NaT.
    Coerce,
}

impl ErrorPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raise => "raise",
            Self::Ignore => "ignore",
            Self::Coerce => "coerce",
        }
    }

    #[must_use]
    pub fn is_raise(self) -> bool {
        matches!(self, Self::Raise)
    }

    #[must_use]
    pub fn is_ignore(self) -> bool {
        matches!(self, Self::Ignore)
    }

    #[must_use]
    pub fn is_coerce(self) -> bool {
        matches!(self, Self::Coerce)
    }

    /// The resolution table shared by every conversion routine.
    ///
    /// Mixed offsets never fail a call: the array result falls back to
    /// boxed objects under every policy.
    #[must_use]
    pub fn resolve(self, kind: FailureKind) -> Resolution {
        if kind == FailureKind::MixedOffsets {
            return Resolution::Fallback;
        }
        match self {
            Self::Raise => Resolution::Propagate,
            Self::Ignore => Resolution::Fallback,
            Self::Coerce => Resolution::Substitute,
        }
    }

    /// Resolve `kind` and, when a ledger is supplied, record the decision.
    pub fn decide(
        self,
        kind: FailureKind,
        position: Option<usize>,
        detail: impl Into<String>,
        ledger: Option<&mut ConversionLedger>,
    ) -> Resolution {
        let resolution = self.resolve(kind);
        let detail = detail.into();
        match resolution {
            Resolution::Propagate => {
                tracing::debug!("{kind:?} at {position:?} propagates under {self}: {detail}");
            }
            Resolution::Fallback => {
                tracing::warn!("{kind:?} at {position:?} falls back under {self}: {detail}");
            }
            Resolution::Substitute => {
                tracing::debug!("{kind:?} at {position:?} coerced to NaT: {detail}");
            }
        }
        if let Some(ledger) = ledger {
            ledger.push(FailureRecord {
                ts_unix_ms: now_unix_ms().unwrap_or_default(),
                policy: self,
                kind,
                resolution,
                position,
                detail,
            });
        }
        resolution
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorPolicy {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raise" => Ok(Self::Raise),
            "ignore" => Ok(Self::Ignore),
            "coerce" => Ok(Self::Coerce),
            other => Err(RuntimeError::UnknownPolicy(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    OutOfBounds,
    Unparseable,
    NonConvertible,
    MixedTypes,
    MixedOffsets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Return the error to the caller.
    Propagate,
    /// Switch to the policy's fallback path.
    Fallback,
    /// Substitute NaT for the element.
    Substitute,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub ts_unix_ms: u64,
    pub policy: ErrorPolicy,
    pub kind: FailureKind,
    pub resolution: Resolution,
    pub position: Option<usize>,
    pub detail: String,
}

/// Append-only log of conversion decisions for one or more calls.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionLedger {
    records: Vec<FailureRecord>,
}

impl ConversionLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: FailureRecord) {
        self.records.push(record);
    }

    #[must_use]
    pub fn records(&self) -> &[FailureRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn count(&self, kind: FailureKind) -> usize {
        self.records.iter().filter(|r| r.kind == kind).count()
    }

    #[must_use]
    pub fn summary(&self) -> BTreeMap<FailureKind, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.kind).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("system clock is before UNIX_EPOCH")]
    ClockSkew,
    #[error("errors must be one of 'raise', 'ignore' or 'coerce', got {0:?}")]
    UnknownPolicy(String),
}

fn now_unix_ms() -> Result<u64, RuntimeError> {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| RuntimeError::ClockSkew)?
        .as_millis();
    Ok(ms as u64)
}
