#![forbid(unsafe_code)]

use std::cell::OnceCell;
use std::collections::HashMap;
use std::fmt;

use fp_columnar::BufferView;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IndexLabel {
    Int64(i64),
    Utf8(String),
    /// One entry of a multi-level index.
    Tuple(Vec<IndexLabel>),
}

impl From<i64> for IndexLabel {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<&str> for IndexLabel {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for IndexLabel {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl fmt::Display for IndexLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
            Self::Tuple(parts) => {
                write!(f, "(")?;
                for (pos, part) in parts.iter().enumerate() {
                    if pos > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{part}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("multi-level index is not supported here")]
    ComplexIndexUnsupported,
    #[error("window [{start}, {end}) is outside an index of length {len}")]
    WindowOutOfRange { start: usize, end: usize, len: usize },
    #[error("tuple labels must all have {expected} levels, found {actual}")]
    RaggedTuples { expected: usize, actual: usize },
}

// ── Lookup engine ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortOrder {
    Unsorted,
    AscendingInt64,
    AscendingUtf8,
}

fn detect_sort_order(labels: &[IndexLabel]) -> SortOrder {
    let ascending_int = labels.windows(2).all(|w| {
        matches!((&w[0], &w[1]), (IndexLabel::Int64(a), IndexLabel::Int64(b)) if a < b)
    });
    let ascending_utf8 = labels.windows(2).all(|w| {
        matches!((&w[0], &w[1]), (IndexLabel::Utf8(a), IndexLabel::Utf8(b)) if a < b)
    });
    match labels.first() {
        Some(IndexLabel::Int64(_)) | None if ascending_int => SortOrder::AscendingInt64,
        Some(IndexLabel::Utf8(_)) if ascending_utf8 => SortOrder::AscendingUtf8,
        _ => SortOrder::Unsorted,
    }
}

#[derive(Debug, Clone)]
enum EngineMapping {
    /// Strictly ascending labels are searched in place.
    Sorted(SortOrder),
    /// First position of every label.
    Hashed(HashMap<IndexLabel, usize>),
}

/// Lazily built label → position mapping for the labels it is queried with.
///
/// The mapping is built on the first lookup and reused until
/// [`IndexEngine::clear_mapping`]; callers that re-aim the underlying labels
/// must clear it.
#[derive(Debug, Clone, Default)]
pub struct IndexEngine {
    mapping: OnceCell<EngineMapping>,
}

impl IndexEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_mapping(&mut self) {
        self.mapping.take();
    }

    #[must_use]
    pub fn is_mapping_populated(&self) -> bool {
        self.mapping.get().is_some()
    }

    #[must_use]
    pub fn get_loc(&self, labels: &[IndexLabel], needle: &IndexLabel) -> Option<usize> {
        let mapping = self.mapping.get_or_init(|| match detect_sort_order(labels) {
            SortOrder::Unsorted => {
                let mut positions = HashMap::with_capacity(labels.len());
                for (idx, label) in labels.iter().enumerate() {
                    positions.entry(label.clone()).or_insert(idx);
                }
                EngineMapping::Hashed(positions)
            }
            order => EngineMapping::Sorted(order),
        });

        match mapping {
            EngineMapping::Hashed(positions) => positions.get(needle).copied(),
            EngineMapping::Sorted(SortOrder::AscendingInt64) => {
                let IndexLabel::Int64(target) = needle else {
                    return None;
                };
                labels
                    .binary_search_by(|label| match label {
                        IndexLabel::Int64(v) => v.cmp(target),
                        _ => std::cmp::Ordering::Less,
                    })
                    .ok()
            }
            EngineMapping::Sorted(_) => {
                let IndexLabel::Utf8(target) = needle else {
                    return None;
                };
                labels
                    .binary_search_by(|label| match label {
                        IndexLabel::Utf8(v) => v.as_str().cmp(target.as_str()),
                        _ => std::cmp::Ordering::Less,
                    })
                    .ok()
            }
        }
    }
}

// ── Index ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    labels: Vec<IndexLabel>,
    nlevels: usize,
    #[serde(skip)]
    engine: IndexEngine,
}

impl PartialEq for Index {
    fn eq(&self, other: &Self) -> bool {
        self.nlevels == other.nlevels && self.labels == other.labels
    }
}

impl Eq for Index {}

impl Index {
    #[must_use]
    pub fn new(labels: Vec<IndexLabel>) -> Self {
        Self {
            labels,
            nlevels: 1,
            engine: IndexEngine::new(),
        }
    }

    #[must_use]
    pub fn from_i64(values: Vec<i64>) -> Self {
        Self::new(values.into_iter().map(IndexLabel::from).collect())
    }

    #[must_use]
    pub fn from_utf8(values: Vec<String>) -> Self {
        Self::new(values.into_iter().map(IndexLabel::from).collect())
    }

    /// Multi-level index from per-row level values.
    pub fn from_tuples(rows: Vec<Vec<IndexLabel>>) -> Result<Self, IndexError> {
        let nlevels = rows.first().map_or(2, Vec::len);
        let mut labels = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != nlevels {
                return Err(IndexError::RaggedTuples {
                    expected: nlevels,
                    actual: row.len(),
                });
            }
            labels.push(IndexLabel::Tuple(row));
        }
        Ok(Self {
            labels,
            nlevels,
            engine: IndexEngine::new(),
        })
    }

    #[must_use]
    pub fn from_range(start: i64, stop: i64, step: i64) -> Self {
        let mut labels = Vec::new();
        let mut val = start;
        if step > 0 {
            while val < stop {
                labels.push(IndexLabel::Int64(val));
                val += step;
            }
        } else if step < 0 {
            while val > stop {
                labels.push(IndexLabel::Int64(val));
                val += step;
            }
        }
        Self::new(labels)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn labels(&self) -> &[IndexLabel] {
        &self.labels
    }

    #[must_use]
    pub fn nlevels(&self) -> usize {
        self.nlevels
    }

    #[must_use]
    pub fn is_multi(&self) -> bool {
        self.nlevels > 1
    }

    pub fn ensure_flat(&self) -> Result<(), IndexError> {
        if self.is_multi() {
            return Err(IndexError::ComplexIndexUnsupported);
        }
        Ok(())
    }

    #[must_use]
    pub fn get_loc(&self, label: &IndexLabel) -> Option<usize> {
        self.engine.get_loc(&self.labels, label)
    }

    #[must_use]
    pub fn contains(&self, label: &IndexLabel) -> bool {
        self.get_loc(label).is_some()
    }

    pub fn slice(&self, start: usize, end: usize) -> Result<Self, IndexError> {
        let labels = self
            .labels
            .get(start..end)
            .ok_or(IndexError::WindowOutOfRange {
                start,
                end,
                len: self.labels.len(),
            })?;
        Ok(Self {
            labels: labels.to_vec(),
            nlevels: self.nlevels,
            engine: IndexEngine::new(),
        })
    }
}

// ── Rebindable window ──────────────────────────────────────────────────

/// An index whose labels are a live window over another index.
///
/// Moving the window clears the lookup engine so stale positions are never
/// served for the new labels.
#[derive(Debug, Clone)]
pub struct IndexView<'a> {
    window: BufferView<'a, IndexLabel>,
    nlevels: usize,
    engine: IndexEngine,
}

impl<'a> IndexView<'a> {
    /// View the whole of `index`.
    #[must_use]
    pub fn over(index: &'a Index) -> Self {
        let mut window = BufferView::new(index.labels(), &[]);
        window.move_to(0, index.len());
        Self {
            window,
            nlevels: index.nlevels(),
            engine: IndexEngine::new(),
        }
    }

    /// View `source` whose resting shape is `prototype`.
    #[must_use]
    pub fn with_prototype(source: &'a Index, prototype: &'a Index) -> Self {
        Self {
            window: BufferView::new(source.labels(), prototype.labels()),
            nlevels: source.nlevels(),
            engine: IndexEngine::new(),
        }
    }

    pub fn move_to(&mut self, start: usize, end: usize) {
        self.window.move_to(start, end);
        self.engine.clear_mapping();
    }

    pub fn reset(&mut self) {
        self.window.reset();
        self.engine.clear_mapping();
    }

    pub fn clear_engine(&mut self) {
        self.engine.clear_mapping();
    }

    #[must_use]
    pub fn engine(&self) -> &IndexEngine {
        &self.engine
    }

    #[must_use]
    pub fn labels(&self) -> &'a [IndexLabel] {
        self.window.as_slice().unwrap_or(&[])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_multi(&self) -> bool {
        self.nlevels > 1
    }

    #[must_use]
    pub fn get_loc(&self, label: &IndexLabel) -> Option<usize> {
        self.engine.get_loc(self.labels(), label)
    }

    /// Deep copy of the current window.
    #[must_use]
    pub fn to_index(&self) -> Index {
        Index {
            labels: self.labels().to_vec(),
            nlevels: self.nlevels,
            engine: IndexEngine::new(),
        }
    }
}
