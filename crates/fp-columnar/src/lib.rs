#![forbid(unsafe_code)]

use std::borrow::Cow;
use std::fmt;
use std::ops::{Deref, DerefMut, Range};

use fp_types::{Boxed, DType, NullKind, Scalar};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("buffer length mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("dummy array must be length {expected}, got {actual}")]
    DummyShapeMismatch { expected: usize, actual: usize },
    #[error("dummy array must be same dtype: expected {expected:?}, got {actual:?}")]
    DummyDtypeMismatch { expected: DType, actual: DType },
}

/// Element types that can back a typed buffer.
pub trait Element: Clone + PartialEq + fmt::Debug {
    const DTYPE: DType;

    fn to_scalar(&self) -> Scalar;

    fn into_column(values: Vec<Self>) -> ColumnData;

    fn from_column_slice(slice: ColumnSlice<'_>) -> Option<&[Self]>;
}

impl Element for f64 {
    const DTYPE: DType = DType::Float64;

    fn to_scalar(&self) -> Scalar {
        Scalar::Float64(*self)
    }

    fn into_column(values: Vec<Self>) -> ColumnData {
        ColumnData::Float64(values)
    }

    fn from_column_slice(slice: ColumnSlice<'_>) -> Option<&[Self]> {
        match slice {
            ColumnSlice::Float64(values) => Some(values),
            _ => None,
        }
    }
}

impl Element for i64 {
    const DTYPE: DType = DType::Int64;

    fn to_scalar(&self) -> Scalar {
        Scalar::Int64(*self)
    }

    fn into_column(values: Vec<Self>) -> ColumnData {
        ColumnData::Int64(values)
    }

    fn from_column_slice(slice: ColumnSlice<'_>) -> Option<&[Self]> {
        match slice {
            ColumnSlice::Int64(values) => Some(values),
            _ => None,
        }
    }
}

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn to_scalar(&self) -> Scalar {
        Scalar::Bool(*self)
    }

    fn into_column(values: Vec<Self>) -> ColumnData {
        ColumnData::Bool(values)
    }

    fn from_column_slice(slice: ColumnSlice<'_>) -> Option<&[Self]> {
        match slice {
            ColumnSlice::Bool(values) => Some(values),
            _ => None,
        }
    }
}

impl Element for String {
    const DTYPE: DType = DType::Utf8;

    fn to_scalar(&self) -> Scalar {
        Scalar::Utf8(self.clone())
    }

    fn into_column(values: Vec<Self>) -> ColumnData {
        ColumnData::Utf8(values)
    }

    fn from_column_slice(slice: ColumnSlice<'_>) -> Option<&[Self]> {
        match slice {
            ColumnSlice::Utf8(values) => Some(values),
            _ => None,
        }
    }
}

/// Contiguous typed storage for one column (or one column-major block).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "values", rename_all = "snake_case")]
pub enum ColumnData {
    Float64(Vec<f64>),
    Int64(Vec<i64>),
    Bool(Vec<bool>),
    Utf8(Vec<String>),
    Datetime64(Vec<i64>),
    Object(Vec<Boxed>),
}

impl ColumnData {
    #[must_use]
    pub fn dtype(&self) -> DType {
        self.as_slice().dtype()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn as_slice(&self) -> ColumnSlice<'_> {
        match self {
            Self::Float64(v) => ColumnSlice::Float64(v),
            Self::Int64(v) => ColumnSlice::Int64(v),
            Self::Bool(v) => ColumnSlice::Bool(v),
            Self::Utf8(v) => ColumnSlice::Utf8(v),
            Self::Datetime64(v) => ColumnSlice::Datetime64(v),
            Self::Object(v) => ColumnSlice::Object(v),
        }
    }

    /// Borrow `range` of the storage, `None` when it runs past the end.
    #[must_use]
    pub fn slice(&self, range: Range<usize>) -> Option<ColumnSlice<'_>> {
        self.as_slice().sub(range)
    }

    #[must_use]
    pub fn scalar(&self, idx: usize) -> Option<Scalar> {
        self.as_slice().scalar(idx)
    }

    /// Best-effort narrowing of boxed result slots to one concrete dtype.
    ///
    /// Bool and Utf8 only narrow when no slot is missing. Integers narrow to
    /// Int64 unless a float or a missing slot forces Float64. Datetime slots
    /// accept NaT/None as missing. Anything else, including sequence slots
    /// and an empty or all-`None` input, stays `Object`.
    #[must_use]
    pub fn narrow(slots: Vec<Boxed>) -> Self {
        let mut seen = SeenKinds::default();
        for slot in &slots {
            match slot {
                Boxed::Sequence(_) => return Self::Object(slots),
                Boxed::Scalar(value) => seen.record(value),
            }
        }

        match seen.target() {
            Some(DType::Bool) => Self::Bool(
                slots
                    .iter()
                    .map(|slot| matches!(slot, Boxed::Scalar(Scalar::Bool(true))))
                    .collect(),
            ),
            Some(DType::Int64) => Self::Int64(
                slots
                    .iter()
                    .map(|slot| match slot {
                        Boxed::Scalar(Scalar::Int64(v)) => *v,
                        _ => 0,
                    })
                    .collect(),
            ),
            Some(DType::Float64) => Self::Float64(
                slots
                    .iter()
                    .map(|slot| match slot {
                        Boxed::Scalar(Scalar::Int64(v)) => *v as f64,
                        Boxed::Scalar(Scalar::Float64(v)) => *v,
                        _ => f64::NAN,
                    })
                    .collect(),
            ),
            Some(DType::Utf8) => Self::Utf8(
                slots
                    .into_iter()
                    .map(|slot| match slot {
                        Boxed::Scalar(Scalar::Utf8(v)) => v,
                        _ => String::new(),
                    })
                    .collect(),
            ),
            Some(DType::Datetime64) => Self::Datetime64(
                slots
                    .iter()
                    .map(|slot| match slot {
                        Boxed::Scalar(Scalar::Datetime64(v)) => *v,
                        _ => i64::MIN,
                    })
                    .collect(),
            ),
            _ => Self::Object(slots),
        }
    }
}

#[derive(Debug, Default)]
struct SeenKinds {
    bools: usize,
    ints: usize,
    floats: usize,
    strings: usize,
    datetimes: usize,
    nones: usize,
    nans: usize,
    nats: usize,
}

impl SeenKinds {
    fn record(&mut self, value: &Scalar) {
        match value {
            Scalar::Bool(_) => self.bools += 1,
            Scalar::Int64(_) => self.ints += 1,
            Scalar::Float64(_) => self.floats += 1,
            Scalar::Utf8(_) => self.strings += 1,
            Scalar::Datetime64(_) => self.datetimes += 1,
            Scalar::Null(NullKind::Null) => self.nones += 1,
            Scalar::Null(NullKind::NaN) => self.nans += 1,
            Scalar::Null(NullKind::NaT) => self.nats += 1,
        }
    }

    fn target(&self) -> Option<DType> {
        let numeric = self.ints + self.floats;
        let missing = self.nones + self.nans + self.nats;
        let concrete = self.bools + numeric + self.strings + self.datetimes;

        if self.bools > 0 {
            return (self.bools == concrete && missing == 0).then_some(DType::Bool);
        }
        if self.strings > 0 {
            return (self.strings == concrete && missing == 0).then_some(DType::Utf8);
        }
        if self.datetimes > 0 {
            return (self.datetimes == concrete && self.nans == 0).then_some(DType::Datetime64);
        }
        if self.nats > 0 {
            return (concrete == 0 && self.nans == 0).then_some(DType::Datetime64);
        }
        if self.floats > 0 || self.nans > 0 {
            return Some(DType::Float64);
        }
        if self.ints > 0 {
            return Some(if self.nones > 0 {
                DType::Float64
            } else {
                DType::Int64
            });
        }
        None
    }
}

/// Borrowed window of a `ColumnData`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnSlice<'a> {
    Float64(&'a [f64]),
    Int64(&'a [i64]),
    Bool(&'a [bool]),
    Utf8(&'a [String]),
    Datetime64(&'a [i64]),
    Object(&'a [Boxed]),
}

macro_rules! on_slice {
    ($slice:expr, $values:ident => $body:expr) => {
        match $slice {
            ColumnSlice::Float64($values) => $body,
            ColumnSlice::Int64($values) => $body,
            ColumnSlice::Bool($values) => $body,
            ColumnSlice::Utf8($values) => $body,
            ColumnSlice::Datetime64($values) => $body,
            ColumnSlice::Object($values) => $body,
        }
    };
}

impl<'a> ColumnSlice<'a> {
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Float64(_) => DType::Float64,
            Self::Int64(_) => DType::Int64,
            Self::Bool(_) => DType::Bool,
            Self::Utf8(_) => DType::Utf8,
            Self::Datetime64(_) => DType::Datetime64,
            Self::Object(_) => DType::Object,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        on_slice!(self, values => values.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn sub(self, range: Range<usize>) -> Option<ColumnSlice<'a>> {
        Some(match self {
            Self::Float64(v) => Self::Float64(v.get(range)?),
            Self::Int64(v) => Self::Int64(v.get(range)?),
            Self::Bool(v) => Self::Bool(v.get(range)?),
            Self::Utf8(v) => Self::Utf8(v.get(range)?),
            Self::Datetime64(v) => Self::Datetime64(v.get(range)?),
            Self::Object(v) => Self::Object(v.get(range)?),
        })
    }

    #[must_use]
    pub fn scalar(&self, idx: usize) -> Option<Scalar> {
        match self {
            Self::Float64(v) => v.get(idx).map(|x| Scalar::Float64(*x)),
            Self::Int64(v) => v.get(idx).map(|x| Scalar::Int64(*x)),
            Self::Bool(v) => v.get(idx).map(|x| Scalar::Bool(*x)),
            Self::Utf8(v) => v.get(idx).map(|x| Scalar::Utf8(x.clone())),
            Self::Datetime64(v) => v.get(idx).map(|x| {
                if *x == i64::MIN {
                    Scalar::Null(NullKind::NaT)
                } else {
                    Scalar::Datetime64(*x)
                }
            }),
            Self::Object(v) => v.get(idx).and_then(|slot| slot.as_scalar().cloned()),
        }
    }

    #[must_use]
    pub fn to_scalars(&self) -> Vec<Scalar> {
        (0..self.len())
            .map(|idx| {
                self.scalar(idx)
                    .unwrap_or(Scalar::Null(NullKind::Null))
            })
            .collect()
    }

    /// Deep copy of the window into owned storage.
    #[must_use]
    pub fn to_owned_column(&self) -> ColumnData {
        match self {
            Self::Float64(v) => ColumnData::Float64(v.to_vec()),
            Self::Int64(v) => ColumnData::Int64(v.to_vec()),
            Self::Bool(v) => ColumnData::Bool(v.to_vec()),
            Self::Utf8(v) => ColumnData::Utf8(v.to_vec()),
            Self::Datetime64(v) => ColumnData::Datetime64(v.to_vec()),
            Self::Object(v) => ColumnData::Object(v.to_vec()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// Each row is contiguous.
    RowMajor,
    /// Each column is contiguous.
    ColumnMajor,
}

/// Dense 2-D buffer with an explicit memory layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    data: Vec<T>,
    nrows: usize,
    ncols: usize,
    layout: Layout,
}

impl<T: Clone> Matrix<T> {
    pub fn new(data: Vec<T>, nrows: usize, ncols: usize, layout: Layout) -> Result<Self, ColumnError> {
        let expected = nrows.saturating_mul(ncols);
        if data.len() != expected {
            return Err(ColumnError::LengthMismatch {
                left: data.len(),
                right: expected,
            });
        }
        Ok(Self {
            data,
            nrows,
            ncols,
            layout,
        })
    }

    /// Build a row-major matrix from equally sized rows.
    pub fn from_rows(rows: Vec<Vec<T>>) -> Result<Self, ColumnError> {
        let nrows = rows.len();
        let ncols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(nrows * ncols);
        for row in rows {
            if row.len() != ncols {
                return Err(ColumnError::LengthMismatch {
                    left: row.len(),
                    right: ncols,
                });
            }
            data.extend(row);
        }
        Self::new(data, nrows, ncols, Layout::RowMajor)
    }

    #[must_use]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[must_use]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    #[must_use]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    #[must_use]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<&T> {
        if row >= self.nrows || col >= self.ncols {
            return None;
        }
        let pos = match self.layout {
            Layout::RowMajor => row * self.ncols + col,
            Layout::ColumnMajor => col * self.nrows + row,
        };
        self.data.get(pos)
    }

    /// The same logical matrix in `layout`, copying only when it differs.
    #[must_use]
    pub fn with_layout(&self, layout: Layout) -> Cow<'_, Self> {
        if self.layout == layout {
            return Cow::Borrowed(self);
        }
        let mut data = Vec::with_capacity(self.data.len());
        match layout {
            Layout::RowMajor => {
                for row in 0..self.nrows {
                    for col in 0..self.ncols {
                        data.push(self.data[col * self.nrows + row].clone());
                    }
                }
            }
            Layout::ColumnMajor => {
                for col in 0..self.ncols {
                    for row in 0..self.nrows {
                        data.push(self.data[row * self.ncols + col].clone());
                    }
                }
            }
        }
        Cow::Owned(Self {
            data,
            nrows: self.nrows,
            ncols: self.ncols,
            layout,
        })
    }
}

/// Re-aimable window over a contiguous source buffer.
///
/// A view starts out bound to `source` at offset zero with the prototype's
/// length. `advance`, `set_length` and `move_to` only change the window
/// bookkeeping; nothing is copied. `reset` unbinds the view so it shows the
/// prototype again. Reads that would run past the end of `source` yield
/// `None` from [`BufferView::as_slice`] and a truncated iterator.
#[derive(Debug, Clone)]
pub struct BufferView<'a, T> {
    source: &'a [T],
    prototype: &'a [T],
    offset: usize,
    len: usize,
    stride: usize,
    bound: bool,
}

impl<'a, T> BufferView<'a, T> {
    #[must_use]
    pub fn new(source: &'a [T], prototype: &'a [T]) -> Self {
        Self {
            source,
            prototype,
            offset: 0,
            len: prototype.len(),
            stride: 1,
            bound: true,
        }
    }

    /// A view whose prototype must have exactly `chunk_len` elements.
    pub fn checked(
        source: &'a [T],
        prototype: &'a [T],
        chunk_len: usize,
    ) -> Result<Self, ColumnError> {
        if prototype.len() != chunk_len {
            return Err(ColumnError::DummyShapeMismatch {
                expected: chunk_len,
                actual: prototype.len(),
            });
        }
        Ok(Self::new(source, prototype))
    }

    #[must_use]
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride.max(1);
        self
    }

    pub fn advance(&mut self, k: usize) {
        self.offset = self.offset.saturating_add(k.saturating_mul(self.stride));
    }

    pub fn set_length(&mut self, len: usize) {
        self.len = len;
    }

    pub fn move_to(&mut self, start: usize, end: usize) {
        self.bound = true;
        self.offset = start.saturating_mul(self.stride);
        self.len = end.saturating_sub(start);
    }

    pub fn reset(&mut self) {
        self.bound = false;
        self.offset = 0;
        self.len = self.prototype.len();
        self.stride = 1;
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// The live window as a slice of the source; only unit-stride windows
    /// are contiguous.
    #[must_use]
    pub fn as_slice(&self) -> Option<&'a [T]> {
        if !self.bound {
            return Some(self.prototype);
        }
        if self.stride != 1 && self.len > 1 {
            return None;
        }
        let end = self.offset.checked_add(self.len)?;
        self.source.get(self.offset..end)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a T> + use<'a, T> {
        let (base, offset, stride, len) = if self.bound {
            (self.source, self.offset, self.stride, self.len)
        } else {
            (self.prototype, 0, 1, self.prototype.len())
        };
        base.iter().skip(offset).step_by(stride).take(len)
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.iter().cloned().collect()
    }

    /// Hold the view for a scope; the window is reset when the guard drops.
    pub fn guard(&mut self) -> ViewGuard<'_, 'a, T> {
        ViewGuard { view: self }
    }
}

/// Scoped exclusive hold on a [`BufferView`]; resets it on every exit path.
#[derive(Debug)]
pub struct ViewGuard<'v, 'a, T> {
    view: &'v mut BufferView<'a, T>,
}

impl<'a, T> Deref for ViewGuard<'_, 'a, T> {
    type Target = BufferView<'a, T>;

    fn deref(&self) -> &Self::Target {
        self.view
    }
}

impl<T> DerefMut for ViewGuard<'_, '_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.view
    }
}

impl<T> Drop for ViewGuard<'_, '_, T> {
    fn drop(&mut self) {
        self.view.reset();
    }
}

/// Dtype-tagged [`BufferView`] over one column of a block.
#[derive(Debug, Clone)]
pub enum ColumnView<'a> {
    Float64(BufferView<'a, f64>),
    Int64(BufferView<'a, i64>),
    Bool(BufferView<'a, bool>),
    Utf8(BufferView<'a, String>),
    Datetime64(BufferView<'a, i64>),
    Object(BufferView<'a, Boxed>),
}

macro_rules! on_view {
    ($view:expr, $inner:ident => $body:expr) => {
        match $view {
            ColumnView::Float64($inner) => $body,
            ColumnView::Int64($inner) => $body,
            ColumnView::Bool($inner) => $body,
            ColumnView::Utf8($inner) => $body,
            ColumnView::Datetime64($inner) => $body,
            ColumnView::Object($inner) => $body,
        }
    };
}

impl<'a> ColumnView<'a> {
    /// A zero-length view over `source`, as for an empty-slice prototype.
    #[must_use]
    pub fn empty_over(source: ColumnSlice<'a>) -> Self {
        let mut view = match source {
            ColumnSlice::Float64(v) => Self::Float64(BufferView::new(v, &[])),
            ColumnSlice::Int64(v) => Self::Int64(BufferView::new(v, &[])),
            ColumnSlice::Bool(v) => Self::Bool(BufferView::new(v, &[])),
            ColumnSlice::Utf8(v) => Self::Utf8(BufferView::new(v, &[])),
            ColumnSlice::Datetime64(v) => Self::Datetime64(BufferView::new(v, &[])),
            ColumnSlice::Object(v) => Self::Object(BufferView::new(v, &[])),
        };
        view.move_to(0, 0);
        view
    }

    pub fn move_to(&mut self, start: usize, end: usize) {
        on_view!(self, inner => inner.move_to(start, end));
    }

    pub fn reset(&mut self) {
        on_view!(self, inner => inner.reset());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        on_view!(self, inner => inner.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        on_view!(self, inner => inner.is_bound())
    }

    #[must_use]
    pub fn slice(&self) -> Option<ColumnSlice<'a>> {
        Some(match self {
            Self::Float64(v) => ColumnSlice::Float64(v.as_slice()?),
            Self::Int64(v) => ColumnSlice::Int64(v.as_slice()?),
            Self::Bool(v) => ColumnSlice::Bool(v.as_slice()?),
            Self::Utf8(v) => ColumnSlice::Utf8(v.as_slice()?),
            Self::Datetime64(v) => ColumnSlice::Datetime64(v.as_slice()?),
            Self::Object(v) => ColumnSlice::Object(v.as_slice()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use fp_types::{Boxed, DType, NullKind, Scalar};

    use super::{BufferView, ColumnData, ColumnError, ColumnSlice, ColumnView, Layout, Matrix};

    fn slots(values: Vec<Scalar>) -> Vec<Boxed> {
        values.into_iter().map(Boxed::Scalar).collect()
    }

    #[test]
    fn view_binds_to_source_with_prototype_length() {
        let source = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let prototype = [0.0, 0.0];
        let view = BufferView::new(&source, &prototype);
        assert!(view.is_bound());
        assert_eq!(view.as_slice(), Some(&source[..2]));
    }

    #[test]
    fn advance_and_set_length_move_the_window() {
        let source = [1, 2, 3, 4, 5, 6];
        let prototype = [0; 2];
        let mut view = BufferView::new(&source, &prototype);
        view.advance(2);
        assert_eq!(view.as_slice(), Some(&[3, 4][..]));
        view.set_length(3);
        assert_eq!(view.as_slice(), Some(&[3, 4, 5][..]));
        view.advance(3);
        view.set_length(1);
        assert_eq!(view.as_slice(), Some(&[6][..]));
    }

    #[test]
    fn move_to_repositions_absolutely() {
        let source = ["a", "b", "c", "d"];
        let mut view = BufferView::new(&source, &[]);
        view.move_to(1, 3);
        assert_eq!(view.to_vec(), vec!["b", "c"]);
        view.move_to(0, 0);
        assert!(view.is_empty());
        assert_eq!(view.as_slice(), Some(&[][..]));
    }

    #[test]
    fn strided_window_iterates_but_is_not_contiguous() {
        let source = [0, 1, 2, 3, 4, 5, 6, 7];
        let mut view = BufferView::new(&source, &[]).with_stride(2);
        view.move_to(1, 4);
        assert_eq!(view.to_vec(), vec![2, 4, 6]);
        assert_eq!(view.as_slice(), None);
    }

    #[test]
    fn window_past_source_end_is_not_readable() {
        let source = [1, 2, 3];
        let mut view = BufferView::new(&source, &[0, 0]);
        view.advance(2);
        assert_eq!(view.as_slice(), None);
        assert_eq!(view.to_vec(), vec![3]);
    }

    #[test]
    fn guard_resets_view_on_scope_exit() {
        let source = [1, 2, 3, 4];
        let prototype = [9, 9, 9];
        let mut view = BufferView::new(&source, &prototype);
        {
            let mut guard = view.guard();
            guard.move_to(2, 4);
            assert_eq!(guard.as_slice(), Some(&[3, 4][..]));
        }
        assert!(!view.is_bound());
        assert_eq!(view.len(), 3);
        assert_eq!(view.as_slice(), Some(&prototype[..]));
    }

    #[test]
    fn guard_resets_view_when_scope_returns_early() {
        fn scan(view: &mut BufferView<'_, i64>) -> Result<(), &'static str> {
            let mut guard = view.guard();
            guard.move_to(1, 2);
            Err("callback failed")
        }

        let source = [5, 6, 7];
        let mut view = BufferView::new(&source, &[]);
        assert!(scan(&mut view).is_err());
        assert!(!view.is_bound());
        assert!(view.is_empty());
    }

    #[test]
    fn checked_view_rejects_wrong_prototype_length() {
        let source = [1.0; 6];
        let err = BufferView::checked(&source, &[0.0; 2], 3).expect_err("shape");
        assert_eq!(
            err,
            ColumnError::DummyShapeMismatch {
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn matrix_layout_conversion_preserves_logical_values() {
        let rows = Matrix::from_rows(vec![vec![1, 2, 3], vec![4, 5, 6]]).expect("matrix");
        let cols = rows.with_layout(Layout::ColumnMajor);
        assert_eq!(cols.layout(), Layout::ColumnMajor);
        assert_eq!(cols.data(), &[1, 4, 2, 5, 3, 6]);
        for r in 0..2 {
            for c in 0..3 {
                assert_eq!(rows.get(r, c), cols.get(r, c));
            }
        }
        assert!(matches!(
            rows.with_layout(Layout::RowMajor),
            std::borrow::Cow::Borrowed(_)
        ));
    }

    #[test]
    fn matrix_rejects_ragged_rows() {
        let err = Matrix::from_rows(vec![vec![1, 2], vec![3]]).expect_err("ragged");
        assert_eq!(err, ColumnError::LengthMismatch { left: 1, right: 2 });
    }

    #[test]
    fn matrix_shape_errors_name_both_lengths() {
        let err = Matrix::new(vec![1.0; 5], 2, 3, Layout::ColumnMajor).expect_err("short buffer");
        assert_eq!(err, ColumnError::LengthMismatch { left: 5, right: 6 });
        assert_eq!(err.to_string(), "buffer length mismatch: left=5, right=6");
    }

    #[test]
    fn narrow_ints_and_floats() {
        assert_eq!(
            ColumnData::narrow(slots(vec![Scalar::Int64(1), Scalar::Int64(2)])),
            ColumnData::Int64(vec![1, 2])
        );
        assert_eq!(
            ColumnData::narrow(slots(vec![Scalar::Int64(1), Scalar::Float64(2.5)])),
            ColumnData::Float64(vec![1.0, 2.5])
        );
        let with_none =
            ColumnData::narrow(slots(vec![Scalar::Int64(1), Scalar::Null(NullKind::Null)]));
        match with_none {
            ColumnData::Float64(values) => {
                assert_eq!(values[0], 1.0);
                assert!(values[1].is_nan());
            }
            other => panic!("expected Float64, got {other:?}"),
        }
    }

    #[test]
    fn narrow_keeps_object_when_no_single_type_fits() {
        let mixed = slots(vec![Scalar::Int64(1), Scalar::Utf8("x".to_owned())]);
        assert_eq!(ColumnData::narrow(mixed.clone()).dtype(), DType::Object);

        let bool_with_null = slots(vec![Scalar::Bool(true), Scalar::Null(NullKind::Null)]);
        assert_eq!(ColumnData::narrow(bool_with_null).dtype(), DType::Object);

        let with_sequence = vec![
            Boxed::Scalar(Scalar::Int64(1)),
            Boxed::Sequence(vec![Scalar::Int64(2)]),
        ];
        assert_eq!(ColumnData::narrow(with_sequence).dtype(), DType::Object);

        assert_eq!(ColumnData::narrow(Vec::new()), ColumnData::Object(Vec::new()));
    }

    #[test]
    fn narrow_strings_bools_and_datetimes() {
        assert_eq!(
            ColumnData::narrow(slots(vec![Scalar::from("a"), Scalar::from("b")])),
            ColumnData::Utf8(vec!["a".to_owned(), "b".to_owned()])
        );
        assert_eq!(
            ColumnData::narrow(slots(vec![Scalar::Bool(true), Scalar::Bool(false)])),
            ColumnData::Bool(vec![true, false])
        );
        assert_eq!(
            ColumnData::narrow(slots(vec![
                Scalar::Datetime64(5),
                Scalar::Null(NullKind::NaT)
            ])),
            ColumnData::Datetime64(vec![5, i64::MIN])
        );
    }

    #[test]
    fn column_view_windows_typed_storage() {
        let data = ColumnData::Utf8(vec!["a".into(), "b".into(), "c".into()]);
        let mut view = ColumnView::empty_over(data.as_slice());
        assert_eq!(view.len(), 0);
        view.move_to(1, 3);
        let window = view.slice().expect("contiguous");
        assert_eq!(window.to_scalars(), vec![Scalar::from("b"), Scalar::from("c")]);
        view.reset();
        assert!(!view.is_bound());
        assert_eq!(view.slice(), Some(ColumnSlice::Utf8(&[])));
    }

    #[test]
    fn column_slice_copies_into_owned_storage() {
        let data = ColumnData::Datetime64(vec![1, i64::MIN, 3]);
        let window = data.slice(1..3).expect("in range");
        assert_eq!(window.scalar(0), Some(Scalar::Null(NullKind::NaT)));
        assert_eq!(window.to_owned_column(), ColumnData::Datetime64(vec![i64::MIN, 3]));
        assert!(data.slice(2..5).is_none());
    }
}
