#![forbid(unsafe_code)]

use std::borrow::Cow;
use std::mem::size_of;

use bumpalo::Bump;
use fp_columnar::{BufferView, ColumnData, ColumnView, Element, Layout, Matrix};
use fp_frame::{Frame, FrameError, FrameWindow, Series, SeriesView, Table};
use fp_index::{Index, IndexLabel, IndexView};
use fp_types::{Boxed, DType, Scalar};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type user callbacks return.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("function does not reduce")]
    DoesNotReduce,
    #[error("no result: every group was empty or excluded")]
    NoResult,
    #[error("cannot modify frame index internals")]
    ComplexIndexUnsupported,
    #[error("callback failed at position {position}: {source}")]
    ApplyFailed {
        position: usize,
        #[source]
        source: CallbackError,
    },
    #[error("dummy array must be length {expected}, got {actual}")]
    DummyShapeMismatch { expected: usize, actual: usize },
    #[error("dummy array must be same dtype: expected {expected:?}, got {actual:?}")]
    DummyDtypeMismatch { expected: DType, actual: DType },
    #[error("invalid bin edges: {0}")]
    InvalidBins(String),
    #[error("group label {label} is outside 0..{ngroups}")]
    LabelOutOfRange { label: i64, ngroups: usize },
    #[error("expected {expected} entries, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("invalid range: {0}")]
    InvalidRange(String),
    #[error("matrix is {actual:?} but the axis needs {required:?} and copying is disabled")]
    NotContiguous { required: Layout, actual: Layout },
    #[error(transparent)]
    Frame(#[from] FrameError),
}

// ── Callback results ───────────────────────────────────────────────────

/// What a reduction callback hands back for one window.
#[derive(Debug, Clone, PartialEq)]
pub enum Reduced {
    Scalar(Scalar),
    /// A zero-dimensional array; always unwrapped to its element.
    ZeroDim(Scalar),
    /// A one-dimensional array.
    Array(Vec<Scalar>),
    /// A plain list; only rejected when it is as long as the window.
    List(Vec<Scalar>),
    /// A labeled 1-D result; only its values are kept.
    Labeled {
        values: Vec<Scalar>,
        index: Index,
        name: Option<IndexLabel>,
    },
}

impl From<Scalar> for Reduced {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl From<f64> for Reduced {
    fn from(value: f64) -> Self {
        Self::Scalar(Scalar::Float64(value))
    }
}

impl From<i64> for Reduced {
    fn from(value: i64) -> Self {
        Self::Scalar(Scalar::Int64(value))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Extracted {
    Scalar(Scalar),
    Array(Vec<Scalar>),
    List(Vec<Scalar>),
}

impl Extracted {
    fn into_boxed(self) -> Boxed {
        match self {
            Self::Scalar(value) => Boxed::Scalar(value),
            Self::Array(values) | Self::List(values) => Boxed::Sequence(values),
        }
    }
}

fn extract_result(res: Reduced, squeeze: bool) -> Extracted {
    match res {
        Reduced::Scalar(value) | Reduced::ZeroDim(value) => Extracted::Scalar(value),
        Reduced::Array(mut values) | Reduced::Labeled { mut values, .. } => {
            if squeeze && values.len() == 1
                && let Some(value) = values.pop()
            {
                return Extracted::Scalar(value);
            }
            Extracted::Array(values)
        }
        Reduced::List(values) => Extracted::List(values),
    }
}

fn check_result_array(piece: &Extracted, count: usize) -> Result<(), ReduceError> {
    match piece {
        Extracted::Array(_) => Err(ReduceError::DoesNotReduce),
        Extracted::List(values) if values.len() == count => Err(ReduceError::DoesNotReduce),
        _ => Ok(()),
    }
}

fn dummy_values<T: Element>(dummy: &Series) -> Result<&[T], ReduceError> {
    let mismatch = || ReduceError::DummyDtypeMismatch {
        expected: T::DTYPE,
        actual: dummy.dtype(),
    };
    if dummy.dtype() != T::DTYPE {
        return Err(mismatch());
    }
    dummy.typed::<T>().ok_or_else(mismatch)
}

// ── RowReducer ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Axis 0: one result per column.
    Rows,
    /// Axis 1: one result per row.
    #[default]
    Columns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceOptions {
    pub axis: Axis,
    /// Copy the matrix into the layout the axis walks when it differs.
    pub copy_to_contiguous: bool,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            axis: Axis::Columns,
            copy_to_contiguous: true,
        }
    }
}

impl ReduceOptions {
    #[must_use]
    pub fn along(axis: Axis) -> Self {
        Self {
            axis,
            ..Self::default()
        }
    }
}

/// Apply `f` to every row (or column) of `matrix` through one reused
/// [`SeriesView`], collecting one narrowed result per chunk.
///
/// With a `dummy`, its dtype and length are checked against the chunks and
/// its index labels every chunk. `labels` name the chunks in order.
pub fn reduce_rows<T, F>(
    matrix: &Matrix<T>,
    mut f: F,
    options: ReduceOptions,
    dummy: Option<&Series>,
    labels: Option<&[IndexLabel]>,
) -> Result<ColumnData, ReduceError>
where
    T: Element,
    F: FnMut(&SeriesView<'_, T>) -> Result<Reduced, CallbackError>,
{
    let (required, nresults, chunk) = match options.axis {
        Axis::Rows => (Layout::ColumnMajor, matrix.ncols(), matrix.nrows()),
        Axis::Columns => (Layout::RowMajor, matrix.nrows(), matrix.ncols()),
    };

    let contiguous: Cow<'_, Matrix<T>> = if matrix.layout() == required {
        Cow::Borrowed(matrix)
    } else if options.copy_to_contiguous {
        tracing::debug!(
            "copying {}x{} matrix to {required:?} for {:?}",
            matrix.nrows(),
            matrix.ncols(),
            options.axis
        );
        matrix.with_layout(required)
    } else {
        return Err(ReduceError::NotContiguous {
            required,
            actual: matrix.layout(),
        });
    };
    let data = contiguous.data();

    let default_index;
    let (prototype, index) = match dummy {
        Some(dummy) => {
            let values = dummy_values::<T>(dummy)?;
            if values.len() != chunk {
                return Err(ReduceError::DummyShapeMismatch {
                    expected: chunk,
                    actual: values.len(),
                });
            }
            (values, dummy.index())
        }
        None => {
            default_index = Index::from_range(0, chunk as i64, 1);
            (data.get(..chunk).unwrap_or(&[]), &default_index)
        }
    };

    if let Some(labels) = labels
        && labels.len() != nresults
    {
        return Err(ReduceError::LengthMismatch {
            expected: nresults,
            actual: labels.len(),
        });
    }

    if nresults == 0 {
        return Ok(ColumnData::Object(Vec::new()));
    }

    let mut values_view = BufferView::new(data, prototype);
    let mut slider = values_view.guard();
    slider.set_length(chunk);

    let mut results = Vec::with_capacity(nresults);
    let mut cached: Option<SeriesView<'_, T>> = None;
    for position in 0..nresults {
        let name = labels.and_then(|labels| labels.get(position).cloned());
        let window = slider
            .as_slice()
            .ok_or_else(|| ReduceError::InvalidRange(format!("chunk {position} past buffer end")))?;
        let series = match cached.as_mut() {
            Some(series) => {
                series.rebind_values(window);
                series.set_name(name);
                series
            }
            None => cached.insert(SeriesView::new(window, IndexView::over(index), name)?),
        };

        let res = f(&*series).map_err(|source| ReduceError::ApplyFailed { position, source })?;
        let piece = extract_result(res, false);
        if position == 0 {
            check_result_array(&piece, chunk)?;
        }
        results.push(piece.into_boxed());
        slider.advance(chunk);
    }

    Ok(ColumnData::narrow(results))
}

// ── GroupReducer ───────────────────────────────────────────────────────

/// Per-group results and group sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupReduction {
    pub values: ColumnData,
    pub counts: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GroupWindow {
    slot: usize,
    start: usize,
    len: usize,
}

fn bin_windows(bins: &[i64], n: usize) -> Result<(Vec<GroupWindow>, Vec<i64>), ReduceError> {
    let Some(&last) = bins.last() else {
        return Err(ReduceError::InvalidBins("at least one edge is required".to_owned()));
    };
    let mut edges = Vec::with_capacity(bins.len());
    let mut previous = 0_usize;
    for &edge in bins {
        let edge = usize::try_from(edge)
            .map_err(|_| ReduceError::InvalidBins(format!("negative edge {edge}")))?;
        if edge < previous {
            return Err(ReduceError::InvalidBins(format!(
                "edges must be non-decreasing, {edge} follows {previous}"
            )));
        }
        if edge > n {
            return Err(ReduceError::InvalidBins(format!(
                "edge {edge} is past the data length {n}"
            )));
        }
        edges.push(edge);
        previous = edge;
    }

    let ngroups = if usize::try_from(last).is_ok_and(|last| last == n) {
        edges.len()
    } else {
        edges.len() + 1
    };

    let mut windows = Vec::with_capacity(ngroups);
    let mut counts = vec![0_i64; ngroups];
    for slot in 0..ngroups {
        let start = if slot == 0 { 0 } else { edges[slot - 1] };
        let end = if slot == ngroups - 1 { n } else { edges[slot] };
        let len = end - start;
        counts[slot] = len as i64;
        windows.push(GroupWindow { slot, start, len });
    }
    Ok((windows, counts))
}

fn label_windows(
    labels: &[i64],
    ngroups: usize,
) -> Result<(Vec<GroupWindow>, Vec<i64>), ReduceError> {
    let n = labels.len();
    let mut windows = Vec::new();
    let mut counts = vec![0_i64; ngroups];
    let mut start = 0;
    let mut group_size = 0;
    for (i, &label) in labels.iter().enumerate() {
        group_size += 1;
        if i + 1 < n && labels[i + 1] == label {
            continue;
        }
        if label != -1 {
            let slot = usize::try_from(label)
                .ok()
                .filter(|&slot| slot < ngroups)
                .ok_or(ReduceError::LabelOutOfRange { label, ngroups })?;
            windows.push(GroupWindow {
                slot,
                start,
                len: group_size,
            });
            counts[slot] = group_size as i64;
        }
        start += group_size;
        group_size = 0;
    }
    Ok((windows, counts))
}

fn run_groups<T, F>(
    values: &[T],
    index: &Index,
    name: Option<&IndexLabel>,
    dummy: &Series,
    windows: &[GroupWindow],
    nslots: usize,
    mut f: F,
) -> Result<Vec<Boxed>, ReduceError>
where
    T: Element,
    F: FnMut(&SeriesView<'_, T>) -> Result<Reduced, CallbackError>,
{
    let prototype = dummy_values::<T>(dummy)?;
    let mut values_view = BufferView::new(values, prototype);
    let mut vslider = values_view.guard();

    let mut results: Option<Vec<Boxed>> = None;
    let mut cached: Option<SeriesView<'_, T>> = None;
    for window in windows {
        let end = window.start + window.len;
        vslider.move_to(window.start, end);
        let chunk = vslider.as_slice().ok_or(ReduceError::LengthMismatch {
            expected: end,
            actual: values.len(),
        })?;

        let series = match cached.as_mut() {
            Some(series) => {
                series.rebind_values(chunk);
                series.index_mut().move_to(window.start, end);
                series.set_name(name.cloned());
                series
            }
            None => {
                let mut labels = IndexView::with_prototype(index, dummy.index());
                labels.move_to(window.start, end);
                cached.insert(SeriesView::new(chunk, labels, name.cloned())?)
            }
        };
        series.index_mut().clear_engine();

        let res = f(&*series).map_err(|source| ReduceError::ApplyFailed {
            position: window.slot,
            source,
        })?;
        let piece = extract_result(res, true);
        let slots = match results.as_mut() {
            Some(slots) => slots,
            None => {
                check_result_array(&piece, prototype.len())?;
                results.insert(vec![Boxed::missing(); nslots])
            }
        };
        slots[window.slot] = piece.into_boxed();
    }

    results.ok_or(ReduceError::NoResult)
}

fn check_group_input<T>(values: &[T], index: &Index) -> Result<(), ReduceError> {
    if index.len() != values.len() {
        return Err(ReduceError::LengthMismatch {
            expected: values.len(),
            actual: index.len(),
        });
    }
    Ok(())
}

/// Reduce contiguous groups delimited by `bins` edges.
///
/// The last group runs to the end of `values` unless the last edge already
/// equals its length.
pub fn reduce_bins<T, F>(
    values: &[T],
    index: &Index,
    name: Option<&IndexLabel>,
    bins: &[i64],
    dummy: &Series,
    f: F,
) -> Result<GroupReduction, ReduceError>
where
    T: Element,
    F: FnMut(&SeriesView<'_, T>) -> Result<Reduced, CallbackError>,
{
    check_group_input(values, index)?;
    let (windows, counts) = bin_windows(bins, values.len())?;
    let slots = run_groups(values, index, name, dummy, &windows, counts.len(), f)?;
    Ok(GroupReduction {
        values: ColumnData::narrow(slots),
        counts,
    })
}

/// Reduce runs of equal group `labels`; `-1` rows are skipped.
///
/// A label that reappears after a different one overwrites the earlier
/// result and count of that group.
pub fn reduce_labels<T, F>(
    values: &[T],
    index: &Index,
    name: Option<&IndexLabel>,
    labels: &[i64],
    ngroups: usize,
    dummy: &Series,
    f: F,
) -> Result<GroupReduction, ReduceError>
where
    T: Element,
    F: FnMut(&SeriesView<'_, T>) -> Result<Reduced, CallbackError>,
{
    check_group_input(values, index)?;
    if labels.len() != values.len() {
        return Err(ReduceError::LengthMismatch {
            expected: values.len(),
            actual: labels.len(),
        });
    }
    let (windows, counts) = label_windows(labels, ngroups)?;
    let slots = run_groups(values, index, name, dummy, &windows, ngroups, f)?;
    Ok(GroupReduction {
        values: ColumnData::narrow(slots),
        counts,
    })
}

// ── FrameRowApplier ────────────────────────────────────────────────────

pub const DEFAULT_ARENA_BUDGET_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameApplyOptions {
    /// Upper bound on the bytes reserved up front for window views.
    pub arena_budget_bytes: usize,
}

impl Default for FrameApplyOptions {
    fn default() -> Self {
        Self {
            arena_budget_bytes: DEFAULT_ARENA_BUDGET_BYTES,
        }
    }
}

/// Index carried by a frame-shaped piece.
#[derive(Debug)]
pub enum IndexRef<'w, 'a> {
    /// The window's own index object.
    Borrowed(&'w IndexView<'a>),
    Owned(Index),
}

impl IndexRef<'_, '_> {
    #[must_use]
    pub fn to_index(&self) -> Index {
        match self {
            Self::Borrowed(view) => view.to_index(),
            Self::Owned(index) => index.clone(),
        }
    }
}

/// What a frame callback returns for one window.
#[derive(Debug)]
pub enum Piece<'w, 'a> {
    Scalar(Scalar),
    /// The window itself.
    Window(&'w FrameWindow<'a>),
    Frame {
        index: IndexRef<'w, 'a>,
        columns: Vec<(String, ColumnData)>,
    },
}

/// A piece detached from the window that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum AppliedPiece {
    Scalar(Scalar),
    Table(Table),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameApply {
    pub pieces: Vec<AppliedPiece>,
    /// Some piece came back with an index other than the window's own.
    pub mutated: bool,
    /// The first piece was the window itself; iteration stopped after it.
    pub require_slow_path: bool,
}

pub fn apply_frame_rows<F>(
    frame: &Frame,
    f: F,
    names: &[IndexLabel],
    starts: &[usize],
    ends: &[usize],
) -> Result<FrameApply, ReduceError>
where
    F: for<'w, 'v> FnMut(&'w FrameWindow<'v>) -> Result<Piece<'w, 'v>, CallbackError>,
{
    apply_frame_rows_with_options(frame, f, names, starts, ends, FrameApplyOptions::default())
}

/// Call `f` once per `[starts[i], ends[i])` row range through a single
/// [`FrameWindow`] that is re-aimed between calls.
pub fn apply_frame_rows_with_options<F>(
    frame: &Frame,
    mut f: F,
    names: &[IndexLabel],
    starts: &[usize],
    ends: &[usize],
    options: FrameApplyOptions,
) -> Result<FrameApply, ReduceError>
where
    F: for<'w, 'v> FnMut(&'w FrameWindow<'v>) -> Result<Piece<'w, 'v>, CallbackError>,
{
    if frame.index().is_multi() {
        return Err(ReduceError::ComplexIndexUnsupported);
    }
    validate_ranges(frame.nrows(), names, starts, ends)?;

    let estimated_bytes = frame
        .ncols()
        .saturating_mul(size_of::<ColumnView<'_>>() + size_of::<&str>());
    if estimated_bytes > options.arena_budget_bytes {
        tracing::debug!(
            "window views need ~{estimated_bytes} bytes, reserving {} up front",
            options.arena_budget_bytes
        );
    }
    let arena = Bump::with_capacity(estimated_bytes.min(options.arena_budget_bytes));
    apply_in(frame, &arena, &mut f, names, starts, ends)
}

fn validate_ranges(
    nrows: usize,
    names: &[IndexLabel],
    starts: &[usize],
    ends: &[usize],
) -> Result<(), ReduceError> {
    if names.len() != starts.len() || starts.len() != ends.len() {
        return Err(ReduceError::InvalidRange(format!(
            "names ({}), starts ({}) and ends ({}) differ in length",
            names.len(),
            starts.len(),
            ends.len()
        )));
    }
    for (position, (&start, &end)) in starts.iter().zip(ends).enumerate() {
        if start > end || end > nrows {
            return Err(ReduceError::InvalidRange(format!(
                "range {position} is [{start}, {end}) over {nrows} rows"
            )));
        }
    }
    Ok(())
}

fn apply_in<'a, F>(
    frame: &'a Frame,
    arena: &'a Bump,
    f: &mut F,
    names: &[IndexLabel],
    starts: &[usize],
    ends: &[usize],
) -> Result<FrameApply, ReduceError>
where
    F: for<'w, 'v> FnMut(&'w FrameWindow<'v>) -> Result<Piece<'w, 'v>, CallbackError>,
{
    let mut window = FrameWindow::new_in(frame, arena)?;
    let mut pieces = Vec::with_capacity(starts.len());
    let mut mutated = false;
    let mut require_slow_path = false;

    for (position, ((&start, &end), name)) in starts.iter().zip(ends).zip(names).enumerate() {
        window.move_to(start, end)?;
        window.set_name(Some(name.clone()));

        let piece = f(&window).map_err(|source| ReduceError::ApplyFailed { position, source })?;

        require_slow_path =
            position == 0 && matches!(piece, Piece::Window(returned) if std::ptr::eq(returned, &window));
        let foreign_index = match &piece {
            Piece::Scalar(_) => false,
            Piece::Window(returned) => !std::ptr::eq(returned.index(), window.index()),
            Piece::Frame { index, .. } => {
                !matches!(index, IndexRef::Borrowed(view) if std::ptr::eq(*view, window.index()))
            }
        };
        mutated |= foreign_index;

        pieces.push(match piece {
            Piece::Scalar(value) => AppliedPiece::Scalar(value),
            Piece::Window(returned) => AppliedPiece::Table(returned.to_table()),
            Piece::Frame { index, columns } => {
                AppliedPiece::Table(Table::new(index.to_index(), columns)?)
            }
        });

        if require_slow_path {
            tracing::debug!("callback returned its window; stopping after the first range");
            break;
        }
    }

    Ok(FrameApply {
        pieces,
        mutated,
        require_slow_path,
    })
}

#[cfg(test)]
mod tests {
    use fp_columnar::{ColumnData, Layout, Matrix};
    use fp_frame::{Frame, Series};
    use fp_index::{Index, IndexLabel};
    use fp_types::{Boxed, DType, Scalar};

    use super::{
        AppliedPiece, Axis, IndexRef, Piece, ReduceError, ReduceOptions, Reduced,
        apply_frame_rows, reduce_bins, reduce_labels, reduce_rows,
    };

    fn matrix_2x3(layout: Layout) -> Matrix<f64> {
        let rows = Matrix::from_rows(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]])
            .expect("matrix");
        rows.with_layout(layout).into_owned()
    }

    // === RowReducer ===

    #[test]
    fn axis_zero_sums_columns_for_either_layout() {
        for layout in [Layout::RowMajor, Layout::ColumnMajor] {
            let result = reduce_rows(
                &matrix_2x3(layout),
                |s| Ok(Reduced::from(s.values().iter().sum::<f64>())),
                ReduceOptions::along(Axis::Rows),
                None,
                None,
            )
            .expect("reduce");
            assert_eq!(result, ColumnData::Float64(vec![5.0, 7.0, 9.0]));
        }
    }

    #[test]
    fn axis_one_sums_rows() {
        let result = reduce_rows(
            &matrix_2x3(Layout::RowMajor),
            |s| Ok(Reduced::from(s.values().iter().sum::<f64>())),
            ReduceOptions::along(Axis::Columns),
            None,
            None,
        )
        .expect("reduce");
        assert_eq!(result, ColumnData::Float64(vec![6.0, 15.0]));
    }

    #[test]
    fn labels_name_each_chunk_and_dummy_index_labels_values() {
        let dummy = Series::new(
            None,
            Index::from_utf8(vec!["a".into(), "b".into()]),
            ColumnData::Float64(vec![0.0, 0.0]),
        )
        .expect("dummy");
        let labels: Vec<IndexLabel> = vec!["x".into(), "y".into(), "z".into()];
        let result = reduce_rows(
            &matrix_2x3(Layout::ColumnMajor),
            |s| {
                let name = s.name().map(ToString::to_string).unwrap_or_default();
                let b = s.get(&"b".into()).copied().unwrap_or(f64::NAN);
                Ok(Reduced::Scalar(Scalar::Utf8(format!("{name}={b}"))))
            },
            ReduceOptions::along(Axis::Rows),
            Some(&dummy),
            Some(&labels),
        )
        .expect("reduce");
        assert_eq!(
            result,
            ColumnData::Utf8(vec!["x=4".into(), "y=5".into(), "z=6".into()])
        );
    }

    #[test]
    fn dummy_checks_run_before_the_callback() {
        let wrong_dtype = Series::from_values(None, vec![0_i64, 0]);
        let mut calls = 0;
        let err = reduce_rows(
            &matrix_2x3(Layout::ColumnMajor),
            |_| {
                calls += 1;
                Ok(Reduced::from(0.0))
            },
            ReduceOptions::along(Axis::Rows),
            Some(&wrong_dtype),
            None,
        )
        .expect_err("dtype");
        assert!(matches!(
            err,
            ReduceError::DummyDtypeMismatch {
                expected: DType::Float64,
                actual: DType::Int64
            }
        ));

        let wrong_len = Series::from_values(None, vec![0.0; 3]);
        let err = reduce_rows(
            &matrix_2x3(Layout::ColumnMajor),
            |_| {
                calls += 1;
                Ok(Reduced::from(0.0))
            },
            ReduceOptions::along(Axis::Rows),
            Some(&wrong_len),
            None,
        )
        .expect_err("shape");
        assert!(matches!(
            err,
            ReduceError::DummyShapeMismatch {
                expected: 2,
                actual: 3
            }
        ));
        assert_eq!(calls, 0);
    }

    #[test]
    fn returning_the_window_does_not_reduce() {
        let err = reduce_rows(
            &matrix_2x3(Layout::RowMajor),
            |s| Ok(Reduced::Array(s.to_scalars())),
            ReduceOptions::default(),
            None,
            None,
        )
        .expect_err("not a reduction");
        assert!(matches!(err, ReduceError::DoesNotReduce));
    }

    #[test]
    fn lists_only_fail_when_as_long_as_the_chunk() {
        let err = reduce_rows(
            &matrix_2x3(Layout::RowMajor),
            |s| Ok(Reduced::List(s.to_scalars())),
            ReduceOptions::default(),
            None,
            None,
        )
        .expect_err("list of chunk length");
        assert!(matches!(err, ReduceError::DoesNotReduce));

        let result = reduce_rows(
            &matrix_2x3(Layout::RowMajor),
            |s| Ok(Reduced::List(s.to_scalars()[..2].to_vec())),
            ReduceOptions::default(),
            None,
            None,
        )
        .expect("short lists reduce");
        assert_eq!(result.dtype(), DType::Object);
    }

    #[test]
    fn zero_dim_and_labeled_results_are_unwrapped() {
        let result = reduce_rows(
            &matrix_2x3(Layout::RowMajor),
            |s| Ok(Reduced::ZeroDim(Scalar::Float64(s.values()[0]))),
            ReduceOptions::default(),
            None,
            None,
        )
        .expect("zero-dim");
        assert_eq!(result, ColumnData::Float64(vec![1.0, 4.0]));

        let err = reduce_rows(
            &matrix_2x3(Layout::RowMajor),
            |s| {
                Ok(Reduced::Labeled {
                    values: vec![Scalar::Float64(s.values()[0])],
                    index: Index::from_i64(vec![0]),
                    name: None,
                })
            },
            ReduceOptions::default(),
            None,
            None,
        )
        .expect_err("row reducer does not squeeze");
        assert!(matches!(err, ReduceError::DoesNotReduce));
    }

    #[test]
    fn callback_errors_carry_their_position() {
        let err = reduce_rows(
            &matrix_2x3(Layout::RowMajor),
            |s| {
                if s.values()[0] > 2.0 {
                    Err("boom".into())
                } else {
                    Ok(Reduced::from(1.0))
                }
            },
            ReduceOptions::default(),
            None,
            None,
        )
        .expect_err("second row fails");
        match err {
            ReduceError::ApplyFailed { position, source } => {
                assert_eq!(position, 1);
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn zero_chunks_yield_empty_object_result() {
        let empty = Matrix::<f64>::new(Vec::new(), 0, 3, Layout::RowMajor).expect("matrix");
        let result = reduce_rows(
            &empty,
            |_| Ok(Reduced::from(0.0)),
            ReduceOptions::along(Axis::Columns),
            None,
            None,
        )
        .expect("empty");
        assert_eq!(result, ColumnData::Object(Vec::new()));
    }

    #[test]
    fn disabled_copy_rejects_mismatched_layout() {
        let err = reduce_rows(
            &matrix_2x3(Layout::RowMajor),
            |_| Ok(Reduced::from(0.0)),
            ReduceOptions {
                axis: Axis::Rows,
                copy_to_contiguous: false,
            },
            None,
            None,
        )
        .expect_err("layout");
        assert!(matches!(
            err,
            ReduceError::NotContiguous {
                required: Layout::ColumnMajor,
                actual: Layout::RowMajor
            }
        ));
    }

    // === GroupReducer: bin edges ===

    fn series_f64(values: &[f64]) -> (Index, Series) {
        let index = Index::from_range(0, values.len() as i64, 1);
        let dummy = Series::from_values(None, values.to_vec())
            .slice(0, 0)
            .expect("dummy");
        (index, dummy)
    }

    #[test]
    fn bins_partition_values_and_last_group_absorbs_tail() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let (index, dummy) = series_f64(&values);
        let result = reduce_bins(
            &values,
            &index,
            None,
            &[2, 5],
            &dummy,
            |s| Ok(Reduced::from(s.values().iter().sum::<f64>())),
        )
        .expect("bins");
        assert_eq!(result.counts, vec![2, 3, 1]);
        assert_eq!(result.values, ColumnData::Float64(vec![3.0, 12.0, 6.0]));
    }

    #[test]
    fn last_edge_equal_to_length_adds_no_extra_group() {
        let values = [1.0, 2.0, 3.0, 4.0];
        let (index, dummy) = series_f64(&values);
        let result = reduce_bins(
            &values,
            &index,
            None,
            &[1, 4],
            &dummy,
            |s| Ok(Reduced::from(s.len() as i64)),
        )
        .expect("bins");
        assert_eq!(result.counts, vec![1, 3]);
        assert_eq!(result.values, ColumnData::Int64(vec![1, 3]));
    }

    #[test]
    fn invalid_bins_are_rejected_before_any_call() {
        let values = [1.0, 2.0, 3.0];
        let (index, dummy) = series_f64(&values);
        for bins in [&[][..], &[2, 1][..], &[1, 5][..], &[-1][..]] {
            let err = reduce_bins(&values, &index, None, bins, &dummy, |_| {
                panic!("callback must not run")
            })
            .expect_err("invalid bins");
            assert!(matches!(err, ReduceError::InvalidBins(_)), "{bins:?}");
        }
    }

    #[test]
    fn groups_see_their_own_index_window() {
        let values = [10.0, 20.0, 30.0, 40.0];
        let index = Index::from_utf8(vec!["a".into(), "b".into(), "c".into(), "d".into()]);
        let dummy = Series::new(None, Index::new(Vec::new()), ColumnData::Float64(Vec::new()))
            .expect("dummy");
        let result = reduce_bins(&values, &index, Some(&"s".into()), &[2], &dummy, |s| {
            assert_eq!(s.name(), Some(&IndexLabel::from("s")));
            let first = s.index().labels()[0].clone();
            Ok(Reduced::from(*s.get(&first).expect("label in window")))
        })
        .expect("bins");
        assert_eq!(result.values, ColumnData::Float64(vec![10.0, 30.0]));
    }

    #[test]
    fn group_arrays_are_squeezed_or_rejected() {
        let values = [1.0, 2.0, 3.0];
        let (index, dummy) = series_f64(&values);
        let squeezed = reduce_bins(&values, &index, None, &[1], &dummy, |s| {
            Ok(Reduced::Array(vec![Scalar::Float64(s.values()[0])]))
        })
        .expect("length-1 arrays squeeze");
        assert_eq!(squeezed.values, ColumnData::Float64(vec![1.0, 2.0]));

        let err = reduce_bins(&values, &index, None, &[2], &dummy, |s| {
            Ok(Reduced::Array(s.to_scalars()))
        });
        assert!(matches!(err, Err(ReduceError::DoesNotReduce)));
    }

    #[test]
    fn dummy_dtype_must_match_values() {
        let values = [1_i64, 2, 3];
        let index = Index::from_range(0, 3, 1);
        let dummy = Series::from_values(None, Vec::<f64>::new());
        let err = reduce_bins(&values, &index, None, &[1], &dummy, |_| Ok(Reduced::from(0_i64)))
            .expect_err("dtype");
        assert!(matches!(err, ReduceError::DummyDtypeMismatch { .. }));
    }

    // === GroupReducer: labels ===

    #[test]
    fn label_runs_skip_minus_one_and_leave_unvisited_groups_missing() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let (index, dummy) = series_f64(&values);
        let labels = [0, 0, -1, 2, 2, -1];
        let result = reduce_labels(&values, &index, None, &labels, 4, &dummy, |s| {
            Ok(Reduced::from(s.values().iter().sum::<f64>()))
        })
        .expect("labels");
        assert_eq!(result.counts, vec![2, 0, 2, 0]);
        let skipped = labels.iter().filter(|&&l| l == -1).count() as i64;
        assert_eq!(result.counts.iter().sum::<i64>() + skipped, values.len() as i64);
        match result.values {
            ColumnData::Float64(sums) => {
                assert_eq!(sums[0], 3.0);
                assert!(sums[1].is_nan());
                assert_eq!(sums[2], 9.0);
                assert!(sums[3].is_nan());
            }
            other => panic!("expected Float64, got {other:?}"),
        }
    }

    #[test]
    fn reappearing_label_overwrites_result_and_count() {
        let values = [1_i64, 2, 3, 4];
        let index = Index::from_range(0, 4, 1);
        let dummy = Series::from_values(None, Vec::<i64>::new());
        let result = reduce_labels(&values, &index, None, &[0, 0, 1, 0], 2, &dummy, |s| {
            Ok(Reduced::from(s.values().iter().sum::<i64>()))
        })
        .expect("labels");
        assert_eq!(result.counts, vec![1, 1]);
        assert_eq!(result.values, ColumnData::Int64(vec![4, 3]));
    }

    #[test]
    fn label_validation_errors() {
        let values = [1.0, 2.0];
        let (index, dummy) = series_f64(&values);
        let err = reduce_labels(&values, &index, None, &[0], 1, &dummy, |_| {
            Ok(Reduced::from(0.0))
        });
        assert!(matches!(
            err,
            Err(ReduceError::LengthMismatch {
                expected: 2,
                actual: 1
            })
        ));

        let err = reduce_labels(&values, &index, None, &[0, 3], 2, &dummy, |_| {
            Ok(Reduced::from(0.0))
        });
        assert!(matches!(
            err,
            Err(ReduceError::LabelOutOfRange {
                label: 3,
                ngroups: 2
            })
        ));
    }

    #[test]
    fn all_rows_excluded_is_no_result() {
        let values = [1.0, 2.0];
        let (index, dummy) = series_f64(&values);
        let err = reduce_labels(&values, &index, None, &[-1, -1], 1, &dummy, |_| {
            Ok(Reduced::from(0.0))
        });
        assert!(matches!(err, Err(ReduceError::NoResult)));

        let err = reduce_labels(&[] as &[f64], &Index::new(Vec::new()), None, &[], 1, &dummy, |_| {
            Ok(Reduced::from(0.0))
        });
        assert!(matches!(err, Err(ReduceError::NoResult)));
    }

    #[test]
    fn slots_only_narrow_when_every_group_fits() {
        let values = [1.0, 2.0, 3.0];
        let (index, dummy) = series_f64(&values);
        let result = reduce_labels(&values, &index, None, &[0, 1, 1], 2, &dummy, |s| {
            Ok(if s.len() == 1 {
                Reduced::from(1.0)
            } else {
                Reduced::Scalar(Scalar::Utf8("many".into()))
            })
        })
        .expect("labels");
        assert_eq!(
            result.values,
            ColumnData::Object(vec![
                Boxed::Scalar(Scalar::Float64(1.0)),
                Boxed::Scalar(Scalar::Utf8("many".into())),
            ])
        );
    }

    // === FrameRowApplier ===

    fn sample_frame() -> Frame {
        Frame::from_columns(
            Index::from_i64(vec![10, 11, 12, 13]),
            vec![
                ("x".to_owned(), ColumnData::Int64(vec![1, 2, 3, 4])),
                ("y".to_owned(), ColumnData::Float64(vec![0.5, 0.5, 1.5, 1.5])),
            ],
        )
        .expect("frame")
    }

    fn names(n: usize) -> Vec<IndexLabel> {
        (0..n as i64).map(IndexLabel::from).collect()
    }

    #[test]
    fn scalar_pieces_per_range() {
        let frame = sample_frame();
        let result = apply_frame_rows(
            &frame,
            |w| {
                let x: i64 = w.typed_column::<i64>("x").unwrap_or(&[]).iter().sum();
                Ok(Piece::Scalar(Scalar::Int64(x)))
            },
            &names(2),
            &[0, 2],
            &[2, 4],
        )
        .expect("apply");
        assert_eq!(
            result.pieces,
            vec![
                AppliedPiece::Scalar(Scalar::Int64(3)),
                AppliedPiece::Scalar(Scalar::Int64(7)),
            ]
        );
        assert!(!result.mutated);
        assert!(!result.require_slow_path);
    }

    #[test]
    fn returning_the_window_first_takes_the_slow_path() {
        let frame = sample_frame();
        let mut calls = 0;
        let result = apply_frame_rows(
            &frame,
            |w| {
                calls += 1;
                Ok(Piece::Window(w))
            },
            &names(2),
            &[0, 2],
            &[2, 4],
        )
        .expect("apply");
        assert_eq!(calls, 1);
        assert!(result.require_slow_path);
        assert!(!result.mutated);
        match &result.pieces[..] {
            [AppliedPiece::Table(table)] => {
                assert_eq!(table.index(), &Index::from_i64(vec![10, 11]));
                assert_eq!(table.column("x"), Some(&ColumnData::Int64(vec![1, 2])));
            }
            other => panic!("unexpected pieces: {other:?}"),
        }
    }

    #[test]
    fn piece_index_identity_decides_mutated() {
        let frame = sample_frame();
        let kept = apply_frame_rows(
            &frame,
            |w| {
                Ok(Piece::Frame {
                    index: IndexRef::Borrowed(w.index()),
                    columns: vec![(
                        "x".to_owned(),
                        w.item("x")
                            .map(|column| column.clone())
                            .unwrap_or(ColumnData::Int64(Vec::new())),
                    )],
                })
            },
            &names(2),
            &[0, 2],
            &[2, 4],
        )
        .expect("apply");
        assert!(!kept.mutated);
        assert_eq!(kept.pieces.len(), 2);

        let replaced = apply_frame_rows(
            &frame,
            |w| {
                Ok(Piece::Frame {
                    index: IndexRef::Owned(Index::from_range(0, w.nrows() as i64, 1)),
                    columns: Vec::new(),
                })
            },
            &names(2),
            &[0, 2],
            &[2, 4],
        )
        .expect("apply");
        assert!(replaced.mutated);
        assert!(!replaced.require_slow_path);
    }

    #[test]
    fn multi_level_index_is_rejected_before_any_window() {
        let frame = Frame::from_columns(
            Index::from_tuples(vec![
                vec!["a".into(), 1_i64.into()],
                vec!["a".into(), 2_i64.into()],
            ])
            .expect("tuples"),
            vec![("x".to_owned(), ColumnData::Int64(vec![1, 2]))],
        )
        .expect("frame");
        let err = apply_frame_rows(
            &frame,
            |_| panic!("callback must not run"),
            &names(1),
            &[0],
            &[2],
        )
        .expect_err("multi-level");
        assert!(matches!(err, ReduceError::ComplexIndexUnsupported));
    }

    #[test]
    fn ranges_are_validated_up_front() {
        let frame = sample_frame();
        for (starts, ends) in [(&[0, 1][..], &[1][..]), (&[3][..], &[2][..]), (&[0][..], &[5][..])] {
            let err = apply_frame_rows(
                &frame,
                |_| Ok(Piece::Scalar(Scalar::Int64(0))),
                &names(starts.len()),
                starts,
                ends,
            )
            .expect_err("invalid range");
            assert!(matches!(err, ReduceError::InvalidRange(_)));
        }
    }

    #[test]
    fn window_name_follows_each_range() {
        let frame = sample_frame();
        let labels: Vec<IndexLabel> = vec!["first".into(), "second".into()];
        let result = apply_frame_rows(
            &frame,
            |w| {
                Ok(Piece::Scalar(Scalar::Utf8(
                    w.name().map(ToString::to_string).unwrap_or_default(),
                )))
            },
            &labels,
            &[0, 1],
            &[1, 2],
        )
        .expect("apply");
        assert_eq!(
            result.pieces,
            vec![
                AppliedPiece::Scalar(Scalar::from("first")),
                AppliedPiece::Scalar(Scalar::from("second")),
            ]
        );
    }
}
