#![forbid(unsafe_code)]

use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;

use bumpalo::Bump;
use bumpalo::collections::Vec as BumpVec;
use fp_columnar::{ColumnData, ColumnError, ColumnSlice, ColumnView, Element};
use fp_index::{Index, IndexError, IndexLabel, IndexView};
use fp_types::{DType, Scalar};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("index length ({index_len}) does not match column length ({column_len})")]
    LengthMismatch { index_len: usize, column_len: usize },
    #[error("block holds {len} values, expected {ncols} columns x {nrows} rows")]
    BlockShape {
        len: usize,
        ncols: usize,
        nrows: usize,
    },
    #[error("duplicate column name {0:?}")]
    DuplicateColumn(String),
    #[error("window [{start}, {end}) is outside a frame of {nrows} rows")]
    WindowOutOfRange {
        start: usize,
        end: usize,
        nrows: usize,
    },
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

// ── Series ─────────────────────────────────────────────────────────────

/// Owned labeled 1-D values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    name: Option<IndexLabel>,
    index: Index,
    values: ColumnData,
}

impl Series {
    pub fn new(
        name: Option<IndexLabel>,
        index: Index,
        values: ColumnData,
    ) -> Result<Self, FrameError> {
        if index.len() != values.len() {
            return Err(FrameError::LengthMismatch {
                index_len: index.len(),
                column_len: values.len(),
            });
        }
        Ok(Self {
            name,
            index,
            values,
        })
    }

    /// Typed values over a default `0..n` index.
    #[must_use]
    pub fn from_values<T: Element>(name: Option<IndexLabel>, values: Vec<T>) -> Self {
        let index = Index::from_range(0, values.len() as i64, 1);
        Self {
            name,
            index,
            values: T::into_column(values),
        }
    }

    #[must_use]
    pub fn name(&self) -> Option<&IndexLabel> {
        self.name.as_ref()
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn values(&self) -> &ColumnData {
        &self.values
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.values.dtype()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn typed<T: Element>(&self) -> Option<&[T]> {
        T::from_column_slice(self.values.as_slice())
    }

    /// Rows `[start, end)` as a new series.
    pub fn slice(&self, start: usize, end: usize) -> Result<Self, FrameError> {
        let index = self.index.slice(start, end)?;
        let values = self
            .values
            .slice(start..end)
            .ok_or(FrameError::LengthMismatch {
                index_len: end.saturating_sub(start),
                column_len: self.values.len(),
            })?
            .to_owned_column();
        Ok(Self {
            name: self.name.clone(),
            index,
            values,
        })
    }
}

/// Rebindable series over a borrowed values window.
///
/// Engines build one of these from the first window and re-aim it for every
/// subsequent window; the borrow ties it to a single engine call.
#[derive(Debug, Clone)]
pub struct SeriesView<'a, T> {
    values: &'a [T],
    index: IndexView<'a>,
    name: Option<IndexLabel>,
}

impl<'a, T: Element> SeriesView<'a, T> {
    pub fn new(
        values: &'a [T],
        index: IndexView<'a>,
        name: Option<IndexLabel>,
    ) -> Result<Self, FrameError> {
        if index.len() != values.len() {
            return Err(FrameError::LengthMismatch {
                index_len: index.len(),
                column_len: values.len(),
            });
        }
        Ok(Self {
            values,
            index,
            name,
        })
    }

    pub fn rebind_values(&mut self, values: &'a [T]) {
        self.values = values;
    }

    pub fn index_mut(&mut self) -> &mut IndexView<'a> {
        &mut self.index
    }

    pub fn set_name(&mut self, name: Option<IndexLabel>) {
        self.name = name;
    }

    #[must_use]
    pub fn values(&self) -> &'a [T] {
        self.values
    }

    #[must_use]
    pub fn index(&self) -> &IndexView<'a> {
        &self.index
    }

    #[must_use]
    pub fn name(&self) -> Option<&IndexLabel> {
        self.name.as_ref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    /// Value at `label`, resolved through the index engine.
    #[must_use]
    pub fn get(&self, label: &IndexLabel) -> Option<&'a T> {
        let values = self.values;
        self.index.get_loc(label).and_then(|pos| values.get(pos))
    }

    #[must_use]
    pub fn to_scalars(&self) -> Vec<Scalar> {
        self.values.iter().map(Element::to_scalar).collect()
    }

    /// Deep copy of the current window.
    #[must_use]
    pub fn to_series(&self) -> Series {
        Series {
            name: self.name.clone(),
            index: self.index.to_index(),
            values: T::into_column(self.values.to_vec()),
        }
    }
}

// ── Frame ──────────────────────────────────────────────────────────────

/// Same-dtype columns stored column-major in one buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    names: Vec<String>,
    data: ColumnData,
}

impl Block {
    #[must_use]
    pub fn new(names: Vec<String>, data: ColumnData) -> Self {
        Self { names, data }
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    #[must_use]
    pub fn ncols(&self) -> usize {
        self.names.len()
    }

    fn column(&self, col: usize, nrows: usize) -> Option<ColumnSlice<'_>> {
        let start = col.checked_mul(nrows)?;
        self.data.slice(start..start + nrows)
    }
}

fn extend_column(target: &mut ColumnData, source: ColumnData) -> Result<(), FrameError> {
    match (target, source) {
        (ColumnData::Float64(a), ColumnData::Float64(b)) => a.extend(b),
        (ColumnData::Int64(a), ColumnData::Int64(b)) => a.extend(b),
        (ColumnData::Bool(a), ColumnData::Bool(b)) => a.extend(b),
        (ColumnData::Utf8(a), ColumnData::Utf8(b)) => a.extend(b),
        (ColumnData::Datetime64(a), ColumnData::Datetime64(b)) => a.extend(b),
        (ColumnData::Object(a), ColumnData::Object(b)) => a.extend(b),
        (target, source) => {
            return Err(ColumnError::DummyDtypeMismatch {
                expected: target.dtype(),
                actual: source.dtype(),
            }
            .into());
        }
    }
    Ok(())
}

/// Two-dimensional table of named columns held in dtype blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    index: Index,
    blocks: Vec<Block>,
    /// Column order as `(block, column-within-block)`.
    order: Vec<(usize, usize)>,
}

impl Frame {
    pub fn from_blocks(index: Index, blocks: Vec<Block>) -> Result<Self, FrameError> {
        let nrows = index.len();
        let mut order = Vec::new();
        let mut seen = BTreeMap::new();
        for (block_pos, block) in blocks.iter().enumerate() {
            if block.data.len() != block.ncols() * nrows {
                return Err(FrameError::BlockShape {
                    len: block.data.len(),
                    ncols: block.ncols(),
                    nrows,
                });
            }
            for (col, name) in block.names.iter().enumerate() {
                if seen.insert(name.as_str(), ()).is_some() {
                    return Err(FrameError::DuplicateColumn(name.clone()));
                }
                order.push((block_pos, col));
            }
        }
        Ok(Self {
            index,
            blocks,
            order,
        })
    }

    /// Build from named columns, consolidating equal dtypes into one block.
    pub fn from_columns(
        index: Index,
        columns: Vec<(String, ColumnData)>,
    ) -> Result<Self, FrameError> {
        let nrows = index.len();
        let mut blocks: Vec<Block> = Vec::new();
        let mut order = Vec::with_capacity(columns.len());
        let mut seen = BTreeMap::new();
        for (name, data) in columns {
            if data.len() != nrows {
                return Err(FrameError::LengthMismatch {
                    index_len: nrows,
                    column_len: data.len(),
                });
            }
            if seen.insert(name.clone(), ()).is_some() {
                return Err(FrameError::DuplicateColumn(name));
            }
            match blocks.iter().position(|b| b.data.dtype() == data.dtype()) {
                Some(pos) => {
                    let block = &mut blocks[pos];
                    extend_column(&mut block.data, data)?;
                    block.names.push(name);
                    order.push((pos, block.names.len() - 1));
                }
                None => {
                    order.push((blocks.len(), 0));
                    blocks.push(Block::new(vec![name], data));
                }
            }
        }
        Ok(Self {
            index,
            blocks,
            order,
        })
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    #[must_use]
    pub fn nrows(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn ncols(&self) -> usize {
        self.order.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.order
            .iter()
            .map(|&(block, col)| self.blocks[block].names[col].as_str())
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<ColumnSlice<'_>> {
        let nrows = self.nrows();
        self.order.iter().find_map(|&(block, col)| {
            let block = &self.blocks[block];
            (block.names[col] == name)
                .then(|| block.column(col, nrows))
                .flatten()
        })
    }
}

// ── Rebindable frame window ────────────────────────────────────────────

#[derive(Debug)]
struct WindowColumn<'a> {
    name: &'a str,
    view: ColumnView<'a>,
}

/// A frame whose columns and index are live windows over a parent [`Frame`].
///
/// Column views are allocated in the caller's arena. Moving the window
/// re-aims every view, clears the index engine and drops materialized
/// column copies. The window shows zero rows when created and again after
/// [`FrameWindow::reset`] or drop.
#[derive(Debug)]
pub struct FrameWindow<'a> {
    frame: &'a Frame,
    columns: BumpVec<'a, WindowColumn<'a>>,
    index: IndexView<'a>,
    name: Option<IndexLabel>,
    item_cache: RefCell<BTreeMap<String, ColumnData>>,
    start: usize,
    end: usize,
}

impl<'a> FrameWindow<'a> {
    pub fn new_in(frame: &'a Frame, arena: &'a Bump) -> Result<Self, FrameError> {
        let nrows = frame.nrows();
        let mut columns = BumpVec::with_capacity_in(frame.ncols(), arena);
        for &(block_pos, col) in &frame.order {
            let block = &frame.blocks[block_pos];
            let source = block.column(col, nrows).ok_or(FrameError::BlockShape {
                len: block.data.len(),
                ncols: block.ncols(),
                nrows,
            })?;
            columns.push(WindowColumn {
                name: block.names[col].as_str(),
                view: ColumnView::empty_over(source),
            });
        }
        let mut index = IndexView::over(frame.index());
        index.move_to(0, 0);
        Ok(Self {
            frame,
            columns,
            index,
            name: None,
            item_cache: RefCell::new(BTreeMap::new()),
            start: 0,
            end: 0,
        })
    }

    /// Re-aim the window at rows `[start, end)` of the parent frame.
    pub fn move_to(&mut self, start: usize, end: usize) -> Result<(), FrameError> {
        let nrows = self.frame.nrows();
        if start > end || end > nrows {
            return Err(FrameError::WindowOutOfRange { start, end, nrows });
        }
        for column in self.columns.iter_mut() {
            column.view.move_to(start, end);
        }
        self.index.move_to(start, end);
        self.item_cache.get_mut().clear();
        self.start = start;
        self.end = end;
        Ok(())
    }

    pub fn set_name(&mut self, name: Option<IndexLabel>) {
        self.name = name;
    }

    /// Back to zero rows on every column.
    pub fn reset(&mut self) {
        for column in self.columns.iter_mut() {
            column.view.reset();
        }
        self.index.move_to(0, 0);
        self.item_cache.get_mut().clear();
        self.start = 0;
        self.end = 0;
    }

    #[must_use]
    pub fn name(&self) -> Option<&IndexLabel> {
        self.name.as_ref()
    }

    #[must_use]
    pub fn index(&self) -> &IndexView<'a> {
        &self.index
    }

    #[must_use]
    pub fn bounds(&self) -> (usize, usize) {
        (self.start, self.end)
    }

    #[must_use]
    pub fn nrows(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.columns.iter().map(|column| column.name)
    }

    /// Zero-copy window of column `name`.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<ColumnSlice<'a>> {
        self.columns
            .iter()
            .find(|column| column.name == name)
            .and_then(|column| column.view.slice())
    }

    #[must_use]
    pub fn typed_column<T: Element>(&self, name: &str) -> Option<&'a [T]> {
        T::from_column_slice(self.column(name)?)
    }

    /// Materialized copy of column `name`, cached until the window moves.
    #[must_use]
    pub fn item(&self, name: &str) -> Option<Ref<'_, ColumnData>> {
        if !self.item_cache.borrow().contains_key(name) {
            let data = self.column(name)?.to_owned_column();
            self.item_cache.borrow_mut().insert(name.to_owned(), data);
        }
        Ref::filter_map(self.item_cache.borrow(), |cache| cache.get(name)).ok()
    }

    #[must_use]
    pub fn cached_items(&self) -> usize {
        self.item_cache.borrow().len()
    }

    /// Deep copy of the current window.
    #[must_use]
    pub fn to_table(&self) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|column| {
                let data = column
                    .view
                    .slice()
                    .map_or_else(|| ColumnData::Object(Vec::new()), |s| s.to_owned_column());
                (column.name.to_owned(), data)
            })
            .collect();
        Table {
            index: self.index.to_index(),
            columns,
        }
    }
}

impl Drop for FrameWindow<'_> {
    fn drop(&mut self) {
        self.reset();
    }
}

/// Owned frame piece detached from any window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    index: Index,
    columns: Vec<(String, ColumnData)>,
}

impl Table {
    pub fn new(index: Index, columns: Vec<(String, ColumnData)>) -> Result<Self, FrameError> {
        if let Some((_, data)) = columns.iter().find(|(_, data)| data.len() != index.len()) {
            return Err(FrameError::LengthMismatch {
                index_len: index.len(),
                column_len: data.len(),
            });
        }
        Ok(Self { index, columns })
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn columns(&self) -> &[(String, ColumnData)] {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns
            .iter()
            .find_map(|(n, data)| (n == name).then_some(data))
    }

    #[must_use]
    pub fn nrows(&self) -> usize {
        self.index.len()
    }
}
