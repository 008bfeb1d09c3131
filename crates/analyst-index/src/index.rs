//! Incremental multi-dimensional index.
//!
//! Rows are appended to a single store and keyed by any number of dimensions. Each dimension can
//! carry a [`Filter`]. Filtering is global: a filter on one dimension hides rows from global folds
//! and from the groups of every *other* dimension, while groups keyed by the filtered dimension
//! keep seeing them (so a grouped view never shrinks because of its own selection).
//!
//! Groups fold rows through an add/remove/initial triple ([`Fold`]). Nothing is recomputed from
//! scratch: appending rows folds only the new rows, and a filter change folds in/out only the rows
//! whose membership flipped. `remove` must therefore undo `add` exactly.
#![forbid(unsafe_code)]

use crate::bitmap::BitVec;
use crate::filter::Filter;
use crate::key::Key;
use std::collections::BTreeMap;
use std::fmt;

pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    #[error("unknown dimension: {0}")]
    UnknownDimension(DimensionId),

    #[error("unknown group: {0}")]
    UnknownGroup(GroupId),

    #[error("{0} is keyed by a dimension and has no single value")]
    KeyedGroup(GroupId),

    #[error("{0} is a global fold and has no keys")]
    GlobalGroup(GroupId),
}

/// Stable identity of a dimension inside one [`IndexedDataset`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DimensionId(usize);

impl DimensionId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for DimensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dimension #{}", self.0)
    }
}

/// Stable identity of a registered group inside one [`IndexedDataset`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(usize);

impl GroupId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group #{}", self.0)
    }
}

/// What [`IndexedDataset::all`] does with keys that currently have no visible rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum EmptyGroups {
    /// Leave the key out until a visible row carries it again.
    #[default]
    Omit,
    /// List every key held by a current row, with whatever its fold holds (usually the initial
    /// value).
    Retain,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, rename_all = "camelCase")
)]
pub struct IndexOptions {
    pub empty_groups: EmptyGroups,
}

pub type KeyFn<R> = Box<dyn Fn(&R) -> Key>;

/// An incremental reduction: `remove` must undo the matching `add` for the same row.
pub struct Fold<R, A> {
    add: Box<dyn Fn(&mut A, &R)>,
    remove: Box<dyn Fn(&mut A, &R)>,
    initial: Box<dyn Fn() -> A>,
}

impl<R, A> Fold<R, A> {
    pub fn new(
        add: impl Fn(&mut A, &R) + 'static,
        remove: impl Fn(&mut A, &R) + 'static,
        initial: impl Fn() -> A + 'static,
    ) -> Self {
        Self {
            add: Box::new(add),
            remove: Box::new(remove),
            initial: Box::new(initial),
        }
    }
}

impl<R, A> fmt::Debug for Fold<R, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Fold(..)")
    }
}

struct Dimension<R> {
    key_fn: KeyFn<R>,
    keys: Vec<Key>,
    filter: Option<Filter>,
    passes: BitVec,
}

struct Cell<A> {
    value: A,
    /// Rows currently folded into `value`.
    members: usize,
    /// Rows carrying this key, visible or not.
    records: usize,
}

impl<A> Cell<A> {
    fn new(value: A) -> Self {
        Self {
            value,
            members: 0,
            records: 0,
        }
    }

    fn fold_in<R>(&mut self, fold: &Fold<R, A>, row: &R) {
        (fold.add)(&mut self.value, row);
        self.members += 1;
    }

    fn fold_out<R>(&mut self, fold: &Fold<R, A>, row: &R) {
        (fold.remove)(&mut self.value, row);
        self.members = self.members.saturating_sub(1);
    }
}

enum Cells<A> {
    Keyed(BTreeMap<Key, Cell<A>>),
    Global(Cell<A>),
}

fn cell_mut<'a, A>(cells: &'a mut Cells<A>, key: Option<&Key>) -> Option<&'a mut Cell<A>> {
    match (cells, key) {
        (Cells::Keyed(cells), Some(key)) => cells.get_mut(key),
        (Cells::Global(cell), _) => Some(cell),
        (Cells::Keyed(_), None) => None,
    }
}

struct Group<R, A> {
    dimension: Option<DimensionId>,
    fold: Fold<R, A>,
    cells: Cells<A>,
}

impl<R, A> Group<R, A> {
    fn insert(&mut self, key: Option<&Key>, row: &R, visible: bool) {
        let fold = &self.fold;
        let cell = match (&mut self.cells, key) {
            (Cells::Keyed(cells), Some(key)) => cells
                .entry(key.clone())
                .or_insert_with(|| Cell::new((fold.initial)())),
            (Cells::Global(cell), _) => cell,
            (Cells::Keyed(_), None) => return,
        };
        cell.records += 1;
        if visible {
            cell.fold_in(fold, row);
        }
    }

    fn retract(&mut self, key: Option<&Key>, row: &R, visible: bool) {
        let fold = &self.fold;
        match (&mut self.cells, key) {
            (Cells::Keyed(cells), Some(key)) => {
                let Some(cell) = cells.get_mut(key) else {
                    return;
                };
                if visible {
                    cell.fold_out(fold, row);
                }
                cell.records = cell.records.saturating_sub(1);
                if cell.records == 0 {
                    cells.remove(key);
                }
            }
            (Cells::Global(cell), _) => {
                if visible {
                    cell.fold_out(fold, row);
                }
                cell.records = cell.records.saturating_sub(1);
            }
            (Cells::Keyed(_), None) => {}
        }
    }

    fn fold_in(&mut self, key: Option<&Key>, row: &R) {
        if let Some(cell) = cell_mut(&mut self.cells, key) {
            cell.fold_in(&self.fold, row);
        }
    }

    fn fold_out(&mut self, key: Option<&Key>, row: &R) {
        if let Some(cell) = cell_mut(&mut self.cells, key) {
            cell.fold_out(&self.fold, row);
        }
    }
}

/// Whether `row` passes every dimension filter except the dimensions listed in `skip`.
fn visible<R>(dimensions: &[Dimension<R>], row: usize, skip: &[Option<DimensionId>]) -> bool {
    dimensions.iter().enumerate().all(|(idx, dim)| {
        dim.passes.all_true() || skip.contains(&Some(DimensionId(idx))) || dim.passes.get(row)
    })
}

fn group_key<R>(
    dimensions: &[Dimension<R>],
    dimension: Option<DimensionId>,
    row: usize,
) -> Option<&Key> {
    dimensions.get(dimension?.0)?.keys.get(row)
}

/// Row store plus its dimensions and incrementally maintained groups.
pub struct IndexedDataset<R, A> {
    options: IndexOptions,
    rows: Vec<R>,
    dimensions: Vec<Dimension<R>>,
    groups: Vec<Option<Group<R, A>>>,
}

impl<R, A> IndexedDataset<R, A> {
    pub fn new(options: IndexOptions) -> Self {
        Self {
            options,
            rows: Vec::new(),
            dimensions: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn options(&self) -> IndexOptions {
        self.options
    }

    pub fn size(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    /// Append rows, folding each into every group where it is visible.
    pub fn add_rows(&mut self, rows: impl IntoIterator<Item = R>) -> usize {
        let start = self.rows.len();
        self.rows.extend(rows);
        let end = self.rows.len();
        if start == end {
            return 0;
        }

        for dim in &mut self.dimensions {
            for row in &self.rows[start..end] {
                let key = (dim.key_fn)(row);
                let passes = dim.filter.as_ref().map_or(true, |f| f.matches(&key));
                dim.keys.push(key);
                dim.passes.push(passes);
            }
        }

        for group in self.groups.iter_mut().flatten() {
            let dimension = group.dimension;
            for row in start..end {
                let visible = visible(&self.dimensions, row, &[dimension]);
                let key = group_key(&self.dimensions, dimension, row);
                group.insert(key, &self.rows[row], visible);
            }
        }

        log::debug!("indexed {} rows ({} total)", end - start, end);
        end - start
    }

    /// Remove every row matching `predicate`, retracting it from the groups it was folded into.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&R) -> bool) -> usize {
        let keep: Vec<bool> = self.rows.iter().map(|row| !predicate(row)).collect();
        let removed = keep.iter().filter(|kept| !**kept).count();
        if removed == 0 {
            return 0;
        }

        for group in self.groups.iter_mut().flatten() {
            let dimension = group.dimension;
            for (row, _) in keep.iter().enumerate().filter(|(_, kept)| !**kept) {
                let visible = visible(&self.dimensions, row, &[dimension]);
                let key = group_key(&self.dimensions, dimension, row);
                group.retract(key, &self.rows[row], visible);
            }
        }

        let mut flags = keep.iter();
        self.rows.retain(|_| flags.next().copied().unwrap_or(true));
        for dim in &mut self.dimensions {
            let mut flags = keep.iter();
            dim.keys.retain(|_| flags.next().copied().unwrap_or(true));
            dim.passes.retain(&keep);
        }

        log::debug!("removed {removed} rows ({} remain)", self.rows.len());
        removed
    }

    /// Register a dimension keyed by `key_fn`. Every call creates a new dimension.
    pub fn dimension(&mut self, key_fn: impl Fn(&R) -> Key + 'static) -> DimensionId {
        let keys = self.rows.iter().map(|row| key_fn(row)).collect();
        let passes = BitVec::all_set(self.rows.len());
        self.dimensions.push(Dimension {
            key_fn: Box::new(key_fn),
            keys,
            filter: None,
            passes,
        });
        DimensionId(self.dimensions.len() - 1)
    }

    pub fn filter(&self, id: DimensionId) -> IndexResult<Option<&Filter>> {
        let dimension = self
            .dimensions
            .get(id.0)
            .ok_or(IndexError::UnknownDimension(id))?;
        Ok(dimension.filter.as_ref())
    }

    /// Replace (or clear, with `None`) a dimension's filter.
    pub fn set_filter(&mut self, id: DimensionId, filter: Option<Filter>) -> IndexResult<()> {
        let dimension = self
            .dimensions
            .get(id.0)
            .ok_or(IndexError::UnknownDimension(id))?;

        let changed: Vec<(usize, bool)> = dimension
            .keys
            .iter()
            .enumerate()
            .filter_map(|(row, key)| {
                let passes = filter.as_ref().map_or(true, |f| f.matches(key));
                (passes != dimension.passes.get(row)).then_some((row, passes))
            })
            .collect();

        for group in self.groups.iter_mut().flatten() {
            let own = group.dimension;
            if own == Some(id) {
                continue;
            }
            for &(row, passes) in &changed {
                if !visible(&self.dimensions, row, &[own, Some(id)]) {
                    continue;
                }
                let key = group_key(&self.dimensions, own, row);
                if passes {
                    group.fold_in(key, &self.rows[row]);
                } else {
                    group.fold_out(key, &self.rows[row]);
                }
            }
        }

        let dimension = &mut self.dimensions[id.0];
        for &(row, passes) in &changed {
            dimension.passes.set(row, passes);
        }
        log::trace!("{id}: filter {filter:?} flipped {} rows", changed.len());
        dimension.filter = filter;
        Ok(())
    }

    /// Register a fold keyed by `dimension`, or a global fold when `dimension` is `None`.
    /// Rows already present are folded immediately.
    pub fn group(
        &mut self,
        dimension: Option<DimensionId>,
        fold: Fold<R, A>,
    ) -> IndexResult<GroupId> {
        if let Some(id) = dimension {
            if id.0 >= self.dimensions.len() {
                return Err(IndexError::UnknownDimension(id));
            }
        }

        let cells = match dimension {
            Some(_) => Cells::Keyed(BTreeMap::new()),
            None => Cells::Global(Cell::new((fold.initial)())),
        };
        let mut group = Group {
            dimension,
            fold,
            cells,
        };
        for (row, record) in self.rows.iter().enumerate() {
            let visible = visible(&self.dimensions, row, &[dimension]);
            group.insert(group_key(&self.dimensions, dimension, row), record, visible);
        }

        self.groups.push(Some(group));
        Ok(GroupId(self.groups.len() - 1))
    }

    pub fn dispose_group(&mut self, id: GroupId) -> IndexResult<()> {
        self.groups
            .get_mut(id.0)
            .and_then(Option::take)
            .map(|_| ())
            .ok_or(IndexError::UnknownGroup(id))
    }

    fn group_ref(&self, id: GroupId) -> IndexResult<&Group<R, A>> {
        self.groups
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(IndexError::UnknownGroup(id))
    }

    /// Keyed group contents in ascending key order, subject to [`IndexOptions::empty_groups`].
    pub fn all(&self, id: GroupId) -> IndexResult<Vec<(&Key, &A)>> {
        let group = self.group_ref(id)?;
        let Cells::Keyed(cells) = &group.cells else {
            return Err(IndexError::GlobalGroup(id));
        };
        let retain = self.options.empty_groups == EmptyGroups::Retain;
        Ok(cells
            .iter()
            .filter(|(_, cell)| retain || cell.members > 0)
            .map(|(key, cell)| (key, &cell.value))
            .collect())
    }

    /// Current value of a global fold.
    pub fn value(&self, id: GroupId) -> IndexResult<&A> {
        match &self.group_ref(id)?.cells {
            Cells::Global(cell) => Ok(&cell.value),
            Cells::Keyed(_) => Err(IndexError::KeyedGroup(id)),
        }
    }
}

impl<R, A> fmt::Debug for IndexedDataset<R, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexedDataset")
            .field("options", &self.options)
            .field("rows", &self.rows.len())
            .field("dimensions", &self.dimensions.len())
            .field("groups", &self.groups.iter().flatten().count())
            .finish()
    }
}
