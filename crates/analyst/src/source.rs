//! The dataset owner shared by every metric built on it.

use crate::driver::{Driver, Preload};
use crate::error::AnalystResult;
use crate::events::{Event, EventEmitter, Notification, SubscriptionId, DEFAULT_MAX_EVENT_DEPTH};
use crate::field::{Accessor, Field, FieldId, FieldMap, FieldResolver};
use crate::metric::Metric;
use crate::reducer::CompositeAccumulator;
use crate::value::{key_of, Row};
use analyst_index::{
    DimensionId, EmptyGroups, Filter, Fold, GroupId, IndexOptions, IndexedDataset,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub(crate) type Index = IndexedDataset<Row, CompositeAccumulator>;

/// Rewrites or drops (`None`) every row before it is indexed.
pub type Sanitizer = Rc<dyn Fn(Row) -> Option<Row>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SourceOptions {
    /// Whether grouped metric values list keys that currently have no visible rows.
    pub empty_groups: EmptyGroups,
    /// Nested event dispatch deeper than this is dropped.
    pub max_event_depth: usize,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            empty_groups: EmptyGroups::default(),
            max_event_depth: DEFAULT_MAX_EVENT_DEPTH,
        }
    }
}

impl SourceOptions {
    pub fn from_json(json: &str) -> AnalystResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn index_options(&self) -> IndexOptions {
        IndexOptions {
            empty_groups: self.empty_groups,
        }
    }
}

struct SourceInner {
    options: SourceOptions,
    index: RefCell<Index>,
    resolver: RefCell<FieldResolver>,
    sanitizer: RefCell<Option<Sanitizer>>,
    dimensions: RefCell<HashMap<FieldId, DimensionId>>,
    driver: RefCell<Option<Box<dyn Driver>>>,
    events: EventEmitter,
}

/// A mutable in-memory dataset plus its dimensions and event stream.
///
/// Cloning a `Source` yields another handle to the same dataset. Sources are single-threaded
/// (`!Send`, `!Sync`): one writer, synchronous event delivery. Listeners and transforms may read
/// the source, but reducers and field accessors run while the dataset is being updated and must
/// not call back into it.
#[derive(Clone)]
pub struct Source {
    inner: Rc<SourceInner>,
}

impl Source {
    pub fn new() -> Self {
        Self::with_options(SourceOptions::default())
    }

    pub fn with_options(options: SourceOptions) -> Self {
        Self {
            inner: Rc::new(SourceInner {
                options,
                index: RefCell::new(IndexedDataset::new(options.index_options())),
                resolver: RefCell::new(FieldResolver::default()),
                sanitizer: RefCell::new(None),
                dimensions: RefCell::new(HashMap::new()),
                driver: RefCell::new(None),
                events: EventEmitter::new(options.max_event_depth),
            }),
        }
    }

    /// A source whose rows are loaded by `driver` on every [`Source::fetch`].
    pub fn with_driver(options: SourceOptions, driver: impl Driver + 'static) -> Self {
        let source = Self::with_options(options);
        *source.inner.driver.borrow_mut() = Some(Box::new(driver));
        source
    }

    /// A source loaded with `rows` right away.
    pub fn preload(rows: Vec<Row>, field_map: Option<FieldMap>) -> AnalystResult<Self> {
        let driver = match field_map {
            Some(field_map) => Preload::new(rows).with_field_map(field_map),
            None => Preload::new(rows),
        };
        let source = Self::with_driver(SourceOptions::default(), driver);
        source.fetch()?;
        Ok(source)
    }

    pub fn options(&self) -> SourceOptions {
        self.inner.options
    }

    /// Run the driver, if any.
    pub fn fetch(&self) -> AnalystResult<()> {
        let Some(mut driver) = self.inner.driver.borrow_mut().take() else {
            return Ok(());
        };
        let result = driver.fetch(self);
        let mut slot = self.inner.driver.borrow_mut();
        if slot.is_none() {
            *slot = Some(driver);
        }
        result
    }

    /// Sanitize and index `rows`. Triggers `ready` when the source stops being empty, then
    /// `change`.
    pub fn add(&self, rows: impl IntoIterator<Item = Row>) -> usize {
        let sanitizer = self.inner.sanitizer.borrow().clone();
        let rows: Vec<Row> = match sanitizer {
            Some(sanitize) => rows.into_iter().filter_map(|row| sanitize(row)).collect(),
            None => rows.into_iter().collect(),
        };

        let (was_empty, added, is_empty) = {
            let mut index = self.inner.index.borrow_mut();
            let was_empty = index.is_empty();
            let added = index.add_rows(rows);
            (was_empty, added, index.is_empty())
        };

        if was_empty && !is_empty {
            self.inner.events.trigger(&Notification::Ready);
        }
        self.inner.events.trigger(&Notification::Change);
        added
    }

    /// Remove every row matching `predicate`. Triggers `change` when anything was removed.
    pub fn remove_where(&self, predicate: impl FnMut(&Row) -> bool) -> usize {
        let removed = self.inner.index.borrow_mut().remove_where(predicate);
        if removed > 0 {
            self.inner.events.trigger(&Notification::Change);
        }
        removed
    }

    pub fn size(&self) -> usize {
        self.inner.index.borrow().size()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.index.borrow().is_empty()
    }

    /// A copy of every row currently held.
    pub fn rows(&self) -> Vec<Row> {
        self.inner.index.borrow().rows().to_vec()
    }

    pub fn set_sanitizer(&self, sanitizer: impl Fn(Row) -> Option<Row> + 'static) {
        *self.inner.sanitizer.borrow_mut() = Some(Rc::new(sanitizer));
    }

    pub fn clear_sanitizer(&self) {
        *self.inner.sanitizer.borrow_mut() = None;
    }

    /// Fields resolve against the map current when a reducer or dimension is declared.
    pub fn set_field_map(&self, field_map: FieldMap) {
        log::debug!("field map set with {} fields", field_map.len());
        self.inner.resolver.borrow_mut().set_map(field_map);
    }

    pub fn field_map(&self) -> FieldMap {
        self.inner.resolver.borrow().map().clone()
    }

    pub fn resolve(&self, field: &Field) -> Accessor {
        self.inner.resolver.borrow().resolve(field)
    }

    pub(crate) fn resolver(&self) -> Ref<'_, FieldResolver> {
        self.inner.resolver.borrow()
    }

    /// The dimension keyed by `field`, created on first request and shared afterwards.
    pub fn dimension(&self, field: impl Into<Field>) -> DimensionId {
        let field = field.into();
        let id = field.id();
        if let Some(&dimension) = self.inner.dimensions.borrow().get(&id) {
            return dimension;
        }

        let accessor = self.resolve(&field);
        let dimension = self
            .inner
            .index
            .borrow_mut()
            .dimension(move |row| key_of(&accessor.get(row)));
        log::debug!("created {dimension} for field {id}");
        self.inner.dimensions.borrow_mut().insert(id, dimension);
        dimension
    }

    /// A dimension keyed by an arbitrary function. These are never shared.
    pub fn dimension_with(&self, key: impl Fn(&Row) -> Value + 'static) -> DimensionId {
        let dimension = self
            .inner
            .index
            .borrow_mut()
            .dimension(move |row| key_of(&key(row)));
        log::debug!("created {dimension} for a key function");
        dimension
    }

    pub fn filter(&self, dimension: DimensionId) -> AnalystResult<Option<Filter>> {
        Ok(self.inner.index.borrow().filter(dimension)?.cloned())
    }

    /// Set or clear (`None`) a dimension's filter, then trigger `filter`.
    pub fn set_filter(&self, dimension: DimensionId, filter: Option<Filter>) -> AnalystResult<()> {
        self.inner
            .index
            .borrow_mut()
            .set_filter(dimension, filter.clone())?;
        self.inner
            .events
            .trigger(&Notification::Filter { dimension, filter });
        Ok(())
    }

    pub fn metric(&self) -> Metric {
        Metric::new(self)
    }

    pub fn on(&self, event: Event, listener: impl Fn(&Notification) + 'static) -> SubscriptionId {
        self.inner.events.on(event, listener)
    }

    pub fn off(&self, event: Option<Event>) {
        self.inner.events.off(event)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    pub fn listener_count(&self, event: Event) -> usize {
        self.inner.events.listener_count(event)
    }

    pub(crate) fn register_group(
        &self,
        dimension: Option<DimensionId>,
        fold: Fold<Row, CompositeAccumulator>,
    ) -> AnalystResult<GroupId> {
        Ok(self.inner.index.borrow_mut().group(dimension, fold)?)
    }

    pub(crate) fn dispose_group(&self, group: GroupId) -> AnalystResult<()> {
        Ok(self.inner.index.borrow_mut().dispose_group(group)?)
    }

    pub(crate) fn with_index<T>(&self, f: impl FnOnce(&Index) -> T) -> T {
        f(&self.inner.index.borrow())
    }
}

impl Default for Source {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("options", &self.inner.options)
            .field("index", &self.inner.index)
            .field("dimensions", &self.inner.dimensions.borrow().len())
            .field("events", &self.inner.events)
            .finish()
    }
}
