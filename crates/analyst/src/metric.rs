//! Metrics: a grouping, a set of reducers and a transform pipeline over one [`Source`].

use crate::error::{AnalystError, AnalystResult};
use crate::events::{Event, EventEmitter, Notification, SubscriptionId};
use crate::field::{Field, FieldResolver};
use crate::reducer::{CompositeReducer, IntermediateField, Intermediates, Reducer, ReducerRegistry};
use crate::source::Source;
use crate::time::{self, Interval, DATE_FIELD};
use crate::transform::{Pipeline, SortKey, Transform};
use crate::value::key_to_value;
use analyst_index::{DimensionId, Filter, GroupId};
use serde::Serialize;
use serde_json::Value;
use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Output name of a reducer, plus transforms applied to that output right away.
#[derive(Clone, Debug, Default)]
pub struct Alias {
    name: Option<String>,
    transforms: Vec<Transform>,
}

impl Alias {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            transforms: Vec::new(),
        }
    }

    /// The metric's only reducer; its value becomes the whole output.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn then(mut self, transform: impl Into<Transform>) -> Self {
        self.transforms.push(transform.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl From<&str> for Alias {
    fn from(value: &str) -> Self {
        Self::named(value)
    }
}

impl From<String> for Alias {
    fn from(value: String) -> Self {
        Self::named(value)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct KeyValue {
    pub key: Value,
    pub value: Value,
}

/// Result of [`Metric::value`].
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    /// Undimensioned metric: one output over every visible row.
    Single(Value),
    /// Dimensioned metric: one output per group, in ascending key order.
    Grouped(Vec<KeyValue>),
}

impl MetricValue {
    pub fn as_single(&self) -> Option<&Value> {
        match self {
            MetricValue::Single(value) => Some(value),
            MetricValue::Grouped(_) => None,
        }
    }

    pub fn as_grouped(&self) -> Option<&[KeyValue]> {
        match self {
            MetricValue::Single(_) => None,
            MetricValue::Grouped(groups) => Some(groups),
        }
    }

    /// Grouped values become `[{"key": .., "value": ..}, ..]`.
    pub fn into_json(self) -> Value {
        match self {
            MetricValue::Single(value) => value,
            MetricValue::Grouped(groups) => Value::Array(
                groups
                    .into_iter()
                    .map(|KeyValue { key, value }| serde_json::json!({ "key": key, "value": value }))
                    .collect(),
            ),
        }
    }
}

/// State shared with the relays registered on the source.
struct Shared {
    dimension: Cell<Option<DimensionId>>,
    events: EventEmitter,
}

#[derive(Default)]
struct Config {
    registry: ReducerRegistry,
    pipeline: Pipeline,
}

struct Live {
    group: GroupId,
    composite: CompositeReducer,
    pipeline: Pipeline,
}

/// A live aggregate over a [`Source`].
///
/// Configuration (`by*`, reducers, transforms) happens through `&mut self` and is sealed by the
/// first [`Metric::group`], [`Metric::value`] or [`Metric::domain`] call, which registers the
/// metric's fold with the source. From then on the fold is kept current incrementally and every
/// read re-runs the transform pipeline over it.
///
/// A metric relays its source's `ready`, `change` and `filter` events. A filter change on any
/// dimension other than its own is also relayed as `change`. Dropping the metric unsubscribes it
/// and releases its fold.
pub struct Metric {
    source: Source,
    shared: Rc<Shared>,
    config: RefCell<Option<Config>>,
    live: OnceCell<Rc<Live>>,
    subscriptions: Vec<SubscriptionId>,
}

impl Metric {
    pub fn new(source: &Source) -> Self {
        let shared = Rc::new(Shared {
            dimension: Cell::new(None),
            events: EventEmitter::new(source.options().max_event_depth),
        });

        let mut subscriptions = Vec::with_capacity(4);
        for event in [Event::Ready, Event::Change, Event::Filter] {
            let weak = Rc::downgrade(&shared);
            subscriptions.push(source.on(event, move |notification| {
                if let Some(shared) = weak.upgrade() {
                    shared.events.trigger(notification);
                }
            }));
        }
        let weak = Rc::downgrade(&shared);
        subscriptions.push(source.on(Event::Filter, move |notification| {
            let (Some(shared), Notification::Filter { dimension, .. }) = (weak.upgrade(), notification)
            else {
                return;
            };
            if shared.dimension.get() != Some(*dimension) {
                shared.events.trigger(&Notification::Change);
            }
        }));

        Self {
            source: source.clone(),
            shared,
            config: RefCell::new(Some(Config::default())),
            live: OnceCell::new(),
            subscriptions,
        }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn dimension(&self) -> Option<DimensionId> {
        self.shared.dimension.get()
    }

    pub fn is_sealed(&self) -> bool {
        self.live.get().is_some()
    }

    fn config_mut(&mut self) -> AnalystResult<&mut Config> {
        self.config.get_mut().as_mut().ok_or(AnalystError::Sealed)
    }

    // Grouping.

    /// Group rows by `field`. Metrics grouping by the same field share one dimension.
    pub fn by(&mut self, field: impl Into<Field>) -> AnalystResult<&mut Self> {
        let field = field.into();
        self.dimension_by(|source| source.dimension(field))
    }

    fn dimension_by(
        &mut self,
        create: impl FnOnce(&Source) -> DimensionId,
    ) -> AnalystResult<&mut Self> {
        self.config_mut()?;
        if self.shared.dimension.get().is_some() {
            return Err(AnalystError::AlreadyDimensioned);
        }
        let dimension = create(&self.source);
        self.shared.dimension.set(Some(dimension));
        Ok(self)
    }

    fn by_date_field(
        &mut self,
        id: String,
        key: impl Fn(&Value) -> Value + 'static,
    ) -> AnalystResult<&mut Self> {
        let date = self.source.resolve(&Field::from(DATE_FIELD));
        self.by(Field::custom(id, move |row| key(&date.get(row))))
    }

    fn by_interval(&mut self, interval: Interval) -> AnalystResult<&mut Self> {
        self.by_date_field(format!("{DATE_FIELD}@{}", interval.as_str()), move |date| {
            time::bucket(interval, date)
        })
    }

    pub fn by_hour(&mut self) -> AnalystResult<&mut Self> {
        self.by_interval(Interval::Hour)
    }

    pub fn by_day(&mut self) -> AnalystResult<&mut Self> {
        self.by_interval(Interval::Day)
    }

    pub fn by_week(&mut self) -> AnalystResult<&mut Self> {
        self.by_interval(Interval::Week)
    }

    pub fn by_month(&mut self) -> AnalystResult<&mut Self> {
        self.by_interval(Interval::Month)
    }

    /// Group by the row date, optionally mapped. The date is passed to `mapper` as RFC 3339 text.
    pub fn by_date(&mut self, mapper: Option<Transform>) -> AnalystResult<&mut Self> {
        let normalize = |date: &Value| time::parse_date(date).map_or(Value::Null, time::to_text);
        match mapper {
            None => self.by_date_field(DATE_FIELD.to_string(), normalize),
            Some(mapper) => {
                let date = self.source.resolve(&Field::from(DATE_FIELD));
                self.dimension_by(move |source| {
                    source.dimension_with(move |row| mapper.apply(normalize(&date.get(row))))
                })
            }
        }
    }

    pub fn by_date_format(&mut self, pattern: &str) -> AnalystResult<&mut Self> {
        let owned = pattern.to_string();
        self.by_date_field(format!("{DATE_FIELD}%{pattern}"), move |date| {
            time::format(date, &owned)
        })
    }

    /// Group by weekday name (`abbreviated` for `Sun`..`Sat`) or, without names, by `0..=6`.
    pub fn by_day_of_week(&mut self, names: bool, abbreviated: bool) -> AnalystResult<&mut Self> {
        let id = match (names, abbreviated) {
            (true, true) => "weekday_abbr",
            (true, false) => "weekday_name",
            (false, _) => "weekday",
        };
        self.by_date_field(format!("{DATE_FIELD}@{id}"), move |date| {
            time::day_of_week(date, names, abbreviated)
        })
    }

    pub fn by_hour_of_day(&mut self) -> AnalystResult<&mut Self> {
        self.by_date_field(format!("{DATE_FIELD}@hour_of_day"), time::hour_of_day)
    }

    // Reducers.

    fn declare(
        &mut self,
        alias: Alias,
        register: impl FnOnce(&mut ReducerRegistry, &FieldResolver) -> IntermediateField,
    ) -> AnalystResult<&mut Self> {
        let resolver = self.source.resolver().clone();
        let config = self.config_mut()?;
        let Alias { name, transforms } = alias;
        config
            .pipeline
            .check_alias(name.as_deref(), !transforms.is_empty())?;
        let field = register(&mut config.registry, &resolver);
        config.pipeline.declare(name.clone(), field);
        if !transforms.is_empty() {
            config.pipeline.transform(name.as_deref(), transforms)?;
        }
        Ok(self)
    }

    pub fn count(&mut self, alias: impl Into<Alias>) -> AnalystResult<&mut Self> {
        self.declare(alias.into(), |registry, _| registry.count())
    }

    pub fn sum(&mut self, field: impl Into<Field>, alias: impl Into<Alias>) -> AnalystResult<&mut Self> {
        let field = field.into();
        self.declare(alias.into(), |registry, resolver| registry.sum(&field, resolver))
    }

    /// `total / count` over visible rows, `0` when there are none.
    pub fn average(
        &mut self,
        field: impl Into<Field>,
        alias: impl Into<Alias>,
    ) -> AnalystResult<&mut Self> {
        let field = field.into();
        self.declare(alias.into(), |registry, resolver| {
            registry.average(&field, resolver)
        })
    }

    /// `sum(total) / sum(count)`, `0` when the count sums to zero.
    pub fn weighted_average(
        &mut self,
        total: impl Into<Field>,
        count: impl Into<Field>,
        alias: impl Into<Alias>,
    ) -> AnalystResult<&mut Self> {
        let (total, count) = (total.into(), count.into());
        self.declare(alias.into(), |registry, resolver| {
            registry.weighted_average(&total, &count, resolver)
        })
    }

    /// Occurrence count per distinct value of `field`.
    pub fn distinct(
        &mut self,
        field: impl Into<Field>,
        alias: impl Into<Alias>,
    ) -> AnalystResult<&mut Self> {
        let field = field.into();
        self.declare(alias.into(), |registry, resolver| {
            registry.distinct(&field, resolver)
        })
    }

    pub fn distinct_count(
        &mut self,
        field: impl Into<Field>,
        alias: impl Into<Alias>,
    ) -> AnalystResult<&mut Self> {
        let field = field.into();
        self.declare(alias.into(), |registry, resolver| {
            registry.distinct_count(&field, resolver)
        })
    }

    pub fn max(&mut self, field: impl Into<Field>, alias: impl Into<Alias>) -> AnalystResult<&mut Self> {
        let field = field.into();
        self.declare(alias.into(), |registry, resolver| registry.max(&field, resolver))
    }

    pub fn sum_object(
        &mut self,
        field: impl Into<Field>,
        alias: impl Into<Alias>,
    ) -> AnalystResult<&mut Self> {
        let field = field.into();
        self.declare(alias.into(), |registry, resolver| {
            registry.sum_object(&field, resolver)
        })
    }

    pub fn sum_array(
        &mut self,
        field: impl Into<Field>,
        alias: impl Into<Alias>,
    ) -> AnalystResult<&mut Self> {
        let field = field.into();
        self.declare(alias.into(), |registry, resolver| {
            registry.sum_array(&field, resolver)
        })
    }

    /// A custom reducer stored under `output`. Declaring an existing `output` again reuses the
    /// first reducer.
    pub fn reduce(
        &mut self,
        reducer: Reducer,
        output: &str,
        alias: impl Into<Alias>,
    ) -> AnalystResult<&mut Self> {
        self.declare(alias.into(), |registry, _| registry.custom(output, reducer))
    }

    // Transforms.

    /// Append transforms to one alias, to the anonymous reducer (`None`), or, once `combine` is
    /// set, to the combined output (`None`).
    pub fn transform(
        &mut self,
        alias: Option<&str>,
        transforms: impl IntoIterator<Item = Transform>,
    ) -> AnalystResult<&mut Self> {
        self.config_mut()?.pipeline.transform(alias, transforms)?;
        Ok(self)
    }

    /// Replace the projected output with `transform(output)`.
    pub fn combine(&mut self, transform: impl Into<Transform>) -> AnalystResult<&mut Self> {
        self.config_mut()?.pipeline.combine(transform.into())?;
        Ok(self)
    }

    pub fn extract(&mut self, field: impl Into<Field>) -> AnalystResult<&mut Self> {
        self.combine(Transform::extract(field))
    }

    pub fn order(
        &mut self,
        alias: Option<&str>,
        key: impl Into<SortKey>,
    ) -> AnalystResult<&mut Self> {
        self.transform(alias, [Transform::order(key)])
    }

    pub fn order_asc(
        &mut self,
        alias: Option<&str>,
        key: impl Into<SortKey>,
    ) -> AnalystResult<&mut Self> {
        self.order(alias, key)
    }

    pub fn order_desc(
        &mut self,
        alias: Option<&str>,
        key: impl Into<SortKey>,
    ) -> AnalystResult<&mut Self> {
        self.transform(alias, [Transform::order_desc(key)])
    }

    pub fn reverse(&mut self, alias: Option<&str>) -> AnalystResult<&mut Self> {
        self.transform(alias, [Transform::reverse()])
    }

    pub fn limit(&mut self, alias: Option<&str>, n: usize) -> AnalystResult<&mut Self> {
        self.transform(alias, [Transform::limit(n)])
    }

    // Reads.

    fn materialize(&self) -> AnalystResult<Rc<Live>> {
        if let Some(live) = self.live.get() {
            return Ok(live.clone());
        }

        let composite = match self.config.borrow().as_ref() {
            Some(config) => config.registry.seal(),
            None => return Err(AnalystError::Sealed),
        };
        let dimension = self.shared.dimension.get();
        // The configuration stays in place until the fold is registered, so a failed read can
        // be retried.
        let group = self.source.register_group(dimension, composite.fold())?;
        let pipeline = self
            .config
            .borrow_mut()
            .take()
            .map(|config| config.pipeline)
            .unwrap_or_default();
        log::debug!(
            "materialized metric over {} reducer slots as {group}",
            composite.fields().len()
        );

        let live = Rc::new(Live {
            group,
            composite,
            pipeline,
        });
        Ok(self.live.get_or_init(|| live).clone())
    }

    /// Seal the configuration and return the fold's group in the source.
    pub fn group(&self) -> AnalystResult<GroupId> {
        Ok(self.materialize()?.group)
    }

    pub fn value(&self) -> AnalystResult<MetricValue> {
        let live = self.materialize()?;
        if self.shared.dimension.get().is_none() {
            let fields = self.source.with_index(|index| {
                index
                    .value(live.group)
                    .map(|acc| live.composite.expand(acc))
            })?;
            return Ok(MetricValue::Single(live.pipeline.run(&fields)));
        }

        let groups: Vec<(Value, Intermediates)> = self.source.with_index(|index| {
            index.all(live.group).map(|entries| {
                entries
                    .into_iter()
                    .map(|(key, acc)| (key_to_value(key), live.composite.expand(acc)))
                    .collect::<Vec<_>>()
            })
        })?;
        Ok(MetricValue::Grouped(
            groups
                .into_iter()
                .map(|(key, fields)| KeyValue {
                    key,
                    value: live.pipeline.run(&fields),
                })
                .collect(),
        ))
    }

    /// Group keys in ascending order, `None` for an undimensioned metric.
    pub fn domain(&self) -> AnalystResult<Option<Vec<Value>>> {
        let live = self.materialize()?;
        if self.shared.dimension.get().is_none() {
            return Ok(None);
        }
        let keys = self.source.with_index(|index| {
            index
                .all(live.group)
                .map(|entries| {
                    entries
                        .into_iter()
                        .map(|(key, _)| key_to_value(key))
                        .collect::<Vec<_>>()
                })
        })?;
        Ok(Some(keys))
    }

    /// The active filter on this metric's dimension. Undimensioned metrics have none.
    pub fn filter(&self) -> AnalystResult<Option<Filter>> {
        match self.shared.dimension.get() {
            Some(dimension) => self.source.filter(dimension),
            None => Ok(None),
        }
    }

    /// Filter the source by this metric's dimension. Other metrics on the source see `change`;
    /// this one does not.
    pub fn set_filter(&self, filter: Option<Filter>) -> AnalystResult<()> {
        let dimension = self
            .shared
            .dimension
            .get()
            .ok_or(AnalystError::NotDimensioned)?;
        self.source.set_filter(dimension, filter)
    }

    pub fn on(&self, event: Event, listener: impl Fn(&Notification) + 'static) -> SubscriptionId {
        self.shared.events.on(event, listener)
    }

    pub fn off(&self, event: Option<Event>) {
        self.shared.events.off(event)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.events.unsubscribe(id)
    }
}

impl Drop for Metric {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.source.unsubscribe(id);
        }
        if let Some(live) = self.live.get() {
            if let Err(err) = self.source.dispose_group(live.group) {
                log::warn!("failed to release metric fold: {err}");
            }
        }
    }
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metric")
            .field("dimension", &self.shared.dimension.get())
            .field("sealed", &self.is_sealed())
            .field("group", &self.live.get().map(|live| live.group))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failed_materialization_keeps_the_configuration() {
        let source = Source::new();
        source.add([json!({"v": 1}), json!({"v": 2})]);
        let foreign = Source::new().dimension("v");

        let mut metric = source.metric();
        metric.count("n").unwrap().sum("v", "total").unwrap();
        metric.shared.dimension.set(Some(foreign));
        assert!(matches!(
            metric.value(),
            Err(AnalystError::Index(analyst_index::IndexError::UnknownDimension(_)))
        ));
        assert!(!metric.is_sealed());

        metric.shared.dimension.set(None);
        assert_eq!(
            metric.value().unwrap(),
            MetricValue::Single(json!({"n": 2, "total": 3}))
        );
    }
}
