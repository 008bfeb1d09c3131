//! Live, incrementally maintained metrics over an in-memory dataset.
//!
//! A [`Source`] holds rows (JSON objects or positional arrays) and the dimensions built over them.
//! A [`Metric`] groups a source's rows by one dimension (or not at all), folds them through any
//! number of aliased reducers and post-processes the result through a transform pipeline. Folds
//! are maintained incrementally as rows are added or removed and as dimension filters change; a
//! metric never observes its own dimension's filter.
//!
//! ```
//! use analyst::{Filter, MetricValue, Source};
//! use serde_json::json;
//!
//! let source = Source::preload(vec![json!({"v": 1}), json!({"v": 2}), json!({"v": 3})], None)?;
//! let mut metric = source.metric();
//! metric.sum("v", "total")?.count("n")?;
//! assert_eq!(metric.value()?, MetricValue::Single(json!({"total": 6, "n": 3})));
//!
//! let v = source.dimension("v");
//! source.set_filter(v, Some(Filter::range(1, 3)))?;
//! assert_eq!(metric.value()?, MetricValue::Single(json!({"total": 3, "n": 2})));
//! # Ok::<(), analyst::AnalystError>(())
//! ```

#![forbid(unsafe_code)]

mod driver;
mod error;
mod events;
mod field;
mod metric;
mod reducer;
mod source;
pub mod time;
mod transform;
mod value;

pub use crate::driver::{Driver, Preload};
pub use crate::error::{AnalystError, AnalystResult};
pub use crate::events::{Event, EventEmitter, Notification, SubscriptionId, DEFAULT_MAX_EVENT_DEPTH};
pub use crate::field::{Accessor, AccessorFn, Field, FieldId, FieldMap, FieldResolver};
pub use crate::metric::{Alias, KeyValue, Metric, MetricValue};
pub use crate::reducer::{
    CompositeAccumulator, CompositeReducer, Derivation, IntermediateField, Intermediates, Reducer,
    ReducerRegistry,
};
pub use crate::source::{Sanitizer, Source, SourceOptions};
pub use crate::transform::{Pipeline, SortKey, Transform};
pub use crate::value::{as_number, cmp_values, key_of, key_to_value, number, Row};

pub use analyst_index::{DimensionId, EmptyGroups, Filter, GroupId, Key};
