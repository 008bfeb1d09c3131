#![allow(dead_code)]

use analyst::{Event, Metric, MetricValue, Notification, Source, SourceOptions};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;

pub fn sales() -> Vec<Value> {
    vec![
        json!({"region": "east", "month": 1, "amount": 10, "units": 2, "product": "apple"}),
        json!({"region": "east", "month": 2, "amount": 20, "units": 4, "product": "pear"}),
        json!({"region": "west", "month": 1, "amount": 5, "units": 1, "product": "apple"}),
        json!({"region": "west", "month": 3, "amount": 7, "units": 1, "product": "plum"}),
        json!({"region": "north", "month": 2, "amount": 1, "units": 1, "product": "apple"}),
    ]
}

pub fn sales_source() -> Source {
    sales_source_with(SourceOptions::default())
}

pub fn sales_source_with(options: SourceOptions) -> Source {
    let source = Source::with_options(options);
    source.add(sales());
    source
}

pub type Log = Rc<RefCell<Vec<Event>>>;

fn log_event(log: &Log) -> impl Fn(&Notification) + 'static {
    let log = log.clone();
    move |notification| log.borrow_mut().push(notification.event())
}

/// Records every event the metric emits, in order.
pub fn record(metric: &Metric) -> Log {
    let log = Log::default();
    for event in [Event::Ready, Event::Change, Event::Filter] {
        metric.on(event, log_event(&log));
    }
    log
}

pub fn record_source(source: &Source) -> Log {
    let log = Log::default();
    for event in [Event::Ready, Event::Change, Event::Filter] {
        source.on(event, log_event(&log));
    }
    log
}

pub fn single(value: MetricValue) -> Value {
    match value {
        MetricValue::Single(value) => value,
        MetricValue::Grouped(groups) => panic!("expected a single value, got {groups:?}"),
    }
}

pub fn grouped(value: MetricValue) -> Vec<(Value, Value)> {
    match value {
        MetricValue::Grouped(groups) => groups.into_iter().map(|kv| (kv.key, kv.value)).collect(),
        MetricValue::Single(value) => panic!("expected grouped values, got {value}"),
    }
}
