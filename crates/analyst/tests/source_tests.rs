mod common;

use analyst::{
    Alias, AnalystError, AnalystResult, Driver, EmptyGroups, Event, FieldMap, Filter, Preload,
    Source, SourceOptions, Transform,
};
use common::{grouped, record_source, sales, sales_source, single};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

#[test]
fn positional_rows_resolve_through_the_field_map() {
    let map: FieldMap = [("region", 0), ("amount", 1), ("meta", 2)].into_iter().collect();
    let source = Source::preload(
        vec![
            json!(["east", 10, {"channel": "web"}]),
            json!(["west", 5, {"channel": "store"}]),
            json!(["east", 2, {"channel": "web"}]),
        ],
        Some(map.clone()),
    )
    .unwrap();
    assert_eq!(source.field_map(), map);

    let mut by_region = source.metric();
    by_region
        .by("region")
        .unwrap()
        .sum("amount", Alias::anonymous())
        .unwrap();
    assert_eq!(
        grouped(by_region.value().unwrap()),
        vec![(json!("east"), json!(12)), (json!("west"), json!(5))]
    );

    let mut by_channel = source.metric();
    by_channel.by("/meta/channel").unwrap().count("n").unwrap();
    assert_eq!(
        grouped(by_channel.value().unwrap()),
        vec![
            (json!("store"), json!({"n": 1})),
            (json!("web"), json!({"n": 2})),
        ]
    );
}

#[test]
fn pointer_fields_read_nested_members() {
    let source = Source::preload(
        vec![
            json!({"meta": {"tags": ["a", "b"]}, "amount": 1}),
            json!({"meta": {"tags": ["b"]}, "amount": 2}),
            json!({"meta": "flat", "amount": 4}),
            json!({"amount": 8}),
        ],
        None,
    )
    .unwrap();
    let mut metric = source.metric();
    metric
        .by("/meta/tags/0")
        .unwrap()
        .sum("amount", Alias::anonymous())
        .unwrap();
    assert_eq!(
        grouped(metric.value().unwrap()),
        vec![
            (Value::Null, json!(8)),
            (json!("a"), json!(1)),
            (json!("b"), json!(2)),
            (json!("flat"), json!(4)),
        ]
    );
}

#[test]
fn sanitizer_rewrites_and_drops_rows() {
    let source = Source::new();
    source.set_sanitizer(|row: Value| {
        let amount = row.get("amount")?.as_f64()?;
        (amount > 0.0).then(|| json!({"amount": amount * 2.0}))
    });
    let added = source.add(vec![
        json!({"amount": 1}),
        json!({"amount": -1}),
        json!({"other": true}),
    ]);
    assert_eq!(added, 1);
    assert_eq!(source.rows(), vec![json!({"amount": 2.0})]);

    let mut total = source.metric();
    total.sum("amount", Alias::anonymous()).unwrap();
    assert_eq!(single(total.value().unwrap()), json!(2));

    source.clear_sanitizer();
    source.add(vec![json!({"amount": -1})]);
    assert_eq!(single(total.value().unwrap()), json!(1));
}

#[test]
fn preload_driver_loads_once() {
    let source = Source::with_driver(SourceOptions::default(), Preload::new(sales()));
    let log = record_source(&source);
    assert!(source.is_empty());

    source.fetch().unwrap();
    assert_eq!(source.size(), 5);
    source.fetch().unwrap();
    assert_eq!(source.size(), 5);
    assert_eq!(*log.borrow(), vec![Event::Ready, Event::Change]);
}

struct Batches {
    next: i64,
}

impl Driver for Batches {
    fn fetch(&mut self, source: &Source) -> AnalystResult<()> {
        source.add(vec![json!({"batch": self.next})]);
        self.next += 1;
        Ok(())
    }
}

#[test]
fn custom_drivers_run_on_every_fetch() {
    let source = Source::with_driver(SourceOptions::default(), Batches { next: 0 });
    let mut batches = source.metric();
    batches.distinct_count("batch", Alias::anonymous()).unwrap();

    for _ in 0..3 {
        source.fetch().unwrap();
    }
    assert_eq!(single(batches.value().unwrap()), json!(3));
}

#[test]
fn remove_where_retracts_rows_from_metrics() {
    let source = sales_source();
    let log = record_source(&source);
    let mut metric = source.metric();
    metric
        .count("n")
        .unwrap()
        .sum("amount", "total")
        .unwrap();

    assert_eq!(source.remove_where(|row| row["region"] == "east"), 2);
    assert_eq!(single(metric.value().unwrap()), json!({"n": 3, "total": 13}));
    assert_eq!(source.remove_where(|row| row["region"] == "south"), 0);
    assert_eq!(*log.borrow(), vec![Event::Change]);
}

#[test]
fn options_parse_from_json() {
    let options =
        SourceOptions::from_json(r#"{"emptyGroups": "retain", "maxEventDepth": 3}"#).unwrap();
    assert_eq!(
        options,
        SourceOptions {
            empty_groups: EmptyGroups::Retain,
            max_event_depth: 3,
        }
    );
    assert_eq!(SourceOptions::from_json("{}").unwrap(), SourceOptions::default());
    assert!(matches!(
        SourceOptions::from_json(r#"{"emptyGroups": "sometimes"}"#),
        Err(AnalystError::Config(_))
    ));

    let map: FieldMap = serde_json::from_str(r#"{"region": 0, "amount": 1}"#).unwrap();
    assert_eq!(map.position("amount"), Some(1));
    assert_eq!(map.position("units"), None);
}

fn dated_source() -> Source {
    Source::preload(
        vec![
            json!({"_date": "2024-03-10T08:30:00Z"}),
            json!({"_date": "2024-03-11T09:15:00Z"}),
            json!({"_date": "2024-03-11T22:00:00Z"}),
            json!({"_date": "2024-04-02"}),
            json!({"_date": 1710057600}),
            json!({"_date": "whenever"}),
        ],
        None,
    )
    .unwrap()
}

fn counts(configure: impl FnOnce(&mut analyst::Metric)) -> Vec<(Value, Value)> {
    let source = dated_source();
    let mut metric = source.metric();
    configure(&mut metric);
    metric.count(Alias::anonymous()).unwrap();
    grouped(metric.value().unwrap())
}

#[test]
fn date_intervals_bucket_by_period_start() {
    assert_eq!(
        counts(|m| {
            m.by_day().unwrap();
        }),
        vec![
            (Value::Null, json!(1)),
            (json!("2024-03-10T00:00:00Z"), json!(2)),
            (json!("2024-03-11T00:00:00Z"), json!(2)),
            (json!("2024-04-02T00:00:00Z"), json!(1)),
        ]
    );
    assert_eq!(
        counts(|m| {
            m.by_week().unwrap();
        }),
        vec![
            (Value::Null, json!(1)),
            (json!("2024-03-10T00:00:00Z"), json!(4)),
            (json!("2024-03-31T00:00:00Z"), json!(1)),
        ]
    );
    assert_eq!(
        counts(|m| {
            m.by_month().unwrap();
        }),
        vec![
            (Value::Null, json!(1)),
            (json!("2024-03-01T00:00:00Z"), json!(4)),
            (json!("2024-04-01T00:00:00Z"), json!(1)),
        ]
    );
    assert_eq!(
        counts(|m| {
            m.by_hour().unwrap();
        })[1],
        (json!("2024-03-10T08:00:00Z"), json!(2))
    );
}

#[test]
fn date_parts_group_by_weekday_hour_and_format() {
    assert_eq!(
        counts(|m| {
            m.by_day_of_week(true, false).unwrap();
        }),
        vec![
            (Value::Null, json!(1)),
            (json!("Monday"), json!(2)),
            (json!("Sunday"), json!(2)),
            (json!("Tuesday"), json!(1)),
        ]
    );
    assert_eq!(
        counts(|m| {
            m.by_day_of_week(false, false).unwrap();
        }),
        vec![
            (Value::Null, json!(1)),
            (json!(0), json!(2)),
            (json!(1), json!(2)),
            (json!(2), json!(1)),
        ]
    );
    assert_eq!(
        counts(|m| {
            m.by_hour_of_day().unwrap();
        }),
        vec![
            (Value::Null, json!(1)),
            (json!(0), json!(1)),
            (json!(8), json!(2)),
            (json!(9), json!(1)),
            (json!(22), json!(1)),
        ]
    );
    assert_eq!(
        counts(|m| {
            m.by_date_format("%Y-%m").unwrap();
        }),
        vec![
            (Value::Null, json!(1)),
            (json!("2024-03"), json!(4)),
            (json!("2024-04"), json!(1)),
        ]
    );
}

#[test]
fn by_date_maps_normalized_dates() {
    let year = Transform::new(|date: Value| {
        date.as_str()
            .and_then(|text| text.get(..4))
            .map_or(Value::Null, |year| json!(year))
    });
    assert_eq!(
        counts(|m| {
            m.by_date(Some(year)).unwrap();
        }),
        vec![(Value::Null, json!(1)), (json!("2024"), json!(5))]
    );

    let raw = counts(|m| {
        m.by_date(None).unwrap();
    });
    assert_eq!(raw.len(), 6);
    assert_eq!(raw[1].0, json!("2024-03-10T08:00:00Z"));
    assert_eq!(raw[2].0, json!("2024-03-10T08:30:00Z"));
}

#[test]
fn date_dimensions_are_shared_between_metrics() {
    let source = dated_source();
    let mut a = source.metric();
    let mut b = source.metric();
    let mut c = source.metric();
    a.by_day().unwrap();
    b.by_day().unwrap();
    c.by_month().unwrap();
    assert_eq!(a.dimension(), b.dimension());
    assert_ne!(a.dimension(), c.dimension());

    a.set_filter(Some(Filter::exact("2024-03-11T00:00:00Z"))).unwrap();
    let mut total = source.metric();
    total.count(Alias::anonymous()).unwrap();
    assert_eq!(single(total.value().unwrap()), json!(2));
}
