mod common;

use analyst::{
    as_number, number, Alias, AnalystError, EmptyGroups, Event, Field, Filter, Reducer, Source,
    SourceOptions, Transform,
};
use common::{grouped, sales_source, sales_source_with, single};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn numbers(values: impl IntoIterator<Item = i64>) -> Vec<Value> {
    values.into_iter().map(|v| json!({ "v": v })).collect()
}

fn parity() -> Field {
    Field::custom("parity", |row| json!(row["v"].as_i64().unwrap_or(0) % 2))
}

#[test]
fn aliased_sum_and_count_follow_filters() {
    let source = Source::preload(numbers(1..=3), None).unwrap();
    let mut metric = source.metric();
    metric.sum("v", "total").unwrap().count("n").unwrap();
    assert_eq!(single(metric.value().unwrap()), json!({"total": 6, "n": 3}));

    let v = source.dimension("v");
    source
        .set_filter(v, Some(Filter::predicate(|key| key.as_f64() != Some(3.0))))
        .unwrap();
    assert_eq!(single(metric.value().unwrap()), json!({"total": 3, "n": 2}));
}

#[test]
fn average_is_zero_when_nothing_is_visible() {
    let source = sales_source();
    let mut metric = source.metric();
    metric.average("amount", "avg").unwrap();
    assert_eq!(single(metric.value().unwrap()), json!({"avg": 8.6}));

    let region = source.dimension("region");
    source.set_filter(region, Some(Filter::exact("east"))).unwrap();
    assert_eq!(single(metric.value().unwrap()), json!({"avg": 15}));

    source.set_filter(region, Some(Filter::exact("south"))).unwrap();
    assert_eq!(single(metric.value().unwrap()), json!({"avg": 0}));
}

#[test]
fn grouped_values_omit_groups_that_empty_out() {
    let source = Source::preload(numbers(1..=5), None).unwrap();
    let mut metric = source.metric();
    metric.by(parity()).unwrap().count(Alias::anonymous()).unwrap();

    assert_eq!(metric.domain().unwrap(), Some(vec![json!(0), json!(1)]));
    assert_eq!(
        grouped(metric.value().unwrap()),
        vec![(json!(0), json!(2)), (json!(1), json!(3))]
    );

    let v = source.dimension("v");
    source.set_filter(v, Some(Filter::any_of([1, 3, 5]))).unwrap();
    assert_eq!(grouped(metric.value().unwrap()), vec![(json!(1), json!(3))]);
    assert_eq!(metric.domain().unwrap(), Some(vec![json!(1)]));
}

#[test]
fn grouped_values_keep_empty_groups_when_retained() {
    let source = Source::with_options(SourceOptions {
        empty_groups: EmptyGroups::Retain,
        ..SourceOptions::default()
    });
    source.add(numbers(1..=5));
    let mut metric = source.metric();
    metric.by(parity()).unwrap().count(Alias::anonymous()).unwrap();

    let v = source.dimension("v");
    source.set_filter(v, Some(Filter::any_of([1, 3, 5]))).unwrap();
    assert_eq!(
        grouped(metric.value().unwrap()),
        vec![(json!(0), json!(0)), (json!(1), json!(3))]
    );
    assert_eq!(metric.domain().unwrap(), Some(vec![json!(0), json!(1)]));
}

#[test]
fn own_filter_does_not_shrink_own_groups() {
    let source = sales_source();
    let mut by_region = source.metric();
    by_region.by("region").unwrap().count(Alias::anonymous()).unwrap();
    let mut total = source.metric();
    total.count(Alias::anonymous()).unwrap();

    by_region.set_filter(Some(Filter::exact("east"))).unwrap();
    assert_eq!(by_region.filter().unwrap(), Some(Filter::exact("east")));
    assert_eq!(
        grouped(by_region.value().unwrap()),
        vec![
            (json!("east"), json!(2)),
            (json!("north"), json!(1)),
            (json!("west"), json!(2)),
        ]
    );
    assert_eq!(single(total.value().unwrap()), json!(2));
}

#[test]
fn metrics_on_the_same_field_share_a_dimension() {
    let source = sales_source();
    let mut a = source.metric();
    let mut b = source.metric();
    let mut c = source.metric();
    a.by("region").unwrap();
    b.by("region").unwrap();
    c.by("month").unwrap();

    assert_eq!(a.dimension(), b.dimension());
    assert_ne!(a.dimension(), c.dimension());
    assert_eq!(a.dimension(), Some(source.dimension("region")));
}

#[test]
fn configuration_errors_are_reported_at_the_offending_call() {
    let source = sales_source();

    let mut dimensioned = source.metric();
    dimensioned.by("region").unwrap();
    assert!(matches!(
        dimensioned.by("month"),
        Err(AnalystError::AlreadyDimensioned)
    ));

    let mut named = source.metric();
    named.count("n").unwrap();
    assert!(matches!(
        named.sum("amount", "n"),
        Err(AnalystError::DuplicateAlias(alias)) if alias == "n"
    ));
    assert!(matches!(
        named.count(Alias::anonymous()),
        Err(AnalystError::MustBeAliased)
    ));
    assert!(matches!(
        named.transform(Some("missing"), [Transform::reverse()]),
        Err(AnalystError::UnknownAlias(_))
    ));
    assert!(matches!(
        named.transform(None, [Transform::reverse()]),
        Err(AnalystError::AliasRequired)
    ));

    let mut anonymous = source.metric();
    anonymous.count(Alias::anonymous()).unwrap();
    assert!(matches!(
        anonymous.sum("amount", "total"),
        Err(AnalystError::MustBeAliased)
    ));
    assert!(matches!(
        anonymous.combine(Transform::reverse()),
        Err(AnalystError::CombineRequiresAliases)
    ));
    anonymous
        .transform(None, [Transform::new(|value| value)])
        .unwrap();
}

#[test]
fn combine_and_per_alias_transforms_exclude_each_other() {
    let source = sales_source();

    let mut combined = source.metric();
    combined
        .count("n")
        .unwrap()
        .combine(Transform::extract("n"))
        .unwrap();
    assert!(matches!(
        combined.combine(Transform::reverse()),
        Err(AnalystError::CombineAlreadySet)
    ));
    assert!(matches!(
        combined.limit(Some("n"), 1),
        Err(AnalystError::CombineWithFieldTransforms)
    ));
    assert!(matches!(
        combined.sum("amount", Alias::named("total").then(Transform::reverse())),
        Err(AnalystError::CombineWithFieldTransforms)
    ));
    combined.sum("amount", "total").unwrap();
    assert_eq!(single(combined.value().unwrap()), json!(5));

    let mut shaped = source.metric();
    shaped.count("n").unwrap().limit(Some("n"), 1).unwrap();
    assert!(matches!(
        shaped.combine(Transform::reverse()),
        Err(AnalystError::CombineWithFieldTransforms)
    ));
}

#[test]
fn reading_seals_the_configuration() {
    let source = sales_source();
    let mut metric = source.metric();
    metric.count("n").unwrap();
    assert!(!metric.is_sealed());
    metric.value().unwrap();
    assert!(metric.is_sealed());

    assert!(matches!(metric.sum("amount", "total"), Err(AnalystError::Sealed)));
    assert!(matches!(metric.by("region"), Err(AnalystError::Sealed)));
    assert!(matches!(metric.limit(Some("n"), 1), Err(AnalystError::Sealed)));
    assert_eq!(single(metric.value().unwrap()), json!({"n": 5}));
}

#[test]
fn undimensioned_metrics_have_no_filter_or_domain() {
    let source = sales_source();
    let mut metric = source.metric();
    metric.count("n").unwrap();

    assert!(matches!(
        metric.set_filter(Some(Filter::exact("east"))),
        Err(AnalystError::NotDimensioned)
    ));
    assert_eq!(metric.filter().unwrap(), None);
    assert_eq!(metric.domain().unwrap(), None);
}

#[test]
fn metric_without_reducers_yields_an_empty_record() {
    let source = sales_source();
    let metric = source.metric();
    assert_eq!(single(metric.value().unwrap()), json!({}));
}

#[test]
fn extract_reduces_each_output_to_one_field() {
    let source = sales_source();

    let mut total = source.metric();
    total
        .sum("amount", "total")
        .unwrap()
        .count("n")
        .unwrap()
        .extract("total")
        .unwrap();
    assert_eq!(single(total.value().unwrap()), json!(43));

    let mut by_region = source.metric();
    by_region
        .by("region")
        .unwrap()
        .sum("amount", "total")
        .unwrap()
        .extract("total")
        .unwrap();
    assert_eq!(
        grouped(by_region.value().unwrap()),
        vec![
            (json!("east"), json!(30)),
            (json!("north"), json!(1)),
            (json!("west"), json!(12)),
        ]
    );
}

#[test]
fn transforms_after_combine_apply_to_the_combined_output() {
    let source = sales_source();
    let mut metric = source.metric();
    metric
        .sum("amount", "total")
        .unwrap()
        .count("n")
        .unwrap()
        .combine(|out: Value| number(as_number(&out["total"]) / as_number(&out["n"])))
        .unwrap()
        .transform(None, [Transform::new(|value| json!([value]))])
        .unwrap();
    assert_eq!(single(metric.value().unwrap()), json!([8.6]));
}

#[test]
fn nested_sums_track_inner_keys() {
    let source = Source::preload(
        vec![
            json!({
                "region": "east",
                "channels": {"web": 3, "store": 1},
                "hits": [{"key": "a", "value": 2}, {"key": "b", "value": 1}],
            }),
            json!({
                "region": "west",
                "channels": {"web": 2},
                "hits": [{"key": "b", "value": 4}],
            }),
        ],
        None,
    )
    .unwrap();
    let mut metric = source.metric();
    metric
        .sum_object("channels", "channels")
        .unwrap()
        .sum_array("hits", "hits")
        .unwrap();
    assert_eq!(
        single(metric.value().unwrap()),
        json!({
            "channels": {"web": 5, "store": 1},
            "hits": [{"key": "a", "value": 2}, {"key": "b", "value": 5}],
        })
    );

    let region = source.dimension("region");
    source.set_filter(region, Some(Filter::exact("west"))).unwrap();
    assert_eq!(
        single(metric.value().unwrap()),
        json!({
            "channels": {"web": 2},
            "hits": [{"key": "b", "value": 4}],
        })
    );
}

#[test]
fn distinct_reducers_share_one_slot() {
    let source = sales_source();
    let mut metric = source.metric();
    metric
        .distinct("product", "products")
        .unwrap()
        .distinct_count("product", "kinds")
        .unwrap()
        .max("amount", "largest")
        .unwrap();
    assert_eq!(
        single(metric.value().unwrap()),
        json!({
            "products": {"apple": 3, "pear": 1, "plum": 1},
            "kinds": 3,
            "largest": 20,
        })
    );

    let region = source.dimension("region");
    source.set_filter(region, Some(Filter::exact("west"))).unwrap();
    assert_eq!(
        single(metric.value().unwrap()),
        json!({
            "products": {"apple": 1, "plum": 1},
            "kinds": 2,
            "largest": 7,
        })
    );
}

#[test]
fn weighted_average_divides_two_sums() {
    let source = sales_source();
    let mut metric = source.metric();
    metric
        .weighted_average("amount", "units", "per_unit")
        .unwrap();
    assert_eq!(single(metric.value().unwrap()), json!({"per_unit": 43.0 / 9.0}));

    let region = source.dimension("region");
    source.set_filter(region, Some(Filter::exact("east"))).unwrap();
    assert_eq!(single(metric.value().unwrap()), json!({"per_unit": 5}));
}

#[test]
fn custom_reducers_register_once_per_output() {
    let squares = || {
        Reducer::new(
            |acc, row| *acc = number(as_number(acc) + as_number(&row["amount"]).powi(2)),
            |acc, row| *acc = number(as_number(acc) - as_number(&row["amount"]).powi(2)),
            || json!(0),
        )
    };
    let source = sales_source();
    let mut metric = source.metric();
    metric
        .reduce(squares(), "amount_sq", "sq")
        .unwrap()
        .reduce(squares(), "amount_sq", "again")
        .unwrap();
    assert_eq!(
        single(metric.value().unwrap()),
        json!({"sq": 575, "again": 575})
    );
}

#[test]
fn dropping_a_metric_releases_its_subscriptions() {
    let source = sales_source();
    assert_eq!(source.listener_count(Event::Filter), 0);
    {
        let mut metric = source.metric();
        metric.by("region").unwrap().count("n").unwrap();
        metric.value().unwrap();
        assert_eq!(source.listener_count(Event::Filter), 2);
        assert_eq!(source.listener_count(Event::Change), 1);
    }
    assert_eq!(source.listener_count(Event::Filter), 0);
    assert_eq!(source.listener_count(Event::Change), 0);
    assert_eq!(source.listener_count(Event::Ready), 0);
}

#[test]
fn retained_options_apply_to_every_metric_on_the_source() {
    let source = sales_source_with(SourceOptions {
        empty_groups: EmptyGroups::Retain,
        ..SourceOptions::default()
    });
    let mut by_month = source.metric();
    by_month.by("month").unwrap().sum("amount", Alias::anonymous()).unwrap();

    let region = source.dimension("region");
    source.set_filter(region, Some(Filter::exact("west"))).unwrap();
    assert_eq!(
        grouped(by_month.value().unwrap()),
        vec![(json!(1), json!(5)), (json!(2), json!(0)), (json!(3), json!(7))]
    );
}

#[test]
fn nested_sums_survive_totals_that_cancel_out() {
    let source = Source::preload(
        vec![
            json!({"id": 1, "o": {"a": 2}}),
            json!({"id": 2, "o": {"a": -2}}),
            json!({"id": 3, "o": {"a": 2}}),
        ],
        None,
    )
    .unwrap();
    let mut metric = source.metric();
    metric.sum_object("o", Alias::anonymous()).unwrap();
    assert_eq!(single(metric.value().unwrap()), json!({"a": 2}));

    let id = source.dimension("id");
    source.set_filter(id, Some(Filter::exact(3))).unwrap();
    assert_eq!(single(metric.value().unwrap()), json!({"a": 2}));

    source.set_filter(id, Some(Filter::exact(9))).unwrap();
    assert_eq!(single(metric.value().unwrap()), json!({}));
}

#[test]
fn max_falls_back_to_text_order_for_non_finite_values() {
    let source = Source::preload(
        vec![json!({"v": "NaN"}), json!({"v": "5"}), json!({"v": "inf"})],
        None,
    )
    .unwrap();
    let mut metric = source.metric();
    metric.max("v", Alias::anonymous()).unwrap();
    assert_eq!(single(metric.value().unwrap()), json!("inf"));

    let numeric = Source::preload(vec![json!({"v": 9}), json!({"v": "10"})], None).unwrap();
    let mut metric = numeric.metric();
    metric.max("v", Alias::anonymous()).unwrap();
    assert_eq!(single(metric.value().unwrap()), json!(10));
}
