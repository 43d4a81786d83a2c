//! Aggregator tests: totals, growth against the prior run, window handling.

use chrono::NaiveDate;
use opportunity_core::{
    aggregator::{aggregate, Growth, ProductAggregate},
    normalizer::TradeRecord,
    types::TimeWindow,
};
use std::collections::HashMap;

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
}

fn rec(product: &str, importer: &str, origin: &str, qty: f64, value: f64, day: u32) -> TradeRecord {
    TradeRecord {
        product_id: product.into(),
        product_name: product.to_uppercase(),
        chemical_id: None,
        category: "api_intermediate".into(),
        therapeutic_area: Some("analgesic".into()),
        quantity: qty,
        unit: "kg".into(),
        value,
        currency: "USD".into(),
        origin_country: origin.into(),
        destination_country: "IN".into(),
        importer: importer.into(),
        exporter: "ex".into(),
        date: d(day),
    }
}

fn window() -> TimeWindow {
    TimeWindow::ending_on(d(10), 7)
}

#[test]
fn two_records_sum_into_one_aggregate() {
    let records = vec![
        rec("x", "Aarti", "CN", 100.0, 500.0, 5),
        rec("x", "Granules", "IN", 150.0, 900.0, 6),
    ];
    let out = aggregate(&records, window(), &HashMap::new());
    assert_eq!(out.scorable.len(), 1);
    let agg = &out.scorable[0];
    assert_eq!(agg.total_volume, 250.0);
    assert_eq!(agg.total_value, 1400.0);
    assert_eq!(agg.record_count, 2);
    assert_eq!(agg.average_unit_price, Some(5.6));
    assert_eq!(agg.distinct_importers(), 2);
    assert_eq!(agg.importers[0].name, "Granules");
    assert_eq!(agg.origins[1].name, "CN");
    assert_eq!(agg.growth, Growth::NoBaseline);
}

#[test]
fn growth_is_measured_against_prior_aggregate() {
    let first = aggregate(&[rec("x", "a", "CN", 200.0, 100.0, 5)], window(), &HashMap::new());
    let prior: HashMap<String, ProductAggregate> = first
        .scorable
        .into_iter()
        .map(|a| (a.product_id.clone(), a))
        .collect();

    let next_window = TimeWindow::ending_on(d(17), 7);
    let out = aggregate(&[rec("x", "a", "CN", 250.0, 100.0, 15)], next_window, &prior);
    let agg = &out.scorable[0];
    assert_eq!(agg.prior_volume, Some(200.0));
    assert_eq!(agg.growth, Growth::Rate(0.25));
}

#[test]
fn zero_prior_volume_is_no_baseline() {
    let prior_agg = aggregate(&[rec("x", "a", "CN", 0.0, 0.0, 5)], window(), &HashMap::new())
        .insufficient_volume
        .remove(0);
    let prior = HashMap::from([("x".to_string(), prior_agg)]);
    let out = aggregate(&[rec("x", "a", "CN", 10.0, 1.0, 6)], window(), &prior);
    assert_eq!(out.scorable[0].growth, Growth::NoBaseline);
}

#[test]
fn zero_volume_aggregate_is_insufficient() {
    let records = vec![rec("x", "a", "CN", 0.0, 50.0, 5), rec("y", "a", "CN", 1.0, 1.0, 5)];
    let out = aggregate(&records, window(), &HashMap::new());
    assert_eq!(out.scorable.len(), 1);
    assert_eq!(out.insufficient_volume.len(), 1);
    assert_eq!(out.insufficient_volume[0].product_id, "x");
    assert_eq!(out.insufficient_volume[0].average_unit_price, None);
}

#[test]
fn records_outside_window_are_counted_not_aggregated() {
    let records = vec![
        rec("x", "a", "CN", 10.0, 1.0, 3),
        rec("x", "a", "CN", 20.0, 1.0, 4),
        rec("x", "a", "CN", 30.0, 1.0, 10),
        rec("x", "a", "CN", 40.0, 1.0, 11),
    ];
    let out = aggregate(&records, window(), &HashMap::new());
    assert_eq!(out.outside_window, 2);
    assert_eq!(out.scorable[0].total_volume, 50.0);
}

#[test]
fn aggregates_come_out_in_product_order() {
    let records = vec![rec("z", "a", "CN", 1.0, 1.0, 5), rec("b", "a", "CN", 1.0, 1.0, 5)];
    let out = aggregate(&records, window(), &HashMap::new());
    let ids: Vec<&str> = out.all().map(|a| a.product_id.as_str()).collect();
    assert_eq!(ids, vec!["b", "z"]);
}

#[test]
fn overflowing_totals_are_dropped_not_scored() {
    let records = vec![
        rec("x", "Aarti", "CN", 1e308, 1.0, 5),
        rec("x", "Granules", "CN", 1e308, 1.0, 6),
        rec("y", "a", "CN", 1.0, 1.0, 5),
    ];
    let out = aggregate(&records, window(), &HashMap::new());
    assert_eq!(out.non_finite, vec!["x".to_string()]);
    assert!(out.insufficient_volume.is_empty());
    let ids: Vec<&str> = out.all().map(|a| a.product_id.as_str()).collect();
    assert_eq!(ids, vec!["y"]);
    assert!(out.scorable[0].is_finite());
}

#[test]
fn records_tied_on_trade_fields_pick_identity_by_value_not_position() {
    let with_cas = |cas: &str| TradeRecord { chemical_id: Some(cas.into()), ..rec("x", "a", "CN", 5.0, 5.0, 5) };
    let forward = aggregate(&[with_cas("1-1-1"), with_cas("2-2-2")], window(), &HashMap::new());
    let reverse = aggregate(&[with_cas("2-2-2"), with_cas("1-1-1")], window(), &HashMap::new());
    assert_eq!(forward.scorable, reverse.scorable);
    assert_eq!(forward.scorable[0].chemical_id.as_deref(), Some("1-1-1"));
}
