//! Two engines, same inputs, same prior state.
//! They must produce identical event logs, cards and reports.
//! Any divergence is a blocker.

use chrono::NaiveDate;
use opportunity_core::{
    engine::AnalysisEngine,
    error::EngineError,
    normalizer::RawRecord,
};

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
}

fn line(product: &str, importer: &str, qty: &str, value: &str, currency: &str, date: &str) -> RawRecord {
    RawRecord::new(
        None,
        &[
            ("product", product),
            ("quantity", qty),
            ("unit", "kg"),
            ("value", value),
            ("currency", currency),
            ("date", date),
            ("importer", importer),
            ("exporter", "Supplier"),
            ("origin_country", "IN"),
        ],
    )
}

fn week(day: u32) -> Vec<RawRecord> {
    let date = format!("2024-03-{:02}", day - 2);
    vec![
        line("p-aminophenol", "Aarti", "120.5", "610", "USD", &date),
        line("4-Aminophenol", "Granules", "0.3", "1.2", "USD", &date),
        line("Metformin HCl", "Acme", "75", "900", "EUR", &date),
        line("Metformin HCl", "Zenith", "33.3", "410", "INR", &date),
        line("atorvastatin", "Acme", "5", "4100", "USD", &date),
        line("2-MI", "Sun", "14", "70", "USD", &date),
        line("Unlisted Reagent", "Lupin", "9", "90", "USD", &date),
        line("2-MI", "Sun", "14", "70", "USD", &date),
    ]
}

fn run_twice(engine: &AnalysisEngine, reverse_second: bool) {
    engine.run("w1", d(10), &week(10)).expect("first run");
    let mut second = week(17);
    if reverse_second {
        second.reverse();
    }
    engine.run("w2", d(17), &second).expect("second run");
}

fn event_payloads(engine: &AnalysisEngine, run_id: &str) -> Vec<String> {
    engine
        .store()
        .events_for_run(run_id)
        .expect("read events")
        .into_iter()
        .map(|e| format!("{}|{}|{}", e.stage, e.event_type, e.payload))
        .collect()
}

#[test]
fn same_inputs_produce_identical_event_logs() {
    let a = AnalysisEngine::build_test().unwrap();
    let b = AnalysisEngine::build_test().unwrap();
    run_twice(&a, false);
    run_twice(&b, false);

    for run_id in ["w1", "w2"] {
        let log_a = event_payloads(&a, run_id);
        let log_b = event_payloads(&b, run_id);
        assert!(!log_a.is_empty());
        assert_eq!(log_a.len(), log_b.len(), "event log lengths differ for {run_id}");
        for (i, (x, y)) in log_a.iter().zip(log_b.iter()).enumerate() {
            assert_eq!(x, y, "event log diverged at entry {i} of {run_id}");
        }
    }
}

#[test]
fn input_order_does_not_change_scores() {
    let a = AnalysisEngine::build_test().unwrap();
    let b = AnalysisEngine::build_test().unwrap();
    run_twice(&a, false);
    run_twice(&b, true);

    let all_a = a.tracker().all().unwrap();
    let all_b = b.tracker().all().unwrap();
    assert_eq!(all_a, all_b);
}

#[test]
fn reports_are_identical_for_identical_runs() {
    let a = AnalysisEngine::build_test().unwrap();
    let b = AnalysisEngine::build_test().unwrap();
    let ra = a.run("w1", d(10), &week(10)).unwrap();
    let rb = b.run("w1", d(10), &week(10)).unwrap();
    assert_eq!(ra.report, rb.report);
    assert_eq!(ra.scored, rb.scored);
}

#[test]
fn excessive_rejections_record_nothing() {
    let engine = AnalysisEngine::build_test().unwrap();
    let mut raws = week(10);
    raws.push(line("Metformin HCl", "Acme", "n/a", "1", "USD", "2024-03-08"));
    raws.push(line("Metformin HCl", "Acme", "1", "1", "USD", "someday"));
    raws.push(line("Metformin HCl", "Acme", "1", "1", "XYZ", "2024-03-08"));

    let err = engine.run("w1", d(10), &raws).unwrap_err();
    match err {
        EngineError::ExcessiveRejectionRate { rejected, total, .. } => {
            assert_eq!(rejected, 3);
            assert_eq!(total, 11);
        }
        other => panic!("unexpected error {other}"),
    }
    let store = engine.store();
    assert_eq!(store.run_count().unwrap(), 0);
    assert_eq!(store.opportunity_count().unwrap(), 0);
    assert!(store.events_for_run("w1").unwrap().is_empty());
}

#[test]
fn rejections_within_tolerance_do_not_abort() {
    let engine = AnalysisEngine::build_test().unwrap();
    let mut raws = week(10);
    raws.push(line("Metformin HCl", "Acme", "n/a", "1", "USD", "2024-03-08"));
    let outcome = engine.run("w1", d(10), &raws).unwrap();
    assert_eq!(outcome.diagnostics.rejected_count(), 1);
    assert_eq!(outcome.diagnostics.rejected[0].index, 8);
}

#[test]
fn run_ids_are_unique() {
    let engine = AnalysisEngine::build_test().unwrap();
    engine.run("w1", d(10), &week(10)).unwrap();
    let err = engine.run("w1", d(17), &week(17)).unwrap_err();
    assert!(matches!(err, EngineError::DuplicateRun { .. }));
    assert_eq!(engine.store().run_count().unwrap(), 1);
}

#[test]
fn diagnostics_are_persisted_with_the_run() {
    let engine = AnalysisEngine::build_test().unwrap();
    engine.run("w1", d(10), &week(10)).unwrap();
    let json = engine.store().run_diagnostics("w1").unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["records_in"], 8);
    assert_eq!(value["duplicates_removed"], 1);
}
