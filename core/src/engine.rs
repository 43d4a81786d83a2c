//! The analysis engine: one weekly run from raw records to report.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Normalize        raw records → trade records (rejections collected)
//!   2. Deduplicate      exact duplicates removed, first occurrence kept
//!   3. Aggregate        per product over the run window, growth vs prior run
//!   4. Category averages over scorable aggregates
//!   5. Score + classify every scorable aggregate
//!   6. Track            opportunities created / rescored, history appended
//!   7. Report           weekly analysis report built from tracked state
//!
//! RULES:
//!   - Stages 1-5 are pure; nothing is written before stage 6.
//!   - Stage 6 and the event log are written in one transaction.
//!   - A run whose rejection rate exceeds tolerance records nothing.
//!   - Same inputs + same prior state → same events, cards and report.

use crate::{
    aggregator::aggregate,
    config::EngineConfig,
    dedup::deduplicate,
    diagnostics::{MissingReferenceData, RunDiagnostics},
    error::{EngineError, EngineResult},
    event::{
        EventLogEntry, RunEvent, STAGE_AGGREGATE, STAGE_DEDUPE, STAGE_ENGINE, STAGE_NORMALIZE,
        STAGE_SCORE, STAGE_TRACK,
    },
    normalizer::{RawRecord, RecordNormalizer},
    reference::ReferenceData,
    report::{self, ProductOpportunitySummary, Selection, WeeklyAnalysisReport},
    scoring::{category_averages, ScoredAggregate, ScoringEngine},
    store::OpportunityStore,
    tracker::{OpportunityStatus, OpportunityTracker, RecordSummary, StatusChange},
    types::{RunId, TimeWindow},
};
use chrono::NaiveDate;
use std::collections::HashMap;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub run_date: NaiveDate,
    pub window: TimeWindow,
    pub scored: Vec<ScoredAggregate>,
    pub summary: RecordSummary,
    pub diagnostics: RunDiagnostics,
    pub report: WeeklyAnalysisReport,
}

pub struct AnalysisEngine {
    config: EngineConfig,
    reference: ReferenceData,
    store: OpportunityStore,
}

impl AnalysisEngine {
    pub fn new(config: EngineConfig, reference: ReferenceData, store: OpportunityStore) -> Self {
        Self { config, reference, store }
    }

    /// In-memory engine with test config and reference tables.
    pub fn build_test() -> EngineResult<Self> {
        let store = OpportunityStore::in_memory()?;
        store.migrate()?;
        Ok(Self::new(EngineConfig::default_test(), ReferenceData::default_test(), store))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &OpportunityStore {
        &self.store
    }

    pub fn tracker(&self) -> OpportunityTracker<'_> {
        OpportunityTracker::new(&self.store)
    }

    /// Execute one analysis run over `raws`, dated `run_date`.
    pub fn run(&self, run_id: &str, run_date: NaiveDate, raws: &[RawRecord]) -> EngineResult<RunOutcome> {
        if self.store.run(run_id)?.is_some() {
            return Err(EngineError::DuplicateRun { run_id: run_id.to_string() });
        }
        let window = TimeWindow::ending_on(run_date, self.config.window_days);
        log::info!(
            "run {run_id}: {} records, window {}..={}",
            raws.len(),
            window.start,
            window.end
        );

        let mut events: Vec<(&'static str, RunEvent)> = vec![(
            STAGE_ENGINE,
            RunEvent::RunStarted {
                run_id: run_id.to_string(),
                run_date,
                window_start: window.start,
                window_end: window.end,
                records_in: raws.len(),
            },
        )];
        let mut diagnostics = RunDiagnostics::new(raws.len());

        // 1. Normalize
        let normalizer = RecordNormalizer::new(
            &self.config.units,
            &self.reference.rates,
            &self.reference.lexicon,
            &self.reference.sources,
            &self.config.reporting_currency,
        );
        let batch = normalizer.normalize_all(raws);
        for r in &batch.rejected {
            events.push((
                STAGE_NORMALIZE,
                RunEvent::RecordRejected { index: r.index, reason: r.reason.clone() },
            ));
        }
        diagnostics.rejected = batch.rejected;
        for m in batch.missing_reference {
            note_missing(&mut diagnostics, &mut events, STAGE_NORMALIZE, m);
        }
        if diagnostics.rejection_rate() > self.config.rejection_tolerance {
            log::warn!(
                "run {run_id}: {} of {} records malformed, aborting",
                diagnostics.rejected_count(),
                diagnostics.records_in
            );
            return Err(EngineError::ExcessiveRejectionRate {
                rejected: diagnostics.rejected_count(),
                total: diagnostics.records_in,
                tolerance: self.config.rejection_tolerance,
            });
        }

        // 2. Deduplicate
        let deduped = deduplicate(batch.records);
        diagnostics.duplicates_removed = deduped.duplicates_removed;
        if deduped.duplicates_removed > 0 {
            events.push((STAGE_DEDUPE, RunEvent::DuplicatesRemoved { count: deduped.duplicates_removed }));
        }

        // 3. Aggregate
        let previous = self.store.latest_run()?;
        let prior = match &previous {
            Some(run) => self.store.aggregates_for_run(&run.run_id)?,
            None => HashMap::new(),
        };
        let aggregated = aggregate(&deduped.records, window, &prior);
        diagnostics.outside_window = aggregated.outside_window;
        for agg in &aggregated.insufficient_volume {
            diagnostics.insufficient_volume.push(agg.product_id.clone());
            events.push((
                STAGE_AGGREGATE,
                RunEvent::AggregateExcluded {
                    product_id: agg.product_id.clone(),
                    reason: "insufficient_volume".into(),
                },
            ));
        }
        for product_id in &aggregated.non_finite {
            diagnostics.non_finite.push(product_id.clone());
            events.push((
                STAGE_AGGREGATE,
                RunEvent::AggregateExcluded {
                    product_id: product_id.clone(),
                    reason: "non_finite_totals".into(),
                },
            ));
        }

        // 4-5. Category averages, score, classify
        let averages = category_averages(&aggregated.scorable);
        let scoring = ScoringEngine::new(&self.config.scoring, &self.reference.fit);
        let mut scored = Vec::with_capacity(aggregated.scorable.len());
        for agg in aggregated.scorable {
            let s = scoring.score(&agg, &averages)?;
            if let Some(m) = s.missing_reference {
                note_missing(&mut diagnostics, &mut events, STAGE_SCORE, m);
            }
            scored.push(ScoredAggregate { aggregate: agg, card: s.card });
        }

        // 6. Track + persist
        let tracker = self.tracker();
        let summary = self.store.in_transaction(|| {
            self.store.insert_run(run_id, run_date, window, ENGINE_VERSION)?;
            for agg in &aggregated.insufficient_volume {
                self.store.insert_aggregate(run_id, agg, false)?;
            }
            let (summary, track_events) = tracker.record_run(run_id, run_date, &scored)?;
            events.extend(track_events.into_iter().map(|e| (STAGE_TRACK, e)));
            events.push((
                STAGE_ENGINE,
                RunEvent::RunCompleted {
                    scored: scored.len(),
                    created: summary.created,
                    updated: summary.updated,
                    warnings: diagnostics.warning_count(),
                },
            ));
            for (stage, event) in &events {
                self.store.append_event(&EventLogEntry::new(run_id, stage, event)?)?;
            }
            self.store
                .save_run_diagnostics(run_id, &serde_json::to_string(&diagnostics)?)?;
            Ok(summary)
        })?;

        // 7. Report
        let run = self
            .store
            .run(run_id)?
            .ok_or_else(|| EngineError::Other(anyhow::anyhow!("run {run_id} missing after commit")))?;
        let movers = tracker.movers(self.config.mover_threshold)?;
        let changes = tracker.status_changes_since(previous.as_ref())?;
        let opportunities: Vec<_> = tracker
            .all()?
            .into_iter()
            .filter(|o| o.current.run_id == run_id && o.status != OpportunityStatus::Archived)
            .collect();
        let refs: Vec<_> = opportunities.iter().collect();
        let report = report::weekly_report(&run, &refs, &movers, &changes, Some(&diagnostics));

        log::info!(
            "run {run_id}: scored {}, created {}, updated {}, {} warnings",
            scored.len(),
            summary.created,
            summary.updated,
            diagnostics.warning_count()
        );
        Ok(RunOutcome {
            run_id: run_id.to_string(),
            run_date,
            window,
            scored,
            summary,
            diagnostics,
            report,
        })
    }

    /// Product summaries for the tracked opportunities `selection` matches,
    /// best composite first.
    pub fn product_summaries(&self, selection: &Selection) -> EngineResult<Vec<ProductOpportunitySummary>> {
        let tracker = self.tracker();
        let all = tracker.all()?;
        let mut picked = selection.apply(&all);
        picked.sort_by(|a, b| {
            b.composite_score()
                .total_cmp(&a.composite_score())
                .then_with(|| a.product_id.cmp(&b.product_id))
        });
        let mut out = Vec::with_capacity(picked.len());
        for o in picked {
            match tracker.current_aggregate(o)? {
                Some(agg) => out.push(report::product_summary(
                    o,
                    &agg,
                    self.config.top_n,
                    &self.config.reporting_currency,
                )),
                None => log::warn!("report: no aggregate stored for {}", o.product_id),
            }
        }
        Ok(out)
    }

    pub fn transition_status(
        &self,
        product_id: &str,
        to: OpportunityStatus,
        on: NaiveDate,
        note: Option<&str>,
    ) -> EngineResult<StatusChange> {
        self.tracker().transition_status(product_id, to, on, note)
    }
}

fn note_missing(
    diagnostics: &mut RunDiagnostics,
    events: &mut Vec<(&'static str, RunEvent)>,
    stage: &'static str,
    missing: MissingReferenceData,
) {
    if diagnostics.missing_reference.contains(&missing) {
        return;
    }
    log::warn!("{stage}: missing reference data {missing:?}");
    events.push((stage, RunEvent::ReferenceMissing { detail: missing.clone() }));
    diagnostics.note_missing(missing);
}
