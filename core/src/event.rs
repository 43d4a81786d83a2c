//! Run events: the audit trail of what each stage did.
//!
//! RULE: Every stage reports what it did as events.
//! Events are appended to `event_log` in emission order.

use crate::{
    classifier::Tier,
    diagnostics::MissingReferenceData,
    error::MalformedRecord,
    types::{ProductId, RunId},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Pipeline stage names, in execution order.
pub const STAGE_ENGINE: &str = "engine";
pub const STAGE_NORMALIZE: &str = "normalize";
pub const STAGE_DEDUPE: &str = "dedupe";
pub const STAGE_AGGREGATE: &str = "aggregate";
pub const STAGE_SCORE: &str = "score";
pub const STAGE_TRACK: &str = "track";

/// Every event emitted during a run.
/// Variants are only ever appended, never removed or reordered.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: RunId,
        run_date: NaiveDate,
        window_start: NaiveDate,
        window_end: NaiveDate,
        records_in: usize,
    },
    RecordRejected {
        index: usize,
        reason: MalformedRecord,
    },
    DuplicatesRemoved {
        count: usize,
    },
    AggregateExcluded {
        product_id: ProductId,
        reason: String,
    },
    ReferenceMissing {
        detail: MissingReferenceData,
    },
    OpportunityCreated {
        product_id: ProductId,
        composite_score: f64,
        tier: Tier,
    },
    OpportunityRescored {
        product_id: ProductId,
        previous_composite: f64,
        composite_score: f64,
        previous_tier: Tier,
        tier: Tier,
    },
    RunCompleted {
        scored: usize,
        created: usize,
        updated: usize,
        warnings: usize,
    },
}

impl RunEvent {
    /// Stable name for the `event_type` column.
    pub fn type_name(&self) -> &'static str {
        match self {
            RunEvent::RunStarted { .. }          => "run_started",
            RunEvent::RecordRejected { .. }      => "record_rejected",
            RunEvent::DuplicatesRemoved { .. }   => "duplicates_removed",
            RunEvent::AggregateExcluded { .. }   => "aggregate_excluded",
            RunEvent::ReferenceMissing { .. }    => "reference_missing",
            RunEvent::OpportunityCreated { .. }  => "opportunity_created",
            RunEvent::OpportunityRescored { .. } => "opportunity_rescored",
            RunEvent::RunCompleted { .. }        => "run_completed",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub stage: String,
    pub event_type: String,
    pub payload: String, // JSON-serialized RunEvent
}

impl EventLogEntry {
    pub fn new(run_id: &str, stage: &str, event: &RunEvent) -> serde_json::Result<Self> {
        Ok(Self {
            id: None,
            run_id: run_id.to_string(),
            stage: stage.to_string(),
            event_type: event.type_name().to_string(),
            payload: serde_json::to_string(event)?,
        })
    }
}
