//! Per-run diagnostics: every non-fatal condition a run ran into.
//!
//! Non-fatal conditions are accumulated here instead of being raised,
//! so one run yields one summary of everything that needed attention.

use crate::{error::MalformedRecord, types::ProductId};
use serde::Serialize;

/// A raw record excluded by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordRejection {
    /// Zero-based position of the record in the input stream.
    pub index: usize,
    pub reason: MalformedRecord,
}

/// Reference data a record or aggregate needed but the collaborators
/// could not supply. Always handled by a documented default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MissingReferenceData {
    /// No lexicon entry matched; the cleaned description became the identity.
    UnmappedProduct { description: String },
    /// No strategic-fit weight for the therapeutic area; lowest fit applied.
    UnmappedTherapeuticArea {
        product_id: ProductId,
        area: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunDiagnostics {
    pub records_in: usize,
    pub rejected: Vec<RecordRejection>,
    pub duplicates_removed: usize,
    /// Valid records dated outside the analysis window.
    pub outside_window: usize,
    /// Aggregates with zero total volume, excluded from scoring.
    pub insufficient_volume: Vec<ProductId>,
    /// Aggregates whose totals overflowed, dropped before persistence.
    pub non_finite: Vec<ProductId>,
    pub missing_reference: Vec<MissingReferenceData>,
}

impl RunDiagnostics {
    pub fn new(records_in: usize) -> Self {
        Self { records_in, ..Self::default() }
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }

    /// Fraction of input records rejected as malformed. Zero for empty input.
    pub fn rejection_rate(&self) -> f64 {
        if self.records_in == 0 {
            return 0.0;
        }
        self.rejected.len() as f64 / self.records_in as f64
    }

    /// Records a missing-reference condition once per distinct occurrence.
    pub fn note_missing(&mut self, missing: MissingReferenceData) {
        if !self.missing_reference.contains(&missing) {
            self.missing_reference.push(missing);
        }
    }

    pub fn warning_count(&self) -> usize {
        self.rejected.len()
            + self.insufficient_volume.len()
            + self.non_finite.len()
            + self.missing_reference.len()
    }
}
