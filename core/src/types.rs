//! Shared primitive types used across the entire engine.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Canonical product identity key, stable across naming variants.
pub type ProductId = String;

/// The canonical analysis run identifier.
pub type RunId = String;

/// Category assigned to products the lexicon cannot place.
pub const UNCATEGORIZED: &str = "uncategorized";

/// An inclusive date window `[start, end]` covered by one analysis run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveDate,
    pub end:   NaiveDate,
}

impl TimeWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The `days`-long window ending on `end` (inclusive).
    pub fn ending_on(end: NaiveDate, days: u32) -> Self {
        let span = chrono::Duration::days(i64::from(days.max(1)) - 1);
        Self { start: end - span, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}
