//! Deduplicator: drops repeated manifest lines.
//!
//! Two records with equal (product, importer, exporter, date, quantity,
//! value) are the same line reported twice by overlapping exports.
//! The first occurrence in input order is kept.

use crate::normalizer::TradeRecord;
use chrono::NaiveDate;
use std::collections::HashSet;

/// Identity key. Amounts compare by bit pattern so the key is hashable;
/// normalized amounts are finite and non-negative, where bit equality
/// matches numeric equality except for -0.0.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RecordKey {
    product_id: String,
    importer: String,
    exporter: String,
    date: NaiveDate,
    quantity: u64,
    value: u64,
}

impl RecordKey {
    fn of(r: &TradeRecord) -> Self {
        Self {
            product_id: r.product_id.clone(),
            importer: r.importer.clone(),
            exporter: r.exporter.clone(),
            date: r.date,
            quantity: canonical_bits(r.quantity),
            value: canonical_bits(r.value),
        }
    }
}

fn canonical_bits(x: f64) -> u64 {
    if x == 0.0 {
        0.0f64.to_bits()
    } else {
        x.to_bits()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Deduplicated {
    pub records: Vec<TradeRecord>,
    pub duplicates_removed: usize,
}

pub fn deduplicate(records: Vec<TradeRecord>) -> Deduplicated {
    let mut seen = HashSet::with_capacity(records.len());
    let total = records.len();
    let kept: Vec<TradeRecord> = records
        .into_iter()
        .filter(|r| seen.insert(RecordKey::of(r)))
        .collect();
    let duplicates_removed = total - kept.len();
    if duplicates_removed > 0 {
        log::info!("dedup: removed {duplicates_removed} duplicate records of {total}");
    }
    Deduplicated { records: kept, duplicates_removed }
}
