//! Aggregator: one `ProductAggregate` per product identity in the window.
//!
//! Records are partitioned by product identity and each partition is
//! summed in a canonical record order, so the result does not depend on
//! input order (floating-point sums included).
//!
//! Aggregates with zero total volume have no unit price; they are set
//! aside as insufficient-volume and never scored. Aggregates whose sums
//! overflow are dropped: they can be neither scored nor persisted.

use crate::{
    normalizer::TradeRecord,
    types::{ProductId, TimeWindow},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Year-over-year growth of total volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "rate", rename_all = "snake_case")]
pub enum Growth {
    /// (current − prior) / prior
    Rate(f64),
    /// No prior aggregate, or a prior with zero volume.
    NoBaseline,
}

impl Growth {
    pub fn rate(&self) -> Option<f64> {
        match self {
            Growth::Rate(r) => Some(*r),
            Growth::NoBaseline => None,
        }
    }
}

/// Volume and value attributed to one importer or origin country.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyShare {
    pub name: String,
    pub volume: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductAggregate {
    pub product_id: ProductId,
    pub product_name: String,
    pub chemical_id: Option<String>,
    pub category: String,
    pub therapeutic_area: Option<String>,
    pub window: TimeWindow,
    pub record_count: usize,
    pub total_volume: f64,
    pub total_value: f64,
    /// Undefined when total volume is zero.
    pub average_unit_price: Option<f64>,
    /// Ranked by volume, then name.
    pub importers: Vec<PartyShare>,
    /// Ranked by volume, then name.
    pub origins: Vec<PartyShare>,
    pub prior_volume: Option<f64>,
    pub prior_value: Option<f64>,
    pub growth: Growth,
}

impl ProductAggregate {
    pub fn distinct_importers(&self) -> usize {
        self.importers.len()
    }

    pub fn distinct_origins(&self) -> usize {
        self.origins.len()
    }

    pub fn has_sufficient_volume(&self) -> bool {
        self.total_volume > 0.0
    }

    /// Every total, share and derived rate is a finite number.
    pub fn is_finite(&self) -> bool {
        self.total_volume.is_finite()
            && self.total_value.is_finite()
            && self.average_unit_price.map_or(true, f64::is_finite)
            && self.growth.rate().map_or(true, f64::is_finite)
            && self
                .importers
                .iter()
                .chain(self.origins.iter())
                .all(|p| p.volume.is_finite() && p.value.is_finite())
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregationResult {
    /// Sorted by product identity.
    pub scorable: Vec<ProductAggregate>,
    /// Zero-volume aggregates, excluded from scoring.
    pub insufficient_volume: Vec<ProductAggregate>,
    /// Products whose totals overflowed; neither scored nor persisted.
    pub non_finite: Vec<ProductId>,
    /// Records dated outside the window.
    pub outside_window: usize,
}

impl AggregationResult {
    pub fn all(&self) -> impl Iterator<Item = &ProductAggregate> {
        self.scorable.iter().chain(self.insufficient_volume.iter())
    }
}

/// Group `records` inside `window` by product identity.
/// `prior` maps product identity to the previous run's aggregate.
pub fn aggregate(
    records: &[TradeRecord],
    window: TimeWindow,
    prior: &HashMap<ProductId, ProductAggregate>,
) -> AggregationResult {
    let mut partitions: BTreeMap<&str, Vec<&TradeRecord>> = BTreeMap::new();
    let mut outside_window = 0;
    for r in records {
        if window.contains(r.date) {
            partitions.entry(r.product_id.as_str()).or_default().push(r);
        } else {
            outside_window += 1;
        }
    }
    if outside_window > 0 {
        log::warn!("aggregate: {outside_window} records outside window {}..={}", window.start, window.end);
    }

    let mut result = AggregationResult { outside_window, ..Default::default() };
    for (product_id, mut group) in partitions {
        group.sort_by(|a, b| canonical_order(a, b));
        let agg = aggregate_partition(product_id, &group, window, prior.get(product_id));
        if !agg.is_finite() {
            log::warn!("aggregate: {product_id} totals are not finite, dropped");
            result.non_finite.push(agg.product_id);
        } else if agg.has_sufficient_volume() {
            result.scorable.push(agg);
        } else {
            log::warn!("aggregate: {product_id} has zero volume in window, excluded from scoring");
            result.insufficient_volume.push(agg);
        }
    }
    log::info!(
        "aggregate: {} scorable, {} insufficient volume",
        result.scorable.len(),
        result.insufficient_volume.len()
    );
    result
}

fn canonical_order(a: &TradeRecord, b: &TradeRecord) -> std::cmp::Ordering {
    a.date
        .cmp(&b.date)
        .then_with(|| a.importer.cmp(&b.importer))
        .then_with(|| a.exporter.cmp(&b.exporter))
        .then_with(|| a.origin_country.cmp(&b.origin_country))
        .then_with(|| a.destination_country.cmp(&b.destination_country))
        .then_with(|| a.quantity.total_cmp(&b.quantity))
        .then_with(|| a.value.total_cmp(&b.value))
        .then_with(|| a.product_name.cmp(&b.product_name))
        .then_with(|| a.chemical_id.cmp(&b.chemical_id))
        .then_with(|| a.category.cmp(&b.category))
        .then_with(|| a.therapeutic_area.cmp(&b.therapeutic_area))
}

/// `group` must be non-empty and in canonical order.
fn aggregate_partition(
    product_id: &str,
    group: &[&TradeRecord],
    window: TimeWindow,
    prior: Option<&ProductAggregate>,
) -> ProductAggregate {
    let first = group[0];
    let mut total_volume = 0.0;
    let mut total_value = 0.0;
    let mut importers: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
    let mut origins: BTreeMap<&str, (f64, f64)> = BTreeMap::new();

    for r in group {
        total_volume += r.quantity;
        total_value += r.value;
        let imp = importers.entry(r.importer.as_str()).or_default();
        imp.0 += r.quantity;
        imp.1 += r.value;
        let org = origins.entry(r.origin_country.as_str()).or_default();
        org.0 += r.quantity;
        org.1 += r.value;
    }

    let average_unit_price = (total_volume > 0.0).then(|| total_value / total_volume);
    let growth = match prior {
        Some(p) if p.total_volume > 0.0 => {
            Growth::Rate((total_volume - p.total_volume) / p.total_volume)
        }
        _ => Growth::NoBaseline,
    };

    ProductAggregate {
        product_id: product_id.to_string(),
        product_name: first.product_name.clone(),
        chemical_id: group.iter().find_map(|r| r.chemical_id.clone()),
        category: first.category.clone(),
        therapeutic_area: group.iter().find_map(|r| r.therapeutic_area.clone()),
        window,
        record_count: group.len(),
        total_volume,
        total_value,
        average_unit_price,
        importers: ranked(importers),
        origins: ranked(origins),
        prior_volume: prior.map(|p| p.total_volume),
        prior_value: prior.map(|p| p.total_value),
        growth,
    }
}

fn ranked(parties: BTreeMap<&str, (f64, f64)>) -> Vec<PartyShare> {
    let mut out: Vec<PartyShare> = parties
        .into_iter()
        .map(|(name, (volume, value))| PartyShare { name: name.to_string(), volume, value })
        .collect();
    out.sort_by(|a, b| b.volume.total_cmp(&a.volume).then_with(|| a.name.cmp(&b.name)));
    out
}
