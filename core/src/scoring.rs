//! Scoring engine: four 1–5 sub-scores and the weighted composite.
//!
//!   composite = 0.3·volume + 0.3·value + 0.2·growth + 0.2·strategicFit
//!
//! The composite is evaluated as (3v + 3val + 2g + 2f) / 10 so that the
//! integer numerator is exact and tier boundaries are never missed by
//! a rounding error. The stored composite is never rounded.

use crate::{
    aggregator::{Growth, ProductAggregate},
    classifier::{classify, Tier},
    config::{ScoringConfig, ValueBasis},
    diagnostics::MissingReferenceData,
    error::{EngineError, EngineResult},
    reference::StrategicFit,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const VOLUME_WEIGHT: f64 = 0.3;
pub const VALUE_WEIGHT: f64 = 0.3;
pub const GROWTH_WEIGHT: f64 = 0.2;
pub const STRATEGIC_FIT_WEIGHT: f64 = 0.2;

pub const MIN_SUB_SCORE: u8 = 1;
pub const MAX_SUB_SCORE: u8 = 5;

// ── Score card ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubScores {
    pub volume_score: u8,
    pub value_score: u8,
    pub growth_score: u8,
    pub strategic_fit_score: u8,
}

/// Sub-scores plus the composite and tier derived from them.
/// Fields are private: every mutation goes through a setter that
/// recomputes composite and tier together.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SubScores")]
pub struct ScoreCard {
    volume_score: u8,
    value_score: u8,
    growth_score: u8,
    strategic_fit_score: u8,
    composite_score: f64,
    tier: Tier,
}

impl TryFrom<SubScores> for ScoreCard {
    type Error = EngineError;

    fn try_from(s: SubScores) -> EngineResult<Self> {
        ScoreCard::new(s.volume_score, s.value_score, s.growth_score, s.strategic_fit_score)
    }
}

fn check(field: &'static str, value: u8) -> EngineResult<u8> {
    if (MIN_SUB_SCORE..=MAX_SUB_SCORE).contains(&value) {
        Ok(value)
    } else {
        Err(EngineError::ScoreOutOfRange { field, value })
    }
}

pub fn composite(volume: u8, value: u8, growth: u8, fit: u8) -> f64 {
    let numerator = 3 * u32::from(volume)
        + 3 * u32::from(value)
        + 2 * u32::from(growth)
        + 2 * u32::from(fit);
    f64::from(numerator) / 10.0
}

impl ScoreCard {
    pub fn new(volume: u8, value: u8, growth: u8, fit: u8) -> EngineResult<Self> {
        let mut card = Self {
            volume_score: check("volume_score", volume)?,
            value_score: check("value_score", value)?,
            growth_score: check("growth_score", growth)?,
            strategic_fit_score: check("strategic_fit_score", fit)?,
            composite_score: 0.0,
            tier: Tier::LowPriority,
        };
        card.recompute();
        Ok(card)
    }

    fn recompute(&mut self) {
        self.composite_score = composite(
            self.volume_score,
            self.value_score,
            self.growth_score,
            self.strategic_fit_score,
        );
        self.tier = classify(self.composite_score);
    }

    pub fn volume_score(&self) -> u8 { self.volume_score }
    pub fn value_score(&self) -> u8 { self.value_score }
    pub fn growth_score(&self) -> u8 { self.growth_score }
    pub fn strategic_fit_score(&self) -> u8 { self.strategic_fit_score }
    pub fn composite_score(&self) -> f64 { self.composite_score }
    pub fn tier(&self) -> Tier { self.tier }

    pub fn sub_scores(&self) -> SubScores {
        SubScores {
            volume_score: self.volume_score,
            value_score: self.value_score,
            growth_score: self.growth_score,
            strategic_fit_score: self.strategic_fit_score,
        }
    }

    pub fn set_volume_score(&mut self, score: u8) -> EngineResult<()> {
        self.volume_score = check("volume_score", score)?;
        self.recompute();
        Ok(())
    }

    pub fn set_value_score(&mut self, score: u8) -> EngineResult<()> {
        self.value_score = check("value_score", score)?;
        self.recompute();
        Ok(())
    }

    pub fn set_growth_score(&mut self, score: u8) -> EngineResult<()> {
        self.growth_score = check("growth_score", score)?;
        self.recompute();
        Ok(())
    }

    pub fn set_strategic_fit_score(&mut self, score: u8) -> EngineResult<()> {
        self.strategic_fit_score = check("strategic_fit_score", score)?;
        self.recompute();
        Ok(())
    }
}

/// An aggregate together with the card scored from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredAggregate {
    pub aggregate: ProductAggregate,
    pub card: ScoreCard,
}

// ── Category reference ───────────────────────────────────────────────────────

/// Mean volume, value and unit price over one category's aggregates in a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryAverage {
    pub count: usize,
    pub volume: f64,
    pub value: f64,
    pub unit_price: f64,
}

/// Simple means per category. Must be computed over the whole run
/// before any aggregate is scored.
pub fn category_averages(aggregates: &[ProductAggregate]) -> BTreeMap<String, CategoryAverage> {
    let mut sums: BTreeMap<String, (usize, f64, f64, f64)> = BTreeMap::new();
    let mut ordered: Vec<&ProductAggregate> = aggregates.iter().collect();
    ordered.sort_by(|a, b| a.product_id.cmp(&b.product_id));
    for a in ordered {
        let s = sums.entry(a.category.clone()).or_default();
        s.0 += 1;
        s.1 += a.total_volume;
        s.2 += a.total_value;
        s.3 += a.average_unit_price.unwrap_or(0.0);
    }
    sums.into_iter()
        .map(|(cat, (n, vol, val, price))| {
            let n_f = n as f64;
            (cat, CategoryAverage { count: n, volume: vol / n_f, value: val / n_f, unit_price: price / n_f })
        })
        .collect()
}

/// `x` relative to `avg`; at-average when there is no usable average.
fn ratio(x: f64, avg: f64) -> f64 {
    if avg > 0.0 && avg.is_finite() {
        x / avg
    } else {
        1.0
    }
}

// ── Engine ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Scored {
    pub card: ScoreCard,
    /// Set when the strategic-fit default was applied.
    pub missing_reference: Option<MissingReferenceData>,
}

pub struct ScoringEngine<'a> {
    config: &'a ScoringConfig,
    fit: &'a dyn StrategicFit,
}

impl<'a> ScoringEngine<'a> {
    pub fn new(config: &'a ScoringConfig, fit: &'a dyn StrategicFit) -> Self {
        Self { config, fit }
    }

    pub fn volume_score(&self, agg: &ProductAggregate, avg: &CategoryAverage) -> u8 {
        self.config.volume_steps.bucket(ratio(agg.total_volume, avg.volume))
    }

    pub fn value_score(&self, agg: &ProductAggregate, avg: &CategoryAverage) -> u8 {
        let by_total = self.config.value_steps.bucket(ratio(agg.total_value, avg.value));
        let by_price = agg
            .average_unit_price
            .map(|p| self.config.unit_price_steps.bucket(ratio(p, avg.unit_price)))
            .unwrap_or(MIN_SUB_SCORE);
        match self.config.value_basis {
            ValueBasis::TotalValue => by_total,
            ValueBasis::UnitPrice => by_price,
            ValueBasis::Max => by_total.max(by_price),
        }
    }

    pub fn growth_score(&self, agg: &ProductAggregate) -> u8 {
        match agg.growth {
            Growth::Rate(r) => self.config.growth_steps.bucket(r),
            Growth::NoBaseline => self.config.no_baseline_growth_score,
        }
    }

    /// Fit weight for the aggregate's therapeutic area, with the lowest-fit
    /// default and a missing-reference note when the area is unmapped.
    pub fn strategic_fit_score(&self, agg: &ProductAggregate) -> (u8, Option<MissingReferenceData>) {
        match agg.therapeutic_area.as_deref().and_then(|a| self.fit.fit_score(a)) {
            Some(score) => (score, None),
            None => (
                self.config.unmapped_fit_score,
                Some(MissingReferenceData::UnmappedTherapeuticArea {
                    product_id: agg.product_id.clone(),
                    area: agg.therapeutic_area.clone(),
                }),
            ),
        }
    }

    pub fn score(
        &self,
        agg: &ProductAggregate,
        averages: &BTreeMap<String, CategoryAverage>,
    ) -> EngineResult<Scored> {
        let neutral = CategoryAverage {
            count: 0,
            volume: agg.total_volume,
            value: agg.total_value,
            unit_price: agg.average_unit_price.unwrap_or(0.0),
        };
        let avg = averages.get(&agg.category).unwrap_or(&neutral);
        let (fit, missing_reference) = self.strategic_fit_score(agg);
        let card = ScoreCard::new(
            self.volume_score(agg, avg),
            self.value_score(agg, avg),
            self.growth_score(agg),
            fit,
        )?;
        log::debug!(
            "score: {} v={} val={} g={} fit={} composite={:.2} tier={}",
            agg.product_id,
            card.volume_score(),
            card.value_score(),
            card.growth_score(),
            card.strategic_fit_score(),
            card.composite_score(),
            card.tier()
        );
        Ok(Scored { card, missing_reference })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{reference::FitTable, types::TimeWindow};
    use chrono::NaiveDate;

    fn agg(id: &str, volume: f64, value: f64, growth: Growth, area: Option<&str>) -> ProductAggregate {
        let day = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        ProductAggregate {
            product_id: id.into(),
            product_name: id.into(),
            chemical_id: None,
            category: "api_intermediate".into(),
            therapeutic_area: area.map(str::to_string),
            window: TimeWindow::ending_on(day, 7),
            record_count: 1,
            total_volume: volume,
            total_value: value,
            average_unit_price: (volume > 0.0).then(|| value / volume),
            importers: vec![],
            origins: vec![],
            prior_volume: None,
            prior_value: None,
            growth,
        }
    }

    fn fit() -> FitTable {
        FitTable::new([("oncology".to_string(), 5u8)])
    }

    #[test]
    fn composite_is_weighted_sum() {
        let card = ScoreCard::new(5, 4, 3, 2).unwrap();
        let expected = 0.3 * 5.0 + 0.3 * 4.0 + 0.2 * 3.0 + 0.2 * 2.0;
        assert!((card.composite_score() - expected).abs() < 1e-12);
        assert_eq!(card.tier(), Tier::MediumPriority);
    }

    #[test]
    fn all_fours_is_exactly_high_priority() {
        let card = ScoreCard::new(4, 4, 4, 4).unwrap();
        assert_eq!(card.composite_score(), 4.0);
        assert_eq!(card.tier(), Tier::HighPriority);
    }

    #[test]
    fn setter_recomputes_composite_and_tier() {
        let mut card = ScoreCard::new(4, 4, 4, 4).unwrap();
        card.set_volume_score(1).unwrap();
        assert!((card.composite_score() - 3.1).abs() < 1e-12);
        assert_eq!(card.tier(), Tier::MediumPriority);
    }

    #[test]
    fn out_of_range_sub_score_is_rejected_without_change() {
        let mut card = ScoreCard::new(3, 3, 3, 3).unwrap();
        assert!(matches!(ScoreCard::new(0, 3, 3, 3), Err(EngineError::ScoreOutOfRange { .. })));
        assert!(card.set_growth_score(6).is_err());
        assert_eq!(card, ScoreCard::new(3, 3, 3, 3).unwrap());
    }

    #[test]
    fn deserializing_recomputes_composite() {
        let json = r#"{"volume_score":5,"value_score":5,"growth_score":5,"strategic_fit_score":5,"composite_score":0.1,"tier":"low_priority"}"#;
        let card: ScoreCard = serde_json::from_str(json).unwrap();
        assert_eq!(card.composite_score(), 5.0);
        assert_eq!(card.tier(), Tier::HighPriority);
    }

    #[test]
    fn double_the_category_average_scores_five() {
        let config = ScoringConfig::default();
        let fit = fit();
        let engine = ScoringEngine::new(&config, &fit);
        let x = agg("x", 250.0, 1000.0, Growth::NoBaseline, Some("oncology"));
        let avg = CategoryAverage { count: 3, volume: 100.0, value: 1000.0, unit_price: 4.0 };
        assert_eq!(engine.volume_score(&x, &avg), 5);
    }

    #[test]
    fn no_baseline_growth_is_neutral_and_overridable() {
        let mut config = ScoringConfig::default();
        let fit = fit();
        let x = agg("x", 1.0, 1.0, Growth::NoBaseline, None);
        assert_eq!(ScoringEngine::new(&config, &fit).growth_score(&x), 3);
        config.no_baseline_growth_score = 2;
        assert_eq!(ScoringEngine::new(&config, &fit).growth_score(&x), 2);
    }

    #[test]
    fn growth_buckets_by_rate() {
        let config = ScoringConfig::default();
        let fit = fit();
        let engine = ScoringEngine::new(&config, &fit);
        let score = |r| engine.growth_score(&agg("x", 1.0, 1.0, Growth::Rate(r), None));
        assert_eq!(score(-0.5), 1);
        assert_eq!(score(-0.05), 2);
        assert_eq!(score(0.05), 3);
        assert_eq!(score(0.2), 4);
        assert_eq!(score(0.3), 5);
    }

    #[test]
    fn unit_price_can_lift_value_score() {
        let mut config = ScoringConfig::default();
        let fit = fit();
        // Low total value, but a unit price far above the category's.
        let niche = agg("niche", 1.0, 300.0, Growth::NoBaseline, None);
        let avg = CategoryAverage { count: 2, volume: 100.0, value: 1000.0, unit_price: 10.0 };

        config.value_basis = ValueBasis::TotalValue;
        assert_eq!(ScoringEngine::new(&config, &fit).value_score(&niche, &avg), 1);
        config.value_basis = ValueBasis::UnitPrice;
        assert_eq!(ScoringEngine::new(&config, &fit).value_score(&niche, &avg), 5);
        config.value_basis = ValueBasis::Max;
        assert_eq!(ScoringEngine::new(&config, &fit).value_score(&niche, &avg), 5);
    }

    #[test]
    fn unmapped_area_gets_lowest_fit_and_a_note() {
        let config = ScoringConfig::default();
        let fit = fit();
        let engine = ScoringEngine::new(&config, &fit);
        let (score, missing) = engine.strategic_fit_score(&agg("x", 1.0, 1.0, Growth::NoBaseline, Some("dermatology")));
        assert_eq!(score, 1);
        assert!(matches!(missing, Some(MissingReferenceData::UnmappedTherapeuticArea { .. })));
        let (score, missing) = engine.strategic_fit_score(&agg("y", 1.0, 1.0, Growth::NoBaseline, Some("Oncology")));
        assert_eq!(score, 5);
        assert!(missing.is_none());
    }

    #[test]
    fn category_average_is_simple_mean() {
        let avgs = category_averages(&[
            agg("a", 100.0, 1000.0, Growth::NoBaseline, None),
            agg("b", 300.0, 3000.0, Growth::NoBaseline, None),
        ]);
        let avg = avgs["api_intermediate"];
        assert_eq!(avg.count, 2);
        assert_eq!(avg.volume, 200.0);
        assert_eq!(avg.value, 2000.0);
        assert_eq!(avg.unit_price, 10.0);
    }
}
