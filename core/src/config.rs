use crate::error::{EngineError, EngineResult, MalformedRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Scoring ──────────────────────────────────────────────────────────────────

/// Monotonic five-step bucket table over a ratio or rate.
///
/// With ascending cutoffs `[c0, c1, c2, c3]`:
///   x <= c0        → 1
///   c0 < x < c1    → 2
///   c1 <= x < c2   → 3
///   c2 <= x < c3   → 4
///   x >= c3        → 5
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTable {
    pub cutoffs: [f64; 4],
}

impl StepTable {
    pub const fn new(cutoffs: [f64; 4]) -> Self {
        Self { cutoffs }
    }

    pub fn bucket(&self, x: f64) -> u8 {
        if x.is_nan() || x <= self.cutoffs[0] {
            return 1;
        }
        2 + self.cutoffs[1..].iter().filter(|&&c| x >= c).count() as u8
    }

    pub fn validate(&self, name: &str) -> EngineResult<()> {
        if self.cutoffs.iter().any(|c| !c.is_finite()) {
            return Err(EngineError::InvalidConfig(format!(
                "{name}: cutoffs must be finite"
            )));
        }
        if self.cutoffs.windows(2).any(|w| w[0] >= w[1]) {
            return Err(EngineError::InvalidConfig(format!(
                "{name}: cutoffs must be strictly ascending, got {:?}",
                self.cutoffs
            )));
        }
        Ok(())
    }
}

/// Which value measure drives `valueScore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueBasis {
    TotalValue,
    UnitPrice,
    /// Rank both and keep the higher score.
    Max,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Over total volume / category average volume.
    pub volume_steps: StepTable,
    /// Over total value / category average value.
    pub value_steps: StepTable,
    /// Over average unit price / category average unit price.
    pub unit_price_steps: StepTable,
    /// Over year-over-year growth rate (0.10 = +10%).
    pub growth_steps: StepTable,
    pub value_basis: ValueBasis,
    /// growthScore used when an aggregate has no baseline.
    pub no_baseline_growth_score: u8,
    /// strategicFitScore used when the therapeutic area is unmapped.
    pub unmapped_fit_score: u8,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            volume_steps:     StepTable::new([0.5, 1.0, 1.5, 2.0]),
            value_steps:      StepTable::new([0.5, 1.0, 1.5, 2.0]),
            unit_price_steps: StepTable::new([0.5, 1.0, 1.5, 2.0]),
            growth_steps:     StepTable::new([-0.10, 0.0, 0.10, 0.30]),
            value_basis: ValueBasis::Max,
            no_baseline_growth_score: 3,
            unmapped_fit_score: 1,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> EngineResult<()> {
        self.volume_steps.validate("volume_steps")?;
        self.value_steps.validate("value_steps")?;
        self.unit_price_steps.validate("unit_price_steps")?;
        self.growth_steps.validate("growth_steps")?;
        for (name, score) in [
            ("no_baseline_growth_score", self.no_baseline_growth_score),
            ("unmapped_fit_score", self.unmapped_fit_score),
        ] {
            if !(1..=5).contains(&score) {
                return Err(EngineError::InvalidConfig(format!(
                    "{name} must be within 1..=5, got {score}"
                )));
            }
        }
        Ok(())
    }
}

// ── Units ────────────────────────────────────────────────────────────────────

/// Unit conversion for one product category: unit alias → factor to canonical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryUnits {
    pub canonical: String,
    pub factors: HashMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitTable {
    /// Applied to categories without an override.
    pub default: CategoryUnits,
    #[serde(default)]
    pub categories: HashMap<String, CategoryUnits>,
}

impl Default for UnitTable {
    fn default() -> Self {
        let factors = [
            ("kg", 1.0),
            ("kgs", 1.0),
            ("kilogram", 1.0),
            ("g", 0.001),
            ("gram", 0.001),
            ("mt", 1000.0),
            ("t", 1000.0),
            ("ton", 1000.0),
            ("tonne", 1000.0),
            ("lb", 0.453_592_37),
            ("lbs", 0.453_592_37),
        ]
        .into_iter()
        .map(|(u, f)| (u.to_string(), f))
        .collect();
        Self {
            default: CategoryUnits { canonical: "kg".into(), factors },
            categories: HashMap::new(),
        }
    }
}

impl UnitTable {
    pub fn for_category(&self, category: &str) -> &CategoryUnits {
        self.categories.get(category).unwrap_or(&self.default)
    }

    /// Convert `quantity` in `unit` to the category's canonical unit.
    pub fn to_canonical(
        &self,
        category: &str,
        unit: &str,
        quantity: f64,
    ) -> Result<f64, MalformedRecord> {
        let units = self.for_category(category);
        let key = unit.trim().to_ascii_lowercase();
        if key == units.canonical.to_ascii_lowercase() {
            return Ok(quantity);
        }
        units
            .factors
            .get(&key)
            .map(|f| quantity * f)
            .ok_or_else(|| MalformedRecord::UnknownUnit {
                unit: unit.to_string(),
                category: category.to_string(),
            })
    }
}

// ── Engine ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub units: UnitTable,
    /// Maximum fraction of malformed records before a run aborts.
    pub rejection_tolerance: f64,
    /// Minimum composite change between runs for an opportunity to be a mover.
    pub mover_threshold: f64,
    /// Length of ranked importer / origin lists in product summaries.
    pub top_n: usize,
    pub reporting_currency: String,
    /// Length of the current analysis window in days.
    pub window_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringConfig::default(),
            units: UnitTable::default(),
            rejection_tolerance: 0.20,
            mover_threshold: 0.5,
            top_n: 5,
            reporting_currency: "USD".into(),
            window_days: 7,
        }
    }
}

impl EngineConfig {
    /// Load from the data/ directory.
    /// In tests, use EngineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/config/engine.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        log::info!("Loaded engine config from {path}");
        Ok(config)
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.scoring.validate()?;
        if !(0.0..=1.0).contains(&self.rejection_tolerance) {
            return Err(EngineError::InvalidConfig(format!(
                "rejection_tolerance must be within [0, 1], got {}",
                self.rejection_tolerance
            )));
        }
        if self.mover_threshold < 0.0 || !self.mover_threshold.is_finite() {
            return Err(EngineError::InvalidConfig(format!(
                "mover_threshold must be finite and non-negative, got {}",
                self.mover_threshold
            )));
        }
        if self.window_days == 0 {
            return Err(EngineError::InvalidConfig("window_days must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_volume_table_matches_documented_edges() {
        let t = ScoringConfig::default().volume_steps;
        assert_eq!(t.bucket(0.0), 1);
        assert_eq!(t.bucket(0.5), 1);
        assert_eq!(t.bucket(0.51), 2);
        assert_eq!(t.bucket(1.0), 3);
        assert_eq!(t.bucket(1.5), 4);
        assert_eq!(t.bucket(1.99), 4);
        assert_eq!(t.bucket(2.0), 5);
        assert_eq!(t.bucket(250.0), 5);
    }

    #[test]
    fn nan_buckets_to_lowest() {
        assert_eq!(StepTable::new([0.5, 1.0, 1.5, 2.0]).bucket(f64::NAN), 1);
    }

    #[test]
    fn non_ascending_table_rejected() {
        let t = StepTable::new([1.0, 1.0, 1.5, 2.0]);
        assert!(matches!(t.validate("t"), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn out_of_range_default_scores_rejected() {
        let mut cfg = EngineConfig::default_test();
        cfg.scoring.no_baseline_growth_score = 0;
        assert!(cfg.validate().is_err());
        cfg.scoring.no_baseline_growth_score = 3;
        cfg.scoring.unmapped_fit_score = 6;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unit_conversion_uses_category_override() {
        let mut units = UnitTable::default();
        units.categories.insert(
            "solvent".into(),
            CategoryUnits {
                canonical: "l".into(),
                factors: [("ml".to_string(), 0.001)].into_iter().collect(),
            },
        );
        assert_eq!(units.to_canonical("api_intermediate", "MT", 2.0).unwrap(), 2000.0);
        assert_eq!(units.to_canonical("solvent", "L", 3.0).unwrap(), 3.0);
        assert!((units.to_canonical("solvent", "ml", 500.0).unwrap() - 0.5).abs() < 1e-12);
        assert!(matches!(
            units.to_canonical("solvent", "kg", 1.0),
            Err(MalformedRecord::UnknownUnit { .. })
        ));
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = EngineConfig::default_test();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
