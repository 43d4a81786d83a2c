//! External reference data the pipeline consults: product lexicon,
//! exchange rates, strategic-fit weights and data-source field mappings.
//!
//! Each collaborator is a trait so hosts can back it with whatever they
//! have; the in-memory tables here are loaded from `data/reference/`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Lowercase, trim and collapse inner whitespace for alias matching.
pub fn lexicon_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ── Collaborator traits ──────────────────────────────────────────────────────

pub trait ExchangeRates {
    /// Rate converting one unit of `currency` into the reporting currency
    /// on `date`, or `None` when no rate is known.
    fn rate(&self, currency: &str, date: NaiveDate) -> Option<f64>;
}

pub trait ProductLexicon {
    /// Resolve a free-text description (and optional chemical identifier)
    /// to a canonical entry. The identifier takes precedence.
    fn resolve(&self, description: &str, chemical_id: Option<&str>) -> Option<&LexiconEntry>;
}

pub trait StrategicFit {
    /// Fit weight 1–5 for a therapeutic area, `None` when unmapped.
    fn fit_score(&self, therapeutic_area: &str) -> Option<u8>;
}

// ── Lexicon ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexiconEntry {
    pub product_id: String,
    pub name: String,
    /// CAS registry number or similar.
    #[serde(default)]
    pub chemical_id: Option<String>,
    pub category: String,
    #[serde(default)]
    pub therapeutic_area: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    entries: Vec<LexiconEntry>,
    by_chemical_id: HashMap<String, usize>,
    by_alias: HashMap<String, usize>,
}

impl Lexicon {
    pub fn new(entries: Vec<LexiconEntry>) -> Self {
        let mut by_chemical_id = HashMap::new();
        let mut by_alias = HashMap::new();
        for (i, e) in entries.iter().enumerate() {
            if let Some(cas) = &e.chemical_id {
                by_chemical_id.entry(cas.trim().to_string()).or_insert(i);
            }
            by_alias.entry(lexicon_key(&e.name)).or_insert(i);
            by_alias.entry(lexicon_key(&e.product_id)).or_insert(i);
            for alias in &e.aliases {
                by_alias.entry(lexicon_key(alias)).or_insert(i);
            }
        }
        Self { entries, by_chemical_id, by_alias }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ProductLexicon for Lexicon {
    fn resolve(&self, description: &str, chemical_id: Option<&str>) -> Option<&LexiconEntry> {
        chemical_id
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .and_then(|c| self.by_chemical_id.get(c))
            .or_else(|| self.by_alias.get(&lexicon_key(description)))
            .map(|&i| &self.entries[i])
    }
}

// ── Exchange rates ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateEntry {
    pub currency: String,
    /// First date the rate applies to.
    pub effective: NaiveDate,
    pub rate: f64,
}

/// Rates keyed by currency, each applying from its effective date until
/// the next entry for that currency.
#[derive(Debug, Clone, Default)]
pub struct RateTable {
    reporting_currency: String,
    rates: HashMap<String, BTreeMap<NaiveDate, f64>>,
}

impl RateTable {
    pub fn new(reporting_currency: &str, entries: Vec<RateEntry>) -> Self {
        let mut rates: HashMap<String, BTreeMap<NaiveDate, f64>> = HashMap::new();
        for e in entries {
            rates
                .entry(e.currency.trim().to_ascii_uppercase())
                .or_default()
                .insert(e.effective, e.rate);
        }
        Self {
            reporting_currency: reporting_currency.to_ascii_uppercase(),
            rates,
        }
    }
}

impl ExchangeRates for RateTable {
    fn rate(&self, currency: &str, date: NaiveDate) -> Option<f64> {
        let code = currency.trim().to_ascii_uppercase();
        if code == self.reporting_currency {
            return Some(1.0);
        }
        self.rates
            .get(&code)?
            .range(..=date)
            .next_back()
            .map(|(_, r)| *r)
    }
}

// ── Strategic fit ────────────────────────────────────────────────────────────

/// Fit weights keyed by normalized therapeutic area, clamped to 1..=5.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitTable {
    weights: HashMap<String, u8>,
}

impl FitTable {
    /// Areas that collide once normalized keep the highest weight.
    pub fn new(weights: impl IntoIterator<Item = (String, u8)>) -> Self {
        let mut table: HashMap<String, u8> = HashMap::new();
        for (area, weight) in weights {
            let weight = weight.clamp(1, 5);
            table
                .entry(lexicon_key(&area))
                .and_modify(|w| *w = (*w).max(weight))
                .or_insert(weight);
        }
        Self { weights: table }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

impl StrategicFit for FitTable {
    fn fit_score(&self, therapeutic_area: &str) -> Option<u8> {
        self.weights.get(&lexicon_key(therapeutic_area)).copied()
    }
}

// ── Data-source field mappings ───────────────────────────────────────────────

/// Maps one data source's column names onto canonical raw-record fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMapping {
    pub source: String,
    /// canonical field → source column
    pub fields: HashMap<String, String>,
}

impl SourceMapping {
    /// Column the source uses for `canonical`; the canonical name itself
    /// when the mapping does not mention it.
    pub fn column<'a>(&'a self, canonical: &'a str) -> &'a str {
        self.fields.get(canonical).map(String::as_str).unwrap_or(canonical)
    }
}

// ── Bundle ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct LexiconFile {
    products: Vec<LexiconEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct RatesFile {
    rates: Vec<RateEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct FitFile {
    weights: HashMap<String, u8>,
}

#[derive(Debug, Clone, Deserialize)]
struct SourcesFile {
    sources: Vec<SourceMapping>,
}

/// All reference tables one run needs.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    pub lexicon: Lexicon,
    pub rates: RateTable,
    pub fit: FitTable,
    pub sources: HashMap<String, SourceMapping>,
}

impl ReferenceData {
    /// Load from `{data_dir}/reference/`.
    pub fn load(data_dir: &str, reporting_currency: &str) -> anyhow::Result<Self> {
        let lexicon_file: LexiconFile = read_json(&format!("{data_dir}/reference/lexicon.json"))?;
        let rates_file: RatesFile = read_json(&format!("{data_dir}/reference/exchange_rates.json"))?;
        let fit_file: FitFile = read_json(&format!("{data_dir}/reference/strategic_fit.json"))?;
        let sources_file: SourcesFile =
            read_json(&format!("{data_dir}/reference/source_mappings.json"))?;

        let data = Self {
            lexicon: Lexicon::new(lexicon_file.products),
            rates: RateTable::new(reporting_currency, rates_file.rates),
            fit: FitTable::new(fit_file.weights),
            sources: sources_file
                .sources
                .into_iter()
                .map(|s| (s.source.clone(), s))
                .collect(),
        };
        log::info!(
            "Loaded reference data: {} products, {} fit weights, {} sources",
            data.lexicon.len(),
            data.fit.len(),
            data.sources.len()
        );
        Ok(data)
    }
}

impl ReferenceData {
    /// Small fixed tables for tests, reporting in USD.
    pub fn default_test() -> Self {
        let entry = |id: &str, name: &str, cas: &str, category: &str, area: &str, aliases: &[&str]| LexiconEntry {
            product_id: id.into(),
            name: name.into(),
            chemical_id: Some(cas.into()),
            category: category.into(),
            therapeutic_area: Some(area.into()),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        };
        let lexicon = Lexicon::new(vec![
            entry("4-aminophenol", "4-Aminophenol", "123-30-8", "api_intermediate", "analgesic", &["p-aminophenol"]),
            entry("2-methylimidazole", "2-Methylimidazole", "693-98-1", "api_intermediate", "anti-infective", &["2-mi"]),
            entry("metformin-hcl", "Metformin Hydrochloride", "1115-70-4", "api", "diabetes", &["metformin hcl"]),
            entry("atorvastatin-calcium", "Atorvastatin Calcium", "134523-03-8", "api", "cardiovascular", &["atorvastatin"]),
        ]);
        let rate = |currency: &str, rate: f64| RateEntry {
            currency: currency.into(),
            effective: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
            rate,
        };
        let fit = FitTable::new(
            [("analgesic", 4), ("anti-infective", 3), ("diabetes", 5), ("cardiovascular", 5)]
                .into_iter()
                .map(|(a, w)| (a.to_string(), w)),
        );
        Self {
            lexicon,
            rates: RateTable::new("USD", vec![rate("EUR", 1.10), rate("INR", 0.012)]),
            fit,
            sources: HashMap::new(),
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
    serde_json::from_str(&content).map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))
}
