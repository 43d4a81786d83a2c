//! Record normalizer: raw, source-shaped trade lines in, canonical
//! `TradeRecord`s out.
//!
//! Per record:
//!   1. Map source column names to canonical fields (per data source)
//!   2. Parse and validate quantity, value and date
//!   3. Resolve product identity through the lexicon
//!   4. Convert quantity to the category's canonical unit
//!   5. Convert value to the reporting currency at the transaction date
//!
//! Rejected records are returned with their input position; nothing is
//! dropped without being counted.

use crate::{
    config::UnitTable,
    diagnostics::{MissingReferenceData, RecordRejection},
    error::MalformedRecord,
    reference::{lexicon_key, ExchangeRates, ProductLexicon, SourceMapping},
    types::{ProductId, UNCATEGORIZED},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Placeholder for absent party/country fields.
pub const UNKNOWN: &str = "UNKNOWN";

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%Y%m%d"];

/// One line as exported by a data source: column name → cell text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Data source name, selecting the field mapping.
    #[serde(default)]
    pub source: Option<String>,
    pub fields: HashMap<String, String>,
}

impl RawRecord {
    pub fn new(source: Option<&str>, fields: &[(&str, &str)]) -> Self {
        Self {
            source: source.map(str::to_string),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// One customs transaction line in canonical units and currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub product_id: ProductId,
    pub product_name: String,
    pub chemical_id: Option<String>,
    pub category: String,
    pub therapeutic_area: Option<String>,
    /// In the category's canonical unit.
    pub quantity: f64,
    pub unit: String,
    /// In the reporting currency.
    pub value: f64,
    pub currency: String,
    pub origin_country: String,
    pub destination_country: String,
    pub importer: String,
    pub exporter: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub records: Vec<TradeRecord>,
    pub rejected: Vec<RecordRejection>,
    pub missing_reference: Vec<MissingReferenceData>,
}

pub struct RecordNormalizer<'a> {
    units: &'a UnitTable,
    rates: &'a dyn ExchangeRates,
    lexicon: &'a dyn ProductLexicon,
    sources: &'a HashMap<String, SourceMapping>,
    reporting_currency: String,
    fallback_mapping: SourceMapping,
}

impl<'a> RecordNormalizer<'a> {
    pub fn new(
        units: &'a UnitTable,
        rates: &'a dyn ExchangeRates,
        lexicon: &'a dyn ProductLexicon,
        sources: &'a HashMap<String, SourceMapping>,
        reporting_currency: &str,
    ) -> Self {
        Self {
            units,
            rates,
            lexicon,
            sources,
            reporting_currency: reporting_currency.to_ascii_uppercase(),
            fallback_mapping: SourceMapping::default(),
        }
    }

    /// Normalize every record, collecting rejections by input position.
    pub fn normalize_all(&self, raws: &[RawRecord]) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();
        for (index, raw) in raws.iter().enumerate() {
            match self.normalize(raw) {
                Ok((record, missing)) => {
                    if let Some(m) = missing {
                        if !batch.missing_reference.contains(&m) {
                            batch.missing_reference.push(m);
                        }
                    }
                    batch.records.push(record);
                }
                Err(reason) => {
                    log::warn!("record {index} rejected: {reason}");
                    batch.rejected.push(RecordRejection { index, reason });
                }
            }
        }
        batch
    }

    /// Normalize one record. The second element reports a product the
    /// lexicon could not resolve.
    pub fn normalize(
        &self,
        raw: &RawRecord,
    ) -> Result<(TradeRecord, Option<MissingReferenceData>), MalformedRecord> {
        let mapping = raw
            .source
            .as_deref()
            .and_then(|s| self.sources.get(s))
            .unwrap_or(&self.fallback_mapping);
        let field = |name: &str| field_value(raw, mapping, name);

        let quantity = parse_amount("quantity", field("quantity"))?;
        let value = parse_amount("value", field("value"))?;
        let date = parse_date(field("date"))?;

        let description = field("product").map(clean_text).unwrap_or_default();
        let chemical_id = field("chemical_id").map(str::to_string);
        if description.is_empty() && chemical_id.is_none() {
            return Err(MalformedRecord::MissingField { field: "product" });
        }

        let mut missing = None;
        let (product_id, product_name, category, therapeutic_area, chemical_id) =
            match self.lexicon.resolve(&description, chemical_id.as_deref()) {
                Some(entry) => (
                    entry.product_id.clone(),
                    entry.name.clone(),
                    entry.category.clone(),
                    entry.therapeutic_area.clone(),
                    entry.chemical_id.clone().or(chemical_id),
                ),
                None => {
                    let label = if description.is_empty() {
                        chemical_id.clone().unwrap_or_default()
                    } else {
                        description.clone()
                    };
                    missing = Some(MissingReferenceData::UnmappedProduct {
                        description: label.clone(),
                    });
                    (lexicon_key(&label), label, UNCATEGORIZED.to_string(), None, chemical_id)
                }
            };

        let units = self.units.for_category(&category);
        let quantity = match field("unit") {
            Some(unit) => self.units.to_canonical(&category, unit, quantity)?,
            None => quantity,
        };
        let quantity = finite("quantity", quantity)?;

        let currency = field("currency")
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or_else(|| self.reporting_currency.clone());
        let rate = self
            .rates
            .rate(&currency, date)
            .ok_or_else(|| MalformedRecord::NoExchangeRate { currency: currency.clone(), date })?;
        let value = finite("value", value * rate)?;

        let record = TradeRecord {
            product_id,
            product_name,
            chemical_id,
            category,
            therapeutic_area,
            quantity,
            unit: units.canonical.clone(),
            value,
            currency: self.reporting_currency.clone(),
            origin_country: field("origin_country").map(|c| c.to_ascii_uppercase()).unwrap_or_else(|| UNKNOWN.into()),
            destination_country: field("destination_country").map(|c| c.to_ascii_uppercase()).unwrap_or_else(|| UNKNOWN.into()),
            importer: field("importer").map(clean_text).unwrap_or_else(|| UNKNOWN.into()),
            exporter: field("exporter").map(clean_text).unwrap_or_else(|| UNKNOWN.into()),
            date,
        };
        Ok((record, missing))
    }
}

/// Trimmed, non-empty cell for a canonical field under the source's mapping.
fn field_value<'r>(raw: &'r RawRecord, mapping: &SourceMapping, name: &str) -> Option<&'r str> {
    raw.fields
        .get(mapping.column(name))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_amount(field: &'static str, raw: Option<&str>) -> Result<f64, MalformedRecord> {
    let raw = raw.ok_or(MalformedRecord::MissingField { field })?;
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ',' | '_') && !c.is_whitespace())
        .collect();
    let value: f64 = cleaned.parse().map_err(|_| MalformedRecord::NotANumber {
        field,
        raw: raw.to_string(),
    })?;
    if !value.is_finite() {
        return Err(MalformedRecord::NotANumber { field, raw: raw.to_string() });
    }
    if value < 0.0 {
        return Err(MalformedRecord::Negative { field, value });
    }
    Ok(value)
}

/// Unit factors and exchange rates can push a finite amount out of range.
fn finite(field: &'static str, value: f64) -> Result<f64, MalformedRecord> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MalformedRecord::Overflow { field })
    }
}

fn parse_date(raw: Option<&str>) -> Result<NaiveDate, MalformedRecord> {
    let raw = raw.ok_or(MalformedRecord::MissingField { field: "date" })?;
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| MalformedRecord::BadDate { raw: raw.to_string() })
}
