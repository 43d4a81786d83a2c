use crate::{tracker::OpportunityStatus, types::ProductId};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid transition for '{product_id}': {from} -> {to}")]
    InvalidTransition {
        product_id: ProductId,
        from: OpportunityStatus,
        to: OpportunityStatus,
    },

    #[error("Opportunity '{product_id}' not found")]
    OpportunityNotFound { product_id: ProductId },

    #[error("Run '{run_id}' already recorded")]
    DuplicateRun { run_id: String },

    #[error(
        "Rejection rate {rejected}/{total} exceeds tolerance {tolerance:.2}; run aborted"
    )]
    ExcessiveRejectionRate {
        rejected: usize,
        total: usize,
        tolerance: f64,
    },

    #[error("Sub-score {field} out of range 1..=5: {value}")]
    ScoreOutOfRange { field: &'static str, value: u8 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Why a raw record could not be normalized. Never fatal on its own:
/// rejected records are counted in the run diagnostics.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MalformedRecord {
    #[error("missing field '{field}'")]
    MissingField { field: &'static str },

    #[error("field '{field}' is not a number: '{raw}'")]
    NotANumber { field: &'static str, raw: String },

    #[error("field '{field}' is negative: {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("field '{field}' is not finite after conversion")]
    Overflow { field: &'static str },

    #[error("unparseable date '{raw}'")]
    BadDate { raw: String },

    #[error("unknown unit '{unit}' for category '{category}'")]
    UnknownUnit { unit: String, category: String },

    #[error("no exchange rate for {currency} on {date}")]
    NoExchangeRate { currency: String, date: chrono::NaiveDate },
}
