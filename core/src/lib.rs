//! Opportunity scoring and classification engine.
//!
//! Weekly trade records in, ranked and tracked product opportunities out.
//! See `engine` for the stage order of one run.

pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod dedup;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod event;
pub mod normalizer;
pub mod reference;
pub mod report;
pub mod scoring;
pub mod store;
pub mod tracker;
pub mod types;

pub use engine::{AnalysisEngine, RunOutcome};
pub use error::{EngineError, EngineResult};
