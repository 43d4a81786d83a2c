//! Classifier: composite score to priority tier.
//!
//!   [4.0, 5.0] → HighPriority
//!   [3.0, 4.0) → MediumPriority
//!   [2.0, 3.0) → Monitoring
//!   [0.0, 2.0) → LowPriority
//!
//! Total over all inputs: above 5.0 stays High, below 0.0 and NaN are Low.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const HIGH_PRIORITY_MIN: f64 = 4.0;
pub const MEDIUM_PRIORITY_MIN: f64 = 3.0;
pub const MONITORING_MIN: f64 = 2.0;

/// Declared lowest to highest so derived ordering follows priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    LowPriority,
    Monitoring,
    MediumPriority,
    HighPriority,
}

impl Tier {
    /// Highest priority first.
    pub const ALL: [Tier; 4] = [
        Tier::HighPriority,
        Tier::MediumPriority,
        Tier::Monitoring,
        Tier::LowPriority,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::HighPriority   => "high_priority",
            Tier::MediumPriority => "medium_priority",
            Tier::Monitoring     => "monitoring",
            Tier::LowPriority    => "low_priority",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tier::HighPriority   => "High Priority",
            Tier::MediumPriority => "Medium Priority",
            Tier::Monitoring     => "Monitoring",
            Tier::LowPriority    => "Low Priority",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn classify(composite: f64) -> Tier {
    if composite >= HIGH_PRIORITY_MIN {
        Tier::HighPriority
    } else if composite >= MEDIUM_PRIORITY_MIN {
        Tier::MediumPriority
    } else if composite >= MONITORING_MIN {
        Tier::Monitoring
    } else {
        Tier::LowPriority
    }
}
