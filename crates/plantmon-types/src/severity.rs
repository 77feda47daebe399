//! Alert severity and threshold crossing direction.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Alert severity, ordered from least to most severe.
///
/// The derived `Ord` is what decides escalation: a violation only replaces an
/// outstanding alert when its severity compares greater.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    #[serde(alias = "low")]
    Info,
    #[serde(alias = "medium")]
    Warning,
    High,
    Critical,
}

impl Severity {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" | "low" => Ok(Severity::Info),
            "warning" | "medium" => Ok(Severity::Warning),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(ParseError::InvalidSeverity(s.to_string())),
        }
    }
}

/// Side of a threshold bound that a value crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdDirection {
    /// Value at or above an upper bound.
    Above,
    /// Value at or below a lower bound.
    Below,
}

impl fmt::Display for ThresholdDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdDirection::Above => write!(f, "above"),
            ThresholdDirection::Below => write!(f, "below"),
        }
    }
}

impl FromStr for ThresholdDirection {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "above" => Ok(ThresholdDirection::Above),
            "below" => Ok(ThresholdDirection::Below),
            _ => Err(ParseError::InvalidDirection(s.to_string())),
        }
    }
}
