//! Alert lifecycle states.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of an alert.
///
/// `Active` and `Acknowledged` are both outstanding; `Resolved` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Raised and not yet seen by an operator (default for new alerts).
    #[default]
    Active,
    /// Seen by an operator, condition may still hold.
    Acknowledged,
    /// Closed by an operator or by an in-range reading.
    Resolved,
}

impl AlertStatus {
    /// Returns true if the alert still counts against the one-per-key limit.
    pub const fn is_outstanding(&self) -> bool {
        matches!(self, AlertStatus::Active | AlertStatus::Acknowledged)
    }

    pub const fn is_resolved(&self) -> bool {
        matches!(self, AlertStatus::Resolved)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertStatus::Active => write!(f, "active"),
            AlertStatus::Acknowledged => write!(f, "acknowledged"),
            AlertStatus::Resolved => write!(f, "resolved"),
        }
    }
}

impl FromStr for AlertStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(AlertStatus::Active),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            "resolved" => Ok(AlertStatus::Resolved),
            _ => Err(ParseError::InvalidAlertStatus(s.to_string())),
        }
    }
}
