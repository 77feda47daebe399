//! Common plantmon types for equipment telemetry and alerting.
//!
//! This crate provides the closed vocabularies shared by every plantmon
//! component:
//!
//! - [`SensorType`]: the measurement kinds a reading may carry
//! - [`Severity`]: ordered alert severities
//! - [`AlertStatus`]: alert lifecycle states
//! - [`ThresholdDirection`]: which side of a bound a value crossed

mod alert;
mod sensor;
mod severity;

pub use alert::AlertStatus;
pub use sensor::SensorType;
pub use severity::{Severity, ThresholdDirection};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown sensor type: {0}")]
    UnknownSensorType(String),

    #[error("invalid severity: {0}")]
    InvalidSeverity(String),

    #[error("invalid alert status: {0}")]
    InvalidAlertStatus(String),

    #[error("invalid threshold direction: {0}")]
    InvalidDirection(String),
}
