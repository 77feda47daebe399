//! Error types for ingestd
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-10: Information Input Validation - Malformed readings are typed rejections
//! - SI-11: Error Handling - Structured error types with contextual information

use crate::types::AlertId;
use plantmon_types::Severity;
use std::fmt;
use thiserror::Error;

/// Why a reading failed structural validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedReason {
    EmptyEquipmentId,
    UnknownSensorType(String),
    MissingValue,
    /// Value present but not a number, kept as received
    NonNumericValue(String),
    NonFiniteValue,
    MissingTimestamp,
    InvalidTimestamp(String),
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedReason::EmptyEquipmentId => write!(f, "equipment id is empty"),
            MalformedReason::UnknownSensorType(s) => write!(f, "unknown sensor type '{}'", s),
            MalformedReason::MissingValue => write!(f, "value is missing"),
            MalformedReason::NonNumericValue(v) => write!(f, "value {} is not numeric", v),
            MalformedReason::NonFiniteValue => write!(f, "value is not a finite number"),
            MalformedReason::MissingTimestamp => write!(f, "timestamp is missing"),
            MalformedReason::InvalidTimestamp(s) => {
                write!(f, "timestamp '{}' is not a valid timestamp", s)
            }
        }
    }
}

/// Rejection of a single reading. Recovered locally and reported per index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("malformed reading: {0}")]
    MalformedReading(MalformedReason),

    #[error("equipment '{0}' is not registered")]
    UnknownEquipment(String),
}

/// Persistence store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Redis connection or command failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend temporarily refused the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Stored data that does not decode to what the index promises
    #[error("corrupt store data: {0}")]
    Corrupt(String),

    /// Write would leave two outstanding alerts on one key
    #[error("outstanding alert {existing} already exists for {key}")]
    Conflict { key: String, existing: AlertId },
}

impl StoreError {
    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Redis(e) => {
                e.is_io_error() || e.is_timeout() || e.is_connection_dropped()
            }
            StoreError::Unavailable(_) => true,
            StoreError::Serialization(_)
            | StoreError::Corrupt(_)
            | StoreError::Conflict { .. } => false,
        }
    }
}

/// Alert lifecycle failures.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("alert {0} not found")]
    NotFound(AlertId),

    #[error("alert {0} is already acknowledged")]
    AlreadyAcknowledged(AlertId),

    #[error("alert {0} is already resolved")]
    AlreadyResolved(AlertId),

    #[error("operator id must not be empty")]
    MissingOperator,

    /// Key lock could not be taken within the retry budget
    #[error("lock on {key} not acquired after {attempts} attempts")]
    ConcurrencyConflict { key: String, attempts: u32 },

    #[error("{operation} failed: {source}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
}

impl LifecycleError {
    pub(crate) fn persistence(operation: &'static str, source: StoreError) -> Self {
        LifecycleError::Persistence { operation, source }
    }
}

/// Per-reading failure after validation succeeded.
#[derive(Debug, Error)]
pub enum IngestFailure {
    /// The reading itself could not be appended; it was not evaluated
    #[error("reading not stored: {0}")]
    Persistence(#[source] StoreError),

    /// Stored, but the alert transition failed
    #[error("alert transition failed: {0}")]
    Lifecycle(#[source] LifecycleError),
}

impl IngestFailure {
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(
            self,
            IngestFailure::Lifecycle(LifecycleError::ConcurrencyConflict { .. })
        )
    }
}

/// Rule definition errors raised when building threshold rules.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    #[error("rule has no tiers")]
    NoTiers,

    #[error("severity {0} appears in more than one tier")]
    DuplicateSeverity(Severity),

    #[error("tier {0} has neither an upper nor a lower bound")]
    EmptyTier(Severity),

    #[error("tier {0} has a non-finite bound")]
    NonFiniteBound(Severity),

    #[error("tier {severity} lower bound {lower} is not below upper bound {upper}")]
    InvertedBounds {
        severity: Severity,
        lower: f64,
        upper: f64,
    },

    #[error("tier {higher} is less extreme than tier {lower}")]
    Misordered { higher: Severity, lower: Severity },
}

/// Errors that can occur in ingestd
#[derive(Debug, Error)]
pub enum IngestdError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("invalid threshold rule for {sensor}: {source}")]
    Rule {
        sensor: String,
        #[source]
        source: RuleError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Result type alias for ingestd operations
pub type Result<T> = std::result::Result<T, IngestdError>;
