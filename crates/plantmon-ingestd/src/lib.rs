//! Plant Sensor Ingestion Daemon
//!
//! This crate ingests sensor readings from industrial equipment, stores them,
//! evaluates them against tiered threshold rules and maintains one alert per
//! (equipment, sensor) pair through its lifecycle.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//!
//! This module implements the following security controls:
//!
//! | Control | Description | Implementation |
//! |---------|-------------|----------------|
//! | AC-3 | Access Enforcement | Per-key locks serialize alert transitions |
//! | AU-3 | Content of Audit Records | Structured logging with equipment and sensor |
//! | AU-12 | Audit Record Generation | Every alert transition logged and broadcast |
//! | CM-6 | Configuration Settings | TOML configuration with validation |
//! | CM-8 | System Component Inventory | Equipment directory |
//! | SC-5 | DoS Protection | Bounded lock waits and write retries |
//! | SI-4 | System Monitoring | Threshold evaluation and Prometheus metrics |
//! | SI-10 | Input Validation | Readings validated before storage |
//! | SI-11 | Error Handling | Structured error types |
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌───────────────────────┐     ┌───────────────────┐
//! │  Sensor feed     │     │       ingestd         │     │  Store            │
//! │  (NDJSON)        │     │                       │     │  (memory / Redis) │
//! │                  │     │   validator           │     │                   │
//! │  RawReading  ────┼────▶│       │               │     │  READINGS         │
//! └──────────────────┘     │       ▼               │     │  ALERT            │
//!                          │   IngestPipeline  ────┼────▶│  ALERT_OUTSTANDING│
//! ┌──────────────────┐     │       │               │     │                   │
//! │ EquipmentDirectory────▶│   threshold::evaluate │     └───────────────────┘
//! └──────────────────┘     │       │               │               ▲
//!                          │       ▼               │               │
//!                          │   AlertManager  ──────┼───────────────┘
//!                          │       │               │
//!                          └───────┼───────────────┘
//!                                  ▼
//!                          AlertEvent subscribers
//! ```

pub mod config_file;
pub mod directory;
pub mod error;
pub mod key_lock;
pub mod lifecycle;
pub mod metrics;
pub mod pipeline;
pub mod redis_store;
pub mod retry;
pub mod statistics;
pub mod store;
pub mod threshold;
pub mod types;
pub mod validator;

pub use config_file::{IngestdConfig, StoreBackend};
pub use directory::{Equipment, EquipmentDirectory, StaticDirectory};
pub use error::{
    IngestFailure, IngestdError, LifecycleError, MalformedReason, Result, RuleError, StoreError,
    ValidationError,
};
pub use key_lock::{KeyLocks, LockConfig};
pub use lifecycle::{AlertEvent, AlertManager, ApplyOutcome, LifecycleConfig, Transition};
pub use metrics::MetricsCollector;
pub use pipeline::{
    IngestPipeline, IngestReport, OutcomeRef, PipelineConfig, ProcessedReading, ReadingOutcome,
};
pub use redis_store::RedisStore;
pub use retry::RetryPolicy;
pub use statistics::{aggregate, Statistics};
pub use store::{AlertFilter, MemoryStore, PersistenceStore, ReadingQuery};
pub use threshold::{default_rule, evaluate, SeverityTier, ThresholdRule, Violation, ViolationOutcome};
pub use types::{
    Alert, AlertId, AlertKey, RawReading, RawValue, Reading, ReadingId, StoredReading,
};
pub use validator::{validate, validate_known};

pub use plantmon_types::{AlertStatus, SensorType, Severity, ThresholdDirection};
