//! Configuration file support for ingestd
//!
//! Loads and validates ingestd configuration from TOML files.
//! Default location: /etc/plantmon/ingestd.toml

use crate::directory::{Equipment, StaticDirectory};
use crate::error::{IngestdError, Result};
use crate::key_lock::LockConfig;
use crate::lifecycle::LifecycleConfig;
use crate::pipeline::PipelineConfig;
use crate::retry::RetryPolicy;
use crate::threshold::{SeverityTier, ThresholdRule};
use plantmon_types::SensorType;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Which persistence backend to run against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis host
    #[serde(default = "default_redis_host")]
    pub redis_host: String,

    /// Redis port
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    /// Redis database number
    #[serde(default = "default_redis_db")]
    pub redis_db: i64,

    /// Prefix for every key written
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

/// Alert lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleSection {
    /// Wait per key lock attempt in milliseconds
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,

    #[serde(default = "default_max_lock_attempts")]
    pub max_lock_attempts: u32,

    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,

    /// First retry delay in milliseconds, doubled per attempt
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

/// Batch processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_max_concurrent_keys")]
    pub max_concurrent_keys: usize,

    #[serde(default)]
    pub require_known_equipment: bool,

    /// Readings per batch when reading from a stream
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

/// Threshold rule as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Applies to one equipment
    #[serde(default)]
    pub equipment_id: Option<String>,
    /// Applies to every equipment of this type
    #[serde(default)]
    pub equipment_type: Option<String>,
    pub sensor_type: SensorType,
    pub tiers: Vec<SeverityTier>,
}

/// Equipment directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Fall back to the built-in per-sensor rules
    #[serde(default = "default_use_default_rules")]
    pub use_default_rules: bool,

    #[serde(default)]
    pub equipment: Vec<Equipment>,

    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// Complete ingestd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestdConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub lifecycle: LifecycleSection,

    #[serde(default)]
    pub pipeline: PipelineSection,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub directory: DirectoryConfig,
}

// Default functions
fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_redis_db() -> i64 {
    0
}

fn default_key_prefix() -> String {
    "plantmon".to_string()
}

fn default_lock_timeout() -> u64 {
    2000
}

fn default_max_lock_attempts() -> u32 {
    5
}

fn default_max_write_attempts() -> u32 {
    5
}

fn default_retry_backoff() -> u64 {
    100
}

fn default_max_backoff() -> u64 {
    2000
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_max_concurrent_keys() -> usize {
    32
}

fn default_batch_size() -> usize {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_use_default_rules() -> bool {
    true
}

// Default implementations
impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
            redis_db: default_redis_db(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for LifecycleSection {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout(),
            max_lock_attempts: default_max_lock_attempts(),
            max_write_attempts: default_max_write_attempts(),
            retry_backoff_ms: default_retry_backoff(),
            max_backoff_ms: default_max_backoff(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_concurrent_keys: default_max_concurrent_keys(),
            require_known_equipment: false,
            batch_size: default_batch_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            use_default_rules: default_use_default_rules(),
            equipment: Vec::new(),
            rules: Vec::new(),
        }
    }
}

impl IngestdConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config: Self = toml::from_str(&content).map_err(|e| {
                    IngestdError::Configuration(format!(
                        "Failed to parse config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Logging is configured from this file, so it is not up yet
                eprintln!(
                    "ingestd: Config file {} not found, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(IngestdError::Io(e)),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            IngestdError::Configuration(format!("Failed to serialize config: {}", e))
        })?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lifecycle.lock_timeout_ms)
    }

    fn retry_policy(&self, max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(self.lifecycle.retry_backoff_ms),
            max_backoff: Duration::from_millis(self.lifecycle.max_backoff_ms),
        }
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            lock: LockConfig {
                timeout: self.lock_timeout(),
                retry: self.retry_policy(self.lifecycle.max_lock_attempts),
            },
            write_retry: self.retry_policy(self.lifecycle.max_write_attempts),
            event_channel_capacity: self.lifecycle.event_channel_capacity,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_concurrent_keys: self.pipeline.max_concurrent_keys,
            require_known_equipment: self.pipeline.require_known_equipment,
            append_retry: self.retry_policy(self.lifecycle.max_write_attempts),
        }
    }

    /// Build the equipment directory described by `[directory]`.
    pub fn build_directory(&self) -> Result<StaticDirectory> {
        let directory = if self.directory.use_default_rules {
            StaticDirectory::with_default_rules()
        } else {
            StaticDirectory::new()
        };

        for equipment in &self.directory.equipment {
            directory.register(equipment.clone());
        }

        for rule_config in &self.directory.rules {
            let rule = ThresholdRule::with_tiers(rule_config.sensor_type, rule_config.tiers.clone())
                .map_err(|source| IngestdError::Rule {
                    sensor: rule_config.sensor_type.to_string(),
                    source,
                })?;
            match (&rule_config.equipment_id, &rule_config.equipment_type) {
                (Some(id), _) => directory.set_equipment_rule(id.clone(), rule),
                (None, Some(kind)) => directory.set_type_rule(kind.clone(), rule),
                (None, None) => directory.set_default_rule(rule),
            }
        }

        Ok(directory)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.store.backend == StoreBackend::Redis && self.store.redis_port == 0 {
            return Err(IngestdError::Configuration(
                "redis_port must be > 0".to_string(),
            ));
        }

        if self.store.key_prefix.is_empty() {
            return Err(IngestdError::Configuration(
                "key_prefix must not be empty".to_string(),
            ));
        }

        if self.lifecycle.max_lock_attempts == 0 || self.lifecycle.max_write_attempts == 0 {
            return Err(IngestdError::Configuration(
                "max_lock_attempts and max_write_attempts must be > 0".to_string(),
            ));
        }

        if self.lifecycle.lock_timeout_ms == 0 {
            return Err(IngestdError::Configuration(
                "lock_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.lifecycle.event_channel_capacity == 0 {
            return Err(IngestdError::Configuration(
                "event_channel_capacity must be > 0".to_string(),
            ));
        }

        if self.pipeline.max_concurrent_keys == 0 || self.pipeline.batch_size == 0 {
            return Err(IngestdError::Configuration(
                "max_concurrent_keys and batch_size must be > 0".to_string(),
            ));
        }

        for rule in &self.directory.rules {
            if rule.equipment_id.is_some() && rule.equipment_type.is_some() {
                return Err(IngestdError::Configuration(format!(
                    "rule for {} sets both equipment_id and equipment_type",
                    rule.sensor_type
                )));
            }
        }

        Ok(())
    }
}
