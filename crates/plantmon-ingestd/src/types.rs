//! Reading and alert records handled by ingestd

use chrono::{DateTime, SecondsFormat, Utc};
use plantmon_types::{AlertStatus, SensorType, Severity, ThresholdDirection};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unchecked reading as it arrives from a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    #[serde(default)]
    pub equipment_id: String,
    #[serde(default)]
    pub sensor_type: String,
    #[serde(default)]
    pub value: Option<RawValue>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl RawReading {
    pub fn new(
        equipment_id: impl Into<String>,
        sensor_type: impl Into<String>,
        value: f64,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            equipment_id: equipment_id.into(),
            sensor_type: sensor_type.into(),
            value: Some(RawValue::Number(value)),
            unit: None,
            timestamp: Some(timestamp.into()),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// Reading value as sent. Producers are not trusted to send numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    /// Numeric text such as `"72.5"` is accepted
    Text(String),
    Other(serde_json::Value),
}

/// Validated reading. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub equipment_id: String,
    pub sensor_type: SensorType,
    pub value: f64,
    pub unit: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn key(&self) -> AlertKey {
        AlertKey::new(self.equipment_id.clone(), self.sensor_type)
    }

    /// Identity of the measurement itself. Resubmitting the same reading
    /// yields the same key; unit is not part of it.
    pub fn content_key(&self) -> String {
        format!(
            "{}|{}|{}|{:016x}",
            self.equipment_id,
            self.sensor_type,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.value.to_bits()
        )
    }

    /// Unit as reported, or the sensor's conventional unit.
    pub fn unit_or_default(&self) -> &str {
        self.unit
            .as_deref()
            .unwrap_or_else(|| self.sensor_type.default_unit())
    }
}

/// Store-assigned reading identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadingId(pub u64);

impl fmt::Display for ReadingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reading together with the id the store gave it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    pub id: ReadingId,
    #[serde(flatten)]
    pub reading: Reading,
}

/// Serialization key for alert state: one outstanding alert per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertKey {
    pub equipment_id: String,
    pub sensor_type: SensorType,
}

impl AlertKey {
    pub fn new(equipment_id: impl Into<String>, sensor_type: SensorType) -> Self {
        Self {
            equipment_id: equipment_id.into(),
            sensor_type,
        }
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.equipment_id, self.sensor_type)
    }
}

/// Alert identity, assigned once at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(Uuid);

impl AlertId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AlertId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Alert record. The store is the system of record; this is a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub equipment_id: String,
    pub sensor_type: SensorType,
    pub severity: Severity,
    pub message: String,
    pub status: AlertStatus,
    /// Reading value that raised or last escalated the alert
    pub value: f64,
    /// Bound that value crossed
    pub threshold: f64,
    pub direction: ThresholdDirection,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// `None` on a resolved alert means it was closed by an in-range reading
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn key(&self) -> AlertKey {
        AlertKey::new(self.equipment_id.clone(), self.sensor_type)
    }

    pub fn is_outstanding(&self) -> bool {
        self.status.is_outstanding()
    }
}
