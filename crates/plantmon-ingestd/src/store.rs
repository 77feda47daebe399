//! Persistence store interface and the in-memory backend
//!
//! The store is the system of record for alerts. Lifecycle decisions re-read
//! it under the key lock instead of trusting any cached copy.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-9: Protection of Audit Information - Readings are append-only
//! - AU-11: Audit Record Retention - Alerts are never deleted

use crate::error::StoreError;
use crate::types::{Alert, AlertId, AlertKey, Reading, ReadingId, StoredReading};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use plantmon_types::{AlertStatus, SensorType, Severity};
use std::collections::HashMap;

#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Store a reading. Idempotent by [`Reading::content_key`]: a reading
    /// already stored returns its existing id and writes nothing.
    async fn append_reading(&self, reading: &Reading) -> Result<ReadingId, StoreError>;

    /// Insert or replace by id; returns the stored record.
    async fn upsert_alert(&self, alert: &Alert) -> Result<Alert, StoreError>;

    /// The outstanding (active or acknowledged) alert for a key.
    async fn find_active_alert(
        &self,
        equipment_id: &str,
        sensor: SensorType,
    ) -> Result<Option<Alert>, StoreError>;

    async fn get_alert(&self, id: AlertId) -> Result<Option<Alert>, StoreError>;

    /// Matching alerts, most severe first, newest first within a severity.
    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StoreError>;

    /// Matching readings, newest first.
    async fn readings(&self, query: &ReadingQuery) -> Result<Vec<StoredReading>, StoreError>;

    /// Most recent reading of every equipment, by reading timestamp.
    async fn latest_readings(&self) -> Result<Vec<StoredReading>, StoreError>;
}

/// Alert selection criteria. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertFilter {
    pub equipment_id: Option<String>,
    pub sensor_type: Option<SensorType>,
    pub severity: Option<Severity>,
    pub status: Option<AlertStatus>,
    pub outstanding_only: bool,
    pub limit: Option<usize>,
}

impl AlertFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn outstanding() -> Self {
        Self {
            outstanding_only: true,
            ..Self::default()
        }
    }

    pub fn equipment(mut self, equipment_id: impl Into<String>) -> Self {
        self.equipment_id = Some(equipment_id.into());
        self
    }

    pub fn sensor(mut self, sensor: SensorType) -> Self {
        self.sensor_type = Some(sensor);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn status(mut self, status: AlertStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        self.equipment_id
            .as_deref()
            .map_or(true, |id| alert.equipment_id == id)
            && self.sensor_type.map_or(true, |s| alert.sensor_type == s)
            && self.severity.map_or(true, |s| alert.severity == s)
            && self.status.map_or(true, |s| alert.status == s)
            && (!self.outstanding_only || alert.is_outstanding())
    }

    /// Filter, order and truncate a candidate set.
    pub fn apply(&self, alerts: impl IntoIterator<Item = Alert>) -> Vec<Alert> {
        let mut selected: Vec<Alert> = alerts.into_iter().filter(|a| self.matches(a)).collect();
        sort_alerts(&mut selected);
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

/// Severity descending, then creation time descending.
pub fn sort_alerts(alerts: &mut [Alert]) {
    alerts.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}

/// Reading selection criteria. The time range is inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingQuery {
    pub equipment_id: Option<String>,
    pub sensor_type: Option<SensorType>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ReadingQuery {
    pub fn equipment(equipment_id: impl Into<String>) -> Self {
        Self {
            equipment_id: Some(equipment_id.into()),
            ..Self::default()
        }
    }

    pub fn sensor(mut self, sensor: SensorType) -> Self {
        self.sensor_type = Some(sensor);
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, reading: &Reading) -> bool {
        self.equipment_id
            .as_deref()
            .map_or(true, |id| reading.equipment_id == id)
            && self.sensor_type.map_or(true, |s| reading.sensor_type == s)
            && self.start.map_or(true, |start| reading.timestamp >= start)
            && self.end.map_or(true, |end| reading.timestamp <= end)
    }

    pub fn apply(&self, readings: impl IntoIterator<Item = StoredReading>) -> Vec<StoredReading> {
        let mut selected: Vec<StoredReading> = readings
            .into_iter()
            .filter(|r| self.matches(&r.reading))
            .collect();
        sort_readings(&mut selected);
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

/// Timestamp descending; ties broken by id so arrival order is stable.
pub fn sort_readings(readings: &mut [StoredReading]) {
    readings.sort_by(|a, b| {
        b.reading
            .timestamp
            .cmp(&a.reading.timestamp)
            .then_with(|| b.id.cmp(&a.id))
    });
}

#[derive(Default)]
struct MemoryState {
    next_reading_id: u64,
    readings: Vec<StoredReading>,
    by_content: HashMap<String, ReadingId>,
    alerts: HashMap<AlertId, Alert>,
    outstanding: HashMap<AlertKey, AlertId>,
}

/// Process-local store. Enforces the one-outstanding-alert-per-key rule itself.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reading_count(&self) -> usize {
        self.state.lock().readings.len()
    }

    pub fn alert_count(&self) -> usize {
        self.state.lock().alerts.len()
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn append_reading(&self, reading: &Reading) -> Result<ReadingId, StoreError> {
        let mut state = self.state.lock();
        let content_key = reading.content_key();
        if let Some(existing) = state.by_content.get(&content_key) {
            return Ok(*existing);
        }
        state.next_reading_id += 1;
        let id = ReadingId(state.next_reading_id);
        state.by_content.insert(content_key, id);
        state.readings.push(StoredReading {
            id,
            reading: reading.clone(),
        });
        Ok(id)
    }

    async fn upsert_alert(&self, alert: &Alert) -> Result<Alert, StoreError> {
        let mut state = self.state.lock();
        let key = alert.key();

        match state.outstanding.get(&key).copied() {
            Some(existing) if existing != alert.id && alert.is_outstanding() => {
                return Err(StoreError::Conflict {
                    key: key.to_string(),
                    existing,
                });
            }
            Some(existing) if existing == alert.id && !alert.is_outstanding() => {
                state.outstanding.remove(&key);
            }
            None if alert.is_outstanding() => {
                state.outstanding.insert(key, alert.id);
            }
            _ => {}
        }

        state.alerts.insert(alert.id, alert.clone());
        Ok(alert.clone())
    }

    async fn find_active_alert(
        &self,
        equipment_id: &str,
        sensor: SensorType,
    ) -> Result<Option<Alert>, StoreError> {
        let state = self.state.lock();
        let key = AlertKey::new(equipment_id, sensor);
        Ok(state
            .outstanding
            .get(&key)
            .and_then(|id| state.alerts.get(id))
            .cloned())
    }

    async fn get_alert(&self, id: AlertId) -> Result<Option<Alert>, StoreError> {
        Ok(self.state.lock().alerts.get(&id).cloned())
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StoreError> {
        let state = self.state.lock();
        Ok(filter.apply(state.alerts.values().cloned()))
    }

    async fn readings(&self, query: &ReadingQuery) -> Result<Vec<StoredReading>, StoreError> {
        let state = self.state.lock();
        Ok(query.apply(state.readings.iter().cloned()))
    }

    async fn latest_readings(&self) -> Result<Vec<StoredReading>, StoreError> {
        let state = self.state.lock();
        let mut latest: HashMap<&str, &StoredReading> = HashMap::new();
        for stored in &state.readings {
            latest
                .entry(stored.reading.equipment_id.as_str())
                .and_modify(|current| {
                    if stored.reading.timestamp >= current.reading.timestamp {
                        *current = stored;
                    }
                })
                .or_insert(stored);
        }
        let mut result: Vec<StoredReading> = latest.into_values().cloned().collect();
        result.sort_by(|a, b| a.reading.equipment_id.cmp(&b.reading.equipment_id));
        Ok(result)
    }
}
