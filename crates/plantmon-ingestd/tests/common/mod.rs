//! Shared fixtures for ingestd integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use plantmon_ingestd::{
    Alert, AlertFilter, AlertId, AlertManager, IngestPipeline, LifecycleConfig, LockConfig,
    MemoryStore, PersistenceStore, PipelineConfig, RawReading, Reading, ReadingId, ReadingQuery,
    RetryPolicy, SensorType, Severity, StaticDirectory, StoreError, StoredReading, ThresholdRule,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Memory store with injectable failures.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    /// Transient append failures still to hand out
    append_failures: AtomicU32,
    /// Transient upsert failures still to hand out
    upsert_failures: AtomicU32,
    /// Equipment whose appends always fail
    broken_equipment: Mutex<HashSet<String>>,
    fatal_upserts: Mutex<bool>,
    pub upsert_calls: AtomicU32,
}

fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn unavailable() -> StoreError {
    StoreError::Unavailable("injected outage".to_string())
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_appends(&self, n: u32) {
        self.append_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_upserts(&self, n: u32) {
        self.upsert_failures.store(n, Ordering::SeqCst);
    }

    pub fn break_equipment(&self, equipment_id: &str) {
        self.broken_equipment.lock().insert(equipment_id.to_string());
    }

    /// Every upsert fails with a non-retryable error until cleared.
    pub fn set_fatal_upserts(&self, fatal: bool) {
        *self.fatal_upserts.lock() = fatal;
    }
}

#[async_trait]
impl PersistenceStore for FlakyStore {
    async fn append_reading(&self, reading: &Reading) -> Result<ReadingId, StoreError> {
        if self.broken_equipment.lock().contains(&reading.equipment_id) {
            return Err(unavailable());
        }
        if take(&self.append_failures) {
            return Err(unavailable());
        }
        self.inner.append_reading(reading).await
    }

    async fn upsert_alert(&self, alert: &Alert) -> Result<Alert, StoreError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fatal_upserts.lock() {
            let err = serde_json::from_str::<u8>("not json").unwrap_err();
            return Err(StoreError::Serialization(err));
        }
        if take(&self.upsert_failures) {
            return Err(unavailable());
        }
        self.inner.upsert_alert(alert).await
    }

    async fn find_active_alert(
        &self,
        equipment_id: &str,
        sensor: SensorType,
    ) -> Result<Option<Alert>, StoreError> {
        self.inner.find_active_alert(equipment_id, sensor).await
    }

    async fn get_alert(&self, id: AlertId) -> Result<Option<Alert>, StoreError> {
        self.inner.get_alert(id).await
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StoreError> {
        self.inner.list_alerts(filter).await
    }

    async fn readings(&self, query: &ReadingQuery) -> Result<Vec<StoredReading>, StoreError> {
        self.inner.readings(query).await
    }

    async fn latest_readings(&self) -> Result<Vec<StoredReading>, StoreError> {
        self.inner.latest_readings().await
    }
}

/// Millisecond backoffs so failure tests stay quick.
pub fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts: attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
    }
}

pub fn fast_lifecycle() -> LifecycleConfig {
    LifecycleConfig {
        lock: LockConfig {
            timeout: Duration::from_secs(5),
            retry: fast_retry(3),
        },
        write_retry: fast_retry(3),
        event_channel_capacity: 256,
    }
}

/// PUMP-001 and PUMP-002 with warning 80 / critical 100 on temperature.
pub fn pump_directory() -> StaticDirectory {
    let directory = StaticDirectory::new();
    directory.add_equipment("PUMP-001", Some("pump"));
    directory.add_equipment("PUMP-002", Some("pump"));
    directory.set_type_rule(
        "pump",
        ThresholdRule::new(SensorType::Temperature)
            .tier(Severity::Warning, Some(80.0), Some(-10.0))
            .tier(Severity::Critical, Some(100.0), Some(-20.0)),
    );
    directory
}

pub struct Harness<S> {
    pub store: Arc<S>,
    pub alerts: Arc<AlertManager>,
    pub pipeline: Arc<IngestPipeline>,
}

pub fn harness<S: PersistenceStore + 'static>(store: S) -> Harness<S> {
    let store = Arc::new(store);
    let alerts = Arc::new(AlertManager::new(store.clone(), fast_lifecycle()));
    let config = PipelineConfig {
        append_retry: fast_retry(3),
        ..PipelineConfig::default()
    };
    let pipeline = Arc::new(IngestPipeline::new(
        Arc::new(pump_directory()),
        store.clone(),
        alerts.clone(),
        config,
    ));
    Harness {
        store,
        alerts,
        pipeline,
    }
}

/// Reading `offset_secs` after a fixed base instant.
pub fn raw_at(equipment: &str, sensor: &str, value: f64, offset_secs: i64) -> RawReading {
    let base = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
    let ts = base + ChronoDuration::seconds(offset_secs);
    RawReading::new(equipment, sensor, value, ts.to_rfc3339())
}

pub fn temp(equipment: &str, value: f64, offset_secs: i64) -> RawReading {
    raw_at(equipment, "temperature", value, offset_secs)
}
