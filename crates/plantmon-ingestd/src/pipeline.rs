//! Ingestion pipeline
//!
//! Per reading: validate, append, look up the rule, evaluate, apply the alert
//! transition. A batch is split by (equipment, sensor) key; readings of one key
//! run in arrival order, different keys run concurrently. One bad reading never
//! fails the batch.

use crate::directory::EquipmentDirectory;
use crate::error::{IngestFailure, LifecycleError, StoreError, ValidationError};
use crate::lifecycle::{AlertManager, ApplyOutcome};
use crate::metrics::MetricsCollector;
use crate::retry::RetryPolicy;
use crate::statistics::{aggregate, Accumulator, Statistics};
use crate::store::{PersistenceStore, ReadingQuery};
use crate::threshold::evaluate;
use crate::types::{Alert, AlertId, AlertKey, RawReading, Reading, ReadingId, StoredReading};
use crate::validator::{validate, validate_known};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use plantmon_types::SensorType;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Pipeline settings
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Keys processed at the same time within one batch
    pub max_concurrent_keys: usize,
    /// Reject readings for equipment the directory does not know
    pub require_known_equipment: bool,
    pub append_retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_keys: 32,
            require_known_equipment: false,
            append_retry: RetryPolicy::default(),
        }
    }
}

/// A valid reading that went all the way through.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedReading {
    pub reading_id: ReadingId,
    pub key: AlertKey,
    pub alert: ApplyOutcome,
}

/// Result of a single submission.
#[derive(Debug)]
pub enum ReadingOutcome {
    Rejected(ValidationError),
    Failed(IngestFailure),
    Processed(ProcessedReading),
}

/// Borrowed view of what happened to one input reading.
#[derive(Debug, Clone, Copy)]
pub enum OutcomeRef<'a> {
    Rejected(&'a ValidationError),
    Failed(&'a IngestFailure),
    Processed(&'a ProcessedReading),
}

/// Per-batch accounting. Every input index lands in exactly one of
/// `rejected`, `failed` or `processed`.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Readings validated and stored
    pub accepted: usize,
    pub rejected: Vec<(usize, ValidationError)>,
    pub failed: Vec<(usize, IngestFailure)>,
    pub processed: Vec<(usize, ProcessedReading)>,
    /// Summary of the batch's valid readings per key
    pub statistics: BTreeMap<AlertKey, Statistics>,
}

impl IngestReport {
    pub fn total(&self) -> usize {
        self.rejected.len() + self.failed.len() + self.processed.len()
    }

    /// One entry per input reading, in input order.
    pub fn outcomes(&self) -> Vec<(usize, OutcomeRef<'_>)> {
        let mut all: Vec<_> = self
            .rejected
            .iter()
            .map(|(i, e)| (*i, OutcomeRef::Rejected(e)))
            .chain(self.failed.iter().map(|(i, f)| (*i, OutcomeRef::Failed(f))))
            .chain(self.processed.iter().map(|(i, p)| (*i, OutcomeRef::Processed(p))))
            .collect();
        all.sort_by_key(|(i, _)| *i);
        all
    }

    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty() && self.failed.is_empty()
    }

    /// Alerts written by this batch, in input order.
    pub fn alerts(&self) -> impl Iterator<Item = &Alert> {
        self.processed.iter().filter_map(|(_, p)| p.alert.alert())
    }

    pub fn raised(&self) -> usize {
        self.count(|o| matches!(o, ApplyOutcome::Raised(_)))
    }

    pub fn escalated(&self) -> usize {
        self.count(|o| matches!(o, ApplyOutcome::Escalated { .. }))
    }

    pub fn resolved(&self) -> usize {
        self.count(|o| matches!(o, ApplyOutcome::AutoResolved(_)))
    }

    fn count(&self, pred: impl Fn(&ApplyOutcome) -> bool) -> usize {
        self.processed.iter().filter(|(_, p)| pred(&p.alert)).count()
    }
}

pub struct IngestPipeline {
    directory: Arc<dyn EquipmentDirectory>,
    store: Arc<dyn PersistenceStore>,
    alerts: Arc<AlertManager>,
    config: PipelineConfig,
    metrics: Option<MetricsCollector>,
}

impl IngestPipeline {
    pub fn new(
        directory: Arc<dyn EquipmentDirectory>,
        store: Arc<dyn PersistenceStore>,
        alerts: Arc<AlertManager>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            directory,
            store,
            alerts,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    fn check(&self, raw: &RawReading) -> Result<Reading, ValidationError> {
        if self.config.require_known_equipment {
            validate_known(raw, self.directory.as_ref())
        } else {
            validate(raw)
        }
    }

    /// Ingest one reading outside of a batch.
    pub async fn ingest_one(&self, raw: &RawReading) -> ReadingOutcome {
        let outcome = match self.check(raw) {
            Ok(reading) => match self.process(&reading).await {
                Ok(processed) => ReadingOutcome::Processed(processed),
                Err(failure) => {
                    warn!(error = %failure, "Reading failed");
                    ReadingOutcome::Failed(failure)
                }
            },
            Err(e) => {
                debug!(error = %e, "Reading rejected");
                ReadingOutcome::Rejected(e)
            }
        };

        if let Some(metrics) = &self.metrics {
            // Same accounting as a batch: stored-then-failed counts as accepted
            match &outcome {
                ReadingOutcome::Processed(_) => metrics.record_readings(1, 0, 0),
                ReadingOutcome::Rejected(_) => metrics.record_readings(0, 1, 0),
                ReadingOutcome::Failed(IngestFailure::Lifecycle(_)) => {
                    metrics.record_readings(1, 0, 1)
                }
                ReadingOutcome::Failed(_) => metrics.record_readings(0, 0, 1),
            }
        }
        outcome
    }

    /// Ingest a batch. Committed work stays committed if the caller stops
    /// waiting part way through.
    pub async fn ingest(&self, batch: &[RawReading]) -> IngestReport {
        let started = Instant::now();
        let mut report = IngestReport::default();

        let mut groups: BTreeMap<AlertKey, Vec<(usize, Reading)>> = BTreeMap::new();
        let mut accumulators: BTreeMap<AlertKey, Accumulator> = BTreeMap::new();
        for (index, raw) in batch.iter().enumerate() {
            match self.check(raw) {
                Ok(reading) => {
                    let key = reading.key();
                    accumulators.entry(key.clone()).or_default().push(reading.value);
                    groups.entry(key).or_default().push((index, reading));
                }
                Err(e) => {
                    debug!(index, error = %e, "Reading rejected");
                    report.rejected.push((index, e));
                }
            }
        }
        report.statistics = accumulators
            .into_iter()
            .map(|(key, acc)| (key, acc.finish()))
            .collect();

        let results: Vec<Vec<(usize, Result<ProcessedReading, IngestFailure>)>> =
            stream::iter(groups.into_values())
                .map(|group| self.process_group(group))
                .buffer_unordered(self.config.max_concurrent_keys.max(1))
                .collect()
                .await;

        for (index, result) in results.into_iter().flatten() {
            match result {
                Ok(processed) => report.processed.push((index, processed)),
                Err(failure) => {
                    warn!(index, error = %failure, "Reading failed");
                    report.failed.push((index, failure));
                }
            }
        }
        report.processed.sort_by_key(|(index, _)| *index);
        report.failed.sort_by_key(|(index, _)| *index);
        report.accepted = report.processed.len()
            + report
                .failed
                .iter()
                .filter(|(_, f)| matches!(f, IngestFailure::Lifecycle(_)))
                .count();

        self.alerts.locks().prune();

        if let Some(metrics) = &self.metrics {
            metrics.record_batch(
                batch.len(),
                report.accepted,
                report.rejected.len(),
                report.failed.len(),
            );
            metrics.observe_batch_latency(started.elapsed().as_secs_f64());
        }

        info!(
            size = batch.len(),
            accepted = report.accepted,
            rejected = report.rejected.len(),
            failed = report.failed.len(),
            raised = report.raised(),
            escalated = report.escalated(),
            resolved = report.resolved(),
            "Batch ingested"
        );
        report
    }

    /// Readings of one key, strictly in arrival order.
    async fn process_group(
        &self,
        group: Vec<(usize, Reading)>,
    ) -> Vec<(usize, Result<ProcessedReading, IngestFailure>)> {
        let mut results = Vec::with_capacity(group.len());
        for (index, reading) in group {
            results.push((index, self.process(&reading).await));
        }
        results
    }

    async fn process(&self, reading: &Reading) -> Result<ProcessedReading, IngestFailure> {
        let store = &self.store;
        let reading_id = self
            .config
            .append_retry
            .run("append_reading", move || store.append_reading(reading))
            .await
            .map_err(|e| {
                if let Some(metrics) = &self.metrics {
                    metrics.record_store_error();
                }
                IngestFailure::Persistence(e)
            })?;

        let rule = self
            .directory
            .threshold_rule(&reading.equipment_id, reading.sensor_type);
        let outcome = evaluate(reading, rule.as_ref());
        let alert = self
            .alerts
            .apply(reading, &outcome)
            .await
            .map_err(IngestFailure::Lifecycle)?;

        Ok(ProcessedReading {
            reading_id,
            key: reading.key(),
            alert,
        })
    }

    /// Statistics over stored readings of one key, optionally within a window.
    pub async fn equipment_statistics(
        &self,
        equipment_id: &str,
        sensor: SensorType,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Statistics, StoreError> {
        let query = ReadingQuery {
            start,
            end,
            ..ReadingQuery::equipment(equipment_id).sensor(sensor)
        };
        let stored = self.store.readings(&query).await?;
        Ok(aggregate(stored.iter().map(|s| &s.reading)))
    }

    pub async fn history(&self, query: &ReadingQuery) -> Result<Vec<StoredReading>, StoreError> {
        self.store.readings(query).await
    }

    pub async fn latest_readings(&self) -> Result<Vec<StoredReading>, StoreError> {
        self.store.latest_readings().await
    }

    pub async fn acknowledge(&self, id: AlertId, user: &str) -> Result<Alert, LifecycleError> {
        self.alerts.acknowledge(id, user).await
    }

    pub async fn resolve(&self, id: AlertId, user: &str) -> Result<Alert, LifecycleError> {
        self.alerts.resolve(id, user).await
    }
}
