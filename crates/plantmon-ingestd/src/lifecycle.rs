//! Alert lifecycle manager
//!
//! Turns threshold outcomes into alert records. Per (equipment, sensor) key:
//!
//! ```text
//!  none ──violation──▶ active ──ack──▶ acknowledged
//!                        │  ▲               │
//!                        │  └─ escalate ────┤ (severity only rises)
//!                        ▼                  ▼
//!                     resolved ◀── in-range reading / operator
//! ```
//!
//! The store is re-read under the key lock for every transition and events go
//! out only after the write is confirmed.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-12: Audit Record Generation - Every transition is logged and published
//! - IR-4: Incident Handling - Alerts raised on threshold violations
//! - IR-5: Incident Monitoring - Acknowledgment records the operator

use crate::error::{LifecycleError, StoreError};
use crate::key_lock::{KeyGuard, KeyLocks, LockConfig};
use crate::metrics::MetricsCollector;
use crate::retry::RetryPolicy;
use crate::store::{AlertFilter, PersistenceStore};
use crate::threshold::{Violation, ViolationOutcome};
use crate::types::{Alert, AlertId, AlertKey, Reading};
use chrono::Utc;
use plantmon_types::{AlertStatus, Severity, ThresholdDirection};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Committed change to an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    Raised,
    Escalated { from: Severity },
    Acknowledged,
    /// `automatic` when closed by an in-range reading
    Resolved { automatic: bool },
}

impl Transition {
    pub const fn label(&self) -> &'static str {
        match self {
            Transition::Raised => "raised",
            Transition::Escalated { .. } => "escalated",
            Transition::Acknowledged => "acknowledged",
            Transition::Resolved { automatic: true } => "auto_resolved",
            Transition::Resolved { automatic: false } => "resolved",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Notification published after every committed transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub transition: Transition,
    pub alert: Alert,
}

/// What applying one evaluation outcome did.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// Nothing to do: no rule, or in range with nothing outstanding
    Unchanged,
    Raised(Alert),
    Escalated { from: Severity, alert: Alert },
    /// Violation at or below the outstanding severity
    Absorbed(AlertId),
    AutoResolved(Alert),
}

impl ApplyOutcome {
    /// Alert written by this outcome, if any.
    pub fn alert(&self) -> Option<&Alert> {
        match self {
            ApplyOutcome::Raised(alert)
            | ApplyOutcome::Escalated { alert, .. }
            | ApplyOutcome::AutoResolved(alert) => Some(alert),
            ApplyOutcome::Unchanged | ApplyOutcome::Absorbed(_) => None,
        }
    }
}

/// Lifecycle settings
#[derive(Debug, Clone, Copy)]
pub struct LifecycleConfig {
    pub lock: LockConfig,
    pub write_retry: RetryPolicy,
    pub event_channel_capacity: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            lock: LockConfig::default(),
            write_retry: RetryPolicy::default(),
            event_channel_capacity: 1024,
        }
    }
}

pub struct AlertManager {
    store: Arc<dyn PersistenceStore>,
    locks: KeyLocks,
    write_retry: RetryPolicy,
    events: broadcast::Sender<AlertEvent>,
    metrics: Option<MetricsCollector>,
}

impl AlertManager {
    pub fn new(store: Arc<dyn PersistenceStore>, config: LifecycleConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            store,
            locks: KeyLocks::new(config.lock),
            write_retry: config.write_retry,
            events,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Receive every committed transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.events.subscribe()
    }

    pub fn locks(&self) -> &KeyLocks {
        &self.locks
    }

    /// Apply an evaluation outcome for `reading` to its key's alert state.
    pub async fn apply(
        &self,
        reading: &Reading,
        outcome: &ViolationOutcome,
    ) -> Result<ApplyOutcome, LifecycleError> {
        match outcome {
            ViolationOutcome::NoRule => Ok(ApplyOutcome::Unchanged),
            ViolationOutcome::InRange => self.auto_resolve(reading).await,
            ViolationOutcome::Violation(violation) => self.raise_or_escalate(reading, violation).await,
        }
    }

    async fn raise_or_escalate(
        &self,
        reading: &Reading,
        violation: &Violation,
    ) -> Result<ApplyOutcome, LifecycleError> {
        let key = reading.key();
        let _guard = self.lock(&key).await?;
        let now = Utc::now();

        match self.find_outstanding(&key).await? {
            None => {
                let alert = Alert {
                    id: AlertId::new(),
                    equipment_id: reading.equipment_id.clone(),
                    sensor_type: reading.sensor_type,
                    severity: violation.severity,
                    message: violation_message(reading, violation),
                    status: AlertStatus::Active,
                    value: reading.value,
                    threshold: violation.threshold,
                    direction: violation.direction,
                    created_at: now,
                    updated_at: now,
                    acknowledged_by: None,
                    acknowledged_at: None,
                    resolved_by: None,
                    resolved_at: None,
                };
                let alert = self.write(&alert).await?;
                if alert.severity >= Severity::Critical {
                    error!(%key, alert_id = %alert.id, severity = %alert.severity, value = reading.value, "Alert raised");
                } else {
                    warn!(%key, alert_id = %alert.id, severity = %alert.severity, value = reading.value, "Alert raised");
                }
                self.publish(Transition::Raised, &alert);
                Ok(ApplyOutcome::Raised(alert))
            }
            Some(mut alert) if violation.severity > alert.severity => {
                let from = alert.severity;
                alert.severity = violation.severity;
                alert.message = violation_message(reading, violation);
                alert.value = reading.value;
                alert.threshold = violation.threshold;
                alert.direction = violation.direction;
                alert.updated_at = now;
                let alert = self.write(&alert).await?;
                warn!(%key, alert_id = %alert.id, from = %from, to = %alert.severity, "Alert escalated");
                self.publish(Transition::Escalated { from }, &alert);
                Ok(ApplyOutcome::Escalated { from, alert })
            }
            Some(alert) => {
                debug!(
                    %key,
                    alert_id = %alert.id,
                    outstanding = %alert.severity,
                    incoming = %violation.severity,
                    "Violation absorbed by outstanding alert"
                );
                Ok(ApplyOutcome::Absorbed(alert.id))
            }
        }
    }

    async fn auto_resolve(&self, reading: &Reading) -> Result<ApplyOutcome, LifecycleError> {
        let key = reading.key();
        let _guard = self.lock(&key).await?;

        let Some(mut alert) = self.find_outstanding(&key).await? else {
            return Ok(ApplyOutcome::Unchanged);
        };

        let now = Utc::now();
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(now);
        alert.resolved_by = None;
        alert.updated_at = now;
        let alert = self.write(&alert).await?;

        info!(%key, alert_id = %alert.id, value = reading.value, "Alert auto-resolved");
        self.publish(Transition::Resolved { automatic: true }, &alert);
        Ok(ApplyOutcome::AutoResolved(alert))
    }

    /// Operator acknowledgment. Severity and message are left untouched.
    pub async fn acknowledge(&self, id: AlertId, user: &str) -> Result<Alert, LifecycleError> {
        let user = operator(user)?;
        let key = self.get(id).await?.key();
        let _guard = self.lock(&key).await?;

        let mut alert = self.get(id).await?;
        match alert.status {
            AlertStatus::Acknowledged => return Err(LifecycleError::AlreadyAcknowledged(id)),
            AlertStatus::Resolved => return Err(LifecycleError::AlreadyResolved(id)),
            AlertStatus::Active => {}
        }

        let now = Utc::now();
        alert.status = AlertStatus::Acknowledged;
        alert.acknowledged_by = Some(user.to_string());
        alert.acknowledged_at = Some(now);
        alert.updated_at = now;
        let alert = self.write(&alert).await?;

        info!(%key, alert_id = %id, user, "Alert acknowledged");
        self.publish(Transition::Acknowledged, &alert);
        Ok(alert)
    }

    /// Operator resolution of an active or acknowledged alert.
    pub async fn resolve(&self, id: AlertId, user: &str) -> Result<Alert, LifecycleError> {
        let user = operator(user)?;
        let key = self.get(id).await?.key();
        let _guard = self.lock(&key).await?;

        let mut alert = self.get(id).await?;
        if alert.status.is_resolved() {
            return Err(LifecycleError::AlreadyResolved(id));
        }

        let now = Utc::now();
        alert.status = AlertStatus::Resolved;
        alert.resolved_by = Some(user.to_string());
        alert.resolved_at = Some(now);
        alert.updated_at = now;
        let alert = self.write(&alert).await?;

        info!(%key, alert_id = %id, user, "Alert resolved");
        self.publish(Transition::Resolved { automatic: false }, &alert);
        Ok(alert)
    }

    pub async fn get(&self, id: AlertId) -> Result<Alert, LifecycleError> {
        self.store
            .get_alert(id)
            .await
            .map_err(|e| self.persistence_error("get_alert", e))?
            .ok_or(LifecycleError::NotFound(id))
    }

    /// Outstanding alerts, most severe and newest first.
    pub async fn active_alerts(&self) -> Result<Vec<Alert>, LifecycleError> {
        self.list(&AlertFilter::outstanding()).await
    }

    pub async fn alerts_for_equipment(&self, equipment_id: &str) -> Result<Vec<Alert>, LifecycleError> {
        self.list(&AlertFilter::all().equipment(equipment_id)).await
    }

    pub async fn list(&self, filter: &AlertFilter) -> Result<Vec<Alert>, LifecycleError> {
        self.store
            .list_alerts(filter)
            .await
            .map_err(|e| self.persistence_error("list_alerts", e))
    }

    async fn lock(&self, key: &AlertKey) -> Result<KeyGuard, LifecycleError> {
        self.locks.acquire(key).await.inspect_err(|_| {
            if let Some(metrics) = &self.metrics {
                metrics.record_lock_conflict();
            }
        })
    }

    async fn find_outstanding(&self, key: &AlertKey) -> Result<Option<Alert>, LifecycleError> {
        let store = &self.store;
        self.write_retry
            .run("find_active_alert", move || {
                store.find_active_alert(&key.equipment_id, key.sensor_type)
            })
            .await
            .map_err(|e| self.persistence_error("find_active_alert", e))
    }

    async fn write(&self, alert: &Alert) -> Result<Alert, LifecycleError> {
        let store = &self.store;
        self.write_retry
            .run("upsert_alert", move || store.upsert_alert(alert))
            .await
            .map_err(|e| self.persistence_error("upsert_alert", e))
    }

    fn persistence_error(&self, operation: &'static str, e: StoreError) -> LifecycleError {
        if let Some(metrics) = &self.metrics {
            metrics.record_store_error();
        }
        LifecycleError::persistence(operation, e)
    }

    fn publish(&self, transition: Transition, alert: &Alert) {
        if let Some(metrics) = &self.metrics {
            metrics.record_transition(transition.label());
        }
        // No subscribers is not an error
        let _ = self.events.send(AlertEvent {
            transition,
            alert: alert.clone(),
        });
    }
}

fn operator(user: &str) -> Result<&str, LifecycleError> {
    let user = user.trim();
    if user.is_empty() {
        return Err(LifecycleError::MissingOperator);
    }
    Ok(user)
}

fn violation_message(reading: &Reading, violation: &Violation) -> String {
    let relation = match violation.direction {
        ThresholdDirection::Above => "exceeds maximum",
        ThresholdDirection::Below => "below minimum",
    };
    format!(
        "{} reading {} {} threshold {}",
        reading.sensor_type, reading.value, relation, violation.threshold
    )
}
