//! End-to-end alert lifecycle scenarios through the ingestion pipeline

mod common;

use common::{harness, temp};
use plantmon_ingestd::{
    AlertStatus, ApplyOutcome, LifecycleError, MemoryStore, PersistenceStore, ReadingOutcome,
    SensorType, Severity, ThresholdDirection, Transition,
};
use pretty_assertions::assert_eq;

fn processed(outcome: ReadingOutcome) -> ApplyOutcome {
    match outcome {
        ReadingOutcome::Processed(p) => p.alert,
        other => panic!("expected processed reading, got {other:?}"),
    }
}

#[tokio::test]
async fn test_raise_escalate_auto_resolve() {
    let h = harness(MemoryStore::new());
    let mut events = h.alerts.subscribe();

    let raised = processed(h.pipeline.ingest_one(&temp("PUMP-001", 85.0, 0)).await);
    let ApplyOutcome::Raised(alert) = raised else {
        panic!("expected raise, got {raised:?}");
    };
    assert_eq!(alert.severity, Severity::Warning);
    assert_eq!(alert.threshold, 80.0);
    assert_eq!(alert.direction, ThresholdDirection::Above);
    assert_eq!(alert.status, AlertStatus::Active);

    let escalated = processed(h.pipeline.ingest_one(&temp("PUMP-001", 105.0, 10)).await);
    match escalated {
        ApplyOutcome::Escalated { from, alert: updated } => {
            assert_eq!(from, Severity::Warning);
            assert_eq!(updated.id, alert.id);
            assert_eq!(updated.severity, Severity::Critical);
            assert_eq!(updated.value, 105.0);
        }
        other => panic!("expected escalation, got {other:?}"),
    }

    let resolved = processed(h.pipeline.ingest_one(&temp("PUMP-001", 70.0, 20)).await);
    match resolved {
        ApplyOutcome::AutoResolved(closed) => {
            assert_eq!(closed.id, alert.id);
            assert_eq!(closed.status, AlertStatus::Resolved);
            assert!(closed.resolved_by.is_none());
            assert!(closed.resolved_at.is_some());
        }
        other => panic!("expected auto-resolve, got {other:?}"),
    }

    // One alert row for the whole episode
    assert_eq!(h.store.alert_count(), 1);
    assert_eq!(h.store.reading_count(), 3);

    let transitions: Vec<Transition> = (0..3)
        .map(|_| events.try_recv().unwrap().transition)
        .collect();
    assert_eq!(
        transitions,
        vec![
            Transition::Raised,
            Transition::Escalated {
                from: Severity::Warning
            },
            Transition::Resolved { automatic: true },
        ]
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_in_range_without_alert_is_unchanged() {
    let h = harness(MemoryStore::new());
    let outcome = processed(h.pipeline.ingest_one(&temp("PUMP-001", 40.0, 0)).await);
    assert_eq!(outcome, ApplyOutcome::Unchanged);
    assert_eq!(h.store.alert_count(), 0);
}

#[tokio::test]
async fn test_lower_severity_is_absorbed() {
    let h = harness(MemoryStore::new());
    let ApplyOutcome::Raised(alert) =
        processed(h.pipeline.ingest_one(&temp("PUMP-001", 110.0, 0)).await)
    else {
        panic!("expected raise");
    };
    assert_eq!(alert.severity, Severity::Critical);

    let outcome = processed(h.pipeline.ingest_one(&temp("PUMP-001", 85.0, 5)).await);
    assert_eq!(outcome, ApplyOutcome::Absorbed(alert.id));

    let stored = h.alerts.get(alert.id).await.unwrap();
    assert_eq!(stored.severity, Severity::Critical);
    assert_eq!(stored.value, 110.0);
}

#[tokio::test]
async fn test_below_minimum_raises_low_side_alert() {
    let h = harness(MemoryStore::new());
    let ApplyOutcome::Raised(alert) =
        processed(h.pipeline.ingest_one(&temp("PUMP-002", -25.0, 0)).await)
    else {
        panic!("expected raise");
    };
    assert_eq!(alert.severity, Severity::Critical);
    assert_eq!(alert.direction, ThresholdDirection::Below);
    assert_eq!(alert.threshold, -20.0);
    assert!(alert.message.contains("below minimum"));
}

#[tokio::test]
async fn test_acknowledge_then_escalate_keeps_acknowledgment() {
    let h = harness(MemoryStore::new());
    let ApplyOutcome::Raised(alert) =
        processed(h.pipeline.ingest_one(&temp("PUMP-001", 85.0, 0)).await)
    else {
        panic!("expected raise");
    };

    let acked = h.pipeline.acknowledge(alert.id, "  operator-7 ").await.unwrap();
    assert_eq!(acked.status, AlertStatus::Acknowledged);
    assert_eq!(acked.acknowledged_by.as_deref(), Some("operator-7"));
    assert_eq!(acked.severity, Severity::Warning);
    assert_eq!(acked.message, alert.message);

    // Acknowledged alerts still count as outstanding for their key
    let outcome = processed(h.pipeline.ingest_one(&temp("PUMP-001", 90.0, 5)).await);
    assert_eq!(outcome, ApplyOutcome::Absorbed(alert.id));

    let outcome = processed(h.pipeline.ingest_one(&temp("PUMP-001", 120.0, 10)).await);
    let ApplyOutcome::Escalated { alert: escalated, .. } = outcome else {
        panic!("expected escalation, got {outcome:?}");
    };
    assert_eq!(escalated.id, alert.id);
    assert_eq!(escalated.status, AlertStatus::Acknowledged);
    assert_eq!(escalated.acknowledged_by.as_deref(), Some("operator-7"));
    assert_eq!(h.store.alert_count(), 1);
}

#[tokio::test]
async fn test_acknowledge_errors() {
    let h = harness(MemoryStore::new());
    let ApplyOutcome::Raised(alert) =
        processed(h.pipeline.ingest_one(&temp("PUMP-001", 85.0, 0)).await)
    else {
        panic!("expected raise");
    };

    assert!(matches!(
        h.pipeline.acknowledge(alert.id, "   ").await,
        Err(LifecycleError::MissingOperator)
    ));

    h.pipeline.acknowledge(alert.id, "alice").await.unwrap();
    assert!(matches!(
        h.pipeline.acknowledge(alert.id, "bob").await,
        Err(LifecycleError::AlreadyAcknowledged(id)) if id == alert.id
    ));

    let resolved = h.pipeline.resolve(alert.id, "bob").await.unwrap();
    assert_eq!(resolved.resolved_by.as_deref(), Some("bob"));
    assert_eq!(resolved.acknowledged_by.as_deref(), Some("alice"));

    assert!(matches!(
        h.pipeline.acknowledge(alert.id, "carol").await,
        Err(LifecycleError::AlreadyResolved(_))
    ));
    assert!(matches!(
        h.pipeline.resolve(alert.id, "carol").await,
        Err(LifecycleError::AlreadyResolved(_))
    ));

    let missing = plantmon_ingestd::AlertId::new();
    assert!(matches!(
        h.pipeline.acknowledge(missing, "carol").await,
        Err(LifecycleError::NotFound(id)) if id == missing
    ));
}

#[tokio::test]
async fn test_new_episode_after_resolution() {
    let h = harness(MemoryStore::new());
    let ApplyOutcome::Raised(first) =
        processed(h.pipeline.ingest_one(&temp("PUMP-001", 85.0, 0)).await)
    else {
        panic!("expected raise");
    };
    h.pipeline.resolve(first.id, "alice").await.unwrap();

    let ApplyOutcome::Raised(second) =
        processed(h.pipeline.ingest_one(&temp("PUMP-001", 86.0, 5)).await)
    else {
        panic!("expected a fresh alert");
    };
    assert_ne!(second.id, first.id);

    let active = h.alerts.active_alerts().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, second.id);
    assert_eq!(h.alerts.alerts_for_equipment("PUMP-001").await.unwrap().len(), 2);

    let current = h
        .store
        .find_active_alert("PUMP-001", SensorType::Temperature)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.id, second.id);
}

#[tokio::test]
async fn test_keys_are_independent() {
    let h = harness(MemoryStore::new());
    processed(h.pipeline.ingest_one(&temp("PUMP-001", 85.0, 0)).await);
    processed(h.pipeline.ingest_one(&temp("PUMP-002", 105.0, 0)).await);

    // Resolving one equipment's alert leaves the other alone
    let outcome = processed(h.pipeline.ingest_one(&temp("PUMP-001", 20.0, 5)).await);
    assert!(matches!(outcome, ApplyOutcome::AutoResolved(_)));

    let active = h.alerts.active_alerts().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].equipment_id, "PUMP-002");
}
