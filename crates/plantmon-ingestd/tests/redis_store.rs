//! RedisStore against a live server
//!
//! Each store instance owns its own connection, standing in for separate
//! ingestd processes sharing one database.
//!
//! Run with: cargo test --test redis_store -- --ignored
//! Server from PLANTMON_REDIS_HOST / PLANTMON_REDIS_PORT, default 127.0.0.1:6379.

use chrono::{TimeZone, Utc};
use plantmon_ingestd::{
    Alert, AlertFilter, AlertId, AlertStatus, PersistenceStore, Reading, ReadingQuery, RedisStore,
    SensorType, Severity, StoreError, ThresholdDirection,
};
use pretty_assertions::assert_eq;

async fn connect(prefix: &str) -> RedisStore {
    let host = std::env::var("PLANTMON_REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port = std::env::var("PLANTMON_REDIS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(6379);
    RedisStore::connect(&host, port, 0, prefix)
        .await
        .expect("Failed to connect to Redis")
}

fn unique_prefix() -> String {
    format!("plantmon-test-{}", uuid::Uuid::new_v4())
}

fn reading(value: f64, second: u32) -> Reading {
    Reading {
        equipment_id: "PUMP-001".into(),
        sensor_type: SensorType::Temperature,
        value,
        unit: None,
        timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, second).unwrap(),
    }
}

fn active_alert(severity: Severity) -> Alert {
    let now = Utc::now();
    Alert {
        id: AlertId::new(),
        equipment_id: "PUMP-001".into(),
        sensor_type: SensorType::Temperature,
        severity,
        message: "temperature reading 85 exceeds maximum threshold 80".into(),
        status: AlertStatus::Active,
        value: 85.0,
        threshold: 80.0,
        direction: ThresholdDirection::Above,
        created_at: now,
        updated_at: now,
        acknowledged_by: None,
        acknowledged_at: None,
        resolved_by: None,
        resolved_at: None,
    }
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_racing_stores_admit_one_outstanding_alert() {
    let prefix = unique_prefix();
    for round in 0..20 {
        let round_prefix = format!("{prefix}-{round}");
        let left = connect(&round_prefix).await;
        let right = connect(&round_prefix).await;
        let a = active_alert(Severity::Warning);
        let b = active_alert(Severity::Critical);

        let (ra, rb) = tokio::join!(left.upsert_alert(&a), right.upsert_alert(&b));
        let (winner, loser) = match (ra, rb) {
            (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
            other => panic!("expected exactly one write to win, got {other:?}"),
        };
        match loser {
            StoreError::Conflict { existing, .. } => assert_eq!(existing, winner.id),
            other => panic!("unexpected error {other:?}"),
        }

        let found = left
            .find_active_alert("PUMP-001", SensorType::Temperature)
            .await
            .unwrap();
        assert_eq!(found.map(|f| f.id), Some(winner.id));
        assert_eq!(left.list_alerts(&AlertFilter::all()).await.unwrap().len(), 1);
    }
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_resolving_clears_index_for_next_alert() {
    let store = connect(&unique_prefix()).await;
    let mut first = active_alert(Severity::Warning);
    store.upsert_alert(&first).await.unwrap();

    first.status = AlertStatus::Resolved;
    first.resolved_at = Some(Utc::now());
    store.upsert_alert(&first).await.unwrap();
    assert!(store
        .find_active_alert("PUMP-001", SensorType::Temperature)
        .await
        .unwrap()
        .is_none());

    let second = active_alert(Severity::Critical);
    store.upsert_alert(&second).await.unwrap();
    let outstanding = store.list_alerts(&AlertFilter::outstanding()).await.unwrap();
    assert_eq!(outstanding.len(), 1);
    assert_eq!(outstanding[0].id, second.id);
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_append_is_idempotent_across_stores() {
    let prefix = unique_prefix();
    let left = connect(&prefix).await;
    let right = connect(&prefix).await;

    let first = left.append_reading(&reading(50.0, 0)).await.unwrap();
    let second = left.append_reading(&reading(60.0, 1)).await.unwrap();
    assert_eq!(right.append_reading(&reading(50.0, 0)).await.unwrap(), first);
    assert_eq!(right.append_reading(&reading(60.0, 1)).await.unwrap(), second);

    let stored = right
        .readings(&ReadingQuery::equipment("PUMP-001"))
        .await
        .unwrap();
    let ids: Vec<_> = stored.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![second, first]);
    assert_eq!(stored[1].reading, reading(50.0, 0));
}
