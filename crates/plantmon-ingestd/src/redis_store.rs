//! Redis-backed persistence store
//!
//! Layout under the configured prefix:
//! - `READING_SEQ`: reading id counter
//! - `READING_DIGEST`: hash reading content key -> reading id
//! - `READINGS|<equipment>`: sorted set of reading JSON scored by timestamp (ms)
//! - `EQUIPMENT`: set of equipment ids that have readings
//! - `ALERT|<id>`: alert JSON
//! - `ALERTS`: set of alert ids
//! - `ALERT_OUTSTANDING`: hash `<equipment>:<sensor>` -> outstanding alert id
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SC-8: Transmission Confidentiality - Database communication
//! - AU-3: Content of Audit Records - Database operations logged

use crate::error::StoreError;
use crate::store::{AlertFilter, PersistenceStore, ReadingQuery};
use crate::types::{Alert, AlertId, AlertKey, Reading, ReadingId, StoredReading};
use async_trait::async_trait;
use plantmon_types::SensorType;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::{debug, instrument};

const READING_SEQ: &str = "READING_SEQ";
const READING_DIGEST: &str = "READING_DIGEST";
const READINGS_TABLE: &str = "READINGS";
const EQUIPMENT_SET: &str = "EQUIPMENT";
const ALERT_TABLE: &str = "ALERT";
const ALERT_SET: &str = "ALERTS";
const ALERT_OUTSTANDING: &str = "ALERT_OUTSTANDING";

/// KEYS: digest hash, id counter, equipment readings, equipment set.
/// ARGV: content key, reading JSON object, score, equipment id.
/// Returns the id of the stored reading, new or existing.
const APPEND_READING_LUA: &str = r#"
local existing = redis.call('HGET', KEYS[1], ARGV[1])
if existing then
    return tonumber(existing)
end
local id = redis.call('INCR', KEYS[2])
local member = '{"id":' .. id .. ',' .. string.sub(ARGV[2], 2)
redis.call('ZADD', KEYS[3], ARGV[3], member)
redis.call('SADD', KEYS[4], ARGV[4])
redis.call('HSET', KEYS[1], ARGV[1], id)
return id
"#;

/// KEYS: alert record, alert set, outstanding index.
/// ARGV: alert id, alert JSON, index field, "1" when outstanding.
/// Returns the conflicting outstanding id, or nil once written.
const UPSERT_ALERT_LUA: &str = r#"
local current = redis.call('HGET', KEYS[3], ARGV[3])
if ARGV[4] == '1' then
    if current and current ~= ARGV[1] then
        return current
    end
    redis.call('HSET', KEYS[3], ARGV[3], ARGV[1])
elseif current == ARGV[1] then
    redis.call('HDEL', KEYS[3], ARGV[3])
end
redis.call('SET', KEYS[1], ARGV[2])
redis.call('SADD', KEYS[2], ARGV[1])
return false
"#;

/// Redis store. Cloning shares the underlying multiplexed connection.
///
/// Writes that read before they write run as server-side scripts, so the
/// outstanding-alert rule and reading dedup hold across processes.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
    append_reading: Script,
    upsert_alert: Script,
}

impl RedisStore {
    #[instrument(skip_all)]
    pub async fn connect(host: &str, port: u16, db: i64, prefix: &str) -> Result<Self, StoreError> {
        debug!(host, port, db, "Connecting to Redis");
        let url = format!("redis://{}:{}/{}", host, port, db);
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!("Connected to Redis");
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
            append_reading: Script::new(APPEND_READING_LUA),
            upsert_alert: Script::new(UPSERT_ALERT_LUA),
        })
    }

    fn key(&self, name: &str) -> String {
        format!("{}:{}", self.prefix, name)
    }

    fn table_key(&self, table: &str, id: impl std::fmt::Display) -> String {
        format!("{}:{}|{}", self.prefix, table, id)
    }

    async fn load_alerts(&self, ids: &[String]) -> Result<Vec<Alert>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for id in ids {
            pipe.get(self.table_key(ALERT_TABLE, id));
        }
        let mut conn = self.conn.clone();
        let raw: Vec<Option<String>> = pipe.query_async(&mut conn).await?;
        raw.into_iter()
            .flatten()
            .map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .collect()
    }

    async fn readings_for(
        &self,
        equipment_id: &str,
        query: &ReadingQuery,
    ) -> Result<Vec<StoredReading>, StoreError> {
        let min = query
            .start
            .map_or_else(|| "-inf".to_string(), |t| t.timestamp_millis().to_string());
        let max = query
            .end
            .map_or_else(|| "+inf".to_string(), |t| t.timestamp_millis().to_string());
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .zrangebyscore(self.table_key(READINGS_TABLE, equipment_id), min, max)
            .await?;
        raw.iter()
            .map(|json| serde_json::from_str(json).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl PersistenceStore for RedisStore {
    #[instrument(skip(self, reading), fields(equipment_id = %reading.equipment_id, sensor = %reading.sensor_type))]
    async fn append_reading(&self, reading: &Reading) -> Result<ReadingId, StoreError> {
        let json = serde_json::to_string(reading)?;
        let mut conn = self.conn.clone();
        let id: u64 = self
            .append_reading
            .key(self.key(READING_DIGEST))
            .key(self.key(READING_SEQ))
            .key(self.table_key(READINGS_TABLE, &reading.equipment_id))
            .key(self.key(EQUIPMENT_SET))
            .arg(reading.content_key())
            .arg(json)
            .arg(reading.timestamp.timestamp_millis())
            .arg(&reading.equipment_id)
            .invoke_async(&mut conn)
            .await?;

        debug!(reading_id = id, "Appended reading");
        Ok(ReadingId(id))
    }

    #[instrument(skip(self, alert), fields(alert_id = %alert.id, status = %alert.status))]
    async fn upsert_alert(&self, alert: &Alert) -> Result<Alert, StoreError> {
        let json = serde_json::to_string(alert)?;
        let id = alert.id.to_string();
        let key = alert.key();
        let index_field = key.to_string();
        let outstanding = if alert.is_outstanding() { "1" } else { "0" };

        let mut conn = self.conn.clone();
        let conflict: Option<String> = self
            .upsert_alert
            .key(self.table_key(ALERT_TABLE, &id))
            .key(self.key(ALERT_SET))
            .key(self.key(ALERT_OUTSTANDING))
            .arg(&id)
            .arg(json)
            .arg(&index_field)
            .arg(outstanding)
            .invoke_async(&mut conn)
            .await?;

        if let Some(existing) = conflict {
            let existing = existing.parse().map_err(|e: uuid::Error| {
                StoreError::Corrupt(format!("outstanding index for {key}: {e}"))
            })?;
            return Err(StoreError::Conflict {
                key: index_field,
                existing,
            });
        }

        debug!(key = %index_field, "Upserted alert");
        Ok(alert.clone())
    }

    #[instrument(skip(self))]
    async fn find_active_alert(
        &self,
        equipment_id: &str,
        sensor: SensorType,
    ) -> Result<Option<Alert>, StoreError> {
        let field = AlertKey::new(equipment_id, sensor).to_string();
        let mut conn = self.conn.clone();
        let id: Option<String> = conn.hget(self.key(ALERT_OUTSTANDING), &field).await?;
        let Some(id) = id else {
            return Ok(None);
        };
        Ok(self
            .load_alerts(&[id])
            .await?
            .into_iter()
            .find(|a| a.is_outstanding()))
    }

    #[instrument(skip(self))]
    async fn get_alert(&self, id: AlertId) -> Result<Option<Alert>, StoreError> {
        Ok(self.load_alerts(&[id.to_string()]).await?.into_iter().next())
    }

    #[instrument(skip(self))]
    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StoreError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = if filter.outstanding_only {
            conn.hvals(self.key(ALERT_OUTSTANDING)).await?
        } else {
            conn.smembers(self.key(ALERT_SET)).await?
        };
        let alerts = self.load_alerts(&ids).await?;
        Ok(filter.apply(alerts))
    }

    #[instrument(skip(self))]
    async fn readings(&self, query: &ReadingQuery) -> Result<Vec<StoredReading>, StoreError> {
        let equipment: Vec<String> = match &query.equipment_id {
            Some(id) => vec![id.clone()],
            None => {
                let mut conn = self.conn.clone();
                conn.smembers(self.key(EQUIPMENT_SET)).await?
            }
        };

        let mut all = Vec::new();
        for equipment_id in &equipment {
            all.extend(self.readings_for(equipment_id, query).await?);
        }
        Ok(query.apply(all))
    }

    #[instrument(skip(self))]
    async fn latest_readings(&self) -> Result<Vec<StoredReading>, StoreError> {
        let mut conn = self.conn.clone();
        let mut equipment: Vec<String> = conn.smembers(self.key(EQUIPMENT_SET)).await?;
        equipment.sort();
        if equipment.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for equipment_id in &equipment {
            pipe.zrevrange(self.table_key(READINGS_TABLE, equipment_id), 0, 0);
        }
        let newest: Vec<Vec<String>> = pipe.query_async(&mut conn).await?;
        newest
            .into_iter()
            .flatten()
            .map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .collect()
    }
}
