//! Per-key mutual exclusion for alert transitions
//!
//! Each (equipment, sensor) key gets its own async mutex. Holding the guard
//! spans the read-decide-write of one transition; different keys never
//! contend. Acquisition is bounded by a timeout and retried with backoff.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AC-3: Access Enforcement - Lock-based serialization of alert state
//! - SC-5: DoS Protection - Bounded waits instead of unbounded queueing

use crate::error::LifecycleError;
use crate::retry::RetryPolicy;
use crate::types::AlertKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Lock acquisition settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    /// Wait per attempt before counting a conflict
    pub timeout: Duration,
    /// Attempts and backoff between them
    pub retry: RetryPolicy,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }
}

/// Exclusive hold on one key. Released on drop.
pub struct KeyGuard {
    key: AlertKey,
    _guard: OwnedMutexGuard<()>,
}

impl KeyGuard {
    pub fn key(&self) -> &AlertKey {
        &self.key
    }
}

/// Registry of per-key locks.
pub struct KeyLocks {
    locks: Mutex<HashMap<AlertKey, Arc<AsyncMutex<()>>>>,
    config: LockConfig,
}

impl KeyLocks {
    pub fn new(config: LockConfig) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn handle(&self, key: &AlertKey) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Take the lock for `key`, or fail with `ConcurrencyConflict` once the
    /// retry budget is exhausted.
    pub async fn acquire(&self, key: &AlertKey) -> Result<KeyGuard, LifecycleError> {
        let handle = self.handle(key);
        let attempts = self.config.retry.max_attempts.max(1);

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.config.timeout, handle.clone().lock_owned()).await {
                Ok(guard) => {
                    return Ok(KeyGuard {
                        key: key.clone(),
                        _guard: guard,
                    });
                }
                Err(_) if attempt < attempts => {
                    let delay = self.config.retry.backoff_for(attempt);
                    debug!(%key, attempt, delay_ms = delay.as_millis() as u64, "Key lock busy, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(_) => {}
            }
        }

        warn!(%key, attempts, "Key lock not acquired");
        Err(LifecycleError::ConcurrencyConflict {
            key: key.to_string(),
            attempts,
        })
    }

    /// Number of keys with a registered lock.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }

    /// Forget locks nobody holds or waits on. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let mut locks = self.locks.lock();
        let before = locks.len();
        // Holders and waiters each own a clone of the Arc
        locks.retain(|_, handle| Arc::strong_count(handle) > 1);
        before - locks.len()
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}
