//! # State Store
//!
//! Low-latency shared state for the dialer fleet: agent records, idle
//! queues, lead buckets, active calls, waiting customers and the named
//! advisory locks that serialize every read-modify-write across workers.
//!
//! The store is a thin typed layer over a [`StoreBackend`]: the production
//! backend speaks Redis through a connection manager, the in-process
//! backend backs the test suites and single-node deployments. Every value
//! is JSON; every composite mutation (state row + queue membership) is one
//! pipelined round-trip on the backend.
//!
//! ## Locking contract
//!
//! [`StateStore::lock`] blocks for at most [`LOCK_TIMEOUT`] with a
//! [`LOCK_RETRY_SLEEP`] pause between attempts and returns a definite
//! [`StoreError::LockBusy`] on failure. Callers must not proceed without
//! the lock; the operation is retried on the next tick instead. Locks are
//! TTL'd so a crashed holder cannot wedge the fleet, and release is
//! token-guarded so an expired holder cannot free a successor's lock.
//!
//! ## Keyspace
//!
//! The authoritative key names live in [`keys`]; they are shared with the
//! operational tooling and must not be renamed.

pub mod backend;
pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

pub use backend::{StoreBackend, StoreError};
pub use memory::MemoryBackend;
pub use redis::RedisBackend;

/// Bounded blocking time for lock acquisition.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(3);
/// Pause between lock acquisition attempts.
pub const LOCK_RETRY_SLEEP: Duration = Duration::from_millis(50);

/// Authoritative state-store key names.
pub mod keys {
    /// Hash: agent id -> JSON agent record.
    pub const AGENT_STATES: &str = "AGENT_STATES";
    /// Sorted set: idle sales agents scored by last-idle time.
    pub const SALES_AGENT_QUEUE: &str = "SALES_AGENT_QUEUE";
    /// Sorted set: idle support agents scored by last-idle time.
    pub const SUPPORT_AGENT_QUEUE: &str = "SUPPORT_AGENT_QUEUE";
    /// Sorted set: idle secondary sales agents scored by last-idle time.
    pub const SECONDARY_SALES_AGENT_QUEUE: &str = "SECONDARY_SALES_AGENT_QUEUE";
    /// String: JSON map of agent id -> priority lead list.
    pub const AGENT_PRIORITY_LEAD_MAPPING: &str = "AGENT_PRIORITY_LEAD_MAPPING";
    /// Hash: agent id -> JSON lead list (secondary + acquisition, id "0").
    pub const AGENT_LEAD_MAPPING: &str = "AGENT_LEAD_MAPPING";
    /// Hash: call uuid -> JSON active-call record.
    pub const ACTIVE_CALLS: &str = "ACTIVE_CALLS";
    /// List: JSON completed-call records awaiting persistence.
    pub const COMPLETED_CALLS: &str = "COMPLETED_CALLS";
    /// Per-agent state lock prefix.
    pub const AGENT_STATE_LOCK: &str = "AGENT_STATE_LOCK:";
    /// Per-call record lock prefix.
    pub const ACTIVE_CALL_LOCK: &str = "ACTIVE_CALL_LOCK:";
    /// String: JSON map of agent id -> SIP extension.
    pub const AGENT_EXTENSION_MAPPING: &str = "AGENT_EXTENSION_MAPPING";
    /// Single-flight guard for persistence drains.
    pub const SYNC_TO_DB_LOCK: &str = "SYNC_TO_DB_LOCK";
    /// String: JSON list of acquisition-enabled agent ids (historical
    /// spelling, shared with operational tooling).
    pub const AQUISITION_AGENTS: &str = "AQUISITION_AGENTS";
    /// List: parked inbound call uuids waiting for a support agent.
    pub const SUPPORT_CUSTOMERS_WAITING_QUEUE: &str = "SUPPORT_CUSTOMERS_WAITING_QUEUE";
    /// List: parked inbound call uuids waiting for a secondary sales agent.
    pub const SECONDARY_SALES_CUSTOMERS_WAITING_QUEUE: &str =
        "SECONDARY_SALES_CUSTOMERS_WAITING_QUEUE";
    /// Tick-level single-writer lock.
    pub const DIALER_EXECUTION_LOCK: &str = "dialer:execution_lock";

    /// Lock key guarding a whole-queue mutation.
    pub fn queue_lock(queue_key: &str) -> String {
        format!("{queue_key}:lock")
    }

    /// Per-agent state lock key.
    pub fn agent_state_lock(agent_id: &str) -> String {
        format!("{AGENT_STATE_LOCK}{agent_id}")
    }

    /// Per-call record lock key.
    pub fn active_call_lock(call_id: &str) -> String {
        format!("{ACTIVE_CALL_LOCK}{call_id}")
    }
}

/// Current wall-clock time as whole epoch seconds.
pub fn epoch_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Current wall-clock time as fractional epoch seconds (sorted-set scores).
pub fn epoch_seconds_f64() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_millis()) / 1000.0
}

/// Shared handle to the state store.
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn StoreBackend>,
}

impl StateStore {
    /// Wrap an existing backend.
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    /// In-process store for tests and single-node deployments.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Connect the production Redis backend.
    pub async fn connect_redis(url: &str) -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(RedisBackend::connect(url).await?)))
    }

    /// Raw backend access for primitive operations.
    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    /// Acquire a named advisory lock under the standard contract.
    pub async fn lock(&self, key: impl Into<String>) -> Result<StoreLock, StoreError> {
        self.lock_with_ttl(key, LOCK_TIMEOUT).await
    }

    /// Acquire a named advisory lock with a custom TTL.
    pub async fn lock_with_ttl(
        &self,
        key: impl Into<String>,
        ttl: Duration,
    ) -> Result<StoreLock, StoreError> {
        let key = key.into();
        let token = Uuid::new_v4().to_string();
        let deadline = tokio::time::Instant::now() + LOCK_TIMEOUT;

        loop {
            if self.backend.set_nx_ex(&key, &token, ttl).await? {
                return Ok(StoreLock {
                    backend: self.backend.clone(),
                    key,
                    token,
                    released: false,
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(StoreError::LockBusy(key));
            }
            tokio::time::sleep(LOCK_RETRY_SLEEP).await;
        }
    }

    /// Try to take a TTL'd single-flight flag (SET NX EX). Returns false
    /// when another worker holds it.
    pub async fn try_flag(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.backend.set_nx_ex(key, "locked", ttl).await
    }

    /// Fetch and decode a JSON string value.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.backend.get(key).await? {
            Some(raw) => Ok(Some(decode(key, &raw)?)),
            None => Ok(None),
        }
    }

    /// Encode and store a JSON string value.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(StoreError::encode)?;
        self.backend.set(key, &raw).await
    }

    /// Encode and store a JSON string value with a TTL.
    pub async fn set_json_ex<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(StoreError::encode)?;
        self.backend.set_ex(key, &raw, ttl).await
    }

    /// Fetch and decode one JSON hash field.
    pub async fn hget_json<T: DeserializeOwned>(
        &self,
        key: &str,
        field: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.backend.hget(key, field).await? {
            Some(raw) => Ok(Some(decode(key, &raw)?)),
            None => Ok(None),
        }
    }
}

/// Decode a JSON payload, tagging the failing key.
pub(crate) fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|source| StoreError::Decode {
        key: key.to_string(),
        source,
    })
}

/// A held advisory lock. Release explicitly on every exit path; the TTL
/// only covers crashed holders.
pub struct StoreLock {
    backend: Arc<dyn StoreBackend>,
    key: String,
    token: String,
    released: bool,
}

impl StoreLock {
    /// Release the lock if this holder still owns it.
    pub async fn release(mut self) {
        self.released = true;
        match self.backend.del_if_equals(&self.key, &self.token).await {
            Ok(true) => {}
            Ok(false) => warn!("lock {} expired before release", self.key),
            Err(e) => warn!("failed to release lock {}: {}", self.key, e),
        }
    }

    /// The guarded key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if !self.released {
            // The TTL will reap it; surfacing the leak helps find the
            // missing release path.
            warn!("lock {} dropped without release; waiting on TTL", self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_round_trip() {
        let store = StateStore::in_memory();
        let lock = store.lock("TEST:lock").await.unwrap();
        assert_eq!(lock.key(), "TEST:lock");
        lock.release().await;

        // Released, so a second acquisition succeeds immediately.
        let lock = store.lock("TEST:lock").await.unwrap();
        lock.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn contended_lock_reports_busy() {
        let store = StateStore::in_memory();
        let held = store.lock("TEST:lock").await.unwrap();

        let result = store.lock("TEST:lock").await;
        assert!(matches!(result, Err(StoreError::LockBusy(_))));
        held.release().await;
    }

    #[tokio::test]
    async fn json_round_trip() {
        let store = StateStore::in_memory();
        store.set_json("k", &vec!["a".to_string()]).await.unwrap();
        let back: Option<Vec<String>> = store.get_json("k").await.unwrap();
        assert_eq!(back, Some(vec!["a".to_string()]));
    }
}
