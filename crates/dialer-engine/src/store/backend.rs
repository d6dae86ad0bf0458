//! Backend primitives behind the state store
//!
//! The trait is the exact primitive set the dialer needs: strings with
//! optional TTLs, hashes, sorted sets, lists, and the three composite
//! operations that must be one atomic round-trip (state row + queue
//! membership, read-and-remove, read-and-clear).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// State store failures
#[derive(Error, Debug)]
pub enum StoreError {
    /// Bounded blocking acquisition timed out; the caller retries on the
    /// next tick, never in a loop.
    #[error("could not acquire lock {0} - system busy")]
    LockBusy(String),

    /// Backend transport or command failure
    #[error("store backend error: {0}")]
    Backend(String),

    /// A stored payload failed to decode
    #[error("failed to decode value at {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A value failed to encode
    #[error("failed to encode value: {0}")]
    Encode(serde_json::Error),
}

impl StoreError {
    pub fn backend(msg: impl std::fmt::Display) -> Self {
        StoreError::Backend(msg.to_string())
    }

    pub fn encode(source: serde_json::Error) -> Self {
        StoreError::Encode(source)
    }
}

/// Primitive operations of the state store.
///
/// Implementations must make the composite operations atomic with respect
/// to all other operations on the same keys.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    // Strings
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;
    /// SET NX EX; returns true when the key was set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;
    async fn del(&self, key: &str) -> Result<(), StoreError>;
    /// Delete only when the stored value matches; lock release.
    async fn del_if_equals(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    // Hashes
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<(), StoreError>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;
    /// Atomic read-and-remove of one hash field.
    async fn hget_del(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    // Sorted sets
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;
    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError>;
    /// Pop the lowest-scored member.
    async fn zpopmin(&self, key: &str) -> Result<Option<(String, f64)>, StoreError>;
    /// All members ordered by ascending score.
    async fn zrange_all(&self, key: &str) -> Result<Vec<String>, StoreError>;
    /// The lowest-scored member without removing it.
    async fn zrange_first(&self, key: &str) -> Result<Option<String>, StoreError>;

    // Lists
    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn lpop(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// Head of the list without removing it.
    async fn lpeek(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// Atomic read-and-clear of the whole list.
    async fn lrange_del(&self, key: &str) -> Result<Vec<String>, StoreError>;
    async fn llen(&self, key: &str) -> Result<usize, StoreError>;

    // Composite single-round-trip mutations
    /// Write a hash field and add a sorted-set member in one round-trip
    /// (mark idle: state row + idle-queue insert).
    async fn hset_zadd(
        &self,
        hash_key: &str,
        field: &str,
        value: &str,
        zset_key: &str,
        member: &str,
        score: f64,
    ) -> Result<(), StoreError>;

    /// Write a hash field and remove a sorted-set member in one round-trip
    /// (mark busy: state row + idle-queue removal).
    async fn hset_zrem(
        &self,
        hash_key: &str,
        field: &str,
        value: &str,
        zset_key: &str,
        member: &str,
    ) -> Result<(), StoreError>;

    /// Delete a hash field and remove a sorted-set member in one
    /// round-trip (logout).
    async fn hdel_zrem(
        &self,
        hash_key: &str,
        field: &str,
        zset_key: &str,
        member: &str,
    ) -> Result<(), StoreError>;
}
