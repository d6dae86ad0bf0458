//! Redis store backend
//!
//! Production backend over a multiplexed connection manager. The composite
//! operations are issued as MULTI/EXEC pipelines so they stay atomic with
//! respect to every other worker; lock release goes through a
//! compare-and-delete script so an expired holder cannot free a
//! successor's lock.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use super::backend::{StoreBackend, StoreError};

const RELEASE_IF_OWNED: &str =
    r"if redis.call('get', KEYS[1]) == ARGV[1] then return redis.call('del', KEYS[1]) else return 0 end";

/// Redis implementation of [`StoreBackend`].
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Connect and build the shared connection manager.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(StoreError::backend)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(StoreError::backend)?;
        info!("✅ Connected to state store at {}", url);
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl StoreBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();
        conn.get(key).await.map_err(StoreError::backend)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn.set(key, value).await.map_err(StoreError::backend)?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs(ttl))
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(StoreError::backend)?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn.del(key).await.map_err(StoreError::backend)?;
        Ok(())
    }

    async fn del_if_equals(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let deleted: i64 = redis::Script::new(RELEASE_IF_OWNED)
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(StoreError::backend)?;
        Ok(deleted > 0)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();
        conn.hget(key, field).await.map_err(StoreError::backend)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn
            .hset(key, field, value)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn.hdel(key, field).await.map_err(StoreError::backend)?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn();
        conn.hgetall(key).await.map_err(StoreError::backend)
    }

    async fn hget_del(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();
        let (value, _removed): (Option<String>, i64) = redis::pipe()
            .atomic()
            .hget(key, field)
            .hdel(key, field)
            .query_async(&mut conn)
            .await
            .map_err(StoreError::backend)?;
        Ok(value)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn
            .zadd(key, member, score)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn.zrem(key, member).await.map_err(StoreError::backend)?;
        Ok(())
    }

    async fn zpopmin(&self, key: &str) -> Result<Option<(String, f64)>, StoreError> {
        let mut conn = self.conn();
        let popped: Vec<(String, f64)> = conn.zpopmin(key, 1).await.map_err(StoreError::backend)?;
        Ok(popped.into_iter().next())
    }

    async fn zrange_all(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        conn.zrange(key, 0, -1).await.map_err(StoreError::backend)
    }

    async fn zrange_first(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();
        let first: Vec<String> = conn.zrange(key, 0, 0).await.map_err(StoreError::backend)?;
        Ok(first.into_iter().next())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn.rpush(key, value).await.map_err(StoreError::backend)?;
        Ok(())
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();
        conn.lpop(key, None).await.map_err(StoreError::backend)
    }

    async fn lpeek(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();
        conn.lindex(key, 0).await.map_err(StoreError::backend)
    }

    async fn lrange_del(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        let (items, _deleted): (Vec<String>, i64) = redis::pipe()
            .atomic()
            .lrange(key, 0, -1)
            .del(key)
            .query_async(&mut conn)
            .await
            .map_err(StoreError::backend)?;
        Ok(items)
    }

    async fn llen(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn();
        conn.llen(key).await.map_err(StoreError::backend)
    }

    async fn hset_zadd(
        &self,
        hash_key: &str,
        field: &str,
        value: &str,
        zset_key: &str,
        member: &str,
        score: f64,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: redis::Value = redis::pipe()
            .atomic()
            .hset(hash_key, field, value)
            .ignore()
            .zadd(zset_key, member, score)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn hset_zrem(
        &self,
        hash_key: &str,
        field: &str,
        value: &str,
        zset_key: &str,
        member: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: redis::Value = redis::pipe()
            .atomic()
            .hset(hash_key, field, value)
            .ignore()
            .zrem(zset_key, member)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn hdel_zrem(
        &self,
        hash_key: &str,
        field: &str,
        zset_key: &str,
        member: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: redis::Value = redis::pipe()
            .atomic()
            .hdel(hash_key, field)
            .ignore()
            .zrem(zset_key, member)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }
}
