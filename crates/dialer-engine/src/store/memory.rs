//! In-process store backend
//!
//! A single mutex-guarded world implementing the full primitive set,
//! including TTL bookkeeping. Used by the test suites and by single-node
//! deployments that do not share state across workers.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::backend::{StoreBackend, StoreError};

#[derive(Default)]
struct World {
    strings: HashMap<String, StringEntry>,
    hashes: HashMap<String, HashMap<String, String>>,
    zsets: HashMap<String, Vec<(String, f64)>>,
    lists: HashMap<String, VecDeque<String>>,
}

struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StringEntry {
    fn live(&self) -> bool {
        match self.expires_at {
            Some(deadline) => Instant::now() < deadline,
            None => true,
        }
    }
}

/// In-memory implementation of [`StoreBackend`].
#[derive(Default)]
pub struct MemoryBackend {
    world: Mutex<World>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn live_value(world: &mut World, key: &str) -> Option<String> {
    match world.strings.get(key) {
        Some(entry) if entry.live() => Some(entry.value.clone()),
        Some(_) => {
            world.strings.remove(key);
            None
        }
        None => None,
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(live_value(&mut self.world.lock(), key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.world.lock().strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.world.lock().strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut world = self.world.lock();
        if live_value(&mut world, key).is_some() {
            return Ok(false);
        }
        world.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut world = self.world.lock();
        world.strings.remove(key);
        world.hashes.remove(key);
        world.zsets.remove(key);
        world.lists.remove(key);
        Ok(())
    }

    async fn del_if_equals(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut world = self.world.lock();
        if live_value(&mut world, key).as_deref() == Some(value) {
            world.strings.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .world
            .lock()
            .hashes
            .get(key)
            .and_then(|h| h.get(field).cloned()))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.world
            .lock()
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), StoreError> {
        if let Some(hash) = self.world.lock().hashes.get_mut(key) {
            hash.remove(field);
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self.world.lock().hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hget_del(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut world = self.world.lock();
        Ok(world.hashes.get_mut(key).and_then(|h| h.remove(field)))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut world = self.world.lock();
        let zset = world.zsets.entry(key.to_string()).or_default();
        zset.retain(|(m, _)| m != member);
        zset.push((member.to_string(), score));
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        if let Some(zset) = self.world.lock().zsets.get_mut(key) {
            zset.retain(|(m, _)| m != member);
        }
        Ok(())
    }

    async fn zpopmin(&self, key: &str) -> Result<Option<(String, f64)>, StoreError> {
        let mut world = self.world.lock();
        let Some(zset) = world.zsets.get_mut(key) else {
            return Ok(None);
        };
        let Some(min_idx) = lowest_index(zset) else {
            return Ok(None);
        };
        Ok(Some(zset.remove(min_idx)))
    }

    async fn zrange_all(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let world = self.world.lock();
        let Some(zset) = world.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let mut sorted: Vec<_> = zset.clone();
        sorted.sort_by(order_by_score_then_member);
        Ok(sorted.into_iter().map(|(m, _)| m).collect())
    }

    async fn zrange_first(&self, key: &str) -> Result<Option<String>, StoreError> {
        let world = self.world.lock();
        let Some(zset) = world.zsets.get(key) else {
            return Ok(None);
        };
        Ok(lowest_index(zset).map(|i| zset[i].0.clone()))
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.world
            .lock()
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .world
            .lock()
            .lists
            .get_mut(key)
            .and_then(|l| l.pop_front()))
    }

    async fn lpeek(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .world
            .lock()
            .lists
            .get(key)
            .and_then(|l| l.front().cloned()))
    }

    async fn lrange_del(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .world
            .lock()
            .lists
            .remove(key)
            .map(|l| l.into_iter().collect())
            .unwrap_or_default())
    }

    async fn llen(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.world.lock().lists.get(key).map_or(0, |l| l.len()))
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
        let mut world = self.world.lock();
        world
            .hashes
            .entry(hash_key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        let zset = world.zsets.entry(zset_key.to_string()).or_default();
        zset.retain(|(m, _)| m != member);
        zset.push((member.to_string(), score));
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
        let mut world = self.world.lock();
        world
            .hashes
            .entry(hash_key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        if let Some(zset) = world.zsets.get_mut(zset_key) {
            zset.retain(|(m, _)| m != member);
        }
        Ok(())
    }

    async fn hdel_zrem(
        &self,
        hash_key: &str,
        field: &str,
        zset_key: &str,
        member: &str,
    ) -> Result<(), StoreError> {
        let mut world = self.world.lock();
        if let Some(hash) = world.hashes.get_mut(hash_key) {
            hash.remove(field);
        }
        if let Some(zset) = world.zsets.get_mut(zset_key) {
            zset.retain(|(m, _)| m != member);
        }
        Ok(())
    }
}

fn order_by_score_then_member(a: &(String, f64), b: &(String, f64)) -> std::cmp::Ordering {
    a.1.partial_cmp(&b.1)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.0.cmp(&b.0))
}

fn lowest_index(zset: &[(String, f64)]) -> Option<usize> {
    if zset.is_empty() {
        return None;
    }
    let mut best = 0;
    for i in 1..zset.len() {
        if order_by_score_then_member(&zset[i], &zset[best]) == std::cmp::Ordering::Less {
            best = i;
        }
    }
    Some(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zset_orders_by_score() {
        let backend = MemoryBackend::new();
        backend.zadd("q", "b", 2.0).await.unwrap();
        backend.zadd("q", "a", 1.0).await.unwrap();
        backend.zadd("q", "c", 3.0).await.unwrap();

        assert_eq!(backend.zrange_first("q").await.unwrap().as_deref(), Some("a"));
        assert_eq!(
            backend.zrange_all("q").await.unwrap(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );

        let (member, score) = backend.zpopmin("q").await.unwrap().unwrap();
        assert_eq!(member, "a");
        assert_eq!(score, 1.0);
        assert_eq!(backend.zrange_all("q").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn zadd_moves_existing_member_to_new_score() {
        let backend = MemoryBackend::new();
        backend.zadd("q", "a", 1.0).await.unwrap();
        backend.zadd("q", "b", 2.0).await.unwrap();
        // Re-adding "a" with a later score sends it to the back.
        backend.zadd("q", "a", 3.0).await.unwrap();

        assert_eq!(
            backend.zrange_all("q").await.unwrap(),
            vec!["b".to_string(), "a".to_string()]
        );
    }

    #[tokio::test]
    async fn hget_del_is_take_once() {
        let backend = MemoryBackend::new();
        backend.hset("calls", "u1", "{}").await.unwrap();

        assert_eq!(backend.hget_del("calls", "u1").await.unwrap().as_deref(), Some("{}"));
        assert_eq!(backend.hget_del("calls", "u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_nx_respects_live_keys_and_expiry() {
        let backend = MemoryBackend::new();
        assert!(backend
            .set_nx_ex("lock", "t1", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(!backend
            .set_nx_ex("lock", "t2", Duration::from_secs(60))
            .await
            .unwrap());

        // An expired entry behaves as absent.
        backend
            .set_ex("gone", "v", Duration::from_millis(0))
            .await
            .unwrap();
        assert_eq!(backend.get("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_read_and_clear_is_atomic_take() {
        let backend = MemoryBackend::new();
        backend.rpush("done", "a").await.unwrap();
        backend.rpush("done", "b").await.unwrap();

        assert_eq!(backend.lrange_del("done").await.unwrap(), vec!["a", "b"]);
        assert!(backend.lrange_del("done").await.unwrap().is_empty());
    }
}
