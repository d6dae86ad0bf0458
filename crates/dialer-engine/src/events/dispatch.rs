//! Uuid-keyed event dispatcher
//!
//! The switch emits one ordered stream, but only events sharing a channel
//! uuid must stay serialized. The dispatcher hashes each event's uuid onto
//! a fixed worker, so one slow channel cannot stall the rest of the fleet
//! while per-channel ordering is preserved.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::handler::EventHandler;
use super::SwitchEvent;

/// Buffered events per worker before dispatch applies backpressure.
const WORKER_CHANNEL_CAPACITY: usize = 256;

/// Fans events out to per-uuid serialized workers.
pub struct EventDispatcher {
    senders: Vec<mpsc::Sender<SwitchEvent>>,
    workers: Vec<JoinHandle<()>>,
}

impl EventDispatcher {
    /// Spawn `workers` handler tasks (at least one).
    pub fn spawn(handler: Arc<EventHandler>, workers: usize) -> Self {
        let workers = workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let (tx, mut rx) = mpsc::channel::<SwitchEvent>(WORKER_CHANNEL_CAPACITY);
            let handler = handler.clone();
            handles.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if let Err(e) = handler.handle(event).await {
                        error!("event worker {}: {}", worker_id, e);
                    }
                }
            }));
            senders.push(tx);
        }

        info!("✅ Event dispatcher running with {} workers", workers);
        Self {
            senders,
            workers: handles,
        }
    }

    /// Route an event to the worker owning its channel uuid.
    pub async fn dispatch(&self, event: SwitchEvent) {
        let index = worker_index(event.channel_uuid(), self.senders.len());
        if self.senders[index].send(event).await.is_err() {
            error!("event worker {} is gone; dropping event", index);
        }
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// Stop accepting events and wait for the workers to drain.
    pub async fn shutdown(self) {
        drop(self.senders);
        for handle in self.workers {
            let _ = handle.await;
        }
    }
}

fn worker_index(uuid: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    uuid.hash(&mut hasher);
    (hasher.finish() as usize) % workers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_uuid_maps_to_same_worker() {
        let a = worker_index("uuid-aaaa", 4);
        for _ in 0..10 {
            assert_eq!(worker_index("uuid-aaaa", 4), a);
        }
    }

    #[test]
    fn indices_stay_in_range() {
        for i in 0..100 {
            let idx = worker_index(&format!("uuid-{i}"), 3);
            assert!(idx < 3);
        }
    }
}
