//! # Lead Queues
//!
//! The three lead collections the dialer cycle drains, plus the per-team
//! inbound waiting queues:
//!
//! - **Priority**: one ordered list per agent, dialed 1:1 with the agent
//!   leg bridged automatically on answer.
//! - **Secondary**: one ordered list per agent, over-dialed by the
//!   predictive multiplier with calls parked until the lead answers.
//! - **Acquisition**: a single shared list under the sentinel agent id
//!   `0`, consumed for any acquisition-enabled agent.
//!
//! The priority mapping is one JSON document (whole-map writes under its
//! lock); the secondary mapping is a hash with one JSON list per agent so
//! buckets can be rewritten independently. Both mutate only under their
//! dedicated queue lock.

pub mod refill;

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::agent::{AgentId, Team};
use crate::error::Result;
use crate::store::{decode, keys, StateStore, StoreLock};

pub use refill::{QueueRefiller, RefillOutcome};

/// Sentinel bucket id for the shared acquisition list.
pub const ACQUISITION_BUCKET: &str = "0";

/// Campaign segment; declaration order is the refill priority order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    FollowUp,
    Active,
    Growth,
    ActiveChurn,
    GrowthChurn,
    Acquisition,
}

impl Segment {
    pub fn from_wire(value: &str) -> Option<Segment> {
        match value {
            "follow_up" => Some(Segment::FollowUp),
            "active" => Some(Segment::Active),
            "growth" => Some(Segment::Growth),
            "active_churn" => Some(Segment::ActiveChurn),
            "growth_churn" => Some(Segment::GrowthChurn),
            "acquisition" => Some(Segment::Acquisition),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::FollowUp => "follow_up",
            Segment::Active => "active",
            Segment::Growth => "growth",
            Segment::ActiveChurn => "active_churn",
            Segment::GrowthChurn => "growth_churn",
            Segment::Acquisition => "acquisition",
        }
    }
}

/// Immutable snapshot of a lead enqueued for dialing.
///
/// Lives only inside queues and active-call records; the persistent lead
/// row is keyed by `lead_id`. `last_order_details` and `metadata` ride
/// along for the operator UI but never reach the switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedLead {
    pub campaign_id: Option<i64>,
    pub campaign_name: Option<String>,
    pub campaign_segment: Option<Segment>,

    pub lead_id: i64,
    pub source_lead_id: String,

    pub phone_number: Option<String>,
    pub customer_name: String,
    pub city: Option<String>,

    pub customer_segment: Option<String>,
    pub month_gmv: Option<f64>,
    pub overall_gmv: Option<f64>,

    pub last_call_date: Option<String>,
    #[serde(default)]
    pub last_order_details: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Value,

    pub enqueued_at: String,
}

/// Mapping of agent id -> ordered lead list.
pub type LeadBuckets = HashMap<String, Vec<QueuedLead>>;

/// Access to the lead queues and waiting queues in the state store.
#[derive(Clone)]
pub struct QueueManager {
    store: StateStore,
}

impl QueueManager {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    // ---- priority queue -------------------------------------------------

    /// Lock guarding the whole priority mapping.
    pub async fn lock_priority(&self) -> Result<StoreLock> {
        Ok(self
            .store
            .lock(keys::queue_lock(keys::AGENT_PRIORITY_LEAD_MAPPING))
            .await?)
    }

    /// The whole priority mapping. Callers mutating it must hold
    /// [`lock_priority`](Self::lock_priority).
    pub async fn priority_mapping(&self) -> Result<LeadBuckets> {
        Ok(self
            .store
            .get_json::<LeadBuckets>(keys::AGENT_PRIORITY_LEAD_MAPPING)
            .await?
            .unwrap_or_default())
    }

    /// Persist the whole priority mapping.
    pub async fn store_priority_mapping(&self, mapping: &LeadBuckets) -> Result<()> {
        Ok(self
            .store
            .set_json(keys::AGENT_PRIORITY_LEAD_MAPPING, mapping)
            .await?)
    }

    /// Re-enqueue a lead at the head of an agent's priority bucket (the
    /// uncontacted-lead path out of the hangup handler).
    pub async fn push_priority_front(&self, agent_id: &str, lead: QueuedLead) -> Result<()> {
        let lock = self.lock_priority().await?;
        let result = async {
            let mut mapping = self.priority_mapping().await?;
            mapping.entry(agent_id.to_string()).or_default().insert(0, lead);
            self.store_priority_mapping(&mapping).await
        }
        .await;
        lock.release().await;
        result
    }

    /// Append a lead to the back of an agent's priority bucket.
    pub async fn push_priority(&self, agent_id: &str, lead: QueuedLead) -> Result<()> {
        let lock = self.lock_priority().await?;
        let result = async {
            let mut mapping = self.priority_mapping().await?;
            mapping.entry(agent_id.to_string()).or_default().push(lead);
            self.store_priority_mapping(&mapping).await
        }
        .await;
        lock.release().await;
        result
    }

    // ---- secondary / acquisition queues ---------------------------------

    /// Lock guarding the secondary mapping (shared with the acquisition
    /// bucket, which lives under agent id `0` in the same hash).
    pub async fn lock_secondary(&self) -> Result<StoreLock> {
        Ok(self
            .store
            .lock(keys::queue_lock(keys::AGENT_LEAD_MAPPING))
            .await?)
    }

    /// Every secondary bucket, acquisition included. Undecodable buckets
    /// are logged and skipped.
    pub async fn secondary_mapping(&self) -> Result<LeadBuckets> {
        let raw = self.store.backend().hgetall(keys::AGENT_LEAD_MAPPING).await?;
        let mut mapping = LeadBuckets::with_capacity(raw.len());
        for (agent_id, value) in raw {
            match decode::<Vec<QueuedLead>>(keys::AGENT_LEAD_MAPPING, &value) {
                Ok(leads) => {
                    mapping.insert(agent_id, leads);
                }
                Err(e) => warn!("skipping bad secondary bucket for {}: {}", agent_id, e),
            }
        }
        Ok(mapping)
    }

    /// One secondary bucket.
    pub async fn secondary_bucket(&self, agent_id: &str) -> Result<Vec<QueuedLead>> {
        Ok(self
            .store
            .hget_json::<Vec<QueuedLead>>(keys::AGENT_LEAD_MAPPING, agent_id)
            .await?
            .unwrap_or_default())
    }

    /// Rewrite one secondary bucket. Callers must hold
    /// [`lock_secondary`](Self::lock_secondary).
    pub async fn store_secondary_bucket(
        &self,
        agent_id: &str,
        leads: &[QueuedLead],
    ) -> Result<()> {
        let raw = serde_json::to_string(leads).map_err(crate::store::StoreError::encode)?;
        Ok(self
            .store
            .backend()
            .hset(keys::AGENT_LEAD_MAPPING, agent_id, &raw)
            .await?)
    }

    /// Append freshly refilled buckets onto the existing mapping,
    /// preserving the order already queued.
    pub async fn merge_secondary_buckets(&self, buckets: LeadBuckets) -> Result<usize> {
        if buckets.is_empty() {
            return Ok(0);
        }
        let lock = self.lock_secondary().await?;
        let result = async {
            let mut merged = 0usize;
            for (agent_id, leads) in buckets {
                let mut existing = self.secondary_bucket(&agent_id).await?;
                merged += leads.len();
                existing.extend(leads);
                self.store_secondary_bucket(&agent_id, &existing).await?;
            }
            Ok(merged)
        }
        .await;
        lock.release().await;
        result
    }

    /// True when any agent's secondary list is below the refill threshold
    /// (or nothing is queued at all).
    pub async fn needs_refill(&self, threshold: usize) -> Result<bool> {
        let mapping = self.secondary_mapping().await?;
        if mapping.is_empty() {
            return Ok(true);
        }
        Ok(mapping.values().any(|leads| leads.len() < threshold))
    }

    // ---- acquisition agents ---------------------------------------------

    /// Agents currently eligible to consume the shared acquisition list.
    pub async fn acquisition_agents(&self) -> Result<Vec<AgentId>> {
        Ok(self
            .store
            .get_json::<Vec<AgentId>>(keys::AQUISITION_AGENTS)
            .await?
            .unwrap_or_default())
    }

    /// Merge ids into the acquisition-enabled list, refreshing its TTL.
    pub async fn add_acquisition_agents(
        &self,
        agents: &[AgentId],
        ttl: Duration,
    ) -> Result<()> {
        if agents.is_empty() {
            return Ok(());
        }
        let mut current = self.acquisition_agents().await?;
        for agent in agents {
            if !current.contains(agent) {
                current.push(agent.clone());
            }
        }
        Ok(self
            .store
            .set_json_ex(keys::AQUISITION_AGENTS, &current, ttl)
            .await?)
    }

    // ---- inbound waiting queues -----------------------------------------

    /// Park an inbound caller's uuid at the back of the team's waiting
    /// queue. Teams without a waiting queue drop the request with a
    /// warning.
    pub async fn enqueue_waiting_customer(&self, team: Team, call_uuid: &str) -> Result<()> {
        let Some(queue_key) = team.waiting_queue_key() else {
            warn!("team {} has no waiting queue; dropping {}", team, call_uuid);
            return Ok(());
        };
        Ok(self.store.backend().rpush(queue_key, call_uuid).await?)
    }

    /// The next waiting caller without dequeuing.
    pub async fn peek_waiting_customer(&self, team: Team) -> Result<Option<String>> {
        let Some(queue_key) = team.waiting_queue_key() else {
            return Ok(None);
        };
        Ok(self.store.backend().lpeek(queue_key).await?)
    }

    /// Dequeue the next waiting caller.
    pub async fn pop_waiting_customer(&self, team: Team) -> Result<Option<String>> {
        let Some(queue_key) = team.waiting_queue_key() else {
            return Ok(None);
        };
        Ok(self.store.backend().lpop(queue_key).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead(id: i64) -> QueuedLead {
        QueuedLead {
            campaign_id: Some(1),
            campaign_name: Some("camp".to_string()),
            campaign_segment: Some(Segment::Active),
            lead_id: id,
            source_lead_id: format!("src-{id}"),
            phone_number: Some(format!("92300{id:07}")),
            customer_name: format!("customer {id}"),
            city: None,
            customer_segment: None,
            month_gmv: None,
            overall_gmv: None,
            last_call_date: None,
            last_order_details: serde_json::Value::Null,
            metadata: serde_json::Value::Null,
            enqueued_at: "2026-02-09T10:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn priority_front_and_back_ordering() {
        let queues = QueueManager::new(StateStore::in_memory());
        queues.push_priority("a1", lead(1)).await.unwrap();
        queues.push_priority("a1", lead(2)).await.unwrap();
        queues.push_priority_front("a1", lead(3)).await.unwrap();

        let mapping = queues.priority_mapping().await.unwrap();
        let ids: Vec<i64> = mapping["a1"].iter().map(|l| l.lead_id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn secondary_merge_appends_preserving_order() {
        let queues = QueueManager::new(StateStore::in_memory());
        queues
            .store_secondary_bucket("a1", &[lead(1), lead(2)])
            .await
            .unwrap();

        let mut fresh = LeadBuckets::new();
        fresh.insert("a1".to_string(), vec![lead(3)]);
        fresh.insert(ACQUISITION_BUCKET.to_string(), vec![lead(4)]);
        let merged = queues.merge_secondary_buckets(fresh).await.unwrap();
        assert_eq!(merged, 2);

        let mapping = queues.secondary_mapping().await.unwrap();
        let ids: Vec<i64> = mapping["a1"].iter().map(|l| l.lead_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(mapping[ACQUISITION_BUCKET].len(), 1);
    }

    #[tokio::test]
    async fn refill_threshold_checks_every_bucket() {
        let queues = QueueManager::new(StateStore::in_memory());
        assert!(queues.needs_refill(10).await.unwrap());

        queues
            .store_secondary_bucket("a1", &[lead(1), lead(2)])
            .await
            .unwrap();
        assert!(queues.needs_refill(3).await.unwrap());
        assert!(!queues.needs_refill(2).await.unwrap());
    }

    #[tokio::test]
    async fn acquisition_agent_list_deduplicates() {
        let queues = QueueManager::new(StateStore::in_memory());
        let ttl = Duration::from_secs(60);
        queues
            .add_acquisition_agents(&[AgentId::from("a1"), AgentId::from("a2")], ttl)
            .await
            .unwrap();
        queues
            .add_acquisition_agents(&[AgentId::from("a2"), AgentId::from("a3")], ttl)
            .await
            .unwrap();

        let agents = queues.acquisition_agents().await.unwrap();
        assert_eq!(
            agents,
            vec![AgentId::from("a1"), AgentId::from("a2"), AgentId::from("a3")]
        );
    }

    #[tokio::test]
    async fn waiting_queue_is_fifo_per_team() {
        let queues = QueueManager::new(StateStore::in_memory());
        queues
            .enqueue_waiting_customer(Team::Support, "u-1")
            .await
            .unwrap();
        queues
            .enqueue_waiting_customer(Team::Support, "u-2")
            .await
            .unwrap();

        assert_eq!(
            queues.peek_waiting_customer(Team::Support).await.unwrap().as_deref(),
            Some("u-1")
        );
        assert_eq!(
            queues.pop_waiting_customer(Team::Support).await.unwrap().as_deref(),
            Some("u-1")
        );
        assert_eq!(
            queues.pop_waiting_customer(Team::Support).await.unwrap().as_deref(),
            Some("u-2")
        );
        // Sales has no inbound waiting queue.
        assert_eq!(queues.peek_waiting_customer(Team::Sales).await.unwrap(), None);
    }
}
