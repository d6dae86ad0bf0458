//! # Active Call Tracking
//!
//! The shared record of every channel the switch is known to hold, keyed
//! by call uuid in the ACTIVE_CALLS hash. Created at originate (or at
//! inbound park), updated when legs answer, and removed atomically by the
//! hangup handler; removal returns the prior value, so exactly one
//! worker composes the terminal record for a given uuid.
//!
//! This module is deliberately neutral: both the dialer cycle and the
//! event handlers depend on it without depending on each other.

use serde::{Deserialize, Serialize};

use crate::agent::AgentId;
use crate::error::Result;
use crate::queue::QueuedLead;
use crate::store::{self, keys, StateStore};

/// Call direction as the switch reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    pub fn from_wire(value: &str) -> Option<CallDirection> {
        match value {
            "inbound" => Some(CallDirection::Inbound),
            "outbound" => Some(CallDirection::Outbound),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Inbound => "inbound",
            CallDirection::Outbound => "outbound",
        }
    }
}

/// One in-flight channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveCall {
    pub call_uuid: String,
    /// Null until an agent is attached (parked predictive and acquisition
    /// calls pick their agent at answer time).
    pub agent_id: Option<AgentId>,
    pub phone_number: Option<String>,
    /// The lead snapshot this call is dialing; absent on inbound calls.
    pub payload: Option<QueuedLead>,
    /// Epoch seconds.
    pub initiated_at: i64,
    /// Epoch seconds, set when the conversation is actually joined.
    pub connected_at: Option<i64>,
    pub direction: CallDirection,
    pub auto_bridge: bool,
}

impl ActiveCall {
    /// Record for a freshly originated outbound call.
    pub fn outbound(
        call_uuid: String,
        agent_id: Option<AgentId>,
        phone_number: String,
        payload: QueuedLead,
        auto_bridge: bool,
    ) -> Self {
        Self {
            call_uuid,
            agent_id,
            phone_number: Some(phone_number),
            payload: Some(payload),
            initiated_at: store::epoch_seconds(),
            connected_at: None,
            direction: CallDirection::Outbound,
            auto_bridge,
        }
    }

    /// Record for an inbound caller that reached the park point.
    pub fn inbound(call_uuid: String) -> Self {
        Self {
            call_uuid,
            agent_id: None,
            phone_number: None,
            payload: None,
            initiated_at: store::epoch_seconds(),
            connected_at: None,
            direction: CallDirection::Inbound,
            auto_bridge: false,
        }
    }
}

/// Terminal record: the active call plus how it ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedCall {
    #[serde(flatten)]
    pub call: ActiveCall,
    /// Epoch seconds.
    pub ended_at: i64,
    pub disconnect_reason: String,
    pub duration_seconds: u32,
}

/// Operations on the ACTIVE_CALLS hash.
#[derive(Clone)]
pub struct ActiveCalls {
    store: StateStore,
}

impl ActiveCalls {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Insert a new record. No lock: the uuid is fresh, nobody else can
    /// address it yet.
    pub async fn insert(&self, call: &ActiveCall) -> Result<()> {
        let raw = serde_json::to_string(call).map_err(crate::store::StoreError::encode)?;
        Ok(self
            .store
            .backend()
            .hset(keys::ACTIVE_CALLS, &call.call_uuid, &raw)
            .await?)
    }

    pub async fn get(&self, call_uuid: &str) -> Result<Option<ActiveCall>> {
        Ok(self
            .store
            .hget_json::<ActiveCall>(keys::ACTIVE_CALLS, call_uuid)
            .await?)
    }

    /// Attach an agent and stamp `connected_at`, under the per-call lock.
    ///
    /// Returns false when the record no longer exists (the call hung up
    /// before the update landed).
    pub async fn mark_connected(
        &self,
        call_uuid: &str,
        agent_id: Option<&AgentId>,
    ) -> Result<bool> {
        let lock = self.store.lock(keys::active_call_lock(call_uuid)).await?;
        let result = async {
            let Some(mut call) = self.get(call_uuid).await? else {
                return Ok(false);
            };
            call.connected_at = Some(store::epoch_seconds());
            if let Some(agent_id) = agent_id {
                call.agent_id = Some(agent_id.clone());
            }
            let raw = serde_json::to_string(&call).map_err(crate::store::StoreError::encode)?;
            self.store
                .backend()
                .hset(keys::ACTIVE_CALLS, call_uuid, &raw)
                .await?;
            Ok(true)
        }
        .await;
        lock.release().await;
        result
    }

    /// Atomically remove and return the record. The single hget+hdel
    /// round-trip is what guarantees one terminal record per uuid.
    pub async fn remove(&self, call_uuid: &str) -> Result<Option<ActiveCall>> {
        match self
            .store
            .backend()
            .hget_del(keys::ACTIVE_CALLS, call_uuid)
            .await?
        {
            Some(raw) => Ok(Some(crate::store::decode(keys::ACTIVE_CALLS, &raw)?)),
            None => Ok(None),
        }
    }

    /// Every in-flight call uuid.
    pub async fn uuids(&self) -> Result<std::collections::HashSet<String>> {
        let raw = self.store.backend().hgetall(keys::ACTIVE_CALLS).await?;
        Ok(raw.into_keys().collect())
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.store.backend().hgetall(keys::ACTIVE_CALLS).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_call(uuid: &str) -> ActiveCall {
        ActiveCall {
            call_uuid: uuid.to_string(),
            agent_id: None,
            phone_number: Some("923001112223".to_string()),
            payload: None,
            initiated_at: 1_700_000_000,
            connected_at: None,
            direction: CallDirection::Outbound,
            auto_bridge: false,
        }
    }

    #[tokio::test]
    async fn remove_returns_prior_value_exactly_once() {
        let calls = ActiveCalls::new(StateStore::in_memory());
        calls.insert(&sample_call("u-1")).await.unwrap();

        let taken = calls.remove("u-1").await.unwrap();
        assert_eq!(taken.map(|c| c.call_uuid), Some("u-1".to_string()));
        assert_eq!(calls.remove("u-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn mark_connected_attaches_agent_and_timestamp() {
        let calls = ActiveCalls::new(StateStore::in_memory());
        calls.insert(&sample_call("u-2")).await.unwrap();

        let agent = AgentId::from("a1");
        assert!(calls.mark_connected("u-2", Some(&agent)).await.unwrap());

        let call = calls.get("u-2").await.unwrap().unwrap();
        assert_eq!(call.agent_id, Some(agent));
        assert!(call.connected_at.is_some());

        // A vanished record reports false instead of failing.
        assert!(!calls.mark_connected("gone", None).await.unwrap());
    }
}
