//! Lock-protected agent state transitions
//!
//! Every read-modify-write of an agent's state row runs under that agent's
//! `AGENT_STATE_LOCK:<id>` with the bounded-blocking contract, and the row
//! update plus the idle-queue membership change are issued as one
//! pipelined round-trip so a crash between them cannot strand the agent.
//!
//! The absence of a state row IS the logged-out state; `mark_busy` and
//! `mark_idle` on an absent row fail with [`DialerError::AgentAbsent`].

use std::collections::HashMap;

use tracing::{debug, warn};

use super::{Activity, AgentId, AgentRecord, Team};
use crate::error::{DialerError, Result};
use crate::store::{self, decode, keys, StateStore, StoreError};

/// Agent state machine over the shared state store.
#[derive(Clone)]
pub struct AgentStateMachine {
    store: StateStore,
}

impl AgentStateMachine {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Log an agent in (or re-mark an existing one available).
    ///
    /// Creates the state row when missing, resets it to idle otherwise,
    /// and (re-)inserts the agent at the back of its team's idle queue.
    pub async fn login(&self, agent_id: &AgentId, team: Team) -> Result<AgentRecord> {
        let lock = self.store.lock(keys::agent_state_lock(agent_id.as_str())).await?;

        let result = async {
            let record = match self.fetch(agent_id).await? {
                Some(mut existing) => {
                    existing.state = Activity::Idle;
                    existing.current_call_id = None;
                    existing.call_initiated_at = None;
                    existing
                }
                None => AgentRecord::logged_in(team),
            };

            let raw = serde_json::to_string(&record).map_err(StoreError::encode)?;
            self.store
                .backend()
                .hset_zadd(
                    keys::AGENT_STATES,
                    agent_id.as_str(),
                    &raw,
                    record.team.idle_queue_key(),
                    agent_id.as_str(),
                    store::epoch_seconds_f64(),
                )
                .await?;
            debug!("agent {} logged in to {} queue", agent_id, record.team);
            Ok(record)
        }
        .await;

        lock.release().await;
        result
    }

    /// Remove the agent's state row and idle-queue membership.
    ///
    /// Returns false when the agent was already logged out.
    pub async fn logout(&self, agent_id: &AgentId) -> Result<bool> {
        let lock = self.store.lock(keys::agent_state_lock(agent_id.as_str())).await?;

        let result = async {
            let Some(record) = self.fetch(agent_id).await? else {
                return Ok(false);
            };
            self.store
                .backend()
                .hdel_zrem(
                    keys::AGENT_STATES,
                    agent_id.as_str(),
                    record.team.idle_queue_key(),
                    agent_id.as_str(),
                )
                .await?;
            debug!("agent {} logged out", agent_id);
            Ok(true)
        }
        .await;

        lock.release().await;
        result
    }

    /// Transition to busy and leave the idle queue.
    ///
    /// With no call id the record keeps `call_initiated_at` instead, so a
    /// predictive assignment that never answers can be timed out by the
    /// reaper.
    pub async fn mark_busy(&self, agent_id: &AgentId, call_id: Option<&str>) -> Result<()> {
        let lock = self.store.lock(keys::agent_state_lock(agent_id.as_str())).await?;

        let result = async {
            let Some(mut record) = self.fetch(agent_id).await? else {
                return Err(DialerError::AgentAbsent(agent_id.to_string()));
            };

            record.state = Activity::Busy;
            record.current_call_id = call_id.map(str::to_string);
            record.call_initiated_at = match call_id {
                Some(_) => None,
                None => Some(store::epoch_seconds()),
            };

            let raw = serde_json::to_string(&record).map_err(StoreError::encode)?;
            self.store
                .backend()
                .hset_zrem(
                    keys::AGENT_STATES,
                    agent_id.as_str(),
                    &raw,
                    record.team.idle_queue_key(),
                    agent_id.as_str(),
                )
                .await?;
            Ok(())
        }
        .await;

        lock.release().await;
        result
    }

    /// Transition back to idle and rejoin the team queue at the back.
    pub async fn mark_idle(&self, agent_id: &AgentId) -> Result<AgentRecord> {
        let lock = self.store.lock(keys::agent_state_lock(agent_id.as_str())).await?;

        let result = async {
            let Some(mut record) = self.fetch(agent_id).await? else {
                return Err(DialerError::AgentAbsent(agent_id.to_string()));
            };

            record.state = Activity::Idle;
            record.current_call_id = None;
            record.call_initiated_at = None;

            let raw = serde_json::to_string(&record).map_err(StoreError::encode)?;
            self.store
                .backend()
                .hset_zadd(
                    keys::AGENT_STATES,
                    agent_id.as_str(),
                    &raw,
                    record.team.idle_queue_key(),
                    agent_id.as_str(),
                    store::epoch_seconds_f64(),
                )
                .await?;
            Ok(record)
        }
        .await;

        lock.release().await;
        result
    }

    /// Check idleness under the agent's lock. An absent row is never idle.
    pub async fn is_idle(
        &self,
        agent_id: &AgentId,
        check_state: bool,
        check_call: bool,
    ) -> Result<bool> {
        let lock = self.store.lock(keys::agent_state_lock(agent_id.as_str())).await?;

        let result = async {
            let Some(record) = self.fetch(agent_id).await? else {
                return Ok(false);
            };
            if check_state && record.state != Activity::Idle {
                return Ok(false);
            }
            if check_call && record.current_call_id.is_some() {
                return Ok(false);
            }
            Ok(true)
        }
        .await;

        lock.release().await;
        result
    }

    /// The one idleness predicate used for dialing decisions.
    pub async fn is_idle_for_dialing(&self, agent_id: &AgentId) -> Result<bool> {
        self.is_idle(agent_id, true, true).await
    }

    /// Pop the least-recently-idle agent of a team (FIFO by last-idle
    /// time). Returns None when the queue is empty.
    pub async fn next_available(&self, team: Team) -> Result<Option<AgentId>> {
        let popped = self.store.backend().zpopmin(team.idle_queue_key()).await?;
        Ok(popped.map(|(member, _)| AgentId(member)))
    }

    /// Non-destructive variant of [`next_available`](Self::next_available).
    pub async fn peek_next_available(&self, team: Team) -> Result<Option<AgentId>> {
        let member = self.store.backend().zrange_first(team.idle_queue_key()).await?;
        Ok(member.map(AgentId))
    }

    /// Put an agent back into its team's idle queue without touching the
    /// state row (undo of a failed pop).
    pub async fn requeue(&self, agent_id: &AgentId, team: Team) -> Result<()> {
        self.store
            .backend()
            .zadd(
                team.idle_queue_key(),
                agent_id.as_str(),
                store::epoch_seconds_f64(),
            )
            .await?;
        Ok(())
    }

    /// Look up a single state row (no lock; point-in-time read).
    pub async fn record(&self, agent_id: &AgentId) -> Result<Option<AgentRecord>> {
        Ok(self.fetch(agent_id).await?)
    }

    /// Snapshot of every agent's state row. Undecodable rows are logged
    /// and skipped, never fatal.
    pub async fn all_records(&self) -> Result<HashMap<AgentId, AgentRecord>> {
        let raw = self.store.backend().hgetall(keys::AGENT_STATES).await?;
        let mut records = HashMap::with_capacity(raw.len());
        for (agent_id, value) in raw {
            match decode::<AgentRecord>(keys::AGENT_STATES, &value) {
                Ok(record) => {
                    records.insert(AgentId(agent_id), record);
                }
                Err(e) => warn!("skipping bad agent record for {}: {}", agent_id, e),
            }
        }
        Ok(records)
    }

    /// Agents currently dialable, computed from the state map rather than
    /// the idle queues to avoid racing a mid-flight originate.
    pub async fn idle_agent_ids(&self) -> Result<Vec<AgentId>> {
        let records = self.all_records().await?;
        Ok(records
            .into_iter()
            .filter(|(_, record)| record.idle_for_dialing())
            .map(|(id, _)| id)
            .collect())
    }

    async fn fetch(&self, agent_id: &AgentId) -> Result<Option<AgentRecord>> {
        Ok(self
            .store
            .hget_json::<AgentRecord>(keys::AGENT_STATES, agent_id.as_str())
            .await?)
    }
}
