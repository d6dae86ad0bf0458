//! The dialer tick
//!
//! One cycle: take the fleet-wide execution lock, reconcile orphans,
//! compute the idle set from the state map, then drain the three lead
//! collections in strict order: priority (1:1, auto-bridge), secondary
//! (over-dialed, parked), acquisition (shared bucket, parked, no
//! pre-assigned agent), then schedule a refill when any secondary
//! bucket runs low.
//!
//! Failure policy: a pass that cannot take its queue lock is skipped for
//! this tick; a lead without a phone number is dropped from its queue; a
//! rejected originate leaves the lead at the head for the next tick. No
//! error stops the tick schedule.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::core::DialerEngine;
use crate::agent::{AgentId, Team};
use crate::calls::ActiveCall;
use crate::error::Result;
use crate::queue::{QueuedLead, ACQUISITION_BUCKET};
use crate::store::keys;
use crate::switch::OriginateRequest;

/// What one tick accomplished.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Another worker held the execution lock.
    pub skipped: bool,
    pub reaped: usize,
    pub priority_calls: usize,
    pub secondary_calls: usize,
    pub acquisition_calls: usize,
    pub refill_scheduled: bool,
}

impl TickReport {
    pub fn calls_dialed(&self) -> usize {
        self.priority_calls + self.secondary_calls + self.acquisition_calls
    }
}

impl DialerEngine {
    /// Run one dialer cycle. Never propagates pass-level failures; they
    /// are logged and retried on the next tick.
    pub async fn run_dialer_tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();

        let token = Uuid::new_v4().to_string();
        let ttl = Duration::from_secs(self.config.dialing.execution_lock_ttl_secs);
        if !self
            .store
            .backend()
            .set_nx_ex(keys::DIALER_EXECUTION_LOCK, &token, ttl)
            .await?
        {
            debug!("another worker holds the dialer execution lock; skipping tick");
            report.skipped = true;
            return Ok(report);
        }

        self.tick_body(&mut report).await;

        if let Err(e) = self
            .store
            .backend()
            .del_if_equals(keys::DIALER_EXECUTION_LOCK, &token)
            .await
        {
            warn!("failed to release execution lock: {}", e);
        }

        let mut counters = self.counters.write().await;
        counters.ticks += 1;
        counters.calls_dialed += report.calls_dialed() as u64;
        counters.agents_reaped += report.reaped as u64;
        drop(counters);

        if report.calls_dialed() > 0 || report.reaped > 0 {
            info!(
                "🔄 Tick: {} priority, {} secondary, {} acquisition calls; {} reaped",
                report.priority_calls,
                report.secondary_calls,
                report.acquisition_calls,
                report.reaped
            );
        }
        Ok(report)
    }

    async fn tick_body(&self, report: &mut TickReport) {
        report.reaped = match self.run_reaper().await {
            Ok(reaped) => reaped,
            Err(e) => {
                error!("reaper failed: {}", e);
                0
            }
        };

        let idle: HashSet<String> = match self.agents.idle_agent_ids().await {
            Ok(agents) => agents.into_iter().map(|a| a.0).collect(),
            Err(e) => {
                error!("failed to compute idle set: {}", e);
                return;
            }
        };
        if idle.is_empty() {
            debug!("no idle agents this tick");
            return;
        }

        report.priority_calls = match self.priority_pass(&idle).await {
            Ok(dialed) => dialed,
            Err(e) => {
                error!("priority pass failed: {}", e);
                0
            }
        };

        let multiplier = self.config.dialing.dial_multiplier();
        report.secondary_calls = match self.secondary_pass(&idle, multiplier).await {
            Ok(dialed) => dialed,
            Err(e) => {
                error!("secondary pass failed: {}", e);
                0
            }
        };

        report.acquisition_calls = match self.acquisition_pass(&idle, multiplier).await {
            Ok(dialed) => dialed,
            Err(e) => {
                error!("acquisition pass failed: {}", e);
                0
            }
        };

        match self
            .queues
            .needs_refill(self.config.dialing.refill_threshold)
            .await
        {
            Ok(true) => {
                report.refill_scheduled = true;
                self.spawn_refill();
            }
            Ok(false) => {}
            Err(e) => error!("refill check failed: {}", e),
        }
    }

    /// Priority pass: at most one auto-bridged call per idle agent with a
    /// non-empty bucket. Bucket `0` is shared; it dials for whichever
    /// sales agent is at the front of the idle queue.
    async fn priority_pass(&self, idle: &HashSet<String>) -> Result<usize> {
        let lock = self.queues.lock_priority().await?;

        let result = async {
            let mut mapping = self.queues.priority_mapping().await?;
            let mut dialed = 0usize;
            let mut changed = false;

            let buckets: Vec<String> = mapping.keys().cloned().collect();
            for bucket in buckets {
                let Some(leads) = mapping.get(&bucket) else {
                    continue;
                };
                if leads.is_empty() {
                    continue;
                }

                let agent_id = if bucket == ACQUISITION_BUCKET {
                    match self.agents.peek_next_available(Team::Sales).await? {
                        Some(agent_id) => agent_id,
                        None => {
                            debug!("no sales agent for the shared priority bucket");
                            continue;
                        }
                    }
                } else {
                    AgentId::from(bucket.as_str())
                };

                if !idle.contains(agent_id.as_str()) {
                    continue;
                }
                if !self.agents.is_idle_for_dialing(&agent_id).await? {
                    continue;
                }

                let lead = mapping.get(&bucket).and_then(|l| l.first().cloned());
                let Some(lead) = lead else { continue };

                let Some(phone) = lead.phone_number.clone().filter(|p| !p.is_empty()) else {
                    warn!("priority lead {} has no phone number; dropping", lead.lead_id);
                    if let Some(leads) = mapping.get_mut(&bucket) {
                        leads.remove(0);
                    }
                    changed = true;
                    continue;
                };

                let extension = match self.registry.require_extension(&agent_id).await {
                    Ok(extension) => extension,
                    Err(e) => {
                        error!("no extension for {}: {}", agent_id, e);
                        continue;
                    }
                };

                let request = OriginateRequest::auto_bridge(
                    Uuid::new_v4().to_string(),
                    agent_id.clone(),
                    extension,
                    phone,
                    stripped(&lead),
                );

                match self.originate_call(request).await {
                    Ok(call_uuid) => {
                        if let Some(leads) = mapping.get_mut(&bucket) {
                            leads.remove(0);
                        }
                        changed = true;
                        dialed += 1;
                        if let Err(e) = self.agents.mark_busy(&agent_id, Some(&call_uuid)).await {
                            // The ringing call lands on the answer/hangup
                            // handlers; no further originates for this
                            // agent this tick.
                            warn!("mark busy after originate failed for {}: {}", agent_id, e);
                        }
                    }
                    Err(e) => {
                        error!("priority originate for {} failed: {}", agent_id, e);
                    }
                }
            }

            if changed {
                self.queues.store_priority_mapping(&mapping).await?;
            }
            Ok(dialed)
        }
        .await;

        lock.release().await;
        result
    }

    /// Secondary pass: up to `multiplier` parked calls per idle agent
    /// with a pre-assigned agent header; the agent is reserved (busy, no
    /// call id) on the first successful originate.
    async fn secondary_pass(&self, idle: &HashSet<String>, multiplier: usize) -> Result<usize> {
        let lock = self.queues.lock_secondary().await?;

        let result = async {
            let mapping = self.queues.secondary_mapping().await?;
            let mut dialed_total = 0usize;

            for (bucket, leads) in mapping {
                if bucket == ACQUISITION_BUCKET || leads.is_empty() {
                    continue;
                }
                if !idle.contains(bucket.as_str()) {
                    continue;
                }
                let agent_id = AgentId::from(bucket.as_str());
                if !self.agents.is_idle_for_dialing(&agent_id).await? {
                    continue;
                }

                let before = leads.len();
                let (dialed, remaining) = self
                    .dial_parked_batch(&agent_id, true, true, leads, multiplier)
                    .await;
                if dialed > 0 || remaining.len() != before {
                    self.queues.store_secondary_bucket(&bucket, &remaining).await?;
                }
                dialed_total += dialed;
            }
            Ok(dialed_total)
        }
        .await;

        lock.release().await;
        result
    }

    /// Acquisition pass: parked calls from the shared bucket, originated
    /// without an agent header and without reserving anyone; the answer
    /// handler pulls whichever agent is then at the front of the idle
    /// queue. The eligible idle agents only size the burst.
    async fn acquisition_pass(&self, idle: &HashSet<String>, multiplier: usize) -> Result<usize> {
        let enabled = self.queues.acquisition_agents().await?;
        let eligible: Vec<AgentId> = enabled
            .into_iter()
            .filter(|agent| idle.contains(agent.as_str()))
            .collect();
        if eligible.is_empty() {
            return Ok(0);
        }

        let lock = self.queues.lock_secondary().await?;

        let result = async {
            let mut bucket = self.queues.secondary_bucket(ACQUISITION_BUCKET).await?;
            let before = bucket.len();
            let mut dialed_total = 0usize;

            for agent_id in eligible {
                if bucket.is_empty() {
                    break;
                }
                if !self.agents.is_idle_for_dialing(&agent_id).await? {
                    continue;
                }
                let (dialed, remaining) = self
                    .dial_parked_batch(&agent_id, false, false, bucket, multiplier)
                    .await;
                bucket = remaining;
                dialed_total += dialed;
            }

            if dialed_total > 0 || bucket.len() != before {
                self.queues
                    .store_secondary_bucket(ACQUISITION_BUCKET, &bucket)
                    .await?;
            }
            Ok(dialed_total)
        }
        .await;

        lock.release().await;
        result
    }

    /// Dial up to `multiplier` parked calls from one bucket. When
    /// `attach_agent` is set the calls carry the agent header so the
    /// answer handler bridges that specific agent; when `reserve` is set
    /// the agent is marked busy (no call id) on the first success so
    /// later passes cannot double-book it.
    async fn dial_parked_batch(
        &self,
        agent_id: &AgentId,
        attach_agent: bool,
        reserve: bool,
        leads: Vec<QueuedLead>,
        multiplier: usize,
    ) -> (usize, Vec<QueuedLead>) {
        let mut queue: VecDeque<QueuedLead> = leads.into();
        let mut dialed = 0usize;
        let mut reserved = !reserve;

        let attempts = multiplier.min(queue.len());
        for _ in 0..attempts {
            let Some(lead) = queue.front().cloned() else { break };

            let Some(phone) = lead.phone_number.clone().filter(|p| !p.is_empty()) else {
                warn!("lead {} has no phone number; dropping from queue", lead.lead_id);
                queue.pop_front();
                continue;
            };

            let request = OriginateRequest::parked(
                Uuid::new_v4().to_string(),
                attach_agent.then(|| agent_id.clone()),
                phone,
                stripped(&lead),
            );

            match self.originate_call(request).await {
                Ok(_) => {
                    if !reserved {
                        if let Err(e) = self.agents.mark_busy(agent_id, None).await {
                            // Without the reservation further calls would
                            // double-book the agent; keep the rest queued.
                            warn!("failed to reserve agent {}: {}", agent_id, e);
                            queue.pop_front();
                            dialed += 1;
                            return (dialed, queue.into_iter().collect());
                        }
                        reserved = true;
                    }
                    queue.pop_front();
                    dialed += 1;
                }
                Err(e) => {
                    // Lead stays at the head for the next attempt/tick.
                    error!("parked originate for {} failed: {}", agent_id, e);
                }
            }
        }

        (dialed, queue.into_iter().collect())
    }

    /// Place the call and record it in ACTIVE_CALLS.
    async fn originate_call(&self, request: OriginateRequest) -> Result<String> {
        let call_uuid = self.switch.originate(&request).await?;
        let call = ActiveCall::outbound(
            call_uuid.clone(),
            request.agent_id.clone(),
            request.phone_number.clone(),
            request.lead.clone(),
            request.auto_bridge,
        );
        self.calls.insert(&call).await?;
        Ok(call_uuid)
    }
}

/// Queue snapshot minus the wide fields; what rides in the active-call
/// record and on the wire.
fn stripped(lead: &QueuedLead) -> QueuedLead {
    let mut lead = lead.clone();
    lead.last_order_details = serde_json::Value::Null;
    lead.metadata = serde_json::Value::Null;
    lead
}
