//! Call-progress event handlers
//!
//! One handler per event variant, all recovery-local: a failed transition
//! is logged and the call is either killed with a clearing cause the
//! hangup path understands, or left for the orphan reaper. No handler
//! error ever stops the event loop.

use tracing::{debug, error, info, warn};

use super::sync::PersistenceSink;
use super::{AnswerEvent, ExecuteEvent, HangupEvent, ParkEvent, SwitchEvent, REQUEUE_CAUSES};
use crate::agent::{AgentId, AgentRegistry, AgentStateMachine, Team};
use crate::calls::{ActiveCall, ActiveCalls, CompletedCall};
use crate::config::DialerConfig;
use crate::error::{DialerError, Result};
use crate::queue::{QueueManager, ACQUISITION_BUCKET};
use crate::store;
use crate::switch::SwitchAdapter;

/// Drives call/agent transitions from switch events.
pub struct EventHandler {
    config: DialerConfig,
    agents: AgentStateMachine,
    registry: AgentRegistry,
    queues: QueueManager,
    calls: ActiveCalls,
    switch: SwitchAdapter,
    sink: PersistenceSink,
}

impl EventHandler {
    pub fn new(
        config: DialerConfig,
        agents: AgentStateMachine,
        registry: AgentRegistry,
        queues: QueueManager,
        calls: ActiveCalls,
        switch: SwitchAdapter,
        sink: PersistenceSink,
    ) -> Self {
        Self {
            config,
            agents,
            registry,
            queues,
            calls,
            switch,
            sink,
        }
    }

    /// Dispatch one typed event.
    pub async fn handle(&self, event: SwitchEvent) -> Result<()> {
        match event {
            SwitchEvent::Answer(event) => self.on_answer(event).await,
            SwitchEvent::Hangup(event) => self.on_hangup(event).await,
            SwitchEvent::Park(event) => self.on_park(event).await,
            SwitchEvent::Execute(event) => self.on_execute(event).await,
        }
    }

    /// CHANNEL_ANSWER.
    ///
    /// With an other-leg uuid this is the agent leg joining a bridged
    /// flow: stamp `connected_at` on the customer call. Without one it is
    /// the lead picking up a parked predictive or acquisition call, and an
    /// agent has to be attached now.
    async fn on_answer(&self, event: AnswerEvent) -> Result<()> {
        if let Some(other_leg) = &event.other_leg {
            if !self.calls.mark_connected(other_leg, None).await? {
                debug!("second-leg answer for unknown call {}", other_leg);
            }
            return Ok(());
        }

        if event.direction != crate::calls::CallDirection::Outbound {
            debug!("ignoring inbound answer on {}", event.uuid);
            return Ok(());
        }

        if event.auto_bridge {
            // Priority path: the switch dialed the agent via &bridge; the
            // other-leg answer will stamp connected_at.
            debug!("auto-bridge call {} answered; waiting for agent leg", event.uuid);
            return Ok(());
        }

        match &event.agent_id {
            Some(agent_id) => self.bridge_reserved_agent(&event, agent_id).await,
            None => self.bridge_any_sales_agent(&event).await,
        }
    }

    /// Secondary path: the call carries its pre-assigned agent. That agent
    /// was reserved (busy, no call id) at originate time, so availability
    /// here means "not attached to a call yet": the first of the
    /// over-dialed rings to answer wins, the rest are killed.
    async fn bridge_reserved_agent(&self, event: &AnswerEvent, agent_id: &AgentId) -> Result<()> {
        let available = self.agents.is_idle(agent_id, false, true).await?;
        if !available {
            info!(
                "agent {} already on a call; killing {} with AGENT_BUSY",
                agent_id, event.uuid
            );
            self.switch.kill(&event.uuid, "AGENT_BUSY").await?;
            return Ok(());
        }

        self.connect_agent(agent_id, &event.uuid).await
    }

    /// Acquisition path: no pre-assigned agent. Pull the next idle sales
    /// agent, then secondary sales; nobody available kills the call.
    async fn bridge_any_sales_agent(&self, event: &AnswerEvent) -> Result<()> {
        let popped = match self.agents.next_available(Team::Sales).await? {
            Some(agent_id) => Some((agent_id, Team::Sales)),
            None => self
                .agents
                .next_available(Team::SecondarySales)
                .await?
                .map(|agent_id| (agent_id, Team::SecondarySales)),
        };

        let Some((agent_id, team)) = popped else {
            info!("no agent for acquisition answer {}; killing", event.uuid);
            self.switch.kill(&event.uuid, "NO_AVAILABLE_AGENT").await?;
            return Ok(());
        };

        if let Err(e) = self.connect_agent(&agent_id, &event.uuid).await {
            // The pop already removed the agent from its queue; put it
            // back so the miss costs nothing.
            self.agents.requeue(&agent_id, team).await?;
            return Err(e);
        }
        Ok(())
    }

    /// Bridge an agent onto an answered call and commit the busy state.
    /// A failed bridge kills the call with LOSE_RACE; the hangup handler
    /// re-enqueues the lead.
    async fn connect_agent(&self, agent_id: &AgentId, call_uuid: &str) -> Result<()> {
        let extension = self.registry.require_extension(agent_id).await?;

        if let Err(e) = self.switch.bridge(call_uuid, &extension).await {
            error!("bridge of {} to agent {} failed: {}", call_uuid, agent_id, e);
            self.switch.kill(call_uuid, "LOSE_RACE").await?;
            return Ok(());
        }

        if let Err(e) = self.agents.mark_busy(agent_id, Some(call_uuid)).await {
            // Agent logged out while bridging; the reaper reconciles the
            // dangling call.
            warn!("failed to mark {} busy after bridge: {}", agent_id, e);
            return Ok(());
        }
        self.calls.mark_connected(call_uuid, Some(agent_id)).await?;
        info!("✅ Agent {} connected to call {}", agent_id, call_uuid);
        Ok(())
    }

    /// CHANNEL_PARK, inbound: an IVR caller reached the park point.
    async fn on_park(&self, event: ParkEvent) -> Result<()> {
        if event.direction != crate::calls::CallDirection::Inbound {
            // Our own parked originations also emit PARK; nothing to do.
            debug!("ignoring outbound park on {}", event.uuid);
            return Ok(());
        }

        let team = match event.ivr_choice.as_deref() {
            Some("1") => Team::Support,
            Some("2") => Team::SecondarySales,
            other => {
                warn!("inbound park {} with unusable ivr choice {:?}", event.uuid, other);
                return Ok(());
            }
        };

        self.calls.insert(&ActiveCall::inbound(event.uuid.clone())).await?;

        if let Some(agent_id) = self.agents.next_available(team).await? {
            let extension = self.registry.require_extension(&agent_id).await?;
            self.agents.mark_busy(&agent_id, Some(&event.uuid)).await?;
            if let Err(e) = self.switch.transfer(&event.uuid, &extension).await {
                error!("transfer of {} to {} failed: {}", event.uuid, agent_id, e);
                // Undo the reservation and fall back to the waiting room.
                let _ = self.agents.mark_idle(&agent_id).await;
            } else {
                info!("📲 Inbound {} routed to {} agent {}", event.uuid, team, agent_id);
                return Ok(());
            }
        }

        self.queues.enqueue_waiting_customer(team, &event.uuid).await?;
        if let Err(e) = self
            .switch
            .transfer(&event.uuid, &self.config.general.waiting_room_extension)
            .await
        {
            error!("failed to move {} to the waiting room: {}", event.uuid, e);
        }
        info!("🕐 Inbound {} queued for the {} team", event.uuid, team);
        Ok(())
    }

    /// CHANNEL_EXECUTE with application=transfer: a warm transfer between
    /// agents. The transferor goes idle, the destination goes busy.
    async fn on_execute(&self, event: ExecuteEvent) -> Result<()> {
        if event.application != "transfer" {
            debug!("ignoring {} execute on {}", event.application, event.uuid);
            return Ok(());
        }

        let Some(destination) = event
            .application_data
            .as_deref()
            .and_then(|data| data.split_whitespace().next())
        else {
            warn!("transfer on {} without destination data", event.uuid);
            return Ok(());
        };

        if let Some(from_extension) = &event.transferor_extension {
            match self.registry.agent_by_extension(from_extension).await? {
                Some((agent_id, _)) => match self.agents.mark_idle(&agent_id).await {
                    Ok(_) => debug!("transferor {} freed", agent_id),
                    Err(DialerError::AgentAbsent(_)) => {
                        debug!("transferor {} already logged out", agent_id)
                    }
                    Err(e) => return Err(e),
                },
                None => warn!("transfer from unknown extension {}", from_extension),
            }
        }

        match self.registry.agent_by_extension(destination).await? {
            Some((agent_id, _)) => match self.agents.mark_busy(&agent_id, Some(&event.uuid)).await {
                Ok(()) => info!("↪️ Call {} transferred to agent {}", event.uuid, agent_id),
                Err(DialerError::AgentAbsent(_)) => {
                    warn!("transfer destination {} is logged out", agent_id)
                }
                Err(e) => return Err(e),
            },
            None => warn!("transfer to unknown extension {}", destination),
        }
        Ok(())
    }

    /// CHANNEL_HANGUP_COMPLETE: pop the active record atomically, route
    /// uncontacted leads back to the priority head, free the agent on a
    /// normal clearing, and feed the terminal record to the sink.
    async fn on_hangup(&self, event: HangupEvent) -> Result<()> {
        let record = self.calls.remove(&event.uuid).await?;

        let agent_id = event
            .agent_id
            .clone()
            .or_else(|| record.as_ref().and_then(|r| r.agent_id.clone()));

        if REQUEUE_CAUSES.contains(&event.cause.as_str()) {
            if let Some(payload) = record.as_ref().and_then(|r| r.payload.clone()) {
                let bucket = agent_id
                    .as_ref()
                    .map(|a| a.as_str().to_string())
                    .unwrap_or_else(|| ACQUISITION_BUCKET.to_string());
                self.queues.push_priority_front(&bucket, payload).await?;
                info!(
                    "↩️ Requeued lead from {} to priority head of {}",
                    event.uuid, bucket
                );
            }
        }

        if event.cause == "NORMAL_CLEARING" {
            if let Some(agent_id) = &agent_id {
                match self.agents.mark_idle(agent_id).await {
                    Ok(_) => debug!("agent {} freed after {}", agent_id, event.uuid),
                    Err(DialerError::AgentAbsent(_)) => {
                        debug!("agent {} logged out before call end", agent_id)
                    }
                    Err(e) => warn!("failed to free agent {}: {}", agent_id, e),
                }
            }
        }

        let Some(mut call) = record else {
            // Agent legs and already-reconciled channels have no record.
            debug!("hangup for untracked channel {}", event.uuid);
            return Ok(());
        };

        call.direction = event.direction;
        if call.agent_id.is_none() {
            call.agent_id = agent_id;
        }
        let completed = CompletedCall {
            call,
            ended_at: event.ended_at.unwrap_or_else(store::epoch_seconds),
            disconnect_reason: event.cause.clone(),
            duration_seconds: event.duration_seconds.unwrap_or(0),
        };

        self.sink.push(&completed).await?;
        self.sink.schedule_drain();
        Ok(())
    }
}
