//! Waiting-room loop
//!
//! Matches parked inbound customers to newly idle team agents. Runs
//! continuously with a short sleep between iterations (a longer one after
//! an error); each pass bridges at most one waiting customer per team.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::core::DialerEngine;
use crate::agent::Team;
use crate::error::Result;

/// Teams that take inbound callers out of the waiting room.
const WAITING_TEAMS: [Team; 2] = [Team::Support, Team::SecondarySales];

impl DialerEngine {
    /// One waiting-room iteration. Returns the number of customers
    /// bridged.
    pub async fn waiting_room_pass(&self) -> Result<usize> {
        let mut bridged = 0usize;

        for team in WAITING_TEAMS {
            let Some(call_uuid) = self.queues.peek_waiting_customer(team).await? else {
                continue;
            };
            let Some(agent_id) = self.agents.next_available(team).await? else {
                continue;
            };

            let extension = match self.registry.require_extension(&agent_id).await {
                Ok(extension) => extension,
                Err(e) => {
                    error!("no extension for waiting-room agent {}: {}", agent_id, e);
                    self.agents.requeue(&agent_id, team).await?;
                    continue;
                }
            };

            if let Err(e) = self.agents.mark_busy(&agent_id, Some(&call_uuid)).await {
                warn!("failed to reserve {} for waiting customer: {}", agent_id, e);
                self.agents.requeue(&agent_id, team).await?;
                continue;
            }

            match self.switch.bridge(&call_uuid, &extension).await {
                Ok(()) => {
                    self.queues.pop_waiting_customer(team).await?;
                    self.calls.mark_connected(&call_uuid, Some(&agent_id)).await?;
                    info!("🤝 Waiting customer {} bridged to agent {}", call_uuid, agent_id);
                    bridged += 1;
                }
                Err(e) => {
                    // The customer stays parked; free the agent again.
                    error!("waiting-room bridge of {} failed: {}", call_uuid, e);
                    let _ = self.agents.mark_idle(&agent_id).await;
                }
            }
        }

        Ok(bridged)
    }

    /// Run the waiting-room loop until the task is aborted.
    pub async fn run_waiting_room_loop(self: Arc<Self>) {
        info!("🕐 Waiting-room loop started");
        let sleep = Duration::from_secs(self.config.dialing.waiting_room_sleep_secs);
        let error_sleep = Duration::from_secs(self.config.dialing.waiting_room_error_sleep_secs);

        loop {
            match self.waiting_room_pass().await {
                Ok(_) => tokio::time::sleep(sleep).await,
                Err(e) => {
                    error!("waiting-room pass failed: {}", e);
                    tokio::time::sleep(error_sleep).await;
                }
            }
        }
    }
}
