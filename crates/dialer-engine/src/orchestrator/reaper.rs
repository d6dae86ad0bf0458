//! Orphan reaper
//!
//! Reconciles agent state against the live call set at the top of every
//! tick. Two ways an agent gets stuck in busy: its call record vanished
//! without the hangup path freeing it, or a predictive reservation never
//! produced an answer inside the ring window. Both are forced back to
//! idle; the tick never aborts on reaper errors.

use tracing::{debug, error, info, warn};

use super::core::DialerEngine;
use crate::agent::Activity;
use crate::error::{DialerError, Result};
use crate::store;

impl DialerEngine {
    /// Scan every agent record and release the stuck ones. Returns the
    /// number of agents reclaimed.
    pub async fn run_reaper(&self) -> Result<usize> {
        let records = self.agents.all_records().await?;
        let live_calls = self.calls.uuids().await?;
        let now = store::epoch_seconds();
        let ring_window = self.config.dialing.ring_window_secs;

        let mut reaped = 0usize;
        for (agent_id, record) in records {
            if record.state != Activity::Busy {
                continue;
            }

            let stuck = match (&record.current_call_id, record.call_initiated_at) {
                // The call this agent is attached to no longer exists.
                (Some(call_id), _) => !live_calls.contains(call_id),
                // Predictive reservation older than the ring window.
                (None, Some(initiated_at)) => now - initiated_at > ring_window,
                (None, None) => {
                    warn!("agent {} busy with neither call nor timer", agent_id);
                    true
                }
            };
            if !stuck {
                continue;
            }

            match self.agents.mark_idle(&agent_id).await {
                Ok(_) => {
                    debug!("reaper released agent {}", agent_id);
                    reaped += 1;
                }
                Err(DialerError::AgentAbsent(_)) => {
                    debug!("agent {} logged out before the reaper got to it", agent_id)
                }
                Err(e) => error!("reaper failed to release {}: {}", agent_id, e),
            }
        }

        if reaped > 0 {
            info!("♻️ Reaper returned {} stuck agents to idle", reaped);
        }
        Ok(reaped)
    }
}
