//! # Persistence Sink
//!
//! Terminal call records buffer in the COMPLETED_CALLS list and drain to
//! the lead store in debounced batches: the first hangup after a quiet
//! period arms a short-TTL flag and schedules a drain a few seconds out,
//! further hangups inside the window ride along for free. The drain
//! atomically takes the whole buffer, writes one call-log row per record
//! and applies three bulk lead-status updates.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, error, info, warn};

use crate::calls::CompletedCall;
use crate::database::{CallLogRow, DatabaseManager};
use crate::error::Result;
use crate::store::{decode, keys, StateStore};

/// Mapped terminal status of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Answered,
    Busy,
    NoAnswer,
    Failed,
    Cancelled,
    Invalid,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Answered => "answered",
            CallOutcome::Busy => "busy",
            CallOutcome::NoAnswer => "no_answer",
            CallOutcome::Failed => "failed",
            CallOutcome::Cancelled => "cancelled",
            CallOutcome::Invalid => "invalid",
        }
    }

    /// The lead status this outcome maps onto, for the outcomes that close
    /// a lead. Failed and cancelled calls leave the lead `in_queue`: their
    /// snapshots are re-dialed, not written off.
    pub fn lead_status(&self) -> Option<&'static str> {
        match self {
            CallOutcome::Answered => Some("completed"),
            CallOutcome::Busy | CallOutcome::NoAnswer => Some("not_answered"),
            CallOutcome::Invalid => Some("invalid"),
            CallOutcome::Failed | CallOutcome::Cancelled => None,
        }
    }
}

/// Fixed hangup-cause -> outcome mapping. Unknown causes map to None and
/// are logged by the drain; those records produce no call-log row.
pub fn map_hangup_cause(cause: &str) -> Option<CallOutcome> {
    match cause {
        "NORMAL_CLEARING" => Some(CallOutcome::Answered),
        "USER_BUSY" | "CALL_REJECTED" => Some(CallOutcome::Busy),
        "NO_ANSWER" | "NO_USER_RESPONSE" | "PROGRESS_TIMEOUT" => Some(CallOutcome::NoAnswer),
        "RECOVERY_ON_TIMER" | "LOSE_RACE" => Some(CallOutcome::Failed),
        "ORIGINATOR_CANCEL" => Some(CallOutcome::Cancelled),
        "UNALLOCATED_NUMBER" | "INVALID_NUMBER_FORMAT" | "NO_ROUTE_DESTINATION" => {
            Some(CallOutcome::Invalid)
        }
        _ => None,
    }
}

/// What one drain accomplished.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub records: usize,
    pub call_logs: usize,
    pub completed_leads: usize,
    pub not_answered_leads: usize,
    pub invalid_leads: usize,
}

/// Buffers terminal calls and flushes them to the lead store.
#[derive(Clone)]
pub struct PersistenceSink {
    store: StateStore,
    db: DatabaseManager,
    sync_delay: Duration,
}

impl PersistenceSink {
    pub fn new(store: StateStore, db: DatabaseManager, sync_delay: Duration) -> Self {
        Self {
            store,
            db,
            sync_delay,
        }
    }

    /// Append a terminal record to the buffer.
    pub async fn push(&self, call: &CompletedCall) -> Result<()> {
        let raw = serde_json::to_string(call).map_err(crate::store::StoreError::encode)?;
        Ok(self
            .store
            .backend()
            .rpush(keys::COMPLETED_CALLS, &raw)
            .await?)
    }

    /// Arm a debounced drain. When the single-flight flag is already held
    /// (by this worker or another), the call is a no-op.
    pub fn schedule_drain(&self) {
        let sink = self.clone();
        tokio::spawn(async move {
            match sink.store.try_flag(keys::SYNC_TO_DB_LOCK, Duration::from_secs(5)).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("persistence drain already scheduled; skipping");
                    return;
                }
                Err(e) => {
                    error!("failed to arm persistence drain: {}", e);
                    return;
                }
            }
            tokio::time::sleep(sink.sync_delay).await;
            if let Err(e) = sink.drain().await {
                error!("persistence drain failed: {}", e);
            }
        });
    }

    /// Take the whole buffer and write it out.
    pub async fn drain(&self) -> Result<DrainReport> {
        let lock = self
            .store
            .lock(keys::queue_lock(keys::COMPLETED_CALLS))
            .await?;
        let raw_records = self.store.backend().lrange_del(keys::COMPLETED_CALLS).await;
        lock.release().await;
        let raw_records = raw_records?;

        let mut report = DrainReport {
            records: raw_records.len(),
            ..DrainReport::default()
        };
        if raw_records.is_empty() {
            return Ok(report);
        }

        let now = Utc::now();
        // lead id -> terminal status; the last outcome for a lead wins,
        // matching the order calls ended.
        let mut lead_statuses: HashMap<i64, &'static str> = HashMap::new();

        for raw in &raw_records {
            let call: CompletedCall = match decode(keys::COMPLETED_CALLS, raw) {
                Ok(call) => call,
                Err(e) => {
                    warn!("skipping undecodable completed call: {}", e);
                    continue;
                }
            };

            let Some(outcome) = map_hangup_cause(&call.disconnect_reason) else {
                warn!(
                    "unmapped hangup cause {} on {}; no call log written",
                    call.disconnect_reason, call.call.call_uuid
                );
                continue;
            };

            let row = self.call_log_row(&call, outcome, now).await;
            if let Err(e) = self.db.insert_call_log(&row).await {
                error!("failed to write call log for {}: {}", call.call.call_uuid, e);
                continue;
            }
            report.call_logs += 1;

            if let (Some(payload), Some(status)) = (&call.call.payload, outcome.lead_status()) {
                lead_statuses.insert(payload.lead_id, status);
            }
        }

        let mut partitions: HashMap<&'static str, Vec<i64>> = HashMap::new();
        for (lead_id, status) in lead_statuses {
            partitions.entry(status).or_default().push(lead_id);
        }

        for (status, lead_ids) in partitions {
            match self.db.bulk_update_lead_status(&lead_ids, status, now).await {
                Ok(updated) => match status {
                    "completed" => report.completed_leads += updated as usize,
                    "not_answered" => report.not_answered_leads += updated as usize,
                    _ => report.invalid_leads += updated as usize,
                },
                Err(e) => error!("bulk lead update to {} failed: {}", status, e),
            }
        }

        info!(
            "💾 Drained {} completed calls ({} logs, {}/{}/{} leads completed/not answered/invalid)",
            report.records,
            report.call_logs,
            report.completed_leads,
            report.not_answered_leads,
            report.invalid_leads
        );
        Ok(report)
    }

    async fn call_log_row(
        &self,
        call: &CompletedCall,
        outcome: CallOutcome,
        now: DateTime<Utc>,
    ) -> CallLogRow {
        let agent_id = call.call.agent_id.as_ref().map(|a| a.as_str().to_string());
        let from_extension = match &agent_id {
            Some(agent_id) => match self.db.get_agent(agent_id).await {
                Ok(agent) => agent.map(|a| a.extension),
                Err(e) => {
                    warn!("extension lookup for {} failed: {}", agent_id, e);
                    None
                }
            },
            None => None,
        };

        CallLogRow {
            call_id: call.call.call_uuid.clone(),
            agent_id,
            lead_id: call.call.payload.as_ref().map(|p| p.lead_id),
            campaign_id: call.call.payload.as_ref().and_then(|p| p.campaign_id),
            from_extension,
            to_number: call.call.phone_number.clone(),
            status: Some(outcome.as_str().to_string()),
            disconnect_reason: call.disconnect_reason.clone(),
            direction: call.call.direction.as_str().to_string(),
            initiated_at: epoch_to_datetime(call.call.initiated_at),
            answered_at: call.call.connected_at.and_then(epoch_to_datetime),
            ended_at: epoch_to_datetime(call.ended_at).or(Some(now)),
            duration_seconds: i64::from(call.duration_seconds),
            attempt_number: 1,
        }
    }
}

fn epoch_to_datetime(epoch: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(epoch, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cause_mapping_matches_the_fixed_table() {
        assert_eq!(map_hangup_cause("NORMAL_CLEARING"), Some(CallOutcome::Answered));
        assert_eq!(map_hangup_cause("USER_BUSY"), Some(CallOutcome::Busy));
        assert_eq!(map_hangup_cause("CALL_REJECTED"), Some(CallOutcome::Busy));
        assert_eq!(map_hangup_cause("NO_ANSWER"), Some(CallOutcome::NoAnswer));
        assert_eq!(map_hangup_cause("NO_USER_RESPONSE"), Some(CallOutcome::NoAnswer));
        assert_eq!(map_hangup_cause("PROGRESS_TIMEOUT"), Some(CallOutcome::NoAnswer));
        assert_eq!(map_hangup_cause("RECOVERY_ON_TIMER"), Some(CallOutcome::Failed));
        assert_eq!(map_hangup_cause("LOSE_RACE"), Some(CallOutcome::Failed));
        assert_eq!(map_hangup_cause("ORIGINATOR_CANCEL"), Some(CallOutcome::Cancelled));
        assert_eq!(map_hangup_cause("UNALLOCATED_NUMBER"), Some(CallOutcome::Invalid));
        assert_eq!(map_hangup_cause("INVALID_NUMBER_FORMAT"), Some(CallOutcome::Invalid));
        assert_eq!(map_hangup_cause("NO_ROUTE_DESTINATION"), Some(CallOutcome::Invalid));
        assert_eq!(map_hangup_cause("AGENT_BUSY"), None);
        assert_eq!(map_hangup_cause("SOMETHING_ELSE"), None);
    }

    #[test]
    fn lead_status_partitions() {
        assert_eq!(CallOutcome::Answered.lead_status(), Some("completed"));
        assert_eq!(CallOutcome::Busy.lead_status(), Some("not_answered"));
        assert_eq!(CallOutcome::NoAnswer.lead_status(), Some("not_answered"));
        assert_eq!(CallOutcome::Invalid.lead_status(), Some("invalid"));
        assert_eq!(CallOutcome::Failed.lead_status(), None);
        assert_eq!(CallOutcome::Cancelled.lead_status(), None);
    }
}
