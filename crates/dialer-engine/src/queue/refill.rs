//! Queue refill from the lead store
//!
//! Selects active campaigns that still have dialable pending leads in
//! segment priority order, builds queue snapshots, transitions the chosen
//! leads `pending -> in_queue` in one bulk update, and merges the new
//! buckets under the secondary-queue lock. A refill that loses the bulk
//! update race (zero rows transitioned) abandons its in-memory build, so
//! the operation is idempotent.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{LeadBuckets, QueueManager, QueuedLead, Segment, ACQUISITION_BUCKET};
use crate::agent::AgentId;
use crate::database::{DatabaseManager, DbCampaign, DbLead};
use crate::error::Result;

/// What one refill run accomplished.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefillOutcome {
    /// Campaigns scanned.
    pub campaigns: usize,
    /// Leads transitioned to in_queue and merged into buckets.
    pub leads_enqueued: usize,
    /// Agents newly eligible for the acquisition list.
    pub acquisition_agents: usize,
    /// True when a racing refill claimed the leads first.
    pub lost_race: bool,
}

/// Refills the secondary/acquisition buckets from the lead store.
#[derive(Clone)]
pub struct QueueRefiller {
    db: DatabaseManager,
    queues: QueueManager,
    acquisition_ttl: Duration,
}

impl QueueRefiller {
    pub fn new(db: DatabaseManager, queues: QueueManager, acquisition_ttl: Duration) -> Self {
        Self {
            db,
            queues,
            acquisition_ttl,
        }
    }

    /// Run one refill pass.
    pub async fn refill(&self) -> Result<RefillOutcome> {
        let mut campaigns = self.db.active_campaigns_with_pending().await?;
        campaigns.sort_by_key(|campaign| segment_rank(&campaign.segment));

        let mut outcome = RefillOutcome {
            campaigns: campaigns.len(),
            ..RefillOutcome::default()
        };

        let mut buckets = LeadBuckets::new();
        let mut acquisition_agents: Vec<AgentId> = Vec::new();
        let mut lead_ids: Vec<i64> = Vec::new();

        for campaign in &campaigns {
            let Some(segment) = Segment::from_wire(&campaign.segment) else {
                warn!(
                    "campaign {} has unknown segment {}; skipping",
                    campaign.campaign_id, campaign.segment
                );
                continue;
            };

            let bucket_id = match (segment, &campaign.agent_id) {
                (Segment::Acquisition, agent_id) => {
                    if let Some(agent_id) = agent_id {
                        let agent = AgentId::from(agent_id.as_str());
                        if !acquisition_agents.contains(&agent) {
                            acquisition_agents.push(agent);
                        }
                    }
                    ACQUISITION_BUCKET.to_string()
                }
                (_, Some(agent_id)) => agent_id.clone(),
                (_, None) => {
                    warn!(
                        "campaign {} has no assigned agent; skipping",
                        campaign.campaign_id
                    );
                    continue;
                }
            };

            let leads = self.db.pending_leads(campaign.id).await?;
            debug!(
                "campaign {} ({}): {} pending leads -> bucket {}",
                campaign.campaign_id,
                campaign.segment,
                leads.len(),
                bucket_id
            );
            for lead in &leads {
                lead_ids.push(lead.id);
                buckets
                    .entry(bucket_id.clone())
                    .or_default()
                    .push(snapshot(campaign, segment, lead));
            }
        }

        if lead_ids.is_empty() {
            return Ok(outcome);
        }

        let transitioned = self.db.mark_leads_in_queue(&lead_ids).await?;
        if transitioned == 0 {
            info!("refill lost the lead-claim race; abandoning {} snapshots", lead_ids.len());
            outcome.lost_race = true;
            return Ok(outcome);
        }

        let merged = self.queues.merge_secondary_buckets(buckets).await?;
        self.queues
            .add_acquisition_agents(&acquisition_agents, self.acquisition_ttl)
            .await?;

        outcome.leads_enqueued = merged;
        outcome.acquisition_agents = acquisition_agents.len();
        info!(
            "📥 Refilled queues: {} leads from {} campaigns ({} acquisition agents)",
            outcome.leads_enqueued, outcome.campaigns, outcome.acquisition_agents
        );
        Ok(outcome)
    }
}

fn segment_rank(segment: &str) -> u8 {
    match Segment::from_wire(segment) {
        Some(segment) => segment as u8,
        None => u8::MAX,
    }
}

/// Build the immutable queue snapshot of one lead.
fn snapshot(campaign: &DbCampaign, segment: Segment, lead: &DbLead) -> QueuedLead {
    QueuedLead {
        campaign_id: Some(campaign.id),
        campaign_name: Some(campaign.campaign_name.clone()),
        campaign_segment: Some(segment),
        lead_id: lead.id,
        source_lead_id: lead.source_lead_id.clone(),
        phone_number: lead.phone_number.clone(),
        customer_name: lead.customer_name.clone(),
        city: lead.city.clone(),
        customer_segment: lead.customer_segment.clone(),
        month_gmv: lead.month_gmv,
        overall_gmv: lead.overall_gmv,
        last_call_date: lead.last_call_date.map(|d| d.to_rfc3339()),
        last_order_details: parse_json_column(lead.last_order_details.as_deref()),
        metadata: parse_json_column(lead.metadata.as_deref()),
        enqueued_at: Utc::now().to_rfc3339(),
    }
}

fn parse_json_column(raw: Option<&str>) -> serde_json::Value {
    raw.and_then(|r| serde_json::from_str(r).ok())
        .unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Team;
    use crate::database::NewLead;
    use crate::store::StateStore;

    async fn seeded() -> (DatabaseManager, QueueManager, QueueRefiller) {
        let db = DatabaseManager::new_in_memory().await.unwrap();
        let queues = QueueManager::new(StateStore::in_memory());
        let refiller = QueueRefiller::new(db.clone(), queues.clone(), Duration::from_secs(3600));
        (db, queues, refiller)
    }

    async fn seed_lead(db: &DatabaseManager, id: i64, campaign: i64) {
        db.insert_lead(&NewLead {
            id,
            source_lead_id: format!("src-{id}"),
            phone_number: Some(format!("9230000000{id:02}")),
            customer_name: format!("customer {id}"),
            campaign_id: Some(campaign),
            max_attempts: 1,
            ..Default::default()
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn routes_by_segment_priority_and_marks_in_queue() {
        let (db, queues, refiller) = seeded().await;
        db.upsert_agent("a1", "1001", Team::Sales).await.unwrap();
        db.upsert_agent("a2", "1002", Team::Sales).await.unwrap();

        // Deliberately created out of priority order.
        let growth = db
            .create_campaign("C-growth", "Growth", "growth", Some("a1"), true)
            .await
            .unwrap();
        let follow_up = db
            .create_campaign("C-fu", "Follow up", "follow_up", Some("a1"), true)
            .await
            .unwrap();
        let acquisition = db
            .create_campaign("C-acq", "Acquisition", "acquisition", Some("a2"), true)
            .await
            .unwrap();

        seed_lead(&db, 1, growth).await;
        seed_lead(&db, 2, follow_up).await;
        seed_lead(&db, 3, acquisition).await;

        let outcome = refiller.refill().await.unwrap();
        assert_eq!(outcome.leads_enqueued, 3);
        assert!(!outcome.lost_race);

        let mapping = queues.secondary_mapping().await.unwrap();
        // Follow-up outranks growth inside a1's bucket.
        let a1_ids: Vec<i64> = mapping["a1"].iter().map(|l| l.lead_id).collect();
        assert_eq!(a1_ids, vec![2, 1]);
        // Acquisition leads land in the shared bucket and enable a2.
        let acq_ids: Vec<i64> = mapping[ACQUISITION_BUCKET].iter().map(|l| l.lead_id).collect();
        assert_eq!(acq_ids, vec![3]);
        assert_eq!(
            queues.acquisition_agents().await.unwrap(),
            vec![AgentId::from("a2")]
        );

        for id in [1, 2, 3] {
            assert_eq!(db.get_lead(id).await.unwrap().unwrap().status, "in_queue");
        }
    }

    #[tokio::test]
    async fn refill_is_idempotent() {
        let (db, queues, refiller) = seeded().await;
        db.upsert_agent("a1", "1001", Team::Sales).await.unwrap();
        let campaign = db
            .create_campaign("C-1", "Active", "active", Some("a1"), true)
            .await
            .unwrap();
        seed_lead(&db, 1, campaign).await;

        let first = refiller.refill().await.unwrap();
        assert_eq!(first.leads_enqueued, 1);

        // No leads returned to pending: the second run selects nothing.
        let second = refiller.refill().await.unwrap();
        assert_eq!(second.leads_enqueued, 0);
        assert_eq!(second.campaigns, 0);

        let mapping = queues.secondary_mapping().await.unwrap();
        assert_eq!(mapping["a1"].len(), 1);
    }

    #[tokio::test]
    async fn campaigns_without_agents_are_skipped() {
        let (db, queues, refiller) = seeded().await;
        let orphaned = db
            .create_campaign("C-orphan", "Orphan", "active", None, true)
            .await
            .unwrap();
        seed_lead(&db, 1, orphaned).await;

        let outcome = refiller.refill().await.unwrap();
        assert_eq!(outcome.leads_enqueued, 0);
        assert!(queues.secondary_mapping().await.unwrap().is_empty());
        // The lead stays pending for when the campaign gets an agent.
        assert_eq!(db.get_lead(1).await.unwrap().unwrap().status, "pending");
    }
}
