//! # Lead/Campaign Store (sqlx + SQLite)
//!
//! Narrow data-access layer the dialer core reads pending leads from and
//! writes terminal call facts to. Fully async through sqlx with runtime
//! queries; migrations are embedded and run at connection time.
//!
//! Ownership boundaries: the core transitions leads `pending -> in_queue`
//! at refill time and `in_queue -> terminal` at drain time, and inserts
//! one call-log row per completed call. Campaign and lead creation belong
//! to the administrative surface and only appear here as seeding helpers.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::agent::Team;

/// Main database manager using sqlx for async operations
#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// Create a new database manager with automatic migrations
    pub async fn new(database_url: &str) -> Result<Self> {
        info!("🗄️ Initializing lead store: {}", database_url);

        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        Self::with_pool(pool).await
    }

    /// Create an in-memory database for testing.
    ///
    /// A pooled `sqlite::memory:` hands every pooled connection its own
    /// blank database, so the pool is pinned to one long-lived
    /// connection.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| anyhow!("Failed to open in-memory database: {}", e))?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| anyhow!("Failed to run migrations: {}", e))?;

        info!("✅ Lead store initialized");
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Agent row
#[derive(Debug, Clone)]
pub struct DbAgent {
    pub agent_id: String,
    pub extension: String,
    pub team: String,
    pub active: bool,
}

impl DbAgent {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self> {
        Ok(DbAgent {
            agent_id: row.try_get("agent_id")?,
            extension: row.try_get("extension")?,
            team: row.try_get("team")?,
            active: row.try_get::<i64, _>("active")? != 0,
        })
    }
}

/// Campaign row
#[derive(Debug, Clone)]
pub struct DbCampaign {
    pub id: i64,
    pub campaign_id: String,
    pub campaign_name: String,
    pub segment: String,
    pub agent_id: Option<String>,
    pub active: bool,
}

impl DbCampaign {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self> {
        Ok(DbCampaign {
            id: row.try_get("id")?,
            campaign_id: row.try_get("campaign_id")?,
            campaign_name: row.try_get("campaign_name")?,
            segment: row.try_get("segment")?,
            agent_id: row.try_get("agent_id")?,
            active: row.try_get::<i64, _>("active")? != 0,
        })
    }
}

/// Lead row
#[derive(Debug, Clone)]
pub struct DbLead {
    pub id: i64,
    pub source_lead_id: String,
    pub phone_number: Option<String>,
    pub customer_name: String,
    pub city: Option<String>,
    pub campaign_id: Option<i64>,
    pub customer_segment: Option<String>,
    pub month_gmv: Option<f64>,
    pub overall_gmv: Option<f64>,
    pub last_call_date: Option<DateTime<Utc>>,
    pub last_order_details: Option<String>,
    pub metadata: Option<String>,
    pub status: String,
    pub attempt_count: i64,
    pub max_attempts: i64,
}

impl DbLead {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self> {
        Ok(DbLead {
            id: row.try_get("id")?,
            source_lead_id: row.try_get("source_lead_id")?,
            phone_number: row.try_get("phone_number")?,
            customer_name: row.try_get("customer_name")?,
            city: row.try_get("city")?,
            campaign_id: row.try_get("campaign_id")?,
            customer_segment: row.try_get("customer_segment")?,
            month_gmv: row.try_get("month_gmv")?,
            overall_gmv: row.try_get("overall_gmv")?,
            last_call_date: row.try_get("last_call_date")?,
            last_order_details: row.try_get("last_order_details")?,
            metadata: row.try_get("metadata")?,
            status: row.try_get("status")?,
            attempt_count: row.try_get("attempt_count")?,
            max_attempts: row.try_get("max_attempts")?,
        })
    }
}

/// New lead for seeding/import
#[derive(Debug, Clone, Default)]
pub struct NewLead {
    pub id: i64,
    pub source_lead_id: String,
    pub phone_number: Option<String>,
    pub customer_name: String,
    pub city: Option<String>,
    pub campaign_id: Option<i64>,
    pub customer_segment: Option<String>,
    pub month_gmv: Option<f64>,
    pub overall_gmv: Option<f64>,
    pub max_attempts: i64,
}

/// Terminal call fact written by the persistence drain
#[derive(Debug, Clone)]
pub struct CallLogRow {
    pub call_id: String,
    pub agent_id: Option<String>,
    pub lead_id: Option<i64>,
    pub campaign_id: Option<i64>,
    pub from_extension: Option<String>,
    pub to_number: Option<String>,
    pub status: Option<String>,
    pub disconnect_reason: String,
    pub direction: String,
    pub initiated_at: Option<DateTime<Utc>>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: i64,
    pub attempt_number: i64,
}

// Agent operations
impl DatabaseManager {
    /// Register or update an agent's extension and team
    pub async fn upsert_agent(&self, agent_id: &str, extension: &str, team: Team) -> Result<()> {
        sqlx::query(
            "INSERT INTO agents (agent_id, extension, team, active)
             VALUES (?, ?, ?, 1)
             ON CONFLICT(agent_id) DO UPDATE SET
                extension = excluded.extension,
                team = excluded.team,
                updated_at = datetime('now')",
        )
        .bind(agent_id)
        .bind(extension)
        .bind(team.as_str())
        .execute(&self.pool)
        .await?;

        debug!("agent {} upserted with extension {}", agent_id, extension);
        Ok(())
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<DbAgent>> {
        let row = sqlx::query(
            "SELECT agent_id, extension, team, active FROM agents WHERE agent_id = ?",
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(DbAgent::from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_agent_by_extension(&self, extension: &str) -> Result<Option<DbAgent>> {
        let row = sqlx::query(
            "SELECT agent_id, extension, team, active FROM agents WHERE extension = ?",
        )
        .bind(extension)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(DbAgent::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// id -> extension for every active agent
    pub async fn agent_extension_mapping(&self) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT agent_id, extension FROM agents WHERE active = 1")
            .fetch_all(&self.pool)
            .await?;

        let mut mapping = HashMap::with_capacity(rows.len());
        for row in rows {
            mapping.insert(row.try_get("agent_id")?, row.try_get("extension")?);
        }
        Ok(mapping)
    }
}

// Campaign and lead operations
impl DatabaseManager {
    /// Create a campaign (administrative/seeding helper)
    pub async fn create_campaign(
        &self,
        campaign_id: &str,
        campaign_name: &str,
        segment: &str,
        agent_id: Option<&str>,
        active: bool,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO campaigns (campaign_id, campaign_name, segment, agent_id, active, status)
             VALUES (?, ?, ?, ?, ?, 'active')",
        )
        .bind(campaign_id)
        .bind(campaign_name)
        .bind(segment)
        .bind(agent_id)
        .bind(active as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Insert a lead (administrative/seeding helper)
    pub async fn insert_lead(&self, lead: &NewLead) -> Result<()> {
        sqlx::query(
            "INSERT INTO leads (id, source_lead_id, phone_number, customer_name, city,
                                campaign_id, customer_segment, month_gmv, overall_gmv,
                                status, attempt_count, max_attempts)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', 0, ?)",
        )
        .bind(lead.id)
        .bind(&lead.source_lead_id)
        .bind(&lead.phone_number)
        .bind(&lead.customer_name)
        .bind(&lead.city)
        .bind(lead.campaign_id)
        .bind(&lead.customer_segment)
        .bind(lead.month_gmv)
        .bind(lead.overall_gmv)
        .bind(lead.max_attempts.max(1))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_lead(&self, lead_id: i64) -> Result<Option<DbLead>> {
        let row = sqlx::query(
            "SELECT id, source_lead_id, phone_number, customer_name, city, campaign_id,
                    customer_segment, month_gmv, overall_gmv, last_call_date,
                    last_order_details, metadata, status, attempt_count, max_attempts
             FROM leads WHERE id = ?",
        )
        .bind(lead_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(DbLead::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Active campaigns that still have dialable pending leads
    pub async fn active_campaigns_with_pending(&self) -> Result<Vec<DbCampaign>> {
        let rows = sqlx::query(
            "SELECT DISTINCT c.id, c.campaign_id, c.campaign_name, c.segment, c.agent_id, c.active
             FROM campaigns c
             JOIN leads l ON l.campaign_id = c.id
             WHERE c.active = 1
               AND l.status = 'pending'
               AND l.attempt_count < l.max_attempts",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut campaigns = Vec::with_capacity(rows.len());
        for row in rows {
            campaigns.push(DbCampaign::from_row(&row)?);
        }
        Ok(campaigns)
    }

    /// Dialable pending leads of one campaign, oldest first
    pub async fn pending_leads(&self, campaign_pk: i64) -> Result<Vec<DbLead>> {
        let rows = sqlx::query(
            "SELECT id, source_lead_id, phone_number, customer_name, city, campaign_id,
                    customer_segment, month_gmv, overall_gmv, last_call_date,
                    last_order_details, metadata, status, attempt_count, max_attempts
             FROM leads
             WHERE campaign_id = ? AND status = 'pending' AND attempt_count < max_attempts
             ORDER BY id",
        )
        .bind(campaign_pk)
        .fetch_all(&self.pool)
        .await?;

        let mut leads = Vec::with_capacity(rows.len());
        for row in rows {
            leads.push(DbLead::from_row(&row)?);
        }
        Ok(leads)
    }

    /// Transition the selected leads pending -> in_queue. Returns the
    /// number of rows actually transitioned; zero means a racing refill
    /// already claimed them.
    pub async fn mark_leads_in_queue(&self, lead_ids: &[i64]) -> Result<u64> {
        if lead_ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; lead_ids.len()].join(", ");
        let sql = format!(
            "UPDATE leads SET status = 'in_queue', updated_at = datetime('now')
             WHERE id IN ({placeholders}) AND status = 'pending'"
        );
        let mut query = sqlx::query(&sql);
        for id in lead_ids {
            query = query.bind(id);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Apply one terminal outcome to a batch of leads: status,
    /// last_call_date and the attempt counter.
    pub async fn bulk_update_lead_status(
        &self,
        lead_ids: &[i64],
        status: &str,
        last_call_date: DateTime<Utc>,
    ) -> Result<u64> {
        if lead_ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; lead_ids.len()].join(", ");
        let sql = format!(
            "UPDATE leads SET status = ?, last_call_date = ?,
                    attempt_count = attempt_count + 1, updated_at = datetime('now')
             WHERE id IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql).bind(status).bind(last_call_date);
        for id in lead_ids {
            query = query.bind(id);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

// Call log operations
impl DatabaseManager {
    /// Insert one terminal call fact. Idempotent per call id, so a drain
    /// replay cannot duplicate rows.
    pub async fn insert_call_log(&self, log: &CallLogRow) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO call_logs
                (call_id, agent_id, lead_id, campaign_id, from_extension, to_number,
                 status, disconnect_reason, direction, initiated_at, answered_at,
                 ended_at, duration_seconds, attempt_number)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&log.call_id)
        .bind(&log.agent_id)
        .bind(log.lead_id)
        .bind(log.campaign_id)
        .bind(&log.from_extension)
        .bind(&log.to_number)
        .bind(&log.status)
        .bind(&log.disconnect_reason)
        .bind(&log.direction)
        .bind(log.initiated_at)
        .bind(log.answered_at)
        .bind(log.ended_at)
        .bind(log.duration_seconds)
        .bind(log.attempt_number)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_call_log(&self, call_id: &str) -> Result<Option<CallLogRow>> {
        let row = sqlx::query(
            "SELECT call_id, agent_id, lead_id, campaign_id, from_extension, to_number,
                    status, disconnect_reason, direction, initiated_at, answered_at,
                    ended_at, duration_seconds, attempt_number
             FROM call_logs WHERE call_id = ?",
        )
        .bind(call_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(CallLogRow {
                call_id: row.try_get("call_id")?,
                agent_id: row.try_get("agent_id")?,
                lead_id: row.try_get("lead_id")?,
                campaign_id: row.try_get("campaign_id")?,
                from_extension: row.try_get("from_extension")?,
                to_number: row.try_get("to_number")?,
                status: row.try_get("status")?,
                disconnect_reason: row.try_get("disconnect_reason")?,
                direction: row.try_get("direction")?,
                initiated_at: row.try_get("initiated_at")?,
                answered_at: row.try_get("answered_at")?,
                ended_at: row.try_get("ended_at")?,
                duration_seconds: row.try_get("duration_seconds")?,
                attempt_number: row.try_get("attempt_number")?,
            })),
            None => Ok(None),
        }
    }

    pub async fn count_call_logs(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM call_logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_creation() {
        let db = DatabaseManager::new_in_memory().await.unwrap();
        let campaigns = db.active_campaigns_with_pending().await.unwrap();
        assert!(campaigns.is_empty());
    }

    #[tokio::test]
    async fn test_lead_status_transitions() {
        let db = DatabaseManager::new_in_memory().await.unwrap();
        db.upsert_agent("a1", "1001", Team::Sales).await.unwrap();
        let campaign_pk = db
            .create_campaign("C-1", "Follow up batch", "follow_up", Some("a1"), true)
            .await
            .unwrap();

        db.insert_lead(&NewLead {
            id: 10,
            source_lead_id: "src-10".to_string(),
            phone_number: Some("923001234567".to_string()),
            customer_name: "Lead Ten".to_string(),
            campaign_id: Some(campaign_pk),
            max_attempts: 2,
            ..Default::default()
        })
        .await
        .unwrap();

        let transitioned = db.mark_leads_in_queue(&[10]).await.unwrap();
        assert_eq!(transitioned, 1);

        // Second run is a no-op: the lead is no longer pending.
        let transitioned = db.mark_leads_in_queue(&[10]).await.unwrap();
        assert_eq!(transitioned, 0);

        let now = Utc::now();
        let updated = db.bulk_update_lead_status(&[10], "completed", now).await.unwrap();
        assert_eq!(updated, 1);

        let lead = db.get_lead(10).await.unwrap().unwrap();
        assert_eq!(lead.status, "completed");
        assert_eq!(lead.attempt_count, 1);
        assert!(lead.last_call_date.is_some());
    }

    #[tokio::test]
    async fn test_campaign_selection_requires_dialable_leads() {
        let db = DatabaseManager::new_in_memory().await.unwrap();
        db.upsert_agent("a1", "1001", Team::Sales).await.unwrap();
        let with_leads = db
            .create_campaign("C-1", "Active", "active", Some("a1"), true)
            .await
            .unwrap();
        let _empty = db
            .create_campaign("C-2", "Empty", "growth", Some("a1"), true)
            .await
            .unwrap();
        let inactive = db
            .create_campaign("C-3", "Inactive", "growth", Some("a1"), false)
            .await
            .unwrap();

        for (id, campaign) in [(1_i64, with_leads), (2, inactive)] {
            db.insert_lead(&NewLead {
                id,
                source_lead_id: format!("src-{id}"),
                phone_number: Some("923000000000".to_string()),
                customer_name: "X".to_string(),
                campaign_id: Some(campaign),
                max_attempts: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        }

        let campaigns = db.active_campaigns_with_pending().await.unwrap();
        assert_eq!(campaigns.len(), 1);
        assert_eq!(campaigns[0].campaign_id, "C-1");
    }

    #[tokio::test]
    async fn test_call_log_insert_is_idempotent() {
        let db = DatabaseManager::new_in_memory().await.unwrap();
        let log = CallLogRow {
            call_id: "u-1".to_string(),
            agent_id: Some("a1".to_string()),
            lead_id: Some(10),
            campaign_id: None,
            from_extension: Some("1001".to_string()),
            to_number: Some("923001234567".to_string()),
            status: Some("answered".to_string()),
            disconnect_reason: "NORMAL_CLEARING".to_string(),
            direction: "outbound".to_string(),
            initiated_at: Some(Utc::now()),
            answered_at: None,
            ended_at: Some(Utc::now()),
            duration_seconds: 42,
            attempt_number: 1,
        };

        db.insert_call_log(&log).await.unwrap();
        db.insert_call_log(&log).await.unwrap();
        assert_eq!(db.count_call_logs().await.unwrap(), 1);

        let stored = db.get_call_log("u-1").await.unwrap().unwrap();
        assert_eq!(stored.status.as_deref(), Some("answered"));
        assert_eq!(stored.duration_seconds, 42);
    }
}
