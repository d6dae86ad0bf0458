//! Agent identity resolution
//!
//! Maps agent ids to SIP extensions and teams. The extension mapping is
//! read on every bridge/transfer, so it is cached in the state store under
//! AGENT_EXTENSION_MAPPING and reloaded from the agents table on a miss.

use std::collections::HashMap;

use tracing::debug;

use super::{AgentId, Team};
use crate::database::DatabaseManager;
use crate::error::{DialerError, Result};
use crate::store::{keys, StateStore};

/// Resolves agent ids to extensions and teams.
#[derive(Clone)]
pub struct AgentRegistry {
    store: StateStore,
    db: DatabaseManager,
}

impl AgentRegistry {
    pub fn new(store: StateStore, db: DatabaseManager) -> Self {
        Self { store, db }
    }

    /// SIP extension for an agent, from the cached mapping.
    pub async fn extension(&self, agent_id: &AgentId) -> Result<Option<String>> {
        let mapping = self.extension_mapping().await?;
        Ok(mapping.get(agent_id.as_str()).cloned())
    }

    /// Extension for an agent, failing when the agent is unknown.
    pub async fn require_extension(&self, agent_id: &AgentId) -> Result<String> {
        self.extension(agent_id).await?.ok_or_else(|| {
            DialerError::configuration(format!("no extension for agent {agent_id}"))
        })
    }

    /// The agent registered on an extension, with its team. Transfers
    /// identify agents by extension, so this goes straight to the agents
    /// table.
    pub async fn agent_by_extension(&self, extension: &str) -> Result<Option<(AgentId, Team)>> {
        let Some(row) = self
            .db
            .get_agent_by_extension(extension)
            .await
            .map_err(DialerError::from)?
        else {
            return Ok(None);
        };
        let team = Team::from_wire(&row.team)
            .ok_or_else(|| DialerError::database(format!("unknown team {}", row.team)))?;
        Ok(Some((AgentId(row.agent_id), team)))
    }

    /// The agent's team from the agents table.
    pub async fn team(&self, agent_id: &AgentId) -> Result<Option<Team>> {
        let Some(row) = self
            .db
            .get_agent(agent_id.as_str())
            .await
            .map_err(DialerError::from)?
        else {
            return Ok(None);
        };
        Ok(Team::from_wire(&row.team))
    }

    /// Cached id -> extension mapping; reloads from the database when the
    /// cache is cold.
    pub async fn extension_mapping(&self) -> Result<HashMap<String, String>> {
        if let Some(mapping) = self
            .store
            .get_json::<HashMap<String, String>>(keys::AGENT_EXTENSION_MAPPING)
            .await?
        {
            return Ok(mapping);
        }
        self.refresh().await
    }

    /// Reload the mapping from the agents table and refresh the cache.
    pub async fn refresh(&self) -> Result<HashMap<String, String>> {
        let mapping = self
            .db
            .agent_extension_mapping()
            .await
            .map_err(DialerError::from)?;
        self.store
            .set_json(keys::AGENT_EXTENSION_MAPPING, &mapping)
            .await?;
        debug!("refreshed extension mapping for {} agents", mapping.len());
        Ok(mapping)
    }
}
