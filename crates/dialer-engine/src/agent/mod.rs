//! # Agent Management
//!
//! Agent identity, the per-agent state record, and the lock-protected
//! state machine that the dialer cycle, the event handlers and the orphan
//! reaper all drive. The state machine is deliberately neutral: it depends
//! only on the state store, so both the dialing side and the event side
//! can use it without depending on each other.
//!
//! ## State model
//!
//! ```text
//!              login                  mark_busy
//!  logged_out ───────▶ idle ────────────────────▶ busy
//!      ▲                ▲                           │
//!      │ logout         └───────── mark_idle ───────┘
//!      └── (no state row; every operation on it fails)
//! ```
//!
//! `logged_out` has no row in the AGENT_STATES hash. An `idle` agent is a
//! member of exactly one team idle queue; a `busy` agent is in none.

pub mod registry;
pub mod state;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use registry::AgentRegistry;
pub use state::AgentStateMachine;

use crate::store::keys;

/// Stable agent identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        AgentId(value.to_string())
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        AgentId(value)
    }
}

/// Agent team; decides the idle queue and the inbound waiting queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Sales,
    SecondarySales,
    Support,
}

impl Team {
    /// Wire name used in the database and in agent records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Team::Sales => "sales",
            Team::SecondarySales => "secondary_sales",
            Team::Support => "support",
        }
    }

    pub fn from_wire(value: &str) -> Option<Team> {
        match value {
            "sales" => Some(Team::Sales),
            "secondary_sales" => Some(Team::SecondarySales),
            "support" => Some(Team::Support),
            _ => None,
        }
    }

    /// The sorted set holding this team's idle agents.
    pub fn idle_queue_key(&self) -> &'static str {
        match self {
            Team::Sales => keys::SALES_AGENT_QUEUE,
            Team::SecondarySales => keys::SECONDARY_SALES_AGENT_QUEUE,
            Team::Support => keys::SUPPORT_AGENT_QUEUE,
        }
    }

    /// The list parked inbound customers wait on, for teams that take
    /// inbound calls.
    pub fn waiting_queue_key(&self) -> Option<&'static str> {
        match self {
            Team::Support => Some(keys::SUPPORT_CUSTOMERS_WAITING_QUEUE),
            Team::SecondarySales => Some(keys::SECONDARY_SALES_CUSTOMERS_WAITING_QUEUE),
            Team::Sales => None,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logged-in activity of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Idle,
    Busy,
}

/// The JSON record stored per agent in the AGENT_STATES hash.
///
/// `busy` covers two shapes: a concrete call (`current_call_id` set) or a
/// pending predictive assignment (`call_initiated_at` set while the switch
/// rings ahead); the orphan reaper uses the second to time out dead rings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub team: Team,
    pub state: Activity,
    pub current_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_initiated_at: Option<i64>,
}

impl AgentRecord {
    /// Fresh record for a newly logged-in agent.
    pub fn logged_in(team: Team) -> Self {
        Self {
            team,
            state: Activity::Idle,
            current_call_id: None,
            call_initiated_at: None,
        }
    }

    /// The one predicate that means "this agent may be dialed for":
    /// idle state and no associated call.
    pub fn idle_for_dialing(&self) -> bool {
        self.state == Activity::Idle && self.current_call_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serialization_is_stable() {
        let record = AgentRecord::logged_in(Team::SecondarySales);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"team\":\"secondary_sales\""));
        assert!(json.contains("\"state\":\"idle\""));

        let back: AgentRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn idle_for_dialing_requires_both_conditions() {
        let mut record = AgentRecord::logged_in(Team::Sales);
        assert!(record.idle_for_dialing());

        record.current_call_id = Some("u-1".to_string());
        assert!(!record.idle_for_dialing());

        record.current_call_id = None;
        record.state = Activity::Busy;
        assert!(!record.idle_for_dialing());
    }
}
