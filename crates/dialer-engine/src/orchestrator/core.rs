//! Core dialer engine
//!
//! [`DialerEngine`] owns every subsystem and is shared (`Arc`) between the
//! control loops and the event dispatcher. Construction wires the parts
//! together; behavior lives in the sibling modules and in the event
//! handlers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{error, info};

use crate::agent::{AgentId, AgentRecord, AgentRegistry, AgentStateMachine, Team};
use crate::calls::ActiveCalls;
use crate::config::DialerConfig;
use crate::database::DatabaseManager;
use crate::error::Result;
use crate::events::{EventHandler, PersistenceSink};
use crate::queue::{QueueManager, QueueRefiller, RefillOutcome};
use crate::store::StateStore;
use crate::switch::{SwitchAdapter, SwitchControl};

/// Aggregate counters since engine start plus a point-in-time snapshot of
/// the shared state.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DialerStats {
    pub active_calls: usize,
    pub idle_agents: usize,
    pub busy_agents: usize,
    pub priority_leads: usize,
    pub secondary_leads: usize,
    pub ticks: u64,
    pub calls_dialed: u64,
    pub agents_reaped: u64,
}

#[derive(Debug, Default)]
pub(super) struct Counters {
    pub ticks: u64,
    pub calls_dialed: u64,
    pub agents_reaped: u64,
}

/// Central coordinator of the predictive dialer.
pub struct DialerEngine {
    pub(super) config: DialerConfig,
    pub(super) store: StateStore,
    pub(super) db: DatabaseManager,
    pub(super) agents: AgentStateMachine,
    pub(super) registry: AgentRegistry,
    pub(super) queues: QueueManager,
    pub(super) calls: ActiveCalls,
    pub(super) switch: SwitchAdapter,
    pub(super) sink: PersistenceSink,
    pub(super) refiller: QueueRefiller,
    pub(super) counters: RwLock<Counters>,
}

impl DialerEngine {
    /// Wire an engine from its externals: a connected state store, the
    /// lead store, and a switch command channel.
    pub fn new(
        config: DialerConfig,
        store: StateStore,
        db: DatabaseManager,
        switch_control: Arc<dyn SwitchControl>,
    ) -> Arc<Self> {
        let agents = AgentStateMachine::new(store.clone());
        let registry = AgentRegistry::new(store.clone(), db.clone());
        let queues = QueueManager::new(store.clone());
        let calls = ActiveCalls::new(store.clone());
        let switch = SwitchAdapter::new(switch_control, config.switch.clone());
        let sink = PersistenceSink::new(
            store.clone(),
            db.clone(),
            Duration::from_secs(config.dialing.sync_delay_secs),
        );
        let refiller = QueueRefiller::new(
            db.clone(),
            queues.clone(),
            Duration::from_secs(config.dialing.acquisition_agents_ttl_secs),
        );

        info!("🚀 Dialer engine assembled (domain {})", config.general.domain);
        Arc::new(Self {
            config,
            store,
            db,
            agents,
            registry,
            queues,
            calls,
            switch,
            sink,
            refiller,
            counters: RwLock::new(Counters::default()),
        })
    }

    /// Build the event handler sharing this engine's parts.
    pub fn event_handler(&self) -> EventHandler {
        EventHandler::new(
            self.config.clone(),
            self.agents.clone(),
            self.registry.clone(),
            self.queues.clone(),
            self.calls.clone(),
            self.switch.clone(),
            self.sink.clone(),
        )
    }

    pub fn config(&self) -> &DialerConfig {
        &self.config
    }

    /// Agent session: mark an agent available (first login creates it).
    pub async fn login_agent(&self, agent_id: &AgentId, team: Team) -> Result<AgentRecord> {
        self.agents.login(agent_id, team).await
    }

    /// Agent session: full logout, removing state and queue membership.
    pub async fn logout_agent(&self, agent_id: &AgentId) -> Result<bool> {
        self.agents.logout(agent_id).await
    }

    /// Agent session: do-not-disturb is a logout of the dialing state
    /// only; the operator keeps their session and can mark available
    /// again.
    pub async fn do_not_disturb(&self, agent_id: &AgentId) -> Result<bool> {
        self.agents.logout(agent_id).await
    }

    /// Run one refill pass inline.
    pub async fn refill_queues(&self) -> Result<RefillOutcome> {
        self.refiller.refill().await
    }

    /// Kick off a refill in the background (the tick path).
    pub fn spawn_refill(&self) {
        let refiller = self.refiller.clone();
        tokio::spawn(async move {
            if let Err(e) = refiller.refill().await {
                error!("background refill failed: {}", e);
            }
        });
    }

    /// Point-in-time statistics.
    pub async fn stats(&self) -> DialerStats {
        let mut stats = DialerStats::default();

        match self.agents.all_records().await {
            Ok(records) => {
                for record in records.values() {
                    if record.idle_for_dialing() {
                        stats.idle_agents += 1;
                    } else {
                        stats.busy_agents += 1;
                    }
                }
            }
            Err(e) => error!("stats: failed to read agent records: {}", e),
        }
        match self.calls.count().await {
            Ok(count) => stats.active_calls = count,
            Err(e) => error!("stats: failed to count active calls: {}", e),
        }
        match self.queues.priority_mapping().await {
            Ok(mapping) => stats.priority_leads = mapping.values().map(Vec::len).sum(),
            Err(e) => error!("stats: failed to read priority mapping: {}", e),
        }
        match self.queues.secondary_mapping().await {
            Ok(mapping) => stats.secondary_leads = mapping.values().map(Vec::len).sum(),
            Err(e) => error!("stats: failed to read secondary mapping: {}", e),
        }

        let counters = self.counters.read().await;
        stats.ticks = counters.ticks;
        stats.calls_dialed = counters.calls_dialed;
        stats.agents_reaped = counters.agents_reaped;
        stats
    }

    /// Direct access for tests and tooling.
    pub fn agents(&self) -> &AgentStateMachine {
        &self.agents
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn queues(&self) -> &QueueManager {
        &self.queues
    }

    pub fn active_calls(&self) -> &ActiveCalls {
        &self.calls
    }

    pub fn sink(&self) -> &PersistenceSink {
        &self.sink
    }

    pub fn database(&self) -> &DatabaseManager {
        &self.db
    }

    pub fn state_store(&self) -> &StateStore {
        &self.store
    }
}
