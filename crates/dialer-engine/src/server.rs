//! # Dialer Server
//!
//! Production assembly of the dialer core: connects the state store, the
//! lead store and the switch event socket, then runs the control loops
//! (the periodic dialer tick, the event listener with reconnect, and the
//! waiting-room loop) until stopped.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              DialerServer               │
//! ├─────────────────────────────────────────┤
//! │ tick loop │ event listener │ waiting    │
//! ├─────────────────────────────────────────┤
//! │              DialerEngine               │
//! ├─────────────────────────────────────────┤
//! │ Redis store │ sqlx lead store │ ESL     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use outdial_dialer_engine::config::DialerConfig;
//! use outdial_dialer_engine::server::DialerServerBuilder;
//!
//! # async fn example() -> outdial_dialer_engine::Result<()> {
//! let mut server = DialerServerBuilder::new()
//!     .with_config(DialerConfig::default())
//!     .build()
//!     .await?;
//!
//! server.start().await?;
//! server.run().await
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tracing::{debug, error, info, warn};

use outdial_switch_esl::EslConnection;

use crate::config::{DialerConfig, SwitchConfig};
use crate::database::DatabaseManager;
use crate::error::{DialerError, Result};
use crate::events::{EventDispatcher, SwitchEvent};
use crate::orchestrator::DialerEngine;
use crate::store::StateStore;
use crate::switch::EslSwitch;

/// Event types the dialer consumes from the switch.
const SUBSCRIBED_EVENTS: [&str; 4] = [
    "CHANNEL_ANSWER",
    "CHANNEL_HANGUP_COMPLETE",
    "CHANNEL_PARK",
    "CHANNEL_EXECUTE",
];

/// A complete dialer server managing engine lifecycle and control loops.
pub struct DialerServer {
    engine: Arc<DialerEngine>,
    esl_switch: Arc<EslSwitch>,
    config: DialerConfig,
    dispatcher: Option<Arc<EventDispatcher>>,
    tick_handle: Option<JoinHandle<()>>,
    listener_handle: Option<JoinHandle<()>>,
    waiting_handle: Option<JoinHandle<()>>,
}

impl DialerServer {
    /// Connect the externals and assemble the engine.
    pub async fn new(config: DialerConfig) -> Result<Self> {
        let store = StateStore::connect_redis(&config.store.redis_url).await?;
        let db = DatabaseManager::new(&config.database.database_url)
            .await
            .map_err(DialerError::from)?;
        let esl_switch = Arc::new(EslSwitch::new());
        let engine = DialerEngine::new(config.clone(), store, db, esl_switch.clone());

        Ok(Self {
            engine,
            esl_switch,
            config,
            dispatcher: None,
            tick_handle: None,
            listener_handle: None,
            waiting_handle: None,
        })
    }

    /// Start every control loop.
    pub async fn start(&mut self) -> Result<()> {
        // Warm the extension cache so the first bridge does not block on
        // the database.
        if let Err(e) = self.engine.registry().refresh().await {
            warn!("extension mapping warm-up failed: {}", e);
        }

        let dispatcher = Arc::new(EventDispatcher::spawn(
            Arc::new(self.engine.event_handler()),
            self.config.general.event_workers,
        ));
        self.dispatcher = Some(dispatcher.clone());

        self.listener_handle = Some(tokio::spawn(event_listener_loop(
            self.esl_switch.clone(),
            dispatcher,
            self.config.switch.clone(),
        )));

        let engine = self.engine.clone();
        let tick_interval = Duration::from_secs(self.config.dialing.tick_interval_secs);
        self.tick_handle = Some(tokio::spawn(async move {
            let mut ticker = interval(tick_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = engine.run_dialer_tick().await {
                    error!("dialer tick failed: {}", e);
                }
            }
        }));

        self.waiting_handle = Some(tokio::spawn(
            self.engine.clone().run_waiting_room_loop(),
        ));

        // Queues start cold after a deploy; fill them before the first
        // tick needs them.
        self.engine.spawn_refill();

        info!("✅ Dialer server started (tick every {:?})", tick_interval);
        Ok(())
    }

    /// Stop the control loops.
    pub async fn stop(&mut self) -> Result<()> {
        info!("🛑 Stopping dialer server...");

        for handle in [
            self.tick_handle.take(),
            self.listener_handle.take(),
            self.waiting_handle.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
            let _ = handle.await;
        }
        // Dropping the dispatcher closes the worker channels; workers
        // drain and exit.
        self.dispatcher = None;

        info!("✅ Dialer server stopped");
        Ok(())
    }

    /// Run indefinitely, logging a stats line every minute.
    pub async fn run(&self) -> Result<()> {
        info!("📞 Dialer server is running");
        loop {
            sleep(Duration::from_secs(60)).await;
            let stats = self.engine.stats().await;
            info!(
                "📊 Stats - active calls: {}, idle agents: {}, busy agents: {}, leads queued: {}/{}, dialed: {}",
                stats.active_calls,
                stats.idle_agents,
                stats.busy_agents,
                stats.priority_leads,
                stats.secondary_leads,
                stats.calls_dialed
            );
        }
    }

    /// The engine, for advanced usage and tooling.
    pub fn engine(&self) -> &Arc<DialerEngine> {
        &self.engine
    }
}

/// Connect to the event socket, subscribe, and pump events into the
/// dispatcher; reconnects with a fixed backoff when the stream drops. The
/// stream resumes from the current head; in-flight state is reconciled
/// by the reaper.
async fn event_listener_loop(
    esl_switch: Arc<EslSwitch>,
    dispatcher: Arc<EventDispatcher>,
    config: SwitchConfig,
) {
    let backoff = Duration::from_secs(config.reconnect_backoff_secs.max(1));

    loop {
        match EslConnection::connect(&config.esl_addr, &config.esl_password).await {
            Ok((handle, mut events)) => {
                if let Err(e) = handle.subscribe(&SUBSCRIBED_EVENTS).await {
                    error!("event subscription failed: {}", e);
                } else {
                    esl_switch.set_handle(handle).await;
                    info!("📡 Listening for switch events from {}", config.esl_addr);

                    while let Some(raw) = events.recv().await {
                        match SwitchEvent::from_esl(&raw) {
                            Some(event) => dispatcher.dispatch(event).await,
                            None => debug!("dropping unusable event {}", raw.name()),
                        }
                    }

                    esl_switch.clear().await;
                    warn!("switch event stream ended; reconnecting");
                }
            }
            Err(e) => error!("event socket connect to {} failed: {}", config.esl_addr, e),
        }
        sleep(backoff).await;
    }
}

/// Builder for [`DialerServer`] with a fluent API.
pub struct DialerServerBuilder {
    config: Option<DialerConfig>,
}

impl DialerServerBuilder {
    pub fn new() -> Self {
        Self { config: None }
    }

    pub fn with_config(mut self, config: DialerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub async fn build(self) -> Result<DialerServer> {
        let config = self
            .config
            .ok_or_else(|| DialerError::Configuration("Configuration not provided".to_string()))?;
        DialerServer::new(config).await
    }
}

impl Default for DialerServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
