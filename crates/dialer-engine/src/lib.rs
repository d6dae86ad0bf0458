//! # Outdial Dialer Engine
//!
//! Predictive outbound dialer core for a voice contact center: it matches
//! a fleet of telephony agents to a prioritized corpus of leads,
//! instructs the media switch to originate calls, bridges answered calls
//! to idle agents, and reconciles agent/call state as asynchronous
//! call-progress events arrive.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                       DialerServer                        │
//! │   tick loop      event listener       waiting-room loop   │
//! ├───────────────────────────────────────────────────────────┤
//! │                       DialerEngine                        │
//! │  ┌────────────┐ ┌──────────────┐ ┌─────────────────────┐  │
//! │  │ Agent      │ │ Queue        │ │ Event               │  │
//! │  │ StateMach. │ │ Manager      │ │ Demultiplexer       │  │
//! │  └────────────┘ └──────────────┘ └─────────────────────┘  │
//! │  ┌────────────┐ ┌──────────────┐ ┌─────────────────────┐  │
//! │  │ Orphan     │ │ Switch       │ │ Persistence         │  │
//! │  │ Reaper     │ │ Adapter      │ │ Sink                │  │
//! │  └────────────┘ └──────────────┘ └─────────────────────┘  │
//! ├───────────────────────────────────────────────────────────┤
//! │   StateStore (Redis)          DatabaseManager (sqlx)      │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Outbound data flow: queue refill pulls pending leads from the lead
//! store into per-agent buckets; each dialer tick originates calls across
//! the priority, secondary and acquisition queues; answers bridge agents
//! onto calls; hangups feed terminal records through the persistence sink
//! back into the lead store.
//!
//! ## Quick Start
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
//!
//! ## Concurrency model
//!
//! All shared state lives in the state store; every read-modify-write of
//! an agent row or a call record runs under a named advisory lock with
//! bounded blocking acquisition. The dialer tick is single-writer across
//! replicas (execution lock), event processing is serialized per channel
//! uuid, and lock ordering is fixed: the tick lock is taken before any
//! queue or agent lock, queue locks one at a time, agent locks never
//! nested.

pub mod agent;
pub mod calls;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod prelude;
pub mod queue;
pub mod server;
pub mod store;
pub mod switch;

pub use config::DialerConfig;
pub use error::{DialerError, Result};
pub use orchestrator::{DialerEngine, DialerStats, TickReport};
pub use server::{DialerServer, DialerServerBuilder};
