//! # Dialer Orchestration
//!
//! The engine that ties every subsystem together and the three control
//! loops that drive it:
//!
//! - **[`cycle`]**: the periodic dialer tick: capacity computation and
//!   the priority / secondary / acquisition dialing passes.
//! - **[`reaper`]**: reconciliation of busy agents against the live call
//!   set at the top of every tick.
//! - **[`waiting`]**: the loop matching parked inbound customers to newly
//!   idle team agents.
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │               DialerEngine                 │
//! ├────────────────────────────────────────────┤
//! │ AgentStateMachine │ QueueManager │ Refiller│
//! │ ActiveCalls       │ SwitchAdapter│ Sink    │
//! ├────────────────────────────────────────────┤
//! │ StateStore (Redis) │ DatabaseManager (sqlx)│
//! └────────────────────────────────────────────┘
//! ```
//!
//! Within a tick the passes run strictly in order: priority, then
//! secondary, then acquisition. The tick-level execution lock makes the
//! whole cycle single-writer across dialer replicas.

pub mod core;
pub mod cycle;
pub mod reaper;
pub mod waiting;

pub use core::{DialerEngine, DialerStats};
pub use cycle::TickReport;
