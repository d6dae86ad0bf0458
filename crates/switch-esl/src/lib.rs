//! FreeSWITCH Event Socket Layer (inbound) client for the outdial stack
//!
//! This crate speaks the text-based event socket protocol to a FreeSWITCH
//! instance: it authenticates, issues `api`/`bgapi` commands, subscribes to
//! a plain-text event stream, and demultiplexes command replies from
//! asynchronous call-progress events arriving on the same TCP connection.
//!
//! ## Overview
//!
//! The event socket is a single ordered channel. One background reader task
//! owns the read half of the connection and routes every inbound frame:
//! command replies are matched FIFO against pending requests (the switch
//! answers commands in order), events are pushed into an [`EslEvent`]
//! channel handed back to the caller at connect time.
//!
//! ```text
//! ┌────────────┐   api/bgapi    ┌──────────────┐
//! │ EslHandle  │ ─────────────▶ │              │
//! │ (cloneable)│ ◀───────────── │  FreeSWITCH  │
//! └────────────┘  command/reply │  mod_event   │
//!       ▲                       │  _socket     │
//!       │ mpsc<EslEvent>        │              │
//! ┌────────────┐ ◀───────────── └──────────────┘
//! │ reader task│  text/event-plain
//! └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use outdial_switch_esl::EslConnection;
//!
//! # async fn example() -> outdial_switch_esl::Result<()> {
//! let (handle, mut events) = EslConnection::connect("127.0.0.1:8021", "ClueCon").await?;
//! handle.subscribe(&["CHANNEL_ANSWER", "CHANNEL_HANGUP_COMPLETE"]).await?;
//!
//! let status = handle.api("status").await?;
//! println!("switch status: {}", status);
//!
//! while let Some(event) = events.recv().await {
//!     println!("event: {:?}", event.name());
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod connection;
pub mod error;
pub mod event;

pub use connection::{EslConnection, EslHandle};
pub use error::{EslError, Result};
pub use event::EslEvent;

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{EslConnection, EslError, EslEvent, EslHandle, Result};
}
