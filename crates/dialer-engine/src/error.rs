//! Error types for the dialer engine
//!
//! Every subsystem has its own error enum (`StoreError`, `SwitchError`);
//! [`DialerError`] is the umbrella the orchestration layer returns. The
//! taxonomy follows the recovery policy: transient store faults and switch
//! command failures are logged and retried on the next tick, they never
//! halt a control loop.

use thiserror::Error;

use crate::store::StoreError;
use crate::switch::SwitchError;

/// Top-level error type for dialer operations
#[derive(Error, Debug)]
pub enum DialerError {
    /// State store fault (lock timeout, backend disconnect, bad payload)
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Switch command channel fault
    #[error("switch error: {0}")]
    Switch(#[from] SwitchError),

    /// Lead/campaign store fault
    #[error("database error: {0}")]
    Database(String),

    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Operation addressed an agent with no state row (logged out)
    #[error("agent absent: {0}")]
    AgentAbsent(String),

    /// General orchestration failure
    #[error("orchestration error: {0}")]
    Orchestration(String),
}

impl DialerError {
    /// Create a database error from any displayable source
    pub fn database(msg: impl std::fmt::Display) -> Self {
        DialerError::Database(msg.to_string())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        DialerError::Configuration(msg.into())
    }

    /// Create an orchestration error
    pub fn orchestration(msg: impl Into<String>) -> Self {
        DialerError::Orchestration(msg.into())
    }
}

impl From<anyhow::Error> for DialerError {
    fn from(err: anyhow::Error) -> Self {
        DialerError::Database(err.to_string())
    }
}

/// Result type for dialer operations
pub type Result<T> = std::result::Result<T, DialerError>;
