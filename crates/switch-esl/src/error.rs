//! Error types for the event socket client

use std::io;
use thiserror::Error;

/// Errors produced by the event socket client
#[derive(Error, Debug)]
pub enum EslError {
    /// Underlying socket I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The switch rejected the `auth` command
    #[error("authentication rejected: {0}")]
    AuthFailed(String),

    /// A frame arrived that does not follow the event socket framing rules
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The connection was closed while a command was in flight
    #[error("connection closed")]
    ConnectionClosed,

    /// The switch answered a command with something other than +OK
    #[error("command failed: {0}")]
    CommandFailed(String),
}

/// Result type for event socket operations
pub type Result<T> = std::result::Result<T, EslError>;
