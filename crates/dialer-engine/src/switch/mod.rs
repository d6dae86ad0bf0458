//! # Switch Adapter
//!
//! Thin command channel to the media switch. Two primitives, `api`
//! (synchronous, first-line body) and `bgapi` (fire-and-forget, job id on
//! `+OK`), behind the [`SwitchControl`] seam, and the four verbs the
//! dialer issues on top of them: originate, bridge, transfer, kill.
//!
//! Response discipline: a `+OK` prefix is success, anything else is
//! failure. A failed command is logged and the affected call is presumed
//! lost; its active-call record is reclaimed by the orphan reaper.

pub mod esl;
pub mod originate;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::SwitchConfig;

pub use esl::EslSwitch;
pub use originate::{encode_originate, OriginateRequest};

/// Switch command channel failures
#[derive(Error, Debug)]
pub enum SwitchError {
    /// The switch answered with something other than +OK
    #[error("switch command failed: {0}")]
    CommandFailed(String),

    /// No live event socket connection
    #[error("switch not connected")]
    NotConnected,

    /// Transport-level failure on the command channel
    #[error("switch transport error: {0}")]
    Transport(String),
}

/// The two command primitives the dialer core needs from a switch.
#[async_trait]
pub trait SwitchControl: Send + Sync {
    /// Synchronous command; returns the response body.
    async fn api(&self, command: &str) -> Result<String, SwitchError>;
    /// Background command; returns the reply line (`+OK Job-UUID: ...`).
    async fn bgapi(&self, command: &str) -> Result<String, SwitchError>;
}

/// High-level switch verbs over a [`SwitchControl`].
#[derive(Clone)]
pub struct SwitchAdapter {
    control: Arc<dyn SwitchControl>,
    config: SwitchConfig,
}

impl SwitchAdapter {
    pub fn new(control: Arc<dyn SwitchControl>, config: SwitchConfig) -> Self {
        Self { control, config }
    }

    pub fn config(&self) -> &SwitchConfig {
        &self.config
    }

    /// Originate a call; returns the call uuid on success. The uuid is
    /// chosen by the caller (`origination_uuid`), so the record can be
    /// keyed before the switch reports anything.
    pub async fn originate(&self, request: &OriginateRequest) -> Result<String, SwitchError> {
        let command = encode_originate(&self.config, request);
        debug!("originate -> {}", request.phone_number);
        let reply = self.control.bgapi(&command).await?;
        if reply.starts_with("+OK") {
            info!(
                "📞 Originated call {} to {} (auto_bridge={})",
                request.call_id, request.phone_number, request.auto_bridge
            );
            Ok(request.call_id.clone())
        } else {
            error!("originate rejected for {}: {}", request.phone_number, reply);
            Err(SwitchError::CommandFailed(reply))
        }
    }

    /// Attach an agent to a parked call.
    pub async fn bridge(&self, call_uuid: &str, extension: &str) -> Result<(), SwitchError> {
        let body = self
            .control
            .api(&format!("uuid_bridge {call_uuid} user/{extension}"))
            .await?;
        if body.starts_with("+OK") {
            info!("🌉 Bridged {} to extension {}", call_uuid, extension);
            Ok(())
        } else {
            error!("bridge of {} to {} failed: {}", call_uuid, extension, body);
            Err(SwitchError::CommandFailed(body))
        }
    }

    /// Redirect a call to an extension through the dialplan.
    pub async fn transfer(&self, call_uuid: &str, extension: &str) -> Result<(), SwitchError> {
        let reply = self
            .control
            .bgapi(&format!("uuid_transfer {call_uuid} {extension} XML default"))
            .await?;
        if reply.starts_with("+OK") {
            debug!("transferred {} to {}", call_uuid, extension);
            Ok(())
        } else {
            error!("transfer of {} to {} failed: {}", call_uuid, extension, reply);
            Err(SwitchError::CommandFailed(reply))
        }
    }

    /// Terminate a call with a specific clearing cause.
    pub async fn kill(&self, call_uuid: &str, cause: &str) -> Result<(), SwitchError> {
        let body = self
            .control
            .api(&format!("uuid_kill {call_uuid} {cause}"))
            .await?;
        if body.starts_with("+OK") {
            debug!("killed {} with cause {}", call_uuid, cause);
            Ok(())
        } else {
            error!("kill of {} failed: {}", call_uuid, body);
            Err(SwitchError::CommandFailed(body))
        }
    }
}
