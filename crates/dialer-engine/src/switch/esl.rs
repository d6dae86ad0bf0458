//! Event-socket backed switch control
//!
//! Holds the current [`EslHandle`] behind a lock so the command side
//! survives reconnects: the listener task swaps the handle in after every
//! successful connect and clears it when the stream drops. Commands issued
//! while disconnected fail fast with [`SwitchError::NotConnected`] and are
//! retried by the next tick.

use async_trait::async_trait;
use outdial_switch_esl::EslHandle;
use tokio::sync::RwLock;

use super::{SwitchControl, SwitchError};

/// Reconnect-tolerant [`SwitchControl`] over the event socket.
#[derive(Default)]
pub struct EslSwitch {
    handle: RwLock<Option<EslHandle>>,
}

impl EslSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the handle of a freshly authenticated connection.
    pub async fn set_handle(&self, handle: EslHandle) {
        *self.handle.write().await = Some(handle);
    }

    /// Drop the handle after the stream ends.
    pub async fn clear(&self) {
        *self.handle.write().await = None;
    }

    async fn current(&self) -> Result<EslHandle, SwitchError> {
        self.handle
            .read()
            .await
            .clone()
            .ok_or(SwitchError::NotConnected)
    }
}

#[async_trait]
impl SwitchControl for EslSwitch {
    async fn api(&self, command: &str) -> Result<String, SwitchError> {
        let handle = self.current().await?;
        handle
            .api(command)
            .await
            .map_err(|e| SwitchError::Transport(e.to_string()))
    }

    async fn bgapi(&self, command: &str) -> Result<String, SwitchError> {
        let handle = self.current().await?;
        handle
            .bgapi(command)
            .await
            .map_err(|e| SwitchError::Transport(e.to_string()))
    }
}
