//! Dialer engine configuration
//!
//! One sub-struct per concern, all carried inside [`DialerConfig`]. Every
//! tuning constant of the dialing algorithm lives in [`DialingConfig`] so
//! operational changes never touch component code.
//!
//! # Examples
//!
//! ```
//! use outdial_dialer_engine::config::DialerConfig;
//!
//! let mut config = DialerConfig::default();
//! config.dialing.pickup_ratio = 0.5;
//! assert_eq!(config.dialing.dial_multiplier(), 2);
//! ```

use serde::{Deserialize, Serialize};

/// Complete dialer engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DialerConfig {
    /// General identity and event-plane settings
    pub general: GeneralConfig,
    /// State store (Redis) settings
    pub store: StoreConfig,
    /// Switch command/event channel settings
    pub switch: SwitchConfig,
    /// Lead/campaign store settings
    pub database: DatabaseConfig,
    /// Dialing algorithm tuning
    pub dialing: DialingConfig,
}

/// General engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Logical domain used in diagnostics
    pub domain: String,
    /// Extension the switch parks inbound callers on while they wait
    pub waiting_room_extension: String,
    /// Number of event workers; events for one channel uuid always land on
    /// the same worker
    pub event_workers: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            domain: "outdial.local".to_string(),
            waiting_room_extension: "9000".to_string(),
            event_workers: 4,
        }
    }
}

/// State store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL
    pub redis_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
        }
    }
}

/// Where originated calls are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationMode {
    /// `sofia/external/<e164>` through the configured gateway
    Production,
    /// `user/<ext>` for agent-to-agent testing on a local switch
    Development,
}

/// Switch command channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchConfig {
    /// Event socket address, host:port
    pub esl_addr: String,
    /// Event socket password
    pub esl_password: String,
    /// Destination encoding for originated calls
    pub destination: DestinationMode,
    /// `originate_timeout` channel variable; the switch auto-cancels rings
    /// that exceed it
    pub originate_timeout_secs: u64,
    /// Reconnect backoff after the event stream drops
    pub reconnect_backoff_secs: u64,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            esl_addr: "127.0.0.1:8021".to_string(),
            esl_password: "ClueCon".to_string(),
            destination: DestinationMode::Production,
            originate_timeout_secs: 30,
            reconnect_backoff_secs: 1,
        }
    }
}

/// Lead/campaign store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL
    pub database_url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            // rwc: create the database file on first run
            database_url: "sqlite:outdial.db?mode=rwc".to_string(),
        }
    }
}

/// Dialing algorithm tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialingConfig {
    /// Empirical fraction of dials that answer; drives the secondary-pass
    /// dial multiplier
    pub pickup_ratio: f64,
    /// Seconds between dialer ticks
    pub tick_interval_secs: u64,
    /// TTL of the tick-level execution lock
    pub execution_lock_ttl_secs: u64,
    /// Refill when any agent's secondary list drops below this
    pub refill_threshold: usize,
    /// Busy agents with no call id older than this are reclaimed
    pub ring_window_secs: i64,
    /// Delay before a scheduled persistence drain runs
    pub sync_delay_secs: u64,
    /// Sleep between waiting-room iterations
    pub waiting_room_sleep_secs: u64,
    /// Sleep after a waiting-room iteration fails
    pub waiting_room_error_sleep_secs: u64,
    /// TTL of the acquisition-enabled agent list
    pub acquisition_agents_ttl_secs: u64,
}

impl Default for DialingConfig {
    fn default() -> Self {
        Self {
            pickup_ratio: 0.3,
            tick_interval_secs: 15,
            execution_lock_ttl_secs: 10,
            refill_threshold: 100,
            ring_window_secs: 90,
            sync_delay_secs: 5,
            waiting_room_sleep_secs: 2,
            waiting_room_error_sleep_secs: 3,
            acquisition_agents_ttl_secs: 8 * 60 * 60,
        }
    }
}

impl DialingConfig {
    /// Predictive dial multiplier: m = max(1, floor(1 / pickup_ratio)).
    pub fn dial_multiplier(&self) -> usize {
        if self.pickup_ratio <= 0.0 {
            return 1;
        }
        ((1.0 / self.pickup_ratio).floor() as usize).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_multiplier_is_three() {
        // pickup_ratio 0.3 -> floor(3.33) = 3
        assert_eq!(DialingConfig::default().dial_multiplier(), 3);
    }

    #[test]
    fn multiplier_never_drops_below_one() {
        let mut dialing = DialingConfig::default();
        dialing.pickup_ratio = 1.0;
        assert_eq!(dialing.dial_multiplier(), 1);
        dialing.pickup_ratio = 0.0;
        assert_eq!(dialing.dial_multiplier(), 1);
        dialing.pickup_ratio = 2.0;
        assert_eq!(dialing.dial_multiplier(), 1);
    }
}
