//! Shared test fixtures: a scripted switch and a fully in-process engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use outdial_dialer_engine::config::DialerConfig;
use outdial_dialer_engine::database::DatabaseManager;
use outdial_dialer_engine::orchestrator::DialerEngine;
use outdial_dialer_engine::queue::{QueuedLead, Segment};
use outdial_dialer_engine::store::StateStore;
use outdial_dialer_engine::switch::{SwitchControl, SwitchError};

/// Records every command and answers with scripted replies.
#[derive(Default)]
pub struct MockSwitch {
    commands: Mutex<Vec<String>>,
    fail_bridge: AtomicBool,
    fail_originate: AtomicBool,
}

impl MockSwitch {
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn commands_matching(&self, prefix: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn set_fail_bridge(&self, fail: bool) {
        self.fail_bridge.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_originate(&self, fail: bool) {
        self.fail_originate.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SwitchControl for MockSwitch {
    async fn api(&self, command: &str) -> Result<String, SwitchError> {
        self.commands.lock().unwrap().push(command.to_string());
        if command.starts_with("uuid_bridge") && self.fail_bridge.load(Ordering::SeqCst) {
            return Ok("-ERR no such channel".to_string());
        }
        Ok("+OK".to_string())
    }

    async fn bgapi(&self, command: &str) -> Result<String, SwitchError> {
        self.commands.lock().unwrap().push(command.to_string());
        if command.starts_with("originate") && self.fail_originate.load(Ordering::SeqCst) {
            return Ok("-ERR REJECTED".to_string());
        }
        Ok("+OK Job-UUID: 7f4de4bc-17d7-11dd-b7a0-db4edd065621".to_string())
    }
}

/// Engine over an in-memory store, an in-memory lead store, and the mock
/// switch.
pub async fn test_engine(config: DialerConfig) -> (Arc<DialerEngine>, Arc<MockSwitch>) {
    let store = StateStore::in_memory();
    let db = DatabaseManager::new_in_memory().await.unwrap();
    let switch = Arc::new(MockSwitch::default());
    let engine = DialerEngine::new(config, store, db, switch.clone());
    (engine, switch)
}

/// Config tuned so one parked call is dialed per pass (pickup ratio 1.0).
pub fn one_to_one_config() -> DialerConfig {
    let mut config = DialerConfig::default();
    config.dialing.pickup_ratio = 1.0;
    config
}

/// A dialable queue snapshot for the given lead id.
pub fn queued_lead(lead_id: i64, phone: &str) -> QueuedLead {
    QueuedLead {
        campaign_id: Some(1),
        campaign_name: Some("test campaign".to_string()),
        campaign_segment: Some(Segment::Active),
        lead_id,
        source_lead_id: format!("src-{lead_id}"),
        phone_number: Some(phone.to_string()),
        customer_name: format!("customer {lead_id}"),
        city: Some("Karachi".to_string()),
        customer_segment: Some("small".to_string()),
        month_gmv: Some(100.0),
        overall_gmv: Some(2000.0),
        last_call_date: None,
        last_order_details: serde_json::Value::Null,
        metadata: serde_json::Value::Null,
        enqueued_at: "2026-02-09T10:00:00Z".to_string(),
    }
}
