//! End-to-end dialer flows against the in-process fixtures
//!
//! These walk the observable scenarios of the dialing core: predictive
//! happy path, race losses, acquisition pickup, inbound waiting room and
//! reaper reclaim, asserting on switch commands, agent state, queue
//! contents and the rows that reach the lead store.

mod common;

use serial_test::serial;

use common::{one_to_one_config, queued_lead, test_engine};

use outdial_dialer_engine::agent::{Activity, AgentId, Team};
use outdial_dialer_engine::calls::{ActiveCall, CallDirection};
use outdial_dialer_engine::database::NewLead;
use outdial_dialer_engine::events::{AnswerEvent, HangupEvent, ParkEvent, SwitchEvent};
use outdial_dialer_engine::store;

async fn seed_in_queue_lead(engine: &outdial_dialer_engine::DialerEngine, lead_id: i64) {
    let db = engine.database();
    db.insert_lead(&NewLead {
        id: lead_id,
        source_lead_id: format!("src-{lead_id}"),
        phone_number: Some("923001234567".to_string()),
        customer_name: format!("customer {lead_id}"),
        max_attempts: 3,
        ..Default::default()
    })
    .await
    .unwrap();
    db.mark_leads_in_queue(&[lead_id]).await.unwrap();
}

#[tokio::test]
#[serial]
async fn s1_happy_path_predictive_dial() {
    let (engine, switch) = test_engine(one_to_one_config()).await;
    let a1 = AgentId::from("a1");

    engine.database().upsert_agent("a1", "1001", Team::Sales).await.unwrap();
    seed_in_queue_lead(&engine, 1).await;
    engine.login_agent(&a1, Team::Sales).await.unwrap();
    engine
        .queues()
        .store_secondary_bucket("a1", &[queued_lead(1, "923001234567")])
        .await
        .unwrap();

    // Tick: one parked predictive call for the lead.
    let report = engine.run_dialer_tick().await.unwrap();
    assert!(!report.skipped);
    assert_eq!(report.secondary_calls, 1);

    let originates = switch.commands_matching("originate");
    assert_eq!(originates.len(), 1);
    assert!(originates[0].contains("sip_h_X-agent_id='a1'"));
    assert!(originates[0].contains("sip_h_X-auto_bridge='false'"));
    assert!(originates[0].ends_with("&park"));

    // The agent is reserved: busy without a call id.
    let record = engine.agents().record(&a1).await.unwrap().unwrap();
    assert_eq!(record.state, Activity::Busy);
    assert_eq!(record.current_call_id, None);
    assert!(record.call_initiated_at.is_some());

    let uuids = engine.active_calls().uuids().await.unwrap();
    assert_eq!(uuids.len(), 1);
    let call_uuid = uuids.into_iter().next().unwrap();

    // The lead answers: the handler bridges the reserved agent.
    let handler = engine.event_handler();
    handler
        .handle(SwitchEvent::Answer(AnswerEvent {
            uuid: call_uuid.clone(),
            direction: CallDirection::Outbound,
            other_leg: None,
            agent_id: Some(a1.clone()),
            call_id: Some(call_uuid.clone()),
            auto_bridge: false,
        }))
        .await
        .unwrap();

    let bridges = switch.commands_matching("uuid_bridge");
    assert_eq!(bridges, vec![format!("uuid_bridge {call_uuid} user/1001")]);
    let record = engine.agents().record(&a1).await.unwrap().unwrap();
    assert_eq!(record.current_call_id.as_deref(), Some(call_uuid.as_str()));

    // The agent leg answers: connected_at on the customer call.
    handler
        .handle(SwitchEvent::Answer(AnswerEvent {
            uuid: "agent-leg-1".to_string(),
            direction: CallDirection::Outbound,
            other_leg: Some(call_uuid.clone()),
            agent_id: None,
            call_id: None,
            auto_bridge: false,
        }))
        .await
        .unwrap();
    let call = engine.active_calls().get(&call_uuid).await.unwrap().unwrap();
    assert!(call.connected_at.is_some());

    // Hangup: agent freed, terminal record buffered.
    handler
        .handle(SwitchEvent::Hangup(HangupEvent {
            uuid: call_uuid.clone(),
            direction: CallDirection::Outbound,
            cause: "NORMAL_CLEARING".to_string(),
            agent_id: Some(a1.clone()),
            ended_at: Some(store::epoch_seconds()),
            duration_seconds: Some(42),
        }))
        .await
        .unwrap();

    assert!(engine.agents().is_idle_for_dialing(&a1).await.unwrap());
    assert_eq!(
        engine.agents().peek_next_available(Team::Sales).await.unwrap(),
        Some(a1.clone())
    );
    // The record is gone exactly when the hangup has been processed.
    assert_eq!(engine.active_calls().count().await.unwrap(), 0);

    // Drain: one call-log row, lead completed.
    let drained = engine.sink().drain().await.unwrap();
    assert_eq!(drained.call_logs, 1);
    assert_eq!(drained.completed_leads, 1);

    let log = engine.database().get_call_log(&call_uuid).await.unwrap().unwrap();
    assert_eq!(log.status.as_deref(), Some("answered"));
    assert_eq!(log.duration_seconds, 42);
    assert_eq!(log.agent_id.as_deref(), Some("a1"));
    assert_eq!(log.from_extension.as_deref(), Some("1001"));

    let lead = engine.database().get_lead(1).await.unwrap().unwrap();
    assert_eq!(lead.status, "completed");
    assert!(lead.last_call_date.is_some());
    assert_eq!(lead.attempt_count, 1);

    // A second drain finds nothing and writes nothing (terminal facts are
    // recorded at most once per call uuid).
    let drained = engine.sink().drain().await.unwrap();
    assert_eq!(drained.records, 0);
    assert_eq!(engine.database().count_call_logs().await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn s2_priority_pass_skips_busy_agents() {
    let (engine, switch) = test_engine(one_to_one_config()).await;
    let a1 = AgentId::from("a1");
    let a2 = AgentId::from("a2");

    engine.database().upsert_agent("a1", "1001", Team::Sales).await.unwrap();
    engine.database().upsert_agent("a2", "1002", Team::Sales).await.unwrap();
    engine.login_agent(&a1, Team::Sales).await.unwrap();
    engine.login_agent(&a2, Team::Sales).await.unwrap();

    // a1 goes busy through another path before the tick pops its lead.
    engine.agents().mark_busy(&a1, Some("other-call")).await.unwrap();
    engine
        .queues()
        .push_priority("a1", queued_lead(2, "923002222222"))
        .await
        .unwrap();

    let report = engine.run_dialer_tick().await.unwrap();
    assert_eq!(report.priority_calls, 0);
    assert!(switch.commands_matching("originate").is_empty());

    // The lead list is unchanged for the next tick.
    let mapping = engine.queues().priority_mapping().await.unwrap();
    assert_eq!(mapping["a1"].len(), 1);
    assert_eq!(mapping["a1"][0].lead_id, 2);
}

#[tokio::test]
#[serial]
async fn s3_bridge_race_kills_and_requeues_the_lead() {
    let (engine, switch) = test_engine(one_to_one_config()).await;
    let a1 = AgentId::from("a1");

    engine.database().upsert_agent("a1", "1001", Team::Sales).await.unwrap();
    seed_in_queue_lead(&engine, 3).await;
    engine.login_agent(&a1, Team::Sales).await.unwrap();

    // A parked call for a1 is already ringing the lead.
    let call = ActiveCall::outbound(
        "race-uuid".to_string(),
        Some(a1.clone()),
        "923001234567".to_string(),
        queued_lead(3, "923001234567"),
        false,
    );
    engine.active_calls().insert(&call).await.unwrap();

    // Meanwhile a1 picked up a different call.
    engine.agents().mark_busy(&a1, Some("another-call")).await.unwrap();

    let handler = engine.event_handler();
    handler
        .handle(SwitchEvent::Answer(AnswerEvent {
            uuid: "race-uuid".to_string(),
            direction: CallDirection::Outbound,
            other_leg: None,
            agent_id: Some(a1.clone()),
            call_id: Some("race-uuid".to_string()),
            auto_bridge: false,
        }))
        .await
        .unwrap();

    assert_eq!(
        switch.commands_matching("uuid_kill"),
        vec!["uuid_kill race-uuid AGENT_BUSY".to_string()]
    );

    // The hangup carries the payload back to the head of a1's priority
    // bucket.
    handler
        .handle(SwitchEvent::Hangup(HangupEvent {
            uuid: "race-uuid".to_string(),
            direction: CallDirection::Outbound,
            cause: "AGENT_BUSY".to_string(),
            agent_id: Some(a1.clone()),
            ended_at: Some(store::epoch_seconds()),
            duration_seconds: Some(0),
        }))
        .await
        .unwrap();

    let mapping = engine.queues().priority_mapping().await.unwrap();
    assert_eq!(mapping["a1"][0].lead_id, 3);

    // AGENT_BUSY has no mapped status: no call-log row, lead untouched.
    let drained = engine.sink().drain().await.unwrap();
    assert_eq!(drained.records, 1);
    assert_eq!(drained.call_logs, 0);
    assert_eq!(engine.database().get_lead(3).await.unwrap().unwrap().status, "in_queue");

    // a1 keeps its real call.
    let record = engine.agents().record(&a1).await.unwrap().unwrap();
    assert_eq!(record.current_call_id.as_deref(), Some("another-call"));
}

#[tokio::test]
#[serial]
async fn s4_acquisition_pickup_pulls_from_the_idle_queue() {
    let (engine, switch) = test_engine(one_to_one_config()).await;
    let a1 = AgentId::from("a1");

    engine.database().upsert_agent("a1", "1001", Team::Sales).await.unwrap();
    seed_in_queue_lead(&engine, 4).await;
    engine.login_agent(&a1, Team::Sales).await.unwrap();
    engine
        .queues()
        .store_secondary_bucket("0", &[queued_lead(4, "923004444444")])
        .await
        .unwrap();
    engine
        .queues()
        .add_acquisition_agents(&[a1.clone()], std::time::Duration::from_secs(3600))
        .await
        .unwrap();

    let report = engine.run_dialer_tick().await.unwrap();
    assert_eq!(report.acquisition_calls, 1);

    let originates = switch.commands_matching("originate");
    assert_eq!(originates.len(), 1);
    assert!(!originates[0].contains("sip_h_X-agent_id"));
    assert!(originates[0].ends_with("&park"));

    // No reservation: a1 is still idle and queued for the answer to take.
    assert!(engine.agents().is_idle_for_dialing(&a1).await.unwrap());

    let call_uuid = engine
        .active_calls()
        .uuids()
        .await
        .unwrap()
        .into_iter()
        .next()
        .unwrap();

    let handler = engine.event_handler();
    handler
        .handle(SwitchEvent::Answer(AnswerEvent {
            uuid: call_uuid.clone(),
            direction: CallDirection::Outbound,
            other_leg: None,
            agent_id: None,
            call_id: Some(call_uuid.clone()),
            auto_bridge: false,
        }))
        .await
        .unwrap();

    assert_eq!(
        switch.commands_matching("uuid_bridge"),
        vec![format!("uuid_bridge {call_uuid} user/1001")]
    );
    let record = engine.agents().record(&a1).await.unwrap().unwrap();
    assert_eq!(record.current_call_id.as_deref(), Some(call_uuid.as_str()));
    // Popped from the idle queue by the answer handler.
    assert_eq!(engine.agents().peek_next_available(Team::Sales).await.unwrap(), None);

    handler
        .handle(SwitchEvent::Hangup(HangupEvent {
            uuid: call_uuid.clone(),
            direction: CallDirection::Outbound,
            cause: "NORMAL_CLEARING".to_string(),
            agent_id: None,
            ended_at: Some(store::epoch_seconds()),
            duration_seconds: Some(30),
        }))
        .await
        .unwrap();

    assert!(engine.agents().is_idle_for_dialing(&a1).await.unwrap());
    let drained = engine.sink().drain().await.unwrap();
    assert_eq!(drained.call_logs, 1);
    assert_eq!(engine.database().get_lead(4).await.unwrap().unwrap().status, "completed");
}

#[tokio::test]
#[serial]
async fn s5_inbound_ivr_waits_for_a_support_agent() {
    let (engine, switch) = test_engine(one_to_one_config()).await;
    let s1 = AgentId::from("s1");

    // Nobody from support is logged in when the caller arrives.
    let handler = engine.event_handler();
    handler
        .handle(SwitchEvent::Park(ParkEvent {
            uuid: "in-1".to_string(),
            direction: CallDirection::Inbound,
            ivr_choice: Some("1".to_string()),
        }))
        .await
        .unwrap();

    assert_eq!(
        engine.queues().peek_waiting_customer(Team::Support).await.unwrap().as_deref(),
        Some("in-1")
    );
    // Parked into the waiting room through the dialplan.
    assert_eq!(
        switch.commands_matching("uuid_transfer"),
        vec!["uuid_transfer in-1 9000 XML default".to_string()]
    );

    // A support agent logs in; the next waiting-room iteration bridges.
    engine.database().upsert_agent("s1", "2001", Team::Support).await.unwrap();
    engine.login_agent(&s1, Team::Support).await.unwrap();

    let bridged = engine.waiting_room_pass().await.unwrap();
    assert_eq!(bridged, 1);
    assert_eq!(
        switch.commands_matching("uuid_bridge"),
        vec!["uuid_bridge in-1 user/2001".to_string()]
    );
    assert_eq!(
        engine.queues().peek_waiting_customer(Team::Support).await.unwrap(),
        None
    );
    let record = engine.agents().record(&s1).await.unwrap().unwrap();
    assert_eq!(record.state, Activity::Busy);
    assert_eq!(record.current_call_id.as_deref(), Some("in-1"));
}

#[tokio::test]
#[serial]
async fn s6_reaper_reclaims_a_timed_out_reservation() {
    let (engine, _switch) = test_engine(one_to_one_config()).await;
    let a2 = AgentId::from("a2");

    engine.database().upsert_agent("a2", "1002", Team::Sales).await.unwrap();
    engine.login_agent(&a2, Team::Sales).await.unwrap();
    engine.agents().mark_busy(&a2, None).await.unwrap();

    // Age the reservation past the ring window.
    let mut record = engine.agents().record(&a2).await.unwrap().unwrap();
    record.call_initiated_at = Some(store::epoch_seconds() - 95);
    engine
        .state_store()
        .backend()
        .hset(
            outdial_dialer_engine::store::keys::AGENT_STATES,
            "a2",
            &serde_json::to_string(&record).unwrap(),
        )
        .await
        .unwrap();

    let report = engine.run_dialer_tick().await.unwrap();
    assert_eq!(report.reaped, 1);

    assert!(engine.agents().is_idle_for_dialing(&a2).await.unwrap());
    assert_eq!(
        engine.agents().peek_next_available(Team::Sales).await.unwrap(),
        Some(a2)
    );
}

#[tokio::test]
#[serial]
async fn parallel_ticks_never_double_book_an_agent() {
    let (engine, switch) = test_engine(one_to_one_config()).await;
    let a1 = AgentId::from("a1");

    engine.database().upsert_agent("a1", "1001", Team::Sales).await.unwrap();
    engine.login_agent(&a1, Team::Sales).await.unwrap();
    engine
        .queues()
        .push_priority("a1", queued_lead(9, "923009999999"))
        .await
        .unwrap();

    // Five concurrent ticks: the execution lock lets exactly one through.
    let (r1, r2, r3, r4, r5) = tokio::join!(
        engine.run_dialer_tick(),
        engine.run_dialer_tick(),
        engine.run_dialer_tick(),
        engine.run_dialer_tick(),
        engine.run_dialer_tick(),
    );
    let reports = [
        r1.unwrap(),
        r2.unwrap(),
        r3.unwrap(),
        r4.unwrap(),
        r5.unwrap(),
    ];
    // However the five ticks interleave, the lead is dialed exactly once.
    let dialed: usize = reports.iter().map(|r| r.priority_calls).sum();
    assert_eq!(dialed, 1);

    let auto_bridged: Vec<String> = switch
        .commands_matching("originate")
        .into_iter()
        .filter(|c| c.contains("&bridge"))
        .collect();
    assert_eq!(auto_bridged.len(), 1);
}

#[tokio::test]
#[serial]
async fn lead_without_phone_number_is_dropped_not_retried() {
    let (engine, switch) = test_engine(one_to_one_config()).await;
    let a1 = AgentId::from("a1");

    engine.database().upsert_agent("a1", "1001", Team::Sales).await.unwrap();
    engine.login_agent(&a1, Team::Sales).await.unwrap();

    let mut bad_lead = queued_lead(11, "");
    bad_lead.phone_number = None;
    engine
        .queues()
        .store_secondary_bucket("a1", &[bad_lead])
        .await
        .unwrap();

    let report = engine.run_dialer_tick().await.unwrap();
    assert_eq!(report.secondary_calls, 0);
    assert!(switch.commands_matching("originate").is_empty());

    // Dropped from the queue so it cannot retry forever.
    let mapping = engine.queues().secondary_mapping().await.unwrap();
    assert!(mapping.get("a1").map_or(true, |leads| leads.is_empty()));
}

#[tokio::test]
#[serial]
async fn failed_originate_leaves_the_lead_queued() {
    let (engine, switch) = test_engine(one_to_one_config()).await;
    let a1 = AgentId::from("a1");

    engine.database().upsert_agent("a1", "1001", Team::Sales).await.unwrap();
    engine.login_agent(&a1, Team::Sales).await.unwrap();
    engine
        .queues()
        .store_secondary_bucket("a1", &[queued_lead(12, "923001212121")])
        .await
        .unwrap();

    switch.set_fail_originate(true);
    let report = engine.run_dialer_tick().await.unwrap();
    assert_eq!(report.secondary_calls, 0);

    // Still at the head for the next tick, and the agent stays dialable.
    let mapping = engine.queues().secondary_mapping().await.unwrap();
    assert_eq!(mapping["a1"][0].lead_id, 12);
    assert!(engine.agents().is_idle_for_dialing(&a1).await.unwrap());
}
