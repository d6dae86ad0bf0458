//! Property-based invariants for the agent state machine and the
//! hangup-cause mapping.

use proptest::prelude::*;

use outdial_dialer_engine::agent::{AgentId, AgentStateMachine, Team};
use outdial_dialer_engine::events::map_hangup_cause;
use outdial_dialer_engine::store::StateStore;

#[derive(Debug, Clone)]
enum Op {
    Login(usize),
    Logout(usize),
    BusyWithCall(usize),
    BusyReserved(usize),
    Idle(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..3usize).prop_map(Op::Login),
        (0..3usize).prop_map(Op::Logout),
        (0..3usize).prop_map(Op::BusyWithCall),
        (0..3usize).prop_map(Op::BusyReserved),
        (0..3usize).prop_map(Op::Idle),
    ]
}

fn agent(index: usize) -> AgentId {
    AgentId::from(format!("agent-{index}").as_str())
}

const TEAMS: [Team; 3] = [Team::Sales, Team::Support, Team::SecondarySales];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// After any finite sequence of state-machine operations quiesces, an
    /// agent is dialable exactly when it sits in its team's idle queue.
    #[test]
    fn idle_state_matches_queue_membership(
        ops in prop::collection::vec(op_strategy(), 1..40)
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        rt.block_on(async move {
            let store = StateStore::in_memory();
            let agents = AgentStateMachine::new(store.clone());

            for op in ops {
                // Operations on logged-out agents fail by design; the
                // invariant must survive those failures too.
                match op {
                    Op::Login(i) => {
                        let _ = agents.login(&agent(i), TEAMS[i]).await;
                    }
                    Op::Logout(i) => {
                        let _ = agents.logout(&agent(i)).await;
                    }
                    Op::BusyWithCall(i) => {
                        let _ = agents.mark_busy(&agent(i), Some("call-x")).await;
                    }
                    Op::BusyReserved(i) => {
                        let _ = agents.mark_busy(&agent(i), None).await;
                    }
                    Op::Idle(i) => {
                        let _ = agents.mark_idle(&agent(i)).await;
                    }
                }
            }

            for i in 0..3 {
                let id = agent(i);
                let record = agents.record(&id).await.unwrap();
                let queued = store
                    .backend()
                    .zrange_all(TEAMS[i].idle_queue_key())
                    .await
                    .unwrap()
                    .contains(&id.0);

                match record {
                    Some(record) => prop_assert_eq!(
                        record.idle_for_dialing(),
                        queued,
                        "agent {} state/queue divergence",
                        id
                    ),
                    None => prop_assert!(!queued, "logged-out agent {} still queued", id),
                }
            }
            Ok(())
        })?;
    }

    /// The cause map is total: any cause string resolves without panic,
    /// and only the fixed table maps to an outcome.
    #[test]
    fn cause_mapping_is_total(cause in "[A-Z_]{0,24}") {
        const MAPPED: [&str; 12] = [
            "NORMAL_CLEARING",
            "USER_BUSY",
            "CALL_REJECTED",
            "NO_ANSWER",
            "NO_USER_RESPONSE",
            "PROGRESS_TIMEOUT",
            "RECOVERY_ON_TIMER",
            "LOSE_RACE",
            "ORIGINATOR_CANCEL",
            "UNALLOCATED_NUMBER",
            "INVALID_NUMBER_FORMAT",
            "NO_ROUTE_DESTINATION",
        ];
        let outcome = map_hangup_cause(&cause);
        prop_assert_eq!(outcome.is_some(), MAPPED.contains(&cause.as_str()));
    }
}
