//! # Event Demultiplexer
//!
//! Consumes the switch's call-progress stream and drives every call and
//! agent transition: answer-time bridging, warm transfers, inbound park
//! routing, and hangup reconciliation into the persistence sink.
//!
//! ```text
//!               ┌──────────────────────────────┐
//!  ESL stream ─▶│ SwitchEvent::from_esl        │  typed variants
//!               └──────────────┬───────────────┘
//!                              ▼
//!               ┌──────────────────────────────┐
//!               │ EventDispatcher (uuid-keyed) │  serialized per channel
//!               └──────────────┬───────────────┘
//!                              ▼
//!               ┌──────────────────────────────┐
//!               │ EventHandler                 │  answer/hangup/park/execute
//!               └──────────────────────────────┘
//! ```
//!
//! The raw header bag is parsed once into a closed variant carrying only
//! the fields each handler needs; events of unknown shape are logged and
//! dropped, never crash the loop.

pub mod dispatch;
pub mod handler;
pub mod sync;

use outdial_switch_esl::EslEvent;
use tracing::debug;

use crate::agent::AgentId;
use crate::calls::CallDirection;

pub use dispatch::EventDispatcher;
pub use handler::EventHandler;
pub use sync::{map_hangup_cause, CallOutcome, PersistenceSink};

/// Hangup causes after which an uncontacted lead goes back to the head of
/// its agent's priority bucket.
pub const REQUEUE_CAUSES: [&str; 3] = ["NO_AVAILABLE_AGENT", "AGENT_BUSY", "LOSE_RACE"];

/// First answer of an outbound call (no other leg yet), or the second-leg
/// answer when `other_leg` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerEvent {
    pub uuid: String,
    pub direction: CallDirection,
    pub other_leg: Option<String>,
    pub agent_id: Option<AgentId>,
    pub call_id: Option<String>,
    pub auto_bridge: bool,
}

/// A channel finished tearing down.
#[derive(Debug, Clone, PartialEq)]
pub struct HangupEvent {
    pub uuid: String,
    pub direction: CallDirection,
    pub cause: String,
    pub agent_id: Option<AgentId>,
    /// Epoch seconds, from `Caller-Channel-Hangup-Time`.
    pub ended_at: Option<i64>,
    /// From `variable_duration`.
    pub duration_seconds: Option<u32>,
}

/// A channel reached a park point.
#[derive(Debug, Clone, PartialEq)]
pub struct ParkEvent {
    pub uuid: String,
    pub direction: CallDirection,
    /// IVR menu choice of an inbound caller.
    pub ivr_choice: Option<String>,
}

/// The switch executed a dialplan application on a channel; only
/// `transfer` is acted on (warm transfer between agents).
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteEvent {
    pub uuid: String,
    pub application: String,
    pub application_data: Option<String>,
    /// Extension of the agent performing the transfer, from
    /// `variable_last_sent_callee_id_number`.
    pub transferor_extension: Option<String>,
}

/// Typed view of one switch event.
#[derive(Debug, Clone, PartialEq)]
pub enum SwitchEvent {
    Answer(AnswerEvent),
    Hangup(HangupEvent),
    Park(ParkEvent),
    Execute(ExecuteEvent),
}

impl SwitchEvent {
    /// The channel uuid used to serialize processing per channel.
    pub fn channel_uuid(&self) -> &str {
        match self {
            SwitchEvent::Answer(e) => &e.uuid,
            SwitchEvent::Hangup(e) => &e.uuid,
            SwitchEvent::Park(e) => &e.uuid,
            SwitchEvent::Execute(e) => &e.uuid,
        }
    }

    /// Parse a raw event into a typed variant. Returns None for shapes the
    /// dialer does not consume (callers log and drop).
    pub fn from_esl(event: &EslEvent) -> Option<SwitchEvent> {
        let uuid = event.channel_uuid()?.to_string();

        match event.name() {
            "CHANNEL_ANSWER" => {
                let direction = CallDirection::from_wire(event.direction()?)?;
                Some(SwitchEvent::Answer(AnswerEvent {
                    uuid,
                    direction,
                    other_leg: event.other_leg_uuid().map(str::to_string),
                    agent_id: event
                        .sip_header("agent_id")
                        .filter(|v| !v.is_empty())
                        .map(AgentId::from),
                    call_id: event.sip_header("call_id").map(str::to_string),
                    auto_bridge: event.sip_header("auto_bridge") == Some("true"),
                }))
            }
            "CHANNEL_HANGUP_COMPLETE" => {
                let direction = CallDirection::from_wire(event.direction()?)?;
                Some(SwitchEvent::Hangup(HangupEvent {
                    uuid,
                    direction,
                    cause: event.hangup_cause()?.to_string(),
                    agent_id: event
                        .sip_header("agent_id")
                        .filter(|v| !v.is_empty())
                        .map(AgentId::from),
                    ended_at: event
                        .header("Caller-Channel-Hangup-Time")
                        .and_then(parse_switch_epoch),
                    duration_seconds: event
                        .header("variable_duration")
                        .and_then(|v| v.trim().parse().ok()),
                }))
            }
            "CHANNEL_PARK" => {
                let direction = CallDirection::from_wire(event.direction()?)?;
                Some(SwitchEvent::Park(ParkEvent {
                    uuid,
                    direction,
                    ivr_choice: event.header("variable_ivr_choice").map(str::to_string),
                }))
            }
            "CHANNEL_EXECUTE" => Some(SwitchEvent::Execute(ExecuteEvent {
                uuid,
                application: event.application()?.to_string(),
                application_data: event.application_data().map(str::to_string),
                transferor_extension: event
                    .header("variable_last_sent_callee_id_number")
                    .map(str::to_string),
            })),
            other => {
                debug!("ignoring event type {}", other);
                None
            }
        }
    }
}

/// Parse a switch timestamp into epoch seconds. The switch reports hangup
/// times in epoch microseconds.
fn parse_switch_epoch(raw: &str) -> Option<i64> {
    let value: i64 = raw.trim().parse().ok()?;
    if value > 100_000_000_000 {
        Some(value / 1_000_000)
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn esl_event(pairs: &[(&str, &str)]) -> EslEvent {
        let headers: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EslEvent::new(headers, None)
    }

    #[test]
    fn parses_first_answer() {
        let event = esl_event(&[
            ("Event-Name", "CHANNEL_ANSWER"),
            ("Unique-ID", "u-1"),
            ("Call-Direction", "outbound"),
            ("variable_sip_h_X-agent_id", "7"),
            ("variable_sip_h_X-call_id", "u-1"),
            ("variable_sip_h_X-auto_bridge", "false"),
        ]);

        let parsed = SwitchEvent::from_esl(&event).unwrap();
        let SwitchEvent::Answer(answer) = parsed else {
            panic!("expected answer");
        };
        assert_eq!(answer.uuid, "u-1");
        assert_eq!(answer.direction, CallDirection::Outbound);
        assert_eq!(answer.other_leg, None);
        assert_eq!(answer.agent_id, Some(AgentId::from("7")));
        assert!(!answer.auto_bridge);
    }

    #[test]
    fn parses_hangup_with_microsecond_timestamp() {
        let event = esl_event(&[
            ("Event-Name", "CHANNEL_HANGUP_COMPLETE"),
            ("Unique-ID", "u-2"),
            ("Call-Direction", "outbound"),
            ("Hangup-Cause", "NORMAL_CLEARING"),
            ("Caller-Channel-Hangup-Time", "1760000000000000"),
            ("variable_duration", "63"),
        ]);

        let parsed = SwitchEvent::from_esl(&event).unwrap();
        let SwitchEvent::Hangup(hangup) = parsed else {
            panic!("expected hangup");
        };
        assert_eq!(hangup.cause, "NORMAL_CLEARING");
        assert_eq!(hangup.ended_at, Some(1_760_000_000));
        assert_eq!(hangup.duration_seconds, Some(63));
    }

    #[test]
    fn parses_inbound_park_with_ivr_choice() {
        let event = esl_event(&[
            ("Event-Name", "CHANNEL_PARK"),
            ("Unique-ID", "u-3"),
            ("Call-Direction", "inbound"),
            ("variable_ivr_choice", "1"),
        ]);

        let parsed = SwitchEvent::from_esl(&event).unwrap();
        assert_eq!(
            parsed,
            SwitchEvent::Park(ParkEvent {
                uuid: "u-3".to_string(),
                direction: CallDirection::Inbound,
                ivr_choice: Some("1".to_string()),
            })
        );
    }

    #[test]
    fn parses_transfer_execute() {
        let event = esl_event(&[
            ("Event-Name", "CHANNEL_EXECUTE"),
            ("Unique-ID", "u-4"),
            ("Application", "transfer"),
            ("Application-Data", "1005 XML default"),
            ("variable_last_sent_callee_id_number", "1002"),
        ]);

        let parsed = SwitchEvent::from_esl(&event).unwrap();
        let SwitchEvent::Execute(execute) = parsed else {
            panic!("expected execute");
        };
        assert_eq!(execute.application, "transfer");
        assert_eq!(execute.application_data.as_deref(), Some("1005 XML default"));
        assert_eq!(execute.transferor_extension.as_deref(), Some("1002"));
    }

    #[test]
    fn unknown_shapes_are_rejected() {
        // Unknown event type.
        let event = esl_event(&[("Event-Name", "HEARTBEAT"), ("Unique-ID", "u-5")]);
        assert_eq!(SwitchEvent::from_esl(&event), None);

        // Missing channel uuid.
        let event = esl_event(&[("Event-Name", "CHANNEL_ANSWER")]);
        assert_eq!(SwitchEvent::from_esl(&event), None);

        // Missing hangup cause.
        let event = esl_event(&[
            ("Event-Name", "CHANNEL_HANGUP_COMPLETE"),
            ("Unique-ID", "u-6"),
            ("Call-Direction", "outbound"),
        ]);
        assert_eq!(SwitchEvent::from_esl(&event), None);
    }
}
