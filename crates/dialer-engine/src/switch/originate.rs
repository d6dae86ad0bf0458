//! Originate command encoding
//!
//! One line, channel variables first:
//!
//! ```text
//! originate {origination_uuid='..',sip_h_X-call_id='..',...}sofia/external/<e164> &park
//! ```
//!
//! Per-call metadata rides as `sip_h_X-*` custom SIP headers so the event
//! stream can hand it back on answer and hangup. The wide lead fields
//! (`last_order_details`, `metadata`) never go on the wire; the switch's
//! header size limit is an operational coupling, and they are not needed
//! at the edge.

use crate::agent::AgentId;
use crate::config::{DestinationMode, SwitchConfig};
use crate::queue::QueuedLead;

/// Everything needed to place one outbound call.
#[derive(Debug, Clone)]
pub struct OriginateRequest {
    /// Caller-chosen call uuid; also sent as `origination_uuid`.
    pub call_id: String,
    /// Pre-assigned agent, when the dialing pass knows one.
    pub agent_id: Option<AgentId>,
    /// The pre-assigned agent's extension; required for auto-bridge.
    pub agent_extension: Option<String>,
    pub phone_number: String,
    /// Ring the agent leg simultaneously (`&bridge`) instead of parking.
    pub auto_bridge: bool,
    /// The lead snapshot whose scalar fields go on the wire.
    pub lead: QueuedLead,
}

impl OriginateRequest {
    /// Priority-path request: the agent leg is dialed by the switch.
    pub fn auto_bridge(
        call_id: String,
        agent_id: AgentId,
        agent_extension: String,
        phone_number: String,
        lead: QueuedLead,
    ) -> Self {
        Self {
            call_id,
            agent_id: Some(agent_id),
            agent_extension: Some(agent_extension),
            phone_number,
            auto_bridge: true,
            lead,
        }
    }

    /// Predictive/acquisition request: the call parks until the lead
    /// answers; `agent_id` is carried when the agent is pre-assigned.
    pub fn parked(
        call_id: String,
        agent_id: Option<AgentId>,
        phone_number: String,
        lead: QueuedLead,
    ) -> Self {
        Self {
            call_id,
            agent_id,
            agent_extension: None,
            phone_number,
            auto_bridge: false,
            lead,
        }
    }
}

/// Build the single-line originate command.
pub fn encode_originate(config: &SwitchConfig, request: &OriginateRequest) -> String {
    let mut vars: Vec<(String, String)> = vec![
        ("origination_uuid".to_string(), request.call_id.clone()),
        (
            "originate_timeout".to_string(),
            config.originate_timeout_secs.to_string(),
        ),
        ("sip_h_X-call_id".to_string(), request.call_id.clone()),
        (
            "sip_h_X-auto_bridge".to_string(),
            request.auto_bridge.to_string(),
        ),
    ];

    if let Some(agent_id) = &request.agent_id {
        vars.push(("sip_h_X-agent_id".to_string(), agent_id.to_string()));
    }

    let lead = &request.lead;
    vars.push(("sip_h_X-lead_id".to_string(), lead.lead_id.to_string()));
    if let Some(campaign_id) = lead.campaign_id {
        vars.push(("sip_h_X-campaign_id".to_string(), campaign_id.to_string()));
    }
    if let Some(segment) = lead.campaign_segment {
        vars.push((
            "sip_h_X-campaign_segment".to_string(),
            segment.as_str().to_string(),
        ));
    }
    vars.push((
        "sip_h_X-phone_number".to_string(),
        request.phone_number.clone(),
    ));
    vars.push((
        "sip_h_X-customer_name".to_string(),
        lead.customer_name.clone(),
    ));
    if let Some(segment) = &lead.customer_segment {
        vars.push(("sip_h_X-customer_segment".to_string(), segment.clone()));
    }
    if let Some(gmv) = lead.month_gmv {
        vars.push(("sip_h_X-month_gmv".to_string(), gmv.to_string()));
    }
    if let Some(gmv) = lead.overall_gmv {
        vars.push(("sip_h_X-overall_gmv".to_string(), gmv.to_string()));
    }

    let vars = vars
        .iter()
        .map(|(name, value)| format!("{name}='{}'", sanitize(value)))
        .collect::<Vec<_>>()
        .join(",");

    let dest = match config.destination {
        DestinationMode::Production => format!("sofia/external/{}", request.phone_number),
        DestinationMode::Development => format!("user/{}", request.phone_number),
    };

    let app = match (&request.auto_bridge, &request.agent_extension) {
        (true, Some(extension)) => format!("&bridge(user/{extension})"),
        _ => "&park".to_string(),
    };

    format!("originate {{{vars}}}{dest} {app}")
}

/// The channel-variable syntax cannot carry quotes, commas or braces.
fn sanitize(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '\'' | '"' | ',' | '{' | '}' | '\n' | '\r'))
        .collect()
}
