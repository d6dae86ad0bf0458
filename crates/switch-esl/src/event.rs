//! Decoded switch events
//!
//! An [`EslEvent`] is the header bag of one `text/event-plain` frame with
//! the values already URL-decoded. The accessors cover the headers the
//! dialer core consumes; everything else stays reachable through
//! [`EslEvent::header`].

use std::collections::HashMap;

/// One call-progress event from the switch.
#[derive(Debug, Clone, Default)]
pub struct EslEvent {
    headers: HashMap<String, String>,
    body: Option<String>,
}

impl EslEvent {
    pub fn new(headers: HashMap<String, String>, body: Option<String>) -> Self {
        Self { headers, body }
    }

    /// Raw header lookup by exact name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|v| v.as_str())
    }

    /// `Event-Name`, e.g. `CHANNEL_ANSWER`.
    pub fn name(&self) -> &str {
        self.header("Event-Name").unwrap_or("")
    }

    /// Channel uuid: `Unique-ID`, falling back to `variable_uuid`.
    pub fn channel_uuid(&self) -> Option<&str> {
        self.header("Unique-ID").or_else(|| self.header("variable_uuid"))
    }

    /// `Other-Leg-Unique-ID`, present on the second leg of bridged flows.
    pub fn other_leg_uuid(&self) -> Option<&str> {
        self.header("Other-Leg-Unique-ID")
    }

    /// `Call-Direction` (`inbound` / `outbound`).
    pub fn direction(&self) -> Option<&str> {
        self.header("Call-Direction")
    }

    /// A custom SIP header carried as `variable_sip_h_X-<name>`.
    pub fn sip_header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&format!("variable_sip_h_X-{name}"))
            .map(|v| v.as_str())
    }

    /// `Hangup-Cause`, falling back to `variable_hangup_cause`.
    pub fn hangup_cause(&self) -> Option<&str> {
        self.header("Hangup-Cause")
            .or_else(|| self.header("variable_hangup_cause"))
    }

    /// `Application` of a CHANNEL_EXECUTE event.
    pub fn application(&self) -> Option<&str> {
        self.header("Application")
    }

    /// `Application-Data` of a CHANNEL_EXECUTE event.
    pub fn application_data(&self) -> Option<&str> {
        self.header("Application-Data")
    }

    /// Event body, when the event carried one.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// All headers, for diagnostics.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(pairs: &[(&str, &str)]) -> EslEvent {
        let headers = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EslEvent::new(headers, None)
    }

    #[test]
    fn exposes_core_headers() {
        let ev = event(&[
            ("Event-Name", "CHANNEL_HANGUP_COMPLETE"),
            ("Unique-ID", "u-1"),
            ("Call-Direction", "outbound"),
            ("Hangup-Cause", "NORMAL_CLEARING"),
            ("variable_sip_h_X-agent_id", "7"),
        ]);

        assert_eq!(ev.name(), "CHANNEL_HANGUP_COMPLETE");
        assert_eq!(ev.channel_uuid(), Some("u-1"));
        assert_eq!(ev.direction(), Some("outbound"));
        assert_eq!(ev.hangup_cause(), Some("NORMAL_CLEARING"));
        assert_eq!(ev.sip_header("agent_id"), Some("7"));
    }

    #[test]
    fn falls_back_to_variable_headers() {
        let ev = event(&[("variable_uuid", "u-2"), ("variable_hangup_cause", "USER_BUSY")]);
        assert_eq!(ev.channel_uuid(), Some("u-2"));
        assert_eq!(ev.hangup_cause(), Some("USER_BUSY"));
    }
}
