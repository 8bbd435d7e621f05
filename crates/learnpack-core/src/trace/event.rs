//! Push-channel event wire format.
//!
//! Every message is a JSON object dispatched on its `type` field. Fields are optional on
//! the wire and defaulted here; unknown types decode to [`TraceEvent::Unknown`].

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::trace::model::{AgentAction, AgentKind, ActionStatus};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    /// Snapshot of traces the backend still considers active.
    Init {
        #[serde(default)]
        traces: Vec<WireTrace>,
    },
    #[serde(alias = "trace_started")]
    TraceStart {
        #[serde(default)]
        trace: Option<WireTrace>,
        #[serde(default)]
        trace_id: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    #[serde(alias = "action_started", alias = "agent_action")]
    ActionStart {
        #[serde(default)]
        trace_id: Option<String>,
        action: WireAction,
    },
    ActionUpdate {
        #[serde(default)]
        trace_id: Option<String>,
        action_id: String,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        output: Option<Value>,
        #[serde(default)]
        streaming_content: Option<String>,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    ActionCompleted {
        #[serde(default)]
        trace_id: Option<String>,
        action_id: String,
        #[serde(default)]
        output: Option<Value>,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    ActionError {
        #[serde(default)]
        trace_id: Option<String>,
        action_id: String,
        #[serde(default)]
        error: Option<Value>,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    #[serde(alias = "trace_completed")]
    TraceComplete {
        #[serde(default)]
        trace_id: Option<String>,
        #[serde(default)]
        summary: Option<String>,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        total_duration_ms: Option<u64>,
    },
    #[serde(other)]
    Unknown,
}

impl TraceEvent {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WireTrace {
    #[serde(alias = "trace_id")]
    pub id: Option<String>,
    pub session_id: Option<String>,
    pub query: Option<String>,
    pub started_at: Option<String>,
    pub status: Option<String>,
    pub actions: Vec<WireAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WireAction {
    pub id: Option<String>,
    pub agent: Option<String>,
    pub action: Option<String>,
    pub description: Option<String>,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub status: Option<String>,
    #[serde(alias = "timestamp")]
    pub started_at: Option<String>,
    pub duration_ms: Option<u64>,
}

impl WireAction {
    /// Resolves into a model action; `fallback_id` is used when the wire carries none.
    pub fn into_action(self, fallback_id: impl FnOnce() -> String) -> AgentAction {
        let status = self
            .status
            .as_deref()
            .and_then(ActionStatus::parse)
            .unwrap_or(ActionStatus::Running);
        AgentAction {
            id: self.id.unwrap_or_else(fallback_id),
            agent: self
                .agent
                .map(AgentKind::from)
                .unwrap_or_else(|| AgentKind::Other("unknown".to_string())),
            action: self
                .description
                .filter(|d| !d.is_empty())
                .or(self.action)
                .unwrap_or_default(),
            input: self.input.as_ref().and_then(payload_text),
            output: self.output.as_ref().and_then(payload_text),
            status,
            duration_ms: self.duration_ms,
            timestamp: parse_timestamp(self.started_at.as_deref()),
        }
    }
}

/// Payloads are shown as text: strings verbatim, structured values pretty-printed.
pub fn payload_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => serde_json::to_string_pretty(other).ok(),
    }
}

/// RFC 3339, or a naive ISO timestamp taken as UTC. Anything else is "now".
pub fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = raw else {
        return Utc::now();
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return ts.with_timezone(&Utc);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn event_aliases_decode_to_one_variant() {
        for ty in ["action_start", "action_started", "agent_action"] {
            let text = format!(r#"{{"type":"{}","action":{{"id":"a1","agent":"tutor"}}}}"#, ty);
            assert!(matches!(
                TraceEvent::decode(&text).unwrap(),
                TraceEvent::ActionStart { .. }
            ));
        }
        assert!(matches!(
            TraceEvent::decode(r#"{"type":"trace_completed","trace_id":"t"}"#).unwrap(),
            TraceEvent::TraceComplete { .. }
        ));
        assert_eq!(
            TraceEvent::decode(r#"{"type":"heartbeat","n":1}"#).unwrap(),
            TraceEvent::Unknown
        );
    }

    #[test]
    fn wire_action_prefers_description_and_stringifies_payloads() {
        let event = TraceEvent::decode(
            r#"{"type":"action_start","trace_id":"t1","action":{
                "id":"a1","agent":"safety","action":"check","description":"Checking content safety",
                "input":{"text":"hi"},"output":null,"status":"started",
                "started_at":"2024-05-01T10:20:30.123456"}}"#,
        )
        .unwrap();
        let TraceEvent::ActionStart { action, .. } = event else {
            panic!("wrong variant");
        };
        let action = action.into_action(|| "generated".into());
        assert_eq!(action.id, "a1");
        assert_eq!(action.agent, AgentKind::Safety);
        assert_eq!(action.action, "Checking content safety");
        assert_eq!(action.input.as_deref(), Some("{\n  \"text\": \"hi\"\n}"));
        assert_eq!(action.output, None);
        assert_eq!(action.status, ActionStatus::Running);
        assert_eq!(action.timestamp.year(), 2024);
        assert_eq!(action.timestamp.second(), 30);
    }

    #[test]
    fn bad_timestamp_falls_back_to_now() {
        let before = Utc::now();
        assert!(parse_timestamp(Some("yesterday")) >= before);
        assert!(parse_timestamp(None) >= before);
    }
}
