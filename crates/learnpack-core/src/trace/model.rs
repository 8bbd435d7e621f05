//! Agent trace data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The pipeline agent that ran an action. Unknown agents keep their wire name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AgentKind {
    Manager,
    Assessment,
    Content,
    Tutor,
    Solve,
    Safety,
    Research,
    Response,
    Other(String),
}

impl AgentKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Manager => "manager",
            Self::Assessment => "assessment",
            Self::Content => "content",
            Self::Tutor => "tutor",
            Self::Solve => "solve",
            Self::Safety => "safety",
            Self::Research => "research",
            Self::Response => "response",
            Self::Other(name) => name,
        }
    }

    /// Label shown in the trace panel.
    pub fn display_label(&self) -> &str {
        match self {
            Self::Manager => "Manager Agent",
            Self::Assessment => "Assessment Agent",
            Self::Content => "Content Agent",
            Self::Tutor => "Tutor Agent",
            Self::Solve => "Solver Agent",
            Self::Safety => "Safety Agent",
            Self::Research => "Research Agent",
            Self::Response => "Response Agent",
            Self::Other(_) => "Agent",
        }
    }
}

impl From<String> for AgentKind {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "manager" => Self::Manager,
            "assessment" => Self::Assessment,
            "content" => Self::Content,
            "tutor" => Self::Tutor,
            "solve" => Self::Solve,
            "safety" => Self::Safety,
            "research" => Self::Research,
            "response" => Self::Response,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for AgentKind {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<AgentKind> for String {
    fn from(kind: AgentKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Trace status. Moves only forward: `Running` → `Completed` | `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Running,
    Completed,
    Error,
}

impl TraceStatus {
    /// Backend vocabulary (`active`, `started`) mapped onto the local enum.
    pub fn from_wire(status: Option<&str>) -> Self {
        match status.map(str::to_ascii_lowercase).as_deref() {
            Some("completed") | Some("complete") => Self::Completed,
            Some("error") | Some("failed") => Self::Error,
            _ => Self::Running,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl ActionStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Maps a wire status. Returns `None` for strings outside the known vocabulary.
    pub fn parse(status: &str) -> Option<Self> {
        match status.to_ascii_lowercase().as_str() {
            "pending" | "queued" => Some(Self::Pending),
            "streaming" | "running" | "started" | "active" => Some(Self::Running),
            "completed" | "complete" | "done" => Some(Self::Completed),
            "error" | "failed" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One step of the agent pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    pub id: String,
    pub agent: AgentKind,
    /// Display text for the step.
    pub action: String,
    pub input: Option<String>,
    pub output: Option<String>,
    pub status: ActionStatus,
    pub duration_ms: Option<u64>,
    /// When the step started. Never changes.
    pub timestamp: DateTime<Utc>,
}

/// A trace with its actions resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTrace {
    pub trace_id: String,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: TraceStatus,
    pub actions: Vec<AgentAction>,
    pub current_agent: Option<AgentKind>,
    pub summary: Option<String>,
    pub total_duration_ms: Option<u64>,
}

/// Input for appending an action through the manual API.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAction {
    pub id: Option<String>,
    pub agent: AgentKind,
    pub action: String,
    pub input: Option<String>,
    pub output: Option<String>,
    pub status: ActionStatus,
    pub duration_ms: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewAction {
    pub fn new(agent: impl Into<AgentKind>, action: impl Into<String>) -> Self {
        Self {
            id: None,
            agent: agent.into(),
            action: action.into(),
            input: None,
            output: None,
            status: ActionStatus::Running,
            duration_ms: None,
            timestamp: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_status(mut self, status: ActionStatus) -> Self {
        self.status = status;
        self
    }
}

/// Partial update applied to an existing action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionPatch {
    pub status: Option<ActionStatus>,
    pub output: Option<String>,
    pub duration_ms: Option<u64>,
}

impl ActionPatch {
    pub fn status(status: ActionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}
