//! Event reducer for the live agent trace.
//!
//! Actions live in one store keyed by id. The live trace and the recent-actions buffer
//! both hold ids into it, so a single patch shows up in both views.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::trace::event::{parse_timestamp, payload_text, TraceEvent, WireTrace};
use crate::trace::model::{
    ActionPatch, ActionStatus, AgentAction, AgentKind, AgentTrace, NewAction, TraceStatus,
};

pub const DEFAULT_RECENT_CAPACITY: usize = 50;
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// The live trace without its actions; `action_ids` index into the action store.
#[derive(Debug, Clone)]
struct TraceHeader {
    trace_id: String,
    session_id: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    status: TraceStatus,
    action_ids: Vec<String>,
    current_agent: Option<AgentKind>,
    summary: Option<String>,
    total_duration_ms: Option<u64>,
}

impl TraceHeader {
    fn new(trace_id: String, session_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            trace_id,
            session_id,
            started_at,
            completed_at: None,
            status: TraceStatus::Running,
            action_ids: Vec::new(),
            current_agent: None,
            summary: None,
            total_duration_ms: None,
        }
    }
}

#[derive(Debug)]
pub struct TraceReducer {
    actions: HashMap<String, AgentAction>,
    current: Option<TraceHeader>,
    /// Newest first.
    recent: VecDeque<String>,
    /// Newest first.
    history: VecDeque<AgentTrace>,
    recent_capacity: usize,
    history_capacity: usize,
    visible: bool,
    minimized: bool,
}

impl Default for TraceReducer {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_CAPACITY, DEFAULT_HISTORY_CAPACITY)
    }
}

impl TraceReducer {
    pub fn new(recent_capacity: usize, history_capacity: usize) -> Self {
        Self {
            actions: HashMap::new(),
            current: None,
            recent: VecDeque::with_capacity(recent_capacity),
            history: VecDeque::with_capacity(history_capacity),
            recent_capacity,
            history_capacity,
            visible: false,
            minimized: false,
        }
    }

    /// Applies one push-channel event. Returns whether any state changed.
    pub fn apply(&mut self, event: TraceEvent) -> bool {
        match event {
            TraceEvent::Init { traces } => self.seed(traces),
            TraceEvent::TraceStart {
                trace,
                trace_id,
                session_id,
            } => {
                let trace = trace.unwrap_or_default();
                let started_at = parse_timestamp(trace.started_at.as_deref());
                self.begin(
                    trace.id.or(trace_id),
                    trace.session_id.or(session_id),
                    started_at,
                );
                true
            }
            TraceEvent::ActionStart { trace_id, action } => {
                let action = action.into_action(new_id);
                self.push_action(trace_id, action)
            }
            TraceEvent::ActionUpdate {
                action_id,
                status,
                output,
                streaming_content,
                duration_ms,
                ..
            } => {
                let status = status.as_deref().map(|raw| {
                    ActionStatus::parse(raw).unwrap_or_else(|| {
                        tracing::warn!(target: "learnpack::trace", status = raw, action_id = %action_id, "Unrecognized action status, treating as running");
                        ActionStatus::Running
                    })
                });
                let mut patch = ActionPatch {
                    status,
                    output: output.as_ref().and_then(payload_text),
                    duration_ms,
                };
                if patch.output.is_none() {
                    if let Some(chunk) = streaming_content.filter(|c| !c.is_empty()) {
                        let previous = self
                            .actions
                            .get(&action_id)
                            .and_then(|a| a.output.clone())
                            .unwrap_or_default();
                        patch.output = Some(previous + &chunk);
                    }
                }
                self.patch(&action_id, patch)
            }
            TraceEvent::ActionCompleted {
                action_id,
                output,
                duration_ms,
                ..
            } => self.patch(
                &action_id,
                ActionPatch {
                    status: Some(ActionStatus::Completed),
                    output: output.as_ref().and_then(payload_text),
                    duration_ms,
                },
            ),
            TraceEvent::ActionError {
                action_id,
                error,
                duration_ms,
                ..
            } => self.patch(
                &action_id,
                ActionPatch {
                    status: Some(ActionStatus::Error),
                    output: error.as_ref().and_then(payload_text),
                    duration_ms,
                },
            ),
            TraceEvent::TraceComplete {
                trace_id,
                summary,
                result,
                total_duration_ms,
            } => {
                if let (Some(id), Some(current)) = (trace_id.as_deref(), self.current.as_ref()) {
                    if id != current.trace_id {
                        tracing::debug!(target: "learnpack::trace", trace_id = id, "Completion for a trace that is not live");
                        return false;
                    }
                }
                let summary = summary.or_else(|| result.as_ref().and_then(payload_text));
                self.finish(summary, total_duration_ms)
            }
            TraceEvent::Unknown => false,
        }
    }

    /// Replaces the live trace with a new empty one. Returns its id.
    pub fn start_new_trace(&mut self, session_id: Option<String>) -> String {
        self.begin(None, session_id, Utc::now())
    }

    /// Appends an action to the live trace, creating a trace first if none is running.
    /// Returns the action id. An id that already finished is left as it was.
    pub fn add_action(&mut self, new: NewAction) -> String {
        let action = AgentAction {
            id: new.id.unwrap_or_else(new_id),
            agent: new.agent,
            action: new.action,
            input: new.input,
            output: new.output,
            status: new.status,
            duration_ms: new.duration_ms,
            timestamp: new.timestamp.unwrap_or_else(Utc::now),
        };
        let id = action.id.clone();
        self.push_action(None, action);
        id
    }

    pub fn update_action(&mut self, action_id: &str, patch: ActionPatch) -> bool {
        self.patch(action_id, patch)
    }

    /// Completes and archives the live trace. No-op unless a trace is running.
    pub fn complete_trace(&mut self, summary: Option<String>, total_duration_ms: Option<u64>) -> bool {
        self.finish(summary, total_duration_ms)
    }

    /// Empties history and recent actions. The live trace is kept.
    pub fn clear_traces(&mut self) {
        self.history.clear();
        self.recent.clear();
        self.collect_garbage();
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn set_minimized(&mut self, minimized: bool) {
        self.minimized = minimized;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    pub fn action(&self, id: &str) -> Option<&AgentAction> {
        self.actions.get(id)
    }

    /// The live trace with its actions resolved.
    pub fn current_trace(&self) -> Option<AgentTrace> {
        self.current.as_ref().map(|header| self.project(header))
    }

    /// Recent actions across traces, newest first.
    pub fn recent_actions(&self) -> Vec<AgentAction> {
        self.recent
            .iter()
            .filter_map(|id| self.actions.get(id).cloned())
            .collect()
    }

    /// Archived traces, newest first.
    pub fn all_traces(&self) -> Vec<AgentTrace> {
        self.history.iter().cloned().collect()
    }

    fn project(&self, header: &TraceHeader) -> AgentTrace {
        AgentTrace {
            trace_id: header.trace_id.clone(),
            session_id: header.session_id.clone(),
            started_at: header.started_at,
            completed_at: header.completed_at,
            status: header.status,
            actions: header
                .action_ids
                .iter()
                .filter_map(|id| self.actions.get(id).cloned())
                .collect(),
            current_agent: header.current_agent.clone(),
            summary: header.summary.clone(),
            total_duration_ms: header.total_duration_ms,
        }
    }

    fn begin(
        &mut self,
        trace_id: Option<String>,
        session_id: Option<String>,
        started_at: DateTime<Utc>,
    ) -> String {
        let trace_id = trace_id.unwrap_or_else(new_id);
        let session_id = session_id.unwrap_or_else(|| trace_id.clone());
        tracing::debug!(target: "learnpack::trace", trace_id = %trace_id, "Trace started");
        self.current = Some(TraceHeader::new(trace_id.clone(), session_id, started_at));
        self.collect_garbage();
        trace_id
    }

    /// Returns false when the id belongs to an action that already finished.
    fn push_action(&mut self, trace_id: Option<String>, action: AgentAction) -> bool {
        if self
            .actions
            .get(&action.id)
            .map_or(false, |existing| existing.status.is_terminal())
        {
            tracing::debug!(target: "learnpack::trace", action_id = %action.id, "Ignoring restart of a finished action");
            return false;
        }

        // A finished trace only gives way to a different trace; late actions tagged with
        // its own id are appended without reviving it.
        let needs_trace = match self.current.as_ref() {
            None => true,
            Some(t) if t.status == TraceStatus::Running => false,
            Some(t) => trace_id.as_deref() != Some(t.trace_id.as_str()),
        };
        if needs_trace {
            self.begin(trace_id, None, action.timestamp);
        }

        let id = action.id.clone();
        let agent = action.agent.clone();
        self.actions.insert(id.clone(), action);
        if let Some(current) = self.current.as_mut() {
            if !current.action_ids.contains(&id) {
                current.action_ids.push(id.clone());
            }
            if current.status == TraceStatus::Running {
                current.current_agent = Some(agent);
            }
        }

        self.recent.retain(|existing| existing != &id);
        self.recent.push_front(id);
        self.recent.truncate(self.recent_capacity);
        self.visible = true;
        self.collect_garbage();
        true
    }

    fn patch(&mut self, action_id: &str, patch: ActionPatch) -> bool {
        let Some(action) = self.actions.get_mut(action_id) else {
            tracing::debug!(target: "learnpack::trace", action_id = action_id, "Patch for unknown action");
            return false;
        };
        if action.status.is_terminal() {
            return false;
        }
        if let Some(status) = patch.status {
            action.status = status;
        }
        if let Some(output) = patch.output {
            action.output = Some(output);
        }
        if let Some(duration) = patch.duration_ms {
            action.duration_ms = Some(duration);
        }
        true
    }

    fn finish(&mut self, summary: Option<String>, total_duration_ms: Option<u64>) -> bool {
        let Some(current) = self.current.as_mut() else {
            return false;
        };
        if current.status != TraceStatus::Running {
            return false;
        }
        let now = Utc::now();
        current.status = TraceStatus::Completed;
        current.completed_at = Some(now);
        current.current_agent = None;
        if summary.is_some() {
            current.summary = summary;
        }
        let elapsed = u64::try_from((now - current.started_at).num_milliseconds()).ok();
        current.total_duration_ms = total_duration_ms.or(elapsed);
        tracing::info!(
            target: "learnpack::trace",
            trace_id = %current.trace_id,
            actions = current.action_ids.len(),
            "Trace completed"
        );

        let header = current.clone();
        let snapshot = self.project(&header);
        self.history.push_front(snapshot);
        self.history.truncate(self.history_capacity);
        true
    }

    /// Takes the most recently started active trace from an `init` snapshot.
    fn seed(&mut self, traces: Vec<WireTrace>) -> bool {
        let Some(trace) = traces
            .into_iter()
            .max_by_key(|t| parse_timestamp(t.started_at.as_deref()))
        else {
            return false;
        };
        let trace_id = trace.id.unwrap_or_else(new_id);
        let session_id = trace.session_id.unwrap_or_else(|| trace_id.clone());
        let mut header =
            TraceHeader::new(trace_id, session_id, parse_timestamp(trace.started_at.as_deref()));
        header.status = TraceStatus::from_wire(trace.status.as_deref());
        header.summary = trace.query;

        for wire in trace.actions {
            let action = wire.into_action(new_id);
            header.current_agent = Some(action.agent.clone());
            header.action_ids.push(action.id.clone());
            self.actions.insert(action.id.clone(), action);
        }
        if header.status != TraceStatus::Running {
            header.current_agent = None;
        }
        tracing::debug!(
            target: "learnpack::trace",
            trace_id = %header.trace_id,
            actions = header.action_ids.len(),
            "Seeded trace from init snapshot"
        );
        self.current = Some(header);
        self.collect_garbage();
        true
    }

    /// Drops actions no longer referenced by the live trace or the recent buffer.
    fn collect_garbage(&mut self) {
        let current = self.current.as_ref();
        let recent = &self.recent;
        self.actions.retain(|id, _| {
            current.map_or(false, |t| t.action_ids.contains(id)) || recent.contains(id)
        });
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json: &str) -> TraceEvent {
        TraceEvent::decode(json).unwrap()
    }

    fn start(id: &str) -> TraceEvent {
        event(&format!(
            r#"{{"type":"action_start","action":{{"id":"{}","agent":"tutor","action":"explain"}}}}"#,
            id
        ))
    }

    #[test]
    fn action_without_trace_creates_one() {
        let mut r = TraceReducer::default();
        assert!(r.apply(start("a1")));
        let trace = r.current_trace().unwrap();
        assert_eq!(trace.actions.len(), 1);
        assert_eq!(trace.actions[0].id, "a1");
        assert_eq!(trace.status, TraceStatus::Running);
        assert_eq!(trace.current_agent, Some(AgentKind::Tutor));
        let recent = r.recent_actions();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "a1");
        assert!(r.is_visible());
    }

    #[test]
    fn update_reaches_both_views_and_only_that_action() {
        let mut r = TraceReducer::default();
        r.apply(event(r#"{"type":"trace_start","trace":{"id":"t1"}}"#));
        for id in ["a1", "a2", "a3"] {
            r.apply(start(id));
        }
        r.apply(event(
            r#"{"type":"action_update","trace_id":"t1","action_id":"a3","status":"completed","output":"done","duration_ms":12}"#,
        ));

        let trace = r.current_trace().unwrap();
        assert_eq!(trace.actions[2].status, ActionStatus::Completed);
        assert_eq!(trace.actions[2].output.as_deref(), Some("done"));
        assert_eq!(trace.actions[0].status, ActionStatus::Running);
        assert_eq!(trace.actions[1].status, ActionStatus::Running);

        let recent = r.recent_actions();
        assert_eq!(recent[0].id, "a3");
        assert_eq!(recent[0].status, ActionStatus::Completed);
        assert_eq!(recent[0].duration_ms, Some(12));
    }

    #[test]
    fn status_mapping_and_terminal_actions() {
        let mut r = TraceReducer::default();
        r.apply(start("a1"));
        r.apply(event(r#"{"type":"action_update","action_id":"a1","status":"streaming","streaming_content":"Hel"}"#));
        r.apply(event(r#"{"type":"action_update","action_id":"a1","status":"mystery","streaming_content":"lo"}"#));
        let a = r.action("a1").unwrap();
        assert_eq!(a.status, ActionStatus::Running);
        assert_eq!(a.output.as_deref(), Some("Hello"));

        r.apply(event(r#"{"type":"action_error","action_id":"a1","error":"model timeout"}"#));
        assert_eq!(r.action("a1").unwrap().status, ActionStatus::Error);
        assert_eq!(r.action("a1").unwrap().output.as_deref(), Some("model timeout"));

        assert!(!r.apply(event(r#"{"type":"action_completed","action_id":"a1"}"#)));
        assert_eq!(r.action("a1").unwrap().status, ActionStatus::Error);
    }

    #[test]
    fn recent_buffer_is_bounded_across_traces() {
        let mut r = TraceReducer::default();
        for t in 0..4 {
            r.start_new_trace(None);
            for i in 0..30 {
                r.add_action(NewAction::new("content", "step").with_id(format!("t{}-a{}", t, i)));
            }
            r.complete_trace(None, None);
        }
        let recent = r.recent_actions();
        assert_eq!(recent.len(), DEFAULT_RECENT_CAPACITY);
        assert_eq!(recent[0].id, "t3-a29");
        // Canonical store holds only what a view can still reach.
        assert!(r.action("t0-a0").is_none());
    }

    #[test]
    fn history_is_bounded_and_archives_once() {
        let mut r = TraceReducer::default();
        for i in 0..25 {
            r.apply(event(&format!(r#"{{"type":"trace_start","trace":{{"id":"t{}"}}}}"#, i)));
            r.apply(start(&format!("a{}", i)));
            assert!(r.apply(event(&format!(
                r#"{{"type":"trace_complete","trace_id":"t{}","result":"ok","total_duration_ms":5}}"#,
                i
            ))));
        }
        assert!(!r.apply(event(r#"{"type":"trace_completed","trace_id":"t24"}"#)));
        let history = r.all_traces();
        assert_eq!(history.len(), DEFAULT_HISTORY_CAPACITY);
        assert_eq!(history[0].trace_id, "t24");

        let live = r.current_trace().unwrap();
        assert_eq!(live.status, TraceStatus::Completed);
        assert_eq!(live.current_agent, None);
        assert_eq!(live.summary.as_deref(), Some("ok"));
        assert_eq!(live.total_duration_ms, Some(5));
    }

    #[test]
    fn action_after_completion_starts_a_fresh_trace() {
        let mut r = TraceReducer::default();
        r.apply(event(r#"{"type":"trace_start","trace":{"id":"t1"}}"#));
        r.apply(start("a1"));
        r.complete_trace(Some("done".into()), None);
        r.apply(start("a2"));

        let live = r.current_trace().unwrap();
        assert_ne!(live.trace_id, "t1");
        assert_eq!(live.status, TraceStatus::Running);
        assert_eq!(live.actions.len(), 1);
        assert_eq!(r.all_traces()[0].status, TraceStatus::Completed);
    }

    #[test]
    fn late_action_for_a_finished_trace_does_not_revive_it() {
        let mut r = TraceReducer::default();
        r.apply(event(r#"{"type":"trace_start","trace":{"id":"t1"}}"#));
        r.apply(start("a1"));
        r.apply(event(r#"{"type":"trace_complete","trace_id":"t1"}"#));
        r.apply(event(
            r#"{"type":"action_start","trace_id":"t1","action":{"id":"a2","agent":"safety","action":"check"}}"#,
        ));

        let live = r.current_trace().unwrap();
        assert_eq!(live.trace_id, "t1");
        assert_eq!(live.status, TraceStatus::Completed);
        assert_eq!(live.current_agent, None);
        let ids: Vec<_> = live.actions.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["a1", "a2"]);
        assert_eq!(r.all_traces().len(), 1);
    }

    #[test]
    fn restarting_a_finished_action_is_ignored() {
        let mut r = TraceReducer::default();
        r.apply(start("a1"));
        r.apply(event(r#"{"type":"action_completed","action_id":"a1","output":"done"}"#));
        assert!(!r.apply(start("a1")));

        let a = r.action("a1").unwrap();
        assert_eq!(a.status, ActionStatus::Completed);
        assert_eq!(a.output.as_deref(), Some("done"));
        assert_eq!(r.current_trace().unwrap().actions.len(), 1);
        assert_eq!(r.recent_actions().len(), 1);

        let id = r.add_action(NewAction::new("tutor", "explain").with_id("a1"));
        assert_eq!(id, "a1");
        assert_eq!(r.action("a1").unwrap().status, ActionStatus::Completed);
    }

    #[test]
    fn trace_start_replaces_without_merge() {
        let mut r = TraceReducer::default();
        r.apply(start("a1"));
        r.apply(event(r#"{"type":"trace_started","trace_id":"t2","session_id":"s9"}"#));
        let live = r.current_trace().unwrap();
        assert_eq!(live.trace_id, "t2");
        assert_eq!(live.session_id, "s9");
        assert!(live.actions.is_empty());
        assert_eq!(r.recent_actions().len(), 1);
    }

    #[test]
    fn init_takes_most_recent_active_trace() {
        let mut r = TraceReducer::default();
        r.apply(event(
            r#"{"type":"init","traces":[
                {"id":"old","query":"q1","started_at":"2024-05-01T09:00:00","status":"active","actions":[]},
                {"id":"new","query":"What is photosynthesis?","started_at":"2024-05-01T10:00:00","status":"active",
                 "actions":[{"id":"x1","agent":"manager","action":"route","input":{"q":1},"status":"started"}]}
            ]}"#,
        ));
        let live = r.current_trace().unwrap();
        assert_eq!(live.trace_id, "new");
        assert_eq!(live.status, TraceStatus::Running);
        assert_eq!(live.summary.as_deref(), Some("What is photosynthesis?"));
        assert_eq!(live.actions[0].status, ActionStatus::Running);
        assert!(live.actions[0].input.as_deref().unwrap().contains("\"q\": 1"));
        assert!(r.recent_actions().is_empty());
    }

    #[test]
    fn clear_keeps_live_trace() {
        let mut r = TraceReducer::default();
        r.apply(start("a1"));
        r.complete_trace(None, None);
        r.apply(start("a2"));
        r.clear_traces();
        assert!(r.all_traces().is_empty());
        assert!(r.recent_actions().is_empty());
        let live = r.current_trace().unwrap();
        assert_eq!(live.actions.len(), 1);
        assert_eq!(live.actions[0].id, "a2");
        assert!(r.action("a1").is_none());
    }

    #[test]
    fn unknown_events_change_nothing() {
        let mut r = TraceReducer::default();
        assert!(!r.apply(TraceEvent::Unknown));
        assert!(r.current_trace().is_none());
        assert!(!r.is_visible());
    }
}
