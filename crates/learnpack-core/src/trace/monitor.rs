//! Shared, observable trace state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use serde::Serialize;
use tokio::sync::watch;

use crate::error::TraceError;
use crate::shared::TraceConfig;
use crate::trace::event::TraceEvent;
use crate::trace::model::{ActionPatch, AgentAction, AgentTrace, NewAction};
use crate::trace::reducer::TraceReducer;

/// Rendering-ready mirror of the reducer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TraceSnapshot {
    pub current_trace: Option<AgentTrace>,
    pub recent_actions: Vec<AgentAction>,
    pub all_traces: Vec<AgentTrace>,
    pub is_connected: bool,
    pub is_trace_visible: bool,
    pub is_minimized: bool,
}

/// Owns the reducer. Every change publishes a fresh [`TraceSnapshot`].
pub struct TraceMonitor {
    reducer: RwLock<TraceReducer>,
    connected: AtomicBool,
    snapshots: watch::Sender<TraceSnapshot>,
}

impl Default for TraceMonitor {
    fn default() -> Self {
        Self::with_reducer(TraceReducer::default())
    }
}

impl TraceMonitor {
    pub fn new(config: &TraceConfig) -> Self {
        Self::with_reducer(TraceReducer::new(
            config.recent_capacity,
            config.history_capacity,
        ))
    }

    fn with_reducer(reducer: TraceReducer) -> Self {
        let (snapshots, _) = watch::channel(TraceSnapshot::default());
        Self {
            reducer: RwLock::new(reducer),
            connected: AtomicBool::new(false),
            snapshots,
        }
    }

    /// Runs `f` against the reducer and republishes when it reports a change. The snapshot
    /// is taken under the same write lock, so publications follow mutation order.
    fn mutate<T>(&self, f: impl FnOnce(&mut TraceReducer) -> T, changed: impl Fn(&T) -> bool) -> Option<T> {
        let mut reducer = self.reducer.write().ok()?;
        let out = f(&mut reducer);
        if changed(&out) {
            self.snapshots.send_replace(self.render(&reducer));
        }
        Some(out)
    }

    fn publish(&self) {
        if let Ok(reducer) = self.reducer.write() {
            self.snapshots.send_replace(self.render(&reducer));
        }
    }

    fn render(&self, r: &TraceReducer) -> TraceSnapshot {
        TraceSnapshot {
            current_trace: r.current_trace(),
            recent_actions: r.recent_actions(),
            all_traces: r.all_traces(),
            is_connected: self.is_connected(),
            is_trace_visible: r.is_visible(),
            is_minimized: r.is_minimized(),
        }
    }

    pub fn apply_event(&self, event: TraceEvent) -> bool {
        self.mutate(|r| r.apply(event), |changed| *changed)
            .unwrap_or(false)
    }

    /// Decodes and applies one text frame. Undecodable frames are logged and dropped.
    pub fn apply_text(&self, text: &str) -> Result<bool, TraceError> {
        match TraceEvent::decode(text) {
            Ok(event) => Ok(self.apply_event(event)),
            Err(e) => {
                tracing::warn!(target: "learnpack::trace", error = %e, "Dropping undecodable trace event");
                Err(TraceError::Decode(e))
            }
        }
    }

    pub fn start_new_trace(&self, session_id: Option<String>) -> Option<String> {
        self.mutate(|r| r.start_new_trace(session_id), |_| true)
    }

    pub fn add_action(&self, action: NewAction) -> Option<String> {
        self.mutate(|r| r.add_action(action), |_| true)
    }

    pub fn update_action(&self, action_id: &str, patch: ActionPatch) -> bool {
        self.mutate(|r| r.update_action(action_id, patch), |changed| *changed)
            .unwrap_or(false)
    }

    pub fn complete_trace(&self, summary: Option<String>, total_duration_ms: Option<u64>) -> bool {
        self.mutate(|r| r.complete_trace(summary, total_duration_ms), |changed| *changed)
            .unwrap_or(false)
    }

    pub fn clear_traces(&self) {
        self.mutate(|r| r.clear_traces(), |_| true);
    }

    pub fn set_visible(&self, visible: bool) {
        self.mutate(|r| r.set_visible(visible), |_| true);
    }

    pub fn set_minimized(&self, minimized: bool) {
        self.mutate(|r| r.set_minimized(minimized), |_| true);
    }

    pub fn set_connected(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::AcqRel) != connected {
            tracing::info!(target: "learnpack::trace", connected = connected, "Trace channel connection changed");
            self.publish();
        }
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> TraceSnapshot {
        match self.reducer.read() {
            Ok(r) => self.render(&r),
            Err(_) => TraceSnapshot {
                is_connected: self.is_connected(),
                ..TraceSnapshot::default()
            },
        }
    }

    /// Receives a snapshot after every change.
    pub fn subscribe(&self) -> watch::Receiver<TraceSnapshot> {
        self.snapshots.subscribe()
    }
}
