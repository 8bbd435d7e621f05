//! Agent trace mirror: snapshot, change stream and view controls.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Json, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::StreamExt;
use learnpack_core::TraceSnapshot;
use serde::Deserialize;
use tokio_stream::wrappers::WatchStream;

use crate::AppState;

/// GET /__trace
pub(crate) async fn snapshot(State(state): State<AppState>) -> Json<TraceSnapshot> {
    Json(state.trace.snapshot())
}

/// GET /__trace/stream – the current snapshot, then one per change.
pub(crate) async fn stream(
    State(state): State<AppState>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    let updates = WatchStream::new(state.trace.subscribe()).map(|snapshot| {
        let data = serde_json::to_string(&snapshot).unwrap_or_default();
        Ok(Event::default().event("trace").data(data))
    });
    Sse::new(updates).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

#[derive(Deserialize)]
pub(crate) struct ViewRequest {
    #[serde(default)]
    visible: Option<bool>,
    #[serde(default)]
    minimized: Option<bool>,
}

/// POST /__trace/view
pub(crate) async fn view(
    State(state): State<AppState>,
    Json(req): Json<ViewRequest>,
) -> Json<TraceSnapshot> {
    if let Some(visible) = req.visible {
        state.trace.set_visible(visible);
    }
    if let Some(minimized) = req.minimized {
        state.trace.set_minimized(minimized);
    }
    Json(state.trace.snapshot())
}

/// POST /__trace/clear
pub(crate) async fn clear(State(state): State<AppState>) -> Json<TraceSnapshot> {
    state.trace.clear_traces();
    tracing::info!(target: "learnpack::gateway", "Trace history cleared");
    Json(state.trace.snapshot())
}
