//! Control channel, notification stream, sync trigger and app-install glue.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Json, State},
    response::sse::{Event, KeepAlive, Sse},
};
use learnpack_core::{ControlMessage, DeferredPrompt, UpdateAction};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::AppState;

/// POST /__worker/control – one page → controller message. Only `GET_CACHE_SIZE` replies.
pub(crate) async fn control(
    State(state): State<AppState>,
    Json(msg): Json<ControlMessage>,
) -> Json<serde_json::Value> {
    match state.controller.handle_control(msg).await {
        Some(reply) => Json(serde_json::to_value(reply).unwrap_or_default()),
        None => Json(serde_json::json!({ "status": "ok" })),
    }
}

/// GET /__worker/events – controller → page notifications. Each subscriber is an open page.
pub(crate) async fn events(
    State(state): State<AppState>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    use async_stream::stream;
    let mut rx = state.controller.subscribe();
    let stream = stream! {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    let data = serde_json::to_string(&msg).unwrap_or_default();
                    yield Ok(Event::default().data(data));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(target: "learnpack::gateway", dropped = n, "Page fell behind on worker messages");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

#[derive(Deserialize)]
pub(crate) struct SyncRequest {
    tag: String,
}

/// POST /__worker/sync – background sync trigger.
pub(crate) async fn sync(
    State(state): State<AppState>,
    Json(req): Json<SyncRequest>,
) -> Json<serde_json::Value> {
    let handled = state.controller.handle_sync(&req.tag);
    Json(serde_json::json!({ "status": "ok", "tag": req.tag, "handled": handled }))
}

/// GET /__worker/status – lifecycle, cache names and connectivity.
pub(crate) async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let controller = &state.controller;
    let existing = controller.cache_names().unwrap_or_else(|e| {
        tracing::warn!(target: "learnpack::gateway", error = %e, "Listing caches failed");
        Vec::new()
    });
    Json(serde_json::json!({
        "app_name": state.config.app_name,
        "upstream_url": state.config.upstream_url,
        "state": controller.state(),
        "controlling": controller.is_controlling(),
        "caches": controller.names(),
        "existing_caches": existing,
        "is_offline": state.connectivity.is_offline(),
        "update_available": state.updates.update_available(),
        "install_prompt": state.install.should_show(),
    }))
}

/// POST /__worker/update – accept the "update available" banner.
pub(crate) async fn accept_update(State(state): State<AppState>) -> Json<serde_json::Value> {
    let action = match state.updates.accept().await {
        UpdateAction::ReloadRequired => "reload_required",
        UpdateAction::NothingWaiting => "nothing_waiting",
    };
    Json(serde_json::json!({ "action": action }))
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub(crate) enum InstallRequest {
    Capture {
        #[serde(default)]
        platforms: Vec<String>,
    },
    Accept,
    Dismiss {
        #[serde(default)]
        dont_show_again: bool,
    },
}

/// POST /__worker/install – deferred install prompt lifecycle.
pub(crate) async fn install(
    State(state): State<AppState>,
    Json(req): Json<InstallRequest>,
) -> Json<serde_json::Value> {
    let result = match req {
        InstallRequest::Capture { platforms } => Ok(serde_json::json!({
            "show": state.install.capture(DeferredPrompt { platforms }),
        })),
        InstallRequest::Accept => state
            .install
            .accept()
            .map(|prompt| serde_json::json!({ "prompted": prompt.is_some() })),
        InstallRequest::Dismiss { dont_show_again } => state
            .install
            .dismiss(dont_show_again)
            .map(|()| serde_json::json!({ "show": false })),
    };
    match result {
        Ok(body) => Json(body),
        Err(e) => {
            tracing::warn!(target: "learnpack::gateway", error = %e, "Install preference write failed");
            Json(serde_json::json!({ "status": "error", "error": e.to_string() }))
        }
    }
}
