//! Axum-based offline gateway. Sits between the learning app's pages and the upstream
//! origin: every request goes through the cache controller, and the live agent trace is
//! mirrored from the backend push channel. Config-driven via GatewayConfig.

mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use learnpack_core::{
    CacheController, CacheSettings, ConnectivityMonitor, Fetcher, GatewayConfig, InstallPrompt,
    PreferenceStore, ReqwestFetcher, SledCacheStorage, TraceConnection, TraceMonitor,
    UpdateNotice,
};
use std::path::Path as StdPath;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[learnpack-gateway] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(GatewayConfig::load().expect("load GatewayConfig"));
    let storage_root = StdPath::new(&config.storage_path);

    let storage = Arc::new(
        SledCacheStorage::open_path(storage_root.join("caches")).expect("open cache storage"),
    );
    let prefs = Arc::new(
        PreferenceStore::open_path(storage_root.join("preferences")).expect("open preference store"),
    );
    let fetcher: Arc<dyn Fetcher> = Arc::new(ReqwestFetcher::new());

    let settings = CacheSettings::from_config(&config.cache, &config.upstream_url);
    let controller = Arc::new(CacheController::new(settings, storage, Arc::clone(&fetcher)));
    // A failed install leaves the controller installing; requests pass straight through.
    if let Err(e) = controller.start().await {
        tracing::warn!(target: "learnpack::gateway", error = %e, "Cache controller not active, proxying only");
    }

    let shutdown = CancellationToken::new();
    let connectivity = Arc::new(ConnectivityMonitor::new(Arc::clone(&controller)));
    let probe = Arc::clone(&connectivity).spawn_probe(
        Arc::clone(&fetcher),
        Duration::from_secs(config.connectivity_probe_secs.max(1)),
        shutdown.clone(),
    );

    let trace = Arc::new(TraceMonitor::new(&config.trace));
    let connection = match config.trace.url.as_deref() {
        Some(url) => {
            tracing::info!(target: "learnpack::gateway", url = url, "Trace monitor enabled");
            Some(TraceConnection::from_config(url, Arc::clone(&trace), &config.trace))
        }
        None => {
            tracing::info!(target: "learnpack::gateway", "No trace channel configured");
            None
        }
    };

    let updates = Arc::new(UpdateNotice::new(Arc::clone(&controller)));
    let app = build_app(AppState {
        config: Arc::clone(&config),
        controller,
        fetcher,
        connectivity,
        install: Arc::new(InstallPrompt::new(prefs)),
        updates,
        trace,
    });

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], config.port));
    tracing::info!(target: "learnpack::gateway", "{} listening on {}", config.app_name, addr);
    axum::serve(
        tokio::net::TcpListener::bind(addr).await.expect("bind gateway port"),
        app,
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("serve gateway");

    shutdown.cancel();
    join_logged("connectivity probe", probe).await;
    if let Some(connection) = connection {
        connection.shutdown().await;
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(target: "learnpack::gateway", error = %e, "Ctrl-C handler unavailable");
        std::future::pending::<()>().await;
    }
    tracing::info!(target: "learnpack::gateway", "Shutting down");
}

/// Waits for a background task, logging instead of propagating a panic or cancellation.
async fn join_logged(name: &str, task: tokio::task::JoinHandle<()>) {
    if let Err(e) = task.await {
        tracing::warn!(target: "learnpack::gateway", task = name, error = %e, "Background task ended abnormally");
    }
}

fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/__worker/control", post(handlers::worker::control))
        .route("/__worker/events", get(handlers::worker::events))
        .route("/__worker/sync", post(handlers::worker::sync))
        .route("/__worker/status", get(handlers::worker::status))
        .route("/__worker/update", post(handlers::worker::accept_update))
        .route("/__worker/install", post(handlers::worker::install))
        .route("/__trace", get(handlers::trace::snapshot))
        .route("/__trace/stream", get(handlers::trace::stream))
        .route("/__trace/view", post(handlers::trace::view))
        .route("/__trace/clear", post(handlers::trace::clear))
        .fallback(handlers::proxy::intercept)
        .with_state(state)
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<GatewayConfig>,
    pub(crate) controller: Arc<CacheController>,
    /// Used for requests the controller passes through.
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) connectivity: Arc<ConnectivityMonitor>,
    pub(crate) install: Arc<InstallPrompt>,
    pub(crate) updates: Arc<UpdateNotice>,
    pub(crate) trace: Arc<TraceMonitor>,
}

/// GET /api/v1/health – liveness check.
async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}
