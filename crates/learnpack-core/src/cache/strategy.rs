//! Network-first and cache-first strategies plus the synthesized offline responses.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::task::TaskTracker;

use crate::cache::fetcher::Fetcher;
use crate::cache::request::FetchRequest;
use crate::cache::store::{CacheStorage, CachedResponse};
use crate::error::FetchError;

/// Everything a strategy needs: where responses live, how to reach the network,
/// and where background refreshes run.
#[derive(Clone)]
pub struct StrategyContext {
    pub storage: Arc<dyn CacheStorage>,
    pub fetcher: Arc<dyn Fetcher>,
    pub background: TaskTracker,
}

impl StrategyContext {
    pub fn new(storage: Arc<dyn CacheStorage>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            storage,
            fetcher,
            background: TaskTracker::new(),
        }
    }

    /// Cache read where a storage failure counts as a miss. The route's own store is
    /// checked first, then every other store, so install-time entries answer too.
    fn cached(&self, store: &str, key: &str) -> Option<CachedResponse> {
        let hit = match self.storage.lookup(store, key) {
            Ok(None) => self.storage.lookup_any(key),
            other => other,
        };
        match hit {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(target: "learnpack::cache", store = store, key = key, error = %e, "Cache read failed");
                None
            }
        }
    }

    fn write(&self, store: &str, key: &str, response: &CachedResponse) {
        if let Err(e) = self.storage.put(store, key, response) {
            tracing::warn!(target: "learnpack::cache", store = store, key = key, error = %e, "Cache write failed");
        }
    }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Network,
    Cache,
    /// Synthesized locally because neither network nor cache could answer.
    Fallback,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Cache => "cache",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    pub response: CachedResponse,
    pub source: ResponseSource,
}

impl Served {
    pub fn network(response: CachedResponse) -> Self {
        Self {
            response,
            source: ResponseSource::Network,
        }
    }

    pub fn cache(response: CachedResponse) -> Self {
        Self {
            response,
            source: ResponseSource::Cache,
        }
    }

    pub fn fallback(response: CachedResponse) -> Self {
        Self {
            response,
            source: ResponseSource::Fallback,
        }
    }
}

/// Network first, then the store.
///
/// A successful (2xx) network response is written to `store` when `write` is set and
/// returned as-is. On a network failure the caches are consulted for the same key,
/// `store` first; the error is returned only when no cache has it.
pub async fn network_first(
    ctx: &StrategyContext,
    request: &FetchRequest,
    store: &str,
    write: bool,
) -> Result<Served, FetchError> {
    let key = request.cache_key();
    match ctx.fetcher.fetch(request).await {
        Ok(response) => {
            if write && response.is_ok() {
                ctx.write(store, &key, &response);
            }
            Ok(Served::network(response))
        }
        Err(err) => {
            tracing::debug!(target: "learnpack::cache", url = %request.url, error = %err, "Network failed, trying cache");
            match ctx.cached(store, &key) {
                Some(hit) => Ok(Served::cache(hit)),
                None => Err(err),
            }
        }
    }
}

/// Cache first, then the network.
///
/// A hit in `store` (or, failing that, in any other cache) is returned immediately and one background refetch of the same request is
/// scheduled on `ctx.background` to refresh the entry. A miss goes to the network and
/// writes a successful response through to `store`.
pub async fn cache_first(
    ctx: &StrategyContext,
    request: &FetchRequest,
    store: &str,
) -> Result<Served, FetchError> {
    let key = request.cache_key();
    if let Some(hit) = ctx.cached(store, &key) {
        revalidate(ctx, request.clone(), store.to_string());
        return Ok(Served::cache(hit));
    }

    let response = ctx.fetcher.fetch(request).await?;
    if response.is_ok() {
        ctx.write(store, &key, &response);
    }
    Ok(Served::network(response))
}

fn revalidate(ctx: &StrategyContext, request: FetchRequest, store: String) {
    let bg = ctx.clone();
    ctx.background.spawn(async move {
        match bg.fetcher.fetch(&request).await {
            Ok(fresh) if fresh.is_ok() => bg.write(&store, &request.cache_key(), &fresh),
            Ok(fresh) => {
                tracing::debug!(target: "learnpack::cache", url = %request.url, status = fresh.status, "Revalidation skipped")
            }
            Err(e) => {
                tracing::debug!(target: "learnpack::cache", url = %request.url, error = %e, "Revalidation failed")
            }
        }
    });
}

#[derive(Serialize)]
struct OfflineError<'a> {
    error: &'a str,
    message: &'a str,
}

/// Structured JSON error served for API requests with neither network nor cache.
pub fn offline_api_response(url: &str) -> CachedResponse {
    let body = serde_json::to_vec(&OfflineError {
        error: "offline",
        message: "You are offline and this data has not been cached yet.",
    })
    .unwrap_or_default();
    CachedResponse::new(503, url, body).with_header("content-type", "application/json")
}

const FALLBACK_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Offline</title>
  <style>
    body { font-family: system-ui, sans-serif; display: flex; align-items: center; justify-content: center; min-height: 100vh; margin: 0; background: #f8fafc; color: #1e293b; }
    main { text-align: center; padding: 2rem; }
    button { margin-top: 1rem; padding: 0.6rem 1.4rem; border: 0; border-radius: 0.5rem; background: #4f46e5; color: #fff; cursor: pointer; }
  </style>
</head>
<body>
  <main>
    <h1>You're offline</h1>
    <p>This page isn't available offline yet. Downloaded lessons are still available.</p>
    <button onclick="location.reload()">Try again</button>
  </main>
</body>
</html>
"#;

/// Built-in page for navigations when network, cache and the cached offline page all miss.
pub fn offline_html_response(url: &str) -> CachedResponse {
    CachedResponse::new(200, url, FALLBACK_HTML.as_bytes().to_vec())
        .with_header("content-type", "text/html; charset=utf-8")
}

const OFFLINE_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200" viewBox="0 0 200 200"><rect width="200" height="200" fill="#e2e8f0"/><text x="100" y="105" font-family="sans-serif" font-size="16" fill="#64748b" text-anchor="middle">Offline</text></svg>"##;

/// Placeholder image for image requests that cannot be served.
pub fn offline_image_response(url: &str) -> CachedResponse {
    CachedResponse::new(200, url, OFFLINE_SVG.as_bytes().to_vec())
        .with_header("content-type", "image/svg+xml")
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Scripted fetcher: answers from a body table, counts calls, and can be taken offline.
    #[derive(Default)]
    pub struct MockFetcher {
        pub calls: AtomicUsize,
        pub offline: AtomicBool,
        failing: Mutex<HashSet<String>>,
        bodies: Mutex<Vec<(String, u16, String)>>,
    }

    impl MockFetcher {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Responds to any URL ending with `suffix`.
        pub fn respond(&self, suffix: &str, status: u16, body: &str) {
            if let Ok(mut bodies) = self.bodies.lock() {
                bodies.push((suffix.to_string(), status, body.to_string()));
            }
        }

        pub fn fail(&self, suffix: &str) {
            if let Ok(mut failing) = self.failing.lock() {
                failing.insert(suffix.to_string());
            }
        }

        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Fetcher for MockFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(FetchError::Transport("offline".into()));
            }
            let failing = self.failing.lock().map(|f| f.clone()).unwrap_or_default();
            if failing.iter().any(|s| request.url.ends_with(s.as_str())) {
                return Err(FetchError::Transport("connection refused".into()));
            }
            let bodies = self.bodies.lock().map(|b| b.clone()).unwrap_or_default();
            let (status, body) = bodies
                .iter()
                .rev()
                .find(|(suffix, _, _)| request.url.ends_with(suffix.as_str()))
                .map(|(_, status, body)| (*status, body.clone()))
                .unwrap_or((200, format!("body of {}", request.url)));
            Ok(CachedResponse::new(status, request.url.clone(), body.into_bytes()))
        }
    }
}
