//! The cache controller: lifecycle, request dispatch, control channel and background sync.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use futures_util::future::try_join_all;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::cache::control::{ControlMessage, StorageEstimate, WorkerMessage};
use crate::cache::fetcher::Fetcher;
use crate::cache::policy::{classify, CacheNames, CacheSettings, Route};
use crate::cache::request::{cache_key, FetchRequest};
use crate::cache::store::{CacheStorage, CachedResponse};
use crate::cache::strategy::{
    cache_first, network_first, offline_api_response, offline_html_response,
    offline_image_response, ResponseSource, Served, StrategyContext,
};
use crate::error::{CacheError, FetchError, StrategyError};

/// Open pages that are not reading their stream drop notifications past this backlog.
const CLIENT_BACKLOG: usize = 64;

pub const SYNC_COMPLETE_MESSAGE: &str = "Progress synced successfully";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Installing,
    Waiting,
    Active,
}

/// What the controller decided for one intercepted request.
#[derive(Debug)]
pub enum Dispatch {
    /// Not intercepted; the caller sends the request to the network untouched.
    Passthrough,
    Served(Served),
}

/// Service-worker style controller owning the three cache stores.
pub struct CacheController {
    settings: CacheSettings,
    ctx: StrategyContext,
    state: RwLock<WorkerState>,
    clients: broadcast::Sender<WorkerMessage>,
    /// Set once activation has taken control of already-open pages.
    claimed: AtomicBool,
}

impl CacheController {
    pub fn new(
        settings: CacheSettings,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let (clients, _) = broadcast::channel(CLIENT_BACKLOG);
        Self {
            settings,
            ctx: StrategyContext::new(storage, fetcher),
            state: RwLock::new(WorkerState::Installing),
            clients,
            claimed: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn names(&self) -> &CacheNames {
        &self.settings.names
    }

    pub fn state(&self) -> WorkerState {
        self.state
            .read()
            .map(|s| *s)
            .unwrap_or(WorkerState::Installing)
    }

    pub(crate) fn set_state(&self, next: WorkerState) {
        if let Ok(mut state) = self.state.write() {
            *state = next;
        }
    }

    /// Whether activation has claimed the open pages.
    #[inline]
    pub fn is_controlling(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Registers an open page for worker notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerMessage> {
        self.clients.subscribe()
    }

    fn broadcast(&self, msg: WorkerMessage) {
        // No receivers just means no page is open.
        let _ = self.clients.send(msg);
    }

    /// Brings the controller up: reuses a populated `core` store from an earlier run,
    /// otherwise runs a fresh install.
    pub async fn start(&self) -> Result<(), CacheError> {
        if self.ctx.storage.len(&self.settings.names.core)? > 0 {
            tracing::info!(
                target: "learnpack::cache",
                core = %self.settings.names.core,
                "Core cache already populated, activating"
            );
            self.set_state(WorkerState::Waiting);
            self.activate()?;
            return Ok(());
        }
        self.install().await
    }

    /// Fetches the whole core manifest and writes it in one batch. Any failed asset fails
    /// the install and leaves the controller `Installing` with nothing written.
    pub async fn install(&self) -> Result<(), CacheError> {
        self.set_state(WorkerState::Installing);
        let core = self.settings.names.core.clone();
        self.ctx.storage.open(&core)?;

        let fetches = self.settings.core_assets.iter().map(|asset| async move {
            let request = FetchRequest::get(self.settings.resolve(asset));
            let response = self
                .ctx
                .fetcher
                .fetch(&request)
                .await
                .map_err(|e| install_error(asset, e))?;
            if !response.is_ok() {
                return Err(install_error(
                    asset,
                    FetchError::Status {
                        url: request.url.clone(),
                        status: response.status,
                    },
                ));
            }
            Ok((request.cache_key(), response))
        });

        let entries = match try_join_all(fetches).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(target: "learnpack::cache", error = %e, "Core cache install failed");
                return Err(e);
            }
        };
        if let Err(e) = self.ctx.storage.put_all(&core, &entries) {
            tracing::error!(target: "learnpack::cache", error = %e, "Core cache write failed");
            return Err(e);
        }

        tracing::info!(
            target: "learnpack::cache",
            core = %core,
            assets = entries.len(),
            "Core assets cached"
        );
        self.set_state(WorkerState::Waiting);
        self.skip_waiting()?;
        Ok(())
    }

    /// Promotes a waiting controller to active. No-op in any other state.
    pub fn skip_waiting(&self) -> Result<bool, CacheError> {
        if self.state() != WorkerState::Waiting {
            return Ok(false);
        }
        self.activate()?;
        Ok(true)
    }

    /// Purges every cache store outside the current three names, then claims open pages.
    /// Returns the purged names.
    pub fn activate(&self) -> Result<Vec<String>, CacheError> {
        let mut purged = Vec::new();
        for name in self.ctx.storage.keys()? {
            if !self.settings.names.is_allowed(&name) {
                self.ctx.storage.delete(&name)?;
                tracing::info!(target: "learnpack::cache", cache = %name, "Purged stale cache");
                purged.push(name);
            }
        }
        self.set_state(WorkerState::Active);
        self.claimed.store(true, Ordering::Release);
        tracing::info!(
            target: "learnpack::cache",
            purged = purged.len(),
            "Cache controller active"
        );
        Ok(purged)
    }

    /// Classifies an intercepted request and serves it with the matching strategy.
    ///
    /// Only offline-pack downloads and non-image static assets can end in `Err`; every
    /// other route degrades to a cached copy or a synthesized response.
    pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<Dispatch, StrategyError> {
        if self.state() != WorkerState::Active {
            return Ok(Dispatch::Passthrough);
        }
        let names = &self.settings.names;
        let route = classify(request, &self.settings);
        tracing::trace!(target: "learnpack::cache", url = %request.url, route = ?route, "Intercepted");

        let served = match route {
            Route::Passthrough => return Ok(Dispatch::Passthrough),
            Route::Api => {
                let write = self.settings.is_cacheable_api(&request.path);
                match network_first(&self.ctx, request, &names.dynamic, write).await {
                    Ok(served) => served,
                    Err(_) => Served::fallback(offline_api_response(&request.url)),
                }
            }
            Route::OfflinePack => {
                let served = network_first(&self.ctx, request, &names.offline_packs, true)
                    .await
                    .map_err(|source| unavailable(request, source))?;
                if served.source == ResponseSource::Network
                    && served.response.is_ok()
                {
                    tracing::info!(target: "learnpack::cache", url = %request.url, "Offline pack downloaded");
                    self.broadcast(WorkerMessage::OfflinePackDownloaded {
                        url: request.url.clone(),
                    });
                }
                served
            }
            Route::Navigation => {
                match network_first(&self.ctx, request, &names.dynamic, true).await {
                    Ok(served) => served,
                    Err(_) => self.offline_page(request),
                }
            }
            Route::StaticAsset => match cache_first(&self.ctx, request, &names.dynamic).await {
                Ok(served) => served,
                Err(_) if request.destination.is_image() => {
                    Served::fallback(offline_image_response(&request.url))
                }
                Err(source) => return Err(unavailable(request, source)),
            },
        };
        Ok(Dispatch::Served(served))
    }

    /// The cached offline page from any store, else the built-in one.
    fn offline_page(&self, request: &FetchRequest) -> Served {
        let key = cache_key("GET", &self.settings.resolve(&self.settings.offline_page));
        match self.ctx.storage.lookup_any(&key) {
            Ok(Some(page)) => Served::fallback(page),
            Ok(None) => Served::fallback(offline_html_response(&request.url)),
            Err(e) => {
                tracing::warn!(target: "learnpack::cache", error = %e, "Offline page lookup failed");
                Served::fallback(offline_html_response(&request.url))
            }
        }
    }

    /// Applies one control-channel message. Only `GET_CACHE_SIZE` produces a reply.
    pub async fn handle_control(&self, msg: ControlMessage) -> Option<WorkerMessage> {
        tracing::debug!(target: "learnpack::control", message = ?msg, "Control message");
        match msg {
            ControlMessage::SkipWaiting => {
                if let Err(e) = self.skip_waiting() {
                    tracing::warn!(target: "learnpack::control", error = %e, "SKIP_WAITING failed");
                }
                None
            }
            ControlMessage::CacheContent { payload } => {
                self.cache_content(&payload).await;
                None
            }
            ControlMessage::ClearCache { payload } => {
                if let Err(e) = self.clear_cache(payload.as_deref()) {
                    tracing::warn!(target: "learnpack::control", error = %e, "CLEAR_CACHE failed");
                }
                None
            }
            ControlMessage::GetCacheSize => Some(WorkerMessage::CacheSize {
                size: self.cache_size(),
            }),
        }
    }

    /// Best-effort prefetch into `dynamic`. Per-URL failures are logged and skipped;
    /// returns how many URLs were stored.
    pub async fn cache_content(&self, urls: &[String]) -> usize {
        let dynamic = &self.settings.names.dynamic;
        let mut stored = 0;
        for url in urls {
            let request = FetchRequest::get(self.settings.resolve(url));
            match self.ctx.fetcher.fetch(&request).await {
                Ok(response) if response.is_ok() => {
                    match self.ctx.storage.put(dynamic, &request.cache_key(), &response) {
                        Ok(()) => stored += 1,
                        Err(e) => {
                            tracing::warn!(target: "learnpack::control", url = %request.url, error = %e, "CACHE_CONTENT write failed")
                        }
                    }
                }
                Ok(response) => {
                    tracing::warn!(target: "learnpack::control", url = %request.url, status = response.status, "CACHE_CONTENT skipped")
                }
                Err(e) => {
                    tracing::warn!(target: "learnpack::control", url = %request.url, error = %e, "CACHE_CONTENT fetch failed")
                }
            }
        }
        stored
    }

    /// Deletes the named store, or every store when `name` is `None`.
    pub fn clear_cache(&self, name: Option<&str>) -> Result<usize, CacheError> {
        let targets = match name {
            Some(name) => vec![name.to_string()],
            None => self.ctx.storage.keys()?,
        };
        let mut deleted = 0;
        for target in targets {
            if self.ctx.storage.delete(&target)? {
                deleted += 1;
            }
        }
        tracing::info!(target: "learnpack::control", deleted = deleted, "Caches cleared");
        Ok(deleted)
    }

    /// Usage against the configured quota; `None` when no quota is known.
    pub fn cache_size(&self) -> Option<StorageEstimate> {
        let available = self.settings.storage_quota_bytes?;
        match self.ctx.storage.usage_bytes() {
            Ok(used) => Some(StorageEstimate::new(used, available)),
            Err(e) => {
                tracing::warn!(target: "learnpack::control", error = %e, "Storage estimate failed");
                None
            }
        }
    }

    /// Background sync trigger. The progress tag notifies every open page; other tags are ignored.
    pub fn handle_sync(&self, tag: &str) -> bool {
        if tag != self.settings.sync_tag {
            tracing::debug!(target: "learnpack::control", tag = tag, "Ignoring sync tag");
            return false;
        }
        tracing::info!(target: "learnpack::control", tag = tag, "Background sync");
        self.broadcast(WorkerMessage::SyncComplete {
            message: SYNC_COMPLETE_MESSAGE.to_string(),
        });
        true
    }

    /// Waits for every in-flight background revalidation.
    pub async fn settle(&self) {
        self.ctx.background.close();
        self.ctx.background.wait().await;
        self.ctx.background.reopen();
    }

    /// Direct store read, used by the gateway status page and tests.
    pub fn lookup(&self, cache: &str, url: &str) -> Result<Option<CachedResponse>, CacheError> {
        self.ctx
            .storage
            .lookup(cache, &cache_key("GET", &self.settings.resolve(url)))
    }

    pub fn cache_names(&self) -> Result<Vec<String>, CacheError> {
        self.ctx.storage.keys()
    }
}

fn install_error(asset: &str, err: FetchError) -> CacheError {
    CacheError::Install {
        asset: asset.to_string(),
        reason: err.to_string(),
    }
}

fn unavailable(request: &FetchRequest, source: FetchError) -> StrategyError {
    tracing::warn!(target: "learnpack::cache", url = %request.url, error = %source, "Request failed with no cached copy");
    StrategyError::Unavailable {
        url: request.url.clone(),
        source,
    }
}
