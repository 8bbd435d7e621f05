//! Page-side glue around the cache controller: connectivity banner and sync trigger,
//! deferred install prompt with persisted preferences, and the update banner.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheController, ControlMessage, FetchRequest, Fetcher, WorkerState};
use crate::error::CacheError;

const PREFERENCES_TREE: &str = "preferences";
const DONT_SHOW_INSTALL_KEY: &str = "install_prompt.dont_show_again";
const INSTALL_DECISION_KEY: &str = "install_prompt.last_decision";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallDecision {
    Accepted,
    Dismissed,
}

/// Durable key/value preferences kept outside the cache stores.
pub struct PreferenceStore {
    tree: sled::Tree,
}

impl PreferenceStore {
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let db = sled::open(path)?;
        let tree = db.open_tree(PREFERENCES_TREE)?;
        Ok(Self { tree })
    }

    fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.tree
            .get(key.as_bytes())
            .ok()
            .flatten()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
    }

    fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value).unwrap_or_default();
        self.tree.insert(key.as_bytes(), bytes)?;
        self.tree.flush()?;
        Ok(())
    }

    pub fn dont_show_install_again(&self) -> bool {
        self.get(DONT_SHOW_INSTALL_KEY).unwrap_or(false)
    }

    pub fn set_dont_show_install_again(&self, value: bool) -> Result<(), CacheError> {
        self.set(DONT_SHOW_INSTALL_KEY, &value)
    }

    pub fn last_install_decision(&self) -> Option<InstallDecision> {
        self.get(INSTALL_DECISION_KEY)
    }

    pub fn set_last_install_decision(&self, decision: InstallDecision) -> Result<(), CacheError> {
        self.set(INSTALL_DECISION_KEY, &decision)
    }
}

/// A captured platform install prompt, deferred until the user acts on the banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredPrompt {
    pub platforms: Vec<String>,
}

/// Install-as-app banner state.
pub struct InstallPrompt {
    prefs: Arc<PreferenceStore>,
    deferred: Mutex<Option<DeferredPrompt>>,
}

impl InstallPrompt {
    pub fn new(prefs: Arc<PreferenceStore>) -> Self {
        Self {
            prefs,
            deferred: Mutex::new(None),
        }
    }

    /// Defers the prompt. Returns whether the banner should be shown.
    pub fn capture(&self, prompt: DeferredPrompt) -> bool {
        if let Ok(mut deferred) = self.deferred.lock() {
            *deferred = Some(prompt);
        }
        self.should_show()
    }

    pub fn should_show(&self) -> bool {
        let pending = self.deferred.lock().map(|d| d.is_some()).unwrap_or(false);
        pending
            && !self.prefs.dont_show_install_again()
            && self.prefs.last_install_decision() != Some(InstallDecision::Accepted)
    }

    /// Consumes the deferred prompt and records acceptance. `None` if nothing was captured.
    pub fn accept(&self) -> Result<Option<DeferredPrompt>, CacheError> {
        let prompt = self.deferred.lock().ok().and_then(|mut d| d.take());
        if prompt.is_some() {
            self.prefs.set_last_install_decision(InstallDecision::Accepted)?;
            tracing::info!(target: "learnpack::control", "Install prompt accepted");
        }
        Ok(prompt)
    }

    pub fn dismiss(&self, dont_show_again: bool) -> Result<(), CacheError> {
        if let Ok(mut deferred) = self.deferred.lock() {
            deferred.take();
        }
        self.prefs.set_last_install_decision(InstallDecision::Dismissed)?;
        if dont_show_again {
            self.prefs.set_dont_show_install_again(true)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityChange {
    Unchanged,
    WentOffline,
    /// Back online; a progress sync was triggered.
    CameOnline,
}

/// Online/offline tracking. Coming back online fires the progress sync.
pub struct ConnectivityMonitor {
    online: AtomicBool,
    controller: Arc<CacheController>,
}

impl ConnectivityMonitor {
    pub fn new(controller: Arc<CacheController>) -> Self {
        Self {
            online: AtomicBool::new(true),
            controller,
        }
    }

    #[inline]
    pub fn is_offline(&self) -> bool {
        !self.online.load(Ordering::Acquire)
    }

    pub fn set_online(&self, online: bool) -> ConnectivityChange {
        let was_online = self.online.swap(online, Ordering::AcqRel);
        match (was_online, online) {
            (true, false) => {
                tracing::warn!(target: "learnpack::control", "Upstream unreachable, offline");
                ConnectivityChange::WentOffline
            }
            (false, true) => {
                tracing::info!(target: "learnpack::control", "Back online");
                let tag = self.controller.settings().sync_tag.clone();
                self.controller.handle_sync(&tag);
                ConnectivityChange::CameOnline
            }
            _ => ConnectivityChange::Unchanged,
        }
    }

    /// Probes the upstream origin every `interval` until `cancel` fires.
    pub fn spawn_probe(
        self: Arc<Self>,
        fetcher: Arc<dyn Fetcher>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let probe = FetchRequest::get(self.controller.settings().resolve("/"));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let reachable = fetcher.fetch(&probe).await.is_ok();
                        self.set_online(reachable);
                    }
                }
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    /// The new controller is active; the page must reload to pick it up.
    ReloadRequired,
    NothingWaiting,
}

/// "Update available" banner backed by the controller lifecycle.
pub struct UpdateNotice {
    controller: Arc<CacheController>,
}

impl UpdateNotice {
    pub fn new(controller: Arc<CacheController>) -> Self {
        Self { controller }
    }

    pub fn update_available(&self) -> bool {
        self.controller.state() == WorkerState::Waiting
    }

    pub async fn accept(&self) -> UpdateAction {
        if !self.update_available() {
            return UpdateAction::NothingWaiting;
        }
        self.controller
            .handle_control(ControlMessage::SkipWaiting)
            .await;
        UpdateAction::ReloadRequired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheSettings, MemoryCacheStorage, WorkerMessage};
    use crate::shared::CacheConfig;

    struct Unreachable;

    #[async_trait::async_trait]
    impl Fetcher for Unreachable {
        async fn fetch(
            &self,
            _: &FetchRequest,
        ) -> Result<crate::cache::CachedResponse, crate::error::FetchError> {
            Err(crate::error::FetchError::Transport("down".into()))
        }
    }

    fn controller() -> Arc<CacheController> {
        let settings = CacheSettings::from_config(&CacheConfig::default(), "http://app.test");
        Arc::new(CacheController::new(
            settings,
            Arc::new(MemoryCacheStorage::new()),
            Arc::new(Unreachable),
        ))
    }

    #[test]
    fn install_preferences_persist() {
        let dir = tempfile::tempdir().unwrap();
        {
            let prefs = Arc::new(PreferenceStore::open_path(dir.path()).unwrap());
            let prompt = InstallPrompt::new(prefs);
            assert!(prompt.capture(DeferredPrompt { platforms: vec!["web".into()] }));
            prompt.dismiss(true).unwrap();
            assert!(!prompt.should_show());
        }
        let prefs = Arc::new(PreferenceStore::open_path(dir.path()).unwrap());
        assert!(prefs.dont_show_install_again());
        assert_eq!(prefs.last_install_decision(), Some(InstallDecision::Dismissed));

        let prompt = InstallPrompt::new(prefs);
        assert!(!prompt.capture(DeferredPrompt { platforms: vec![] }));
    }

    #[test]
    fn accepting_consumes_the_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = Arc::new(PreferenceStore::open_path(dir.path()).unwrap());
        let prompt = InstallPrompt::new(prefs.clone());
        assert!(prompt.accept().unwrap().is_none());
        prompt.capture(DeferredPrompt { platforms: vec!["web".into()] });
        assert!(prompt.accept().unwrap().is_some());
        assert_eq!(prefs.last_install_decision(), Some(InstallDecision::Accepted));
        assert!(!prompt.capture(DeferredPrompt { platforms: vec![] }));
    }

    #[tokio::test]
    async fn coming_back_online_triggers_progress_sync() {
        let controller = controller();
        let mut page = controller.subscribe();
        let monitor = ConnectivityMonitor::new(controller);

        assert_eq!(monitor.set_online(true), ConnectivityChange::Unchanged);
        assert_eq!(monitor.set_online(false), ConnectivityChange::WentOffline);
        assert!(monitor.is_offline());
        assert!(page.try_recv().is_err());

        assert_eq!(monitor.set_online(true), ConnectivityChange::CameOnline);
        assert!(matches!(
            page.try_recv().unwrap(),
            WorkerMessage::SyncComplete { .. }
        ));
    }

    #[tokio::test]
    async fn probe_marks_unreachable_upstream_offline() {
        let controller = controller();
        let monitor = Arc::new(ConnectivityMonitor::new(controller));
        let cancel = CancellationToken::new();
        let handle = monitor.clone().spawn_probe(
            Arc::new(Unreachable),
            Duration::from_millis(10),
            cancel.clone(),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(monitor.is_offline());
    }

    #[tokio::test]
    async fn update_notice_only_acts_on_a_waiting_controller() {
        let notice = UpdateNotice::new(controller());
        assert!(!notice.update_available());
        assert_eq!(notice.accept().await, UpdateAction::NothingWaiting);
    }

    #[tokio::test]
    async fn accepting_an_update_activates_the_waiting_controller() {
        let controller = controller();
        controller.set_state(WorkerState::Waiting);
        let notice = UpdateNotice::new(Arc::clone(&controller));
        assert!(notice.update_available());

        assert_eq!(notice.accept().await, UpdateAction::ReloadRequired);
        assert_eq!(controller.state(), WorkerState::Active);
        assert!(controller.is_controlling());
        assert!(!notice.update_available());
    }
}
