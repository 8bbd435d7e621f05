//! Cache names and the ordered request-classification rules.

use serde::Serialize;

use crate::cache::request::FetchRequest;
use crate::shared::CacheConfig;

/// The three live cache store names for one controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheNames {
    /// Versioned build-critical assets.
    pub core: String,
    pub dynamic: String,
    pub offline_packs: String,
}

impl CacheNames {
    pub fn new(prefix: &str, version: &str) -> Self {
        Self {
            core: format!("{}-core-{}", prefix, version),
            dynamic: format!("{}-dynamic", prefix),
            offline_packs: format!("{}-offline-packs", prefix),
        }
    }

    /// Every cache name not in this set is stale and purged on activation.
    pub fn allowed(&self) -> [&str; 3] {
        [
            self.core.as_str(),
            self.dynamic.as_str(),
            self.offline_packs.as_str(),
        ]
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowed().contains(&name)
    }
}

/// Resolved controller settings: configuration plus the origin requests are made against.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Origin (scheme + authority) that relative URLs resolve against.
    pub origin: String,
    pub names: CacheNames,
    pub api_prefix: String,
    pub cacheable_api_prefixes: Vec<String>,
    pub offline_pack_marker: String,
    pub core_assets: Vec<String>,
    pub offline_page: String,
    pub sync_tag: String,
    pub storage_quota_bytes: Option<u64>,
}

impl CacheSettings {
    pub fn from_config(config: &CacheConfig, origin: &str) -> Self {
        Self {
            origin: origin.trim_end_matches('/').to_string(),
            names: CacheNames::new(&config.prefix, &config.version),
            api_prefix: config.api_prefix.clone(),
            cacheable_api_prefixes: config.cacheable_api_prefixes.clone(),
            offline_pack_marker: config.offline_pack_marker.clone(),
            core_assets: config.core_assets.clone(),
            offline_page: config.offline_page.clone(),
            sync_tag: config.sync_tag.clone(),
            storage_quota_bytes: config.storage_quota_bytes,
        }
    }

    /// Absolute URL for `url`; origin-relative paths are joined onto the origin.
    pub fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if url.starts_with('/') {
            format!("{}{}", self.origin, url)
        } else {
            format!("{}/{}", self.origin, url)
        }
    }

    /// Only allowlisted API responses are ever written to the dynamic store.
    pub fn is_cacheable_api(&self, path: &str) -> bool {
        self.cacheable_api_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub fn is_offline_pack(&self, path: &str) -> bool {
        !self.offline_pack_marker.is_empty() && path.contains(self.offline_pack_marker.as_str())
    }
}

/// How an intercepted request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Not intercepted; goes straight to the network.
    Passthrough,
    /// Network-first, allowlisted writes to `dynamic`, JSON error fallback.
    Api,
    /// Network-first into `offline-packs`, broadcasts a download notification.
    OfflinePack,
    /// Network-first into `dynamic`, offline page fallback.
    Navigation,
    /// Cache-first from `dynamic` with background revalidation.
    StaticAsset,
}

pub type Matcher = fn(&FetchRequest, &CacheSettings) -> bool;

fn is_not_get(req: &FetchRequest, _: &CacheSettings) -> bool {
    !req.is_get()
}

// Pack downloads live under the API prefix on the backend; they belong to the pack rule.
fn is_api(req: &FetchRequest, settings: &CacheSettings) -> bool {
    req.path.starts_with(settings.api_prefix.as_str()) && !settings.is_offline_pack(&req.path)
}

fn is_offline_pack(req: &FetchRequest, settings: &CacheSettings) -> bool {
    settings.is_offline_pack(&req.path)
}

fn is_navigation(req: &FetchRequest, _: &CacheSettings) -> bool {
    req.navigate
}

fn any(_: &FetchRequest, _: &CacheSettings) -> bool {
    true
}

/// Evaluated in order; the first matching rule wins.
pub const ROUTE_RULES: [(Matcher, Route); 5] = [
    (is_not_get, Route::Passthrough),
    (is_api, Route::Api),
    (is_offline_pack, Route::OfflinePack),
    (is_navigation, Route::Navigation),
    (any, Route::StaticAsset),
];

pub fn classify(req: &FetchRequest, settings: &CacheSettings) -> Route {
    ROUTE_RULES
        .iter()
        .find(|(matches, _)| matches(req, settings))
        .map(|(_, route)| *route)
        .unwrap_or(Route::StaticAsset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CacheSettings {
        CacheSettings::from_config(&CacheConfig::default(), "http://localhost:8000/")
    }

    #[test]
    fn names_are_namespaced_and_core_is_versioned() {
        let names = CacheNames::new("edu", "v7");
        assert_eq!(names.core, "edu-core-v7");
        assert_eq!(names.dynamic, "edu-dynamic");
        assert_eq!(names.offline_packs, "edu-offline-packs");
        assert!(names.is_allowed("edu-dynamic"));
        assert!(!names.is_allowed("edu-core-v6"));
    }

    #[test]
    fn resolve_joins_relative_urls_onto_origin() {
        let s = settings();
        assert_eq!(s.resolve("/a?b=1"), "http://localhost:8000/a?b=1");
        assert_eq!(s.resolve("a"), "http://localhost:8000/a");
        assert_eq!(s.resolve("https://cdn.example/x.png"), "https://cdn.example/x.png");
    }

    #[test]
    fn first_matching_rule_wins() {
        let s = settings();
        let api = FetchRequest::get(s.resolve("/api/v1/dashboard"));
        assert_eq!(classify(&api, &s), Route::Api);

        // A navigation into the API is still an API request.
        let api_nav = FetchRequest::navigation(s.resolve("/api/v1/curriculum/grades"));
        assert_eq!(classify(&api_nav, &s), Route::Api);

        let post = FetchRequest::get(s.resolve("/api/v1/chat")).with_method("POST");
        assert_eq!(classify(&post, &s), Route::Passthrough);

        let pack = FetchRequest::get(s.resolve("/api/v1/offline/download/grade9-math"));
        assert_eq!(classify(&pack, &s), Route::OfflinePack);

        let page = FetchRequest::navigation(s.resolve("/dashboard"));
        assert_eq!(classify(&page, &s), Route::Navigation);

        let asset = FetchRequest::get(s.resolve("/_next/static/chunk.js"));
        assert_eq!(classify(&asset, &s), Route::StaticAsset);
    }

    #[test]
    fn api_cacheability_follows_the_allowlist() {
        let s = settings();
        assert!(s.is_cacheable_api("/api/v1/curriculum/subjects"));
        assert!(s.is_cacheable_api("/api/v1/offline/packs"));
        assert!(!s.is_cacheable_api("/api/v1/chat/history"));
    }
}
