//! Shared configuration for the cache controller, trace monitor and gateway.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Cache tiers and request classification knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Namespace for the three cache store names (`{prefix}-core-{version}` etc.).
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Build version of the core asset manifest. Bumping it rotates the `core` store.
    #[serde(default = "default_version")]
    pub version: String,
    /// Requests whose path starts with this prefix are API calls.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    /// API path prefixes whose successful responses may be written to the dynamic store.
    #[serde(default = "default_cacheable_api_prefixes")]
    pub cacheable_api_prefixes: Vec<String>,
    /// Substring identifying an offline-pack archive download.
    #[serde(default = "default_offline_pack_marker")]
    pub offline_pack_marker: String,
    /// Build-critical assets written to the core store at install time.
    #[serde(default = "default_core_assets")]
    pub core_assets: Vec<String>,
    /// Offline page served to navigations when both network and cache miss.
    #[serde(default = "default_offline_page")]
    pub offline_page: String,
    /// Background sync tag that triggers a `SYNC_COMPLETE` broadcast.
    #[serde(default = "default_sync_tag")]
    pub sync_tag: String,
    /// Storage quota reported by `GET_CACHE_SIZE`. When absent the size is unknown.
    #[serde(default)]
    pub storage_quota_bytes: Option<u64>,
}

fn default_prefix() -> String {
    "learnpack".to_string()
}

fn default_version() -> String {
    "v1".to_string()
}

fn default_api_prefix() -> String {
    "/api/".to_string()
}

fn default_cacheable_api_prefixes() -> Vec<String> {
    vec![
        "/api/v1/curriculum".to_string(),
        "/api/v1/offline/packs".to_string(),
        "/api/v1/offline/prebuilt".to_string(),
    ]
}

fn default_offline_pack_marker() -> String {
    "/offline/download/".to_string()
}

fn default_core_assets() -> Vec<String> {
    vec![
        "/".to_string(),
        "/offline.html".to_string(),
        "/manifest.json".to_string(),
        "/icons/icon-192x192.png".to_string(),
        "/icons/icon-512x512.png".to_string(),
    ]
}

fn default_offline_page() -> String {
    "/offline.html".to_string()
}

fn default_sync_tag() -> String {
    "sync-progress".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            version: default_version(),
            api_prefix: default_api_prefix(),
            cacheable_api_prefixes: default_cacheable_api_prefixes(),
            offline_pack_marker: default_offline_pack_marker(),
            core_assets: default_core_assets(),
            offline_page: default_offline_page(),
            sync_tag: default_sync_tag(),
            storage_quota_bytes: None,
        }
    }
}

/// Push-channel settings for the agent trace monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    /// WebSocket URL of the backend trace channel. `None` disables the monitor's transport.
    #[serde(default)]
    pub url: Option<String>,
    /// Delay before reconnecting after an open connection closed.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Delay before reconnecting after a connection attempt failed outright.
    #[serde(default = "default_connect_error_delay_ms")]
    pub connect_error_delay_ms: u64,
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Interval for text `ping` keep-alives. `None` sends none.
    #[serde(default)]
    pub keepalive_secs: Option<u64>,
}

fn default_reconnect_delay_ms() -> u64 {
    3_000
}

fn default_connect_error_delay_ms() -> u64 {
    5_000
}

fn default_recent_capacity() -> usize {
    50
}

fn default_history_capacity() -> usize {
    20
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            url: None,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connect_error_delay_ms: default_connect_error_delay_ms(),
            recent_capacity: default_recent_capacity(),
            history_capacity: default_history_capacity(),
            keepalive_secs: None,
        }
    }
}

/// Global gateway configuration. Load from TOML or env.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub app_name: String,
    /// HTTP port the gateway listens on.
    pub port: u16,
    /// Origin of the learning app and its API (e.g. `http://127.0.0.1:8000`).
    pub upstream_url: String,
    /// Base directory for the Sled cache and preference stores.
    pub storage_path: String,
    /// Seconds between upstream reachability probes.
    #[serde(default = "default_probe_secs")]
    pub connectivity_probe_secs: u64,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub trace: TraceConfig,
}

fn default_probe_secs() -> u64 {
    15
}

impl GatewayConfig {
    /// Load config from file and environment. Precedence: env `LEARNPACK__*` > file at
    /// `LEARNPACK_CONFIG` (default `config/gateway.toml`) > defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("LEARNPACK_CONFIG").unwrap_or_else(|_| "config/gateway.toml".to_string());
        let builder = config::Config::builder()
            .set_default("app_name", "LearnPack Gateway")?
            .set_default("port", 8080_i64)?
            .set_default("upstream_url", "http://127.0.0.1:8000")?
            .set_default("storage_path", "./data")?;

        let path = Path::new(&config_path);
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(config::Environment::with_prefix("LEARNPACK").separator("__"))
            .build()?;

        built.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_defaults_cover_pack_and_curriculum_endpoints() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.api_prefix, "/api/");
        assert!(cfg
            .cacheable_api_prefixes
            .iter()
            .any(|p| p == "/api/v1/curriculum"));
        assert!(cfg.core_assets.contains(&cfg.offline_page));
        assert_eq!(cfg.storage_quota_bytes, None);
    }

    #[test]
    fn nested_sections_fall_back_to_defaults() {
        let cfg: GatewayConfig = serde_json::from_value(serde_json::json!({
            "app_name": "Test",
            "port": 9000,
            "upstream_url": "http://localhost:8000",
            "storage_path": "./data",
            "trace": { "url": "ws://localhost:8000/ws/agent-trace" }
        }))
        .unwrap();
        assert_eq!(cfg.connectivity_probe_secs, 15);
        assert_eq!(cfg.cache.sync_tag, "sync-progress");
        assert_eq!(cfg.trace.reconnect_delay_ms, 3_000);
        assert_eq!(cfg.trace.connect_error_delay_ms, 5_000);
        assert_eq!(cfg.trace.recent_capacity, 50);
        assert_eq!(cfg.trace.history_capacity, 20);
    }
}
