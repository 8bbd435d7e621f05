//! learnpack-core: offline cache controller and live agent-trace reducer.
//!
//! The gateway add-on hosts both; they share nothing but configuration.

mod cache;
mod coordinator;
mod error;
mod shared;
mod trace;

// Shared
pub use error::{CacheError, FetchError, StrategyError, TraceError};
pub use shared::{CacheConfig, GatewayConfig, TraceConfig};

// Cache controller
pub use cache::{
    cache_first, cache_key, classify, network_first, offline_api_response,
    offline_html_response, offline_image_response, path_of, CacheController, CacheNames,
    CacheSettings, CacheStorage, CachedResponse, ControlMessage, Destination, Dispatch,
    FetchRequest, Fetcher, MemoryCacheStorage, ReqwestFetcher, ResponseSource, Route, Served,
    SledCacheStorage, StorageEstimate, StrategyContext, WorkerMessage, WorkerState,
    ROUTE_RULES, SYNC_COMPLETE_MESSAGE,
};

// Install / update coordinator
pub use coordinator::{
    ConnectivityChange, ConnectivityMonitor, DeferredPrompt, InstallDecision, InstallPrompt,
    PreferenceStore, UpdateAction, UpdateNotice,
};

// Agent trace
pub use trace::{
    parse_timestamp, payload_text, ActionPatch, ActionStatus, AgentAction, AgentKind, AgentTrace,
    CloseReason, ConnectionState, NewAction, ReconnectPolicy, TraceConnection, TraceEvent,
    TraceMonitor, TraceReducer, TraceSnapshot, TraceStatus, WireAction, WireTrace,
    DEFAULT_HISTORY_CAPACITY, DEFAULT_RECENT_CAPACITY,
};
