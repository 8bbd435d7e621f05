//! Error types for the cache controller and the trace transport.

use thiserror::Error;

/// Failure to get a response from the network.
///
/// A non-2xx response is *not* a fetch error; it is a normal response that is
/// simply never written to a cache. `Status` is only produced where a caller
/// needs a successful body (install manifest, `CACHE_CONTENT`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Offline, DNS failure, refused connection, timeout or any other transport rejection.
    #[error("network request failed: {0}")]
    Transport(String),

    /// The server answered, but not with a success status.
    #[error("unexpected status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("invalid request url: {0}")]
    InvalidUrl(String),
}

/// Errors surfaced by cache stores and the controller lifecycle.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("corrupt cache entry '{key}' in '{cache}'")]
    Corrupt { cache: String, key: String },

    #[error(transparent)]
    Network(#[from] FetchError),

    /// One manifest asset could not be fetched; the whole install step fails.
    #[error("install failed on asset '{asset}': {reason}")]
    Install { asset: String, reason: String },
}

/// Terminal outcome of a strategy when network and cache both failed and the
/// route defines no synthesized fallback (offline-pack downloads, non-image assets).
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("no network and no cached copy of {url}: {source}")]
    Unavailable {
        url: String,
        #[source]
        source: FetchError,
    },
}

/// Push-channel transport errors. Always logged, never surfaced to trace consumers.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("trace channel connect failed: {0}")]
    Connect(String),

    #[error("trace channel transport error: {0}")]
    Transport(String),

    #[error("undecodable trace event: {0}")]
    Decode(#[from] serde_json::Error),
}
