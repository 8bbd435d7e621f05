//! Offline cache controller: three named response stores, routing strategies, and the
//! page-facing control channel.

mod control;
mod controller;
mod fetcher;
mod policy;
mod request;
mod store;
mod strategy;

pub use control::{ControlMessage, StorageEstimate, WorkerMessage};
pub use controller::{CacheController, Dispatch, WorkerState, SYNC_COMPLETE_MESSAGE};
pub use fetcher::{Fetcher, ReqwestFetcher};
pub use policy::{classify, CacheNames, CacheSettings, Route, ROUTE_RULES};
pub use request::{cache_key, path_of, Destination, FetchRequest};
pub use store::{CacheStorage, CachedResponse, MemoryCacheStorage, SledCacheStorage};
pub use strategy::{
    cache_first, network_first, offline_api_response, offline_html_response,
    offline_image_response, ResponseSource, Served, StrategyContext,
};
