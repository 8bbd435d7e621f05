//! Named response caches (one Sled tree per cache store).
//!
//! | Store           | Versioned | Written by                                         |
//! |-----------------|-----------|----------------------------------------------------|
//! | `core`          | yes       | install (fixed manifest, all-or-nothing)           |
//! | `dynamic`       | no        | navigations, static assets, allowlisted API calls  |
//! | `offline-packs` | no        | offline-pack archive downloads                     |

use base64::engine::general_purpose::STANDARD as BASE64;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;

use crate::error::CacheError;

/// Tree-name prefix that separates cache stores from anything else in the same DB.
const TREE_PREFIX: &str = "cache/";

/// Snapshot of an HTTP response: what the network returned, and what a cache holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,
    /// URL the response was fetched from.
    pub url: String,
    /// Unix timestamp (milliseconds) when the snapshot was taken.
    pub stored_at_ms: i64,
}

impl CachedResponse {
    pub fn new(status: u16, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            url: url.into(),
            stored_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// `true` for 2xx statuses; only these are ever written to a cache.
    #[inline]
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Serializes to JSON bytes for storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

mod body_base64 {
    use super::BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&BASE64.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Platform-style cache storage: a set of named stores of request-keyed responses.
///
/// Writes to the same key from concurrent requests race; the last writer wins.
pub trait CacheStorage: Send + Sync {
    /// Names of every existing cache store.
    fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Opens (creating if absent) the named store.
    fn open(&self, cache: &str) -> Result<(), CacheError>;

    /// Deletes the named store. Returns whether it existed.
    fn delete(&self, cache: &str) -> Result<bool, CacheError>;

    fn put(&self, cache: &str, key: &str, response: &CachedResponse) -> Result<(), CacheError>;

    /// Writes all entries or none of them.
    fn put_all(&self, cache: &str, entries: &[(String, CachedResponse)]) -> Result<(), CacheError>;

    fn lookup(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>, CacheError>;

    /// Number of entries in the named store (0 if it does not exist).
    fn len(&self, cache: &str) -> Result<usize, CacheError>;

    /// Bytes held across all stores.
    fn usage_bytes(&self) -> Result<u64, CacheError>;

    /// Searches every store, in name order, for the key.
    fn lookup_any(&self, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        for cache in self.keys()? {
            if let Some(hit) = self.lookup(&cache, key)? {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }

    fn has(&self, cache: &str) -> Result<bool, CacheError> {
        Ok(self.keys()?.iter().any(|k| k == cache))
    }
}

/// Sled-backed cache storage. Each cache store is a tree named `cache/{name}`.
pub struct SledCacheStorage {
    db: Db,
}

impl SledCacheStorage {
    /// Opens or creates the cache DB at the given path.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn tree(&self, cache: &str) -> Result<sled::Tree, CacheError> {
        Ok(self.db.open_tree(format!("{}{}", TREE_PREFIX, cache))?)
    }

    fn decode(cache: &str, key: &str, bytes: &[u8]) -> Result<CachedResponse, CacheError> {
        CachedResponse::from_bytes(bytes).ok_or_else(|| CacheError::Corrupt {
            cache: cache.to_string(),
            key: key.to_string(),
        })
    }
}

impl CacheStorage for SledCacheStorage {
    fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut names: Vec<String> = self
            .db
            .tree_names()
            .into_iter()
            .filter_map(|n| String::from_utf8(n.to_vec()).ok())
            .filter_map(|n| n.strip_prefix(TREE_PREFIX).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    fn open(&self, cache: &str) -> Result<(), CacheError> {
        self.tree(cache).map(|_| ())
    }

    fn delete(&self, cache: &str) -> Result<bool, CacheError> {
        let existed = self.db.drop_tree(format!("{}{}", TREE_PREFIX, cache))?;
        if existed {
            tracing::info!(target: "learnpack::cache", cache = cache, "Cache store deleted");
        }
        Ok(existed)
    }

    fn put(&self, cache: &str, key: &str, response: &CachedResponse) -> Result<(), CacheError> {
        let tree = self.tree(cache)?;
        let bytes = response.to_bytes();
        let prev = tree.insert(key.as_bytes(), bytes.as_slice())?;
        tracing::debug!(
            target: "learnpack::cache",
            cache = cache,
            key = key,
            bytes = bytes.len(),
            action = if prev.is_some() { "UPDATE" } else { "INSERT" },
            "Cached response"
        );
        Ok(())
    }

    fn put_all(&self, cache: &str, entries: &[(String, CachedResponse)]) -> Result<(), CacheError> {
        let tree = self.tree(cache)?;
        let mut batch = sled::Batch::default();
        for (key, response) in entries {
            batch.insert(key.as_bytes(), response.to_bytes());
        }
        tree.apply_batch(batch)?;
        tree.flush()?;
        Ok(())
    }

    fn lookup(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        if !self.has(cache)? {
            return Ok(None);
        }
        let tree = self.tree(cache)?;
        match tree.get(key.as_bytes())? {
            Some(bytes) => Self::decode(cache, key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    fn len(&self, cache: &str) -> Result<usize, CacheError> {
        if !self.has(cache)? {
            return Ok(0);
        }
        Ok(self.tree(cache)?.len())
    }

    fn usage_bytes(&self) -> Result<u64, CacheError> {
        let mut total = 0u64;
        for cache in self.keys()? {
            let tree = self.tree(&cache)?;
            for item in tree.iter() {
                let (k, v) = item?;
                total += (k.len() + v.len()) as u64;
            }
        }
        Ok(total)
    }
}

/// In-process cache storage. Nothing survives the process; used for ephemeral
/// gateways and tests.
#[derive(Default)]
pub struct MemoryCacheStorage {
    stores: DashMap<String, DashMap<String, CachedResponse>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStorage for MemoryCacheStorage {
    fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut names: Vec<String> = self.stores.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    fn open(&self, cache: &str) -> Result<(), CacheError> {
        self.stores.entry(cache.to_string()).or_default();
        Ok(())
    }

    fn delete(&self, cache: &str) -> Result<bool, CacheError> {
        Ok(self.stores.remove(cache).is_some())
    }

    fn put(&self, cache: &str, key: &str, response: &CachedResponse) -> Result<(), CacheError> {
        self.stores
            .entry(cache.to_string())
            .or_default()
            .insert(key.to_string(), response.clone());
        Ok(())
    }

    fn put_all(&self, cache: &str, entries: &[(String, CachedResponse)]) -> Result<(), CacheError> {
        let store = self.stores.entry(cache.to_string()).or_default();
        for (key, response) in entries {
            store.insert(key.clone(), response.clone());
        }
        Ok(())
    }

    fn lookup(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        Ok(self
            .stores
            .get(cache)
            .and_then(|store| store.get(key).map(|r| r.clone())))
    }

    fn len(&self, cache: &str) -> Result<usize, CacheError> {
        Ok(self.stores.get(cache).map(|s| s.len()).unwrap_or(0))
    }

    fn usage_bytes(&self) -> Result<u64, CacheError> {
        let total: u64 = self
            .stores
            .iter()
            .flat_map(|store| {
                store
                    .iter()
                    .map(|e| (e.key().len() + e.value().to_bytes().len()) as u64)
                    .collect::<Vec<_>>()
            })
            .sum();
        Ok(total)
    }
}
