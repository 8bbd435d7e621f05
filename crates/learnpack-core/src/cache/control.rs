//! Page ↔ controller control-channel protocol.

use serde::{Deserialize, Serialize};

/// Commands posted by the page. Only `GET_CACHE_SIZE` gets a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Promote a waiting controller to active immediately.
    SkipWaiting,
    /// Best-effort prefetch of the given URLs into the dynamic store.
    CacheContent {
        #[serde(default)]
        payload: Vec<String>,
    },
    /// Delete the named store, or every store when no name is given.
    ClearCache {
        #[serde(default)]
        payload: Option<String>,
    },
    GetCacheSize,
}

/// Storage usage snapshot reported for `GET_CACHE_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StorageEstimate {
    /// Bytes held by all cache stores.
    pub used: u64,
    /// Quota available to the caches.
    pub available: u64,
    /// `used / available` as a percentage, two decimals.
    pub percentage: f64,
}

impl StorageEstimate {
    pub fn new(used: u64, available: u64) -> Self {
        let percentage = if available == 0 {
            0.0
        } else {
            ((used as f64 / available as f64) * 10_000.0).round() / 100.0
        };
        Self {
            used,
            available,
            percentage,
        }
    }
}

/// Notifications sent from the controller to open pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    CacheSize { size: Option<StorageEstimate> },
    OfflinePackDownloaded { url: String },
    SyncComplete { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_messages_decode_from_page_json() {
        let skip: ControlMessage = serde_json::from_str(r#"{"type":"SKIP_WAITING"}"#).unwrap();
        assert_eq!(skip, ControlMessage::SkipWaiting);

        let content: ControlMessage = serde_json::from_str(
            r#"{"type":"CACHE_CONTENT","payload":["/api/v1/curriculum/grades","/offline.html"]}"#,
        )
        .unwrap();
        assert_eq!(
            content,
            ControlMessage::CacheContent {
                payload: vec!["/api/v1/curriculum/grades".into(), "/offline.html".into()]
            }
        );

        let clear_all: ControlMessage = serde_json::from_str(r#"{"type":"CLEAR_CACHE"}"#).unwrap();
        assert_eq!(clear_all, ControlMessage::ClearCache { payload: None });

        let size: ControlMessage = serde_json::from_str(r#"{"type":"GET_CACHE_SIZE"}"#).unwrap();
        assert_eq!(size, ControlMessage::GetCacheSize);

        assert!(serde_json::from_str::<ControlMessage>(r#"{"type":"REBOOT"}"#).is_err());
    }

    #[test]
    fn worker_messages_encode_with_type_tag() {
        let msg = WorkerMessage::OfflinePackDownloaded {
            url: "http://x/api/v1/offline/download/p1".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "OFFLINE_PACK_DOWNLOADED");
        assert_eq!(json["url"], "http://x/api/v1/offline/download/p1");

        let unknown = serde_json::to_value(WorkerMessage::CacheSize { size: None }).unwrap();
        assert_eq!(unknown, serde_json::json!({ "type": "CACHE_SIZE", "size": null }));
    }

    #[test]
    fn estimate_percentage_is_rounded() {
        let est = StorageEstimate::new(1, 3);
        assert_eq!(est.percentage, 33.33);
        assert_eq!(StorageEstimate::new(5, 0).percentage, 0.0);
    }
}
