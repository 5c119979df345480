//! Durable playback progress

use crate::error::{PlaybackError, Result};
use bridge_traits::storage::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// Store key holding the progress map.
pub const PROGRESS_KEY: &str = "videoProgress";

/// Persisted progress of one video.
///
/// Seconds are whole seconds; `last_position` is milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedProgress {
    #[serde(default)]
    pub watched_seconds: u64,
    #[serde(default)]
    pub total_duration: u64,
    #[serde(default)]
    pub percentage: f64,
    #[serde(default)]
    pub last_position: u64,
    /// Unix epoch milliseconds
    #[serde(default)]
    pub last_updated: i64,
}

impl PersistedProgress {
    pub fn new(watched_seconds: u64, total_duration: u64, last_position: u64) -> Self {
        Self {
            watched_seconds,
            total_duration,
            percentage: percentage(watched_seconds, total_duration),
            last_position,
            last_updated: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total_duration > 0 && self.watched_seconds >= self.total_duration
    }
}

/// Watched share in percent, one decimal, capped at 100.
pub fn percentage(watched: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = (watched as f64 / total as f64 * 100.0).min(100.0);
    (pct * 10.0).round() / 10.0
}

/// Map of video id to [`PersistedProgress`] under [`PROGRESS_KEY`].
///
/// Writes are last-writer-wins per video; the mutex only keeps concurrent
/// read-modify-write cycles for different videos from clobbering each other.
pub struct ProgressStore {
    store: Arc<dyn KeyValueStore>,
    lock: Mutex<()>,
}

impl ProgressStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// The stored map as raw JSON. A document that is not a map is an error
    /// rather than an empty map, so it is never written over.
    async fn load_raw(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let Some(raw) = self.store.read(PROGRESS_KEY).await? else {
            return Ok(serde_json::Map::new());
        };
        serde_json::from_str(&raw)
            .map_err(|e| PlaybackError::Internal(format!("unreadable progress map: {}", e)))
    }

    /// Every readable entry. Entries that do not parse are skipped here and
    /// left as they are in the store.
    pub async fn all(&self) -> Result<BTreeMap<String, PersistedProgress>> {
        let mut all = BTreeMap::new();
        for (video_id, entry) in self.load_raw().await? {
            match serde_json::from_value(entry) {
                Ok(progress) => {
                    all.insert(video_id, progress);
                }
                Err(e) => warn!(video_id = %video_id, error = %e, "Skipping unreadable progress entry"),
            }
        }
        Ok(all)
    }

    pub async fn get(&self, video_id: &str) -> Result<Option<PersistedProgress>> {
        let Some(entry) = self.load_raw().await?.remove(video_id) else {
            return Ok(None);
        };
        match serde_json::from_value(entry) {
            Ok(progress) => Ok(Some(progress)),
            Err(e) => {
                warn!(error = %e, "Unreadable progress entry, starting from zero");
                Ok(None)
            }
        }
    }

    pub async fn put(&self, video_id: &str, progress: PersistedProgress) -> Result<()> {
        let _guard = self.lock.lock().await;
        let serialize = |e: serde_json::Error| PlaybackError::Internal(format!("serialize progress: {}", e));

        let mut raw = self.load_raw().await?;
        raw.insert(video_id.to_string(), serde_json::to_value(&progress).map_err(serialize)?);

        let json = serde_json::to_string(&raw).map_err(serialize)?;
        self.store
            .write(PROGRESS_KEY, &json)
            .await
            .map_err(|e| PlaybackError::ProgressPersistence(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::SqliteKeyValueStore;

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(1, 3), 33.3);
        assert_eq!(percentage(120, 100), 100.0);
    }

    #[tokio::test]
    async fn test_put_and_get_keeps_other_videos() {
        let kv = Arc::new(SqliteKeyValueStore::in_memory().await.unwrap());
        let store = ProgressStore::new(kv.clone());

        store.put("v1", PersistedProgress::new(10, 100, 12_500)).await.unwrap();
        store.put("v2", PersistedProgress::new(5, 50, 5_000)).await.unwrap();

        let v1 = store.get("v1").await.unwrap().unwrap();
        assert_eq!(v1.watched_seconds, 10);
        assert_eq!(v1.last_position, 12_500);
        assert_eq!(v1.percentage, 10.0);
        assert_eq!(store.all().await.unwrap().len(), 2);

        let raw = kv.read(PROGRESS_KEY).await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["v2"]["watchedSeconds"], 5);
        assert_eq!(json["v2"]["totalDuration"], 50);
        assert!(json["v2"]["lastUpdated"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_reads_partial_documents() {
        let kv = Arc::new(SqliteKeyValueStore::in_memory().await.unwrap());
        kv.write(PROGRESS_KEY, r#"{"v1":{"watchedSeconds":7}}"#).await.unwrap();

        let store = ProgressStore::new(kv);
        let v1 = store.get("v1").await.unwrap().unwrap();
        assert_eq!(v1.watched_seconds, 7);
        assert_eq!(v1.last_position, 0);
    }

    #[tokio::test]
    async fn test_bad_entry_survives_other_writes() {
        let kv = Arc::new(SqliteKeyValueStore::in_memory().await.unwrap());
        kv.write(
            PROGRESS_KEY,
            r#"{"v1":{"watchedSeconds":7},"v2":{"watchedSeconds":"lots"},"v3":{"lastPosition":900}}"#,
        )
        .await
        .unwrap();
        let store = ProgressStore::new(kv.clone());

        let all = store.all().await.unwrap();
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["v1", "v3"]);
        assert!(store.get("v2").await.unwrap().is_none());

        store.put("v4", PersistedProgress::new(1, 10, 1_000)).await.unwrap();

        let raw = kv.read(PROGRESS_KEY).await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["v1"]["watchedSeconds"], 7);
        assert_eq!(json["v2"]["watchedSeconds"], "lots");
        assert_eq!(json["v3"]["lastPosition"], 900);
        assert_eq!(json["v4"]["watchedSeconds"], 1);
    }

    #[tokio::test]
    async fn test_unreadable_map_is_not_overwritten() {
        let kv = Arc::new(SqliteKeyValueStore::in_memory().await.unwrap());
        kv.write(PROGRESS_KEY, "[1, 2").await.unwrap();
        let store = ProgressStore::new(kv.clone());

        assert!(matches!(store.all().await, Err(PlaybackError::Internal(_))));
        let err = store.put("v1", PersistedProgress::new(1, 10, 1_000)).await.unwrap_err();
        assert!(matches!(err, PlaybackError::Internal(_)));
        assert_eq!(kv.read(PROGRESS_KEY).await.unwrap().as_deref(), Some("[1, 2"));
    }
}
