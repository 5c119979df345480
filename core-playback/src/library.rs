//! # Download Library
//!
//! Durable list of downloaded lessons, persisted as one JSON document under
//! the `downloads` key of the [`KeyValueStore`].

use crate::asset::MediaAsset;
use crate::download::LocalFile;
use crate::error::{PlaybackError, Result};
use crate::vault::ContentVault;
use bridge_traits::storage::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// Store key holding the list of [`DownloadRecord`]s.
pub const DOWNLOADS_KEY: &str = "downloads";

/// A lesson available offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRecord {
    /// Video id
    pub id: String,
    pub course_id: String,
    pub title: String,
    /// Vault file path
    pub local_uri: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Unix epoch milliseconds; zero for records saved before it was tracked
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub size_bytes: u64,
    /// SHA-256 of the vault file, when known
    #[serde(default)]
    pub content_hash: Option<String>,
}

impl DownloadRecord {
    pub fn vault_path(&self) -> PathBuf {
        PathBuf::from(&self.local_uri)
    }
}

#[derive(Default)]
struct Document {
    records: Vec<DownloadRecord>,
    unreadable: Vec<serde_json::Value>,
}

/// Sole writer of [`DownloadRecord`]s.
///
/// Read-modify-write cycles on the list are serialized by an async mutex.
pub struct DownloadLibrary {
    store: Arc<dyn KeyValueStore>,
    lock: Mutex<()>,
}

impl DownloadLibrary {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Read the stored list.
    ///
    /// Entries that do not parse are carried along untouched so a later write
    /// keeps them. A document that is not a list at all is an error; nothing
    /// is written over it.
    async fn load(&self) -> Result<Document> {
        let Some(raw) = self.store.read(DOWNLOADS_KEY).await? else {
            return Ok(Document::default());
        };

        let entries: Vec<serde_json::Value> = serde_json::from_str(&raw)
            .map_err(|e| PlaybackError::Internal(format!("unreadable download list: {}", e)))?;

        let mut doc = Document::default();
        for entry in entries {
            match serde_json::from_value::<DownloadRecord>(entry.clone()) {
                Ok(record) => doc.records.push(record),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable download record");
                    doc.unreadable.push(entry);
                }
            }
        }
        Ok(doc)
    }

    async fn store_all(&self, doc: &Document) -> Result<()> {
        let serialize = |e: serde_json::Error| PlaybackError::Internal(format!("serialize downloads: {}", e));
        let mut entries = doc
            .records
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(serialize)?;
        entries.extend(doc.unreadable.iter().cloned());

        let json = serde_json::to_string(&entries).map_err(serialize)?;
        self.store.write(DOWNLOADS_KEY, &json).await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<DownloadRecord>> {
        Ok(self.load().await?.records)
    }

    pub async fn get(&self, video_id: &str) -> Result<Option<DownloadRecord>> {
        Ok(self.load().await?.records.into_iter().find(|r| r.id == video_id))
    }

    /// Insert a record. Returns `false` (and changes nothing) if the id exists.
    #[instrument(skip(self, record), fields(video_id = %record.id))]
    pub async fn add(&self, record: DownloadRecord) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        if doc.records.iter().any(|r| r.id == record.id) {
            return Ok(false);
        }
        doc.records.push(record);
        self.store_all(&doc).await?;
        Ok(true)
    }

    /// Remove a record. Returns the removed record, if any.
    #[instrument(skip(self))]
    pub async fn remove(&self, video_id: &str) -> Result<Option<DownloadRecord>> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        let Some(index) = doc.records.iter().position(|r| r.id == video_id) else {
            return Ok(None);
        };
        let removed = doc.records.remove(index);
        self.store_all(&doc).await?;
        Ok(Some(removed))
    }

    /// Commit `file` to the vault and record it.
    ///
    /// All or nothing: if the record cannot be written the committed vault
    /// file is deleted again. An existing record for the video is kept and
    /// only its vault file is refreshed.
    #[instrument(skip(self, asset, file, vault), fields(video_id = %asset.video_id))]
    pub async fn save_download(
        &self,
        asset: &MediaAsset,
        file: &LocalFile,
        vault: &ContentVault,
    ) -> Result<DownloadRecord> {
        let vault_path = vault.commit(&file.path, &asset.video_id).await?;

        let record = DownloadRecord {
            id: asset.video_id.clone(),
            course_id: asset.course_id.clone(),
            title: asset.title.clone(),
            local_uri: vault_path.to_string_lossy().into_owned(),
            thumbnail: asset.thumbnail.clone(),
            created_at: chrono::Utc::now().timestamp_millis(),
            size_bytes: file.size_bytes,
            content_hash: Some(file.sha256.clone()),
        };

        match self.upsert_hash(record.clone()).await {
            Ok(stored) => {
                info!(size = file.size_bytes, "Download saved");
                Ok(stored)
            }
            Err(e) => {
                warn!(error = %e, "Recording download failed, rolling back vault commit");
                if let Err(cleanup) = vault.remove(&vault_path).await {
                    warn!(error = %cleanup, "Vault rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Add `record`, or refresh the hash/size of an existing one (the vault
    /// file was just replaced).
    async fn upsert_hash(&self, record: DownloadRecord) -> Result<DownloadRecord> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        let stored = match doc.records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => {
                existing.size_bytes = record.size_bytes;
                existing.content_hash = record.content_hash.clone();
                existing.local_uri = record.local_uri.clone();
                existing.clone()
            }
            None => {
                doc.records.push(record.clone());
                record
            }
        };
        self.store_all(&doc).await?;
        Ok(stored)
    }

    /// Delete the record and its vault file. A missing file is tolerated.
    #[instrument(skip(self, vault))]
    pub async fn remove_download(&self, video_id: &str, vault: &ContentVault) -> Result<DownloadRecord> {
        let record = self
            .remove(video_id)
            .await?
            .ok_or_else(|| PlaybackError::NotDownloaded(video_id.to_string()))?;

        if !vault.remove(&record.vault_path()).await? {
            warn!("Vault file was already gone");
        }
        info!("Download removed");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultConfig;
    use async_trait::async_trait;
    use bridge_desktop::{SqliteKeyValueStore, TokioFileSystem};
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::storage::FileSystemAccess;
    use bytes::Bytes;

    fn record(id: &str) -> DownloadRecord {
        DownloadRecord {
            id: id.to_string(),
            course_id: "c1".to_string(),
            title: format!("Lesson {}", id),
            local_uri: format!("/vault/{}.dat", id),
            thumbnail: None,
            created_at: 1,
            size_bytes: 10,
            content_hash: None,
        }
    }

    async fn library() -> DownloadLibrary {
        DownloadLibrary::new(Arc::new(SqliteKeyValueStore::in_memory().await.unwrap()))
    }

    /// Store whose writes always fail.
    struct ReadOnlyStore;

    #[async_trait]
    impl KeyValueStore for ReadOnlyStore {
        async fn read(&self, _key: &str) -> BridgeResult<Option<String>> {
            Ok(None)
        }
        async fn write(&self, _key: &str, _value: &str) -> BridgeResult<()> {
            Err(BridgeError::StorageError("disk full".into()))
        }
        async fn remove(&self, _key: &str) -> BridgeResult<()> {
            Ok(())
        }
        async fn keys(&self) -> BridgeResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn vault() -> (ContentVault, Arc<TokioFileSystem>, PathBuf) {
        let root = std::env::temp_dir().join(format!("library-{}", uuid::Uuid::new_v4()));
        let fs = Arc::new(TokioFileSystem::with_directories(
            root.join("cache"),
            root.join("data"),
        ));
        (ContentVault::new(fs.clone(), VaultConfig::default()), fs, root)
    }

    async fn scratch_file(fs: &TokioFileSystem, root: &std::path::Path) -> LocalFile {
        let path = root.join("cache").join("downloads").join("video123.download");
        fs.write_file(&path, Bytes::from("movie")).await.unwrap();
        LocalFile {
            path,
            size_bytes: 5,
            sha256: crate::download::sha256_hex(b"movie"),
        }
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let library = library().await;

        assert!(library.add(record("v1")).await.unwrap());
        let mut changed = record("v1");
        changed.title = "Other".to_string();
        assert!(!library.add(changed).await.unwrap());

        let all = library.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Lesson v1");
    }

    #[tokio::test]
    async fn test_remove_and_get() {
        let library = library().await;
        library.add(record("v1")).await.unwrap();
        library.add(record("v2")).await.unwrap();

        assert_eq!(library.remove("v1").await.unwrap().unwrap().id, "v1");
        assert!(library.remove("v1").await.unwrap().is_none());
        assert!(library.get("v1").await.unwrap().is_none());
        assert!(library.get("v2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_persisted_shape() {
        let store = Arc::new(SqliteKeyValueStore::in_memory().await.unwrap());
        let library = DownloadLibrary::new(store.clone());
        library.add(record("v1")).await.unwrap();

        let raw = store.read(DOWNLOADS_KEY).await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json[0]["id"], "v1");
        assert_eq!(json[0]["courseId"], "c1");
        assert_eq!(json[0]["localUri"], "/vault/v1.dat");
        assert!(json[0].get("createdAt").is_some());
    }

    #[tokio::test]
    async fn test_unreadable_list_is_not_overwritten() {
        let store = Arc::new(SqliteKeyValueStore::in_memory().await.unwrap());
        store.write(DOWNLOADS_KEY, "{oops").await.unwrap();
        let library = DownloadLibrary::new(store.clone());

        assert!(matches!(library.list().await, Err(PlaybackError::Internal(_))));
        assert!(matches!(library.add(record("v1")).await, Err(PlaybackError::Internal(_))));
        assert_eq!(store.read(DOWNLOADS_KEY).await.unwrap().as_deref(), Some("{oops"));
    }

    #[tokio::test]
    async fn test_bad_entry_keeps_its_neighbours() {
        let store = Arc::new(SqliteKeyValueStore::in_memory().await.unwrap());
        let stored = serde_json::json!([
            { "id": "a", "courseId": "c1", "title": "A", "localUri": "/vault/a.dat", "createdAt": 1 },
            { "id": "b", "courseId": "c1", "title": "B", "localUri": "/vault/b.dat", "createdAt": 2 },
            { "id": "legacy", "courseId": "c1", "title": "Old", "localUri": "/vault/legacy.dat" },
            { "id": 7, "title": "broken" }
        ]);
        store.write(DOWNLOADS_KEY, &stored.to_string()).await.unwrap();
        let library = DownloadLibrary::new(store.clone());

        let ids: Vec<_> = library.list().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "b", "legacy"]);
        assert_eq!(library.get("legacy").await.unwrap().unwrap().created_at, 0);

        assert!(library.add(record("new")).await.unwrap());

        let raw = store.read(DOWNLOADS_KEY).await.unwrap().unwrap();
        let json: Vec<serde_json::Value> = serde_json::from_str(&raw).unwrap();
        let raw_ids: Vec<_> = json.iter().map(|e| e["id"].clone()).collect();
        assert_eq!(
            raw_ids,
            vec![
                serde_json::json!("a"),
                serde_json::json!("b"),
                serde_json::json!("legacy"),
                serde_json::json!("new"),
                serde_json::json!(7)
            ]
        );
    }

    #[tokio::test]
    async fn test_save_and_remove_download() {
        let library = library().await;
        let (vault, fs, root) = vault();
        let file = scratch_file(&fs, &root).await;
        let mut asset = MediaAsset::offline("c1", "video123", "Intro", None);
        asset.thumbnail = Some("https://cdn/t.jpg".to_string());

        let saved = library.save_download(&asset, &file, &vault).await.unwrap();
        assert_eq!(saved.size_bytes, 5);
        assert_eq!(saved.content_hash.as_deref(), Some(file.sha256.as_str()));
        assert!(fs.exists(&saved.vault_path()).await.unwrap());

        library.remove_download("video123", &vault).await.unwrap();
        assert!(library.get("video123").await.unwrap().is_none());
        assert!(!fs.exists(&saved.vault_path()).await.unwrap());

        let err = vault.materialize(&saved.vault_path()).await.unwrap_err();
        assert!(matches!(err, crate::error::VaultError::MissingAsset(_)));

        let err = library.remove_download("video123", &vault).await.unwrap_err();
        assert!(matches!(err, PlaybackError::NotDownloaded(_)));

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_failed_record_rolls_back_vault() {
        let library = DownloadLibrary::new(Arc::new(ReadOnlyStore));
        let (vault, fs, root) = vault();
        let file = scratch_file(&fs, &root).await;
        let asset = MediaAsset::offline("c1", "video123", "Intro", None);

        let err = library.save_download(&asset, &file, &vault).await.unwrap_err();
        assert!(matches!(err, PlaybackError::Bridge(_)));

        let vault_path = vault.vault_path_for("video123").await.unwrap();
        assert!(!fs.exists(&vault_path).await.unwrap());

        let _ = std::fs::remove_dir_all(root);
    }
}
