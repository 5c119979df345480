//! File system and key-value persistence.
//!
//! The player writes into two app-scoped roots:
//!
//! | Root | Contents | May the OS purge it? |
//! |------|----------|----------------------|
//! | scratch | partial downloads, temporary playable copies | yes |
//! | data | vault files, cached translations | no |
//!
//! Small JSON documents (download records, playback progress) go through
//! [`KeyValueStore`] instead of files.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    pub size: u64,
    /// Seconds since the Unix epoch, when the platform reports it.
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

/// App-scoped file access.
///
/// Writes create missing parent directories. Errors for absent paths must
/// satisfy [`BridgeError::is_not_found`](crate::error::BridgeError::is_not_found);
/// the default helpers below rely on it.
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Root for data the OS may reclaim under storage pressure.
    async fn scratch_directory(&self) -> Result<PathBuf>;

    /// Root for data that must survive restarts and storage pressure.
    async fn data_directory(&self) -> Result<PathBuf>;

    async fn exists(&self, path: &Path) -> Result<bool>;

    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Create or truncate `path`.
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Append to `path`, creating it when absent. Used for resumable downloads.
    async fn append_file(&self, path: &Path, data: Bytes) -> Result<()>;

    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Move a file, replacing any file at `to`.
    ///
    /// May fail across volumes; callers fall back to copy and delete.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Copy a file, replacing any file at `to`. Returns the bytes copied.
    async fn copy_file(&self, from: &Path, to: &Path) -> Result<u64>;

    /// Immediate children of `path`.
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Streaming read, for hashing files too large to buffer.
    async fn open_read_stream(&self, path: &Path) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>>;

    /// Size of a file, `None` when it does not exist.
    async fn file_len(&self, path: &Path) -> Result<Option<u64>> {
        match self.metadata(path).await {
            Ok(meta) => Ok(Some(meta.size)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete a file. Returns `false` when it was already gone.
    async fn remove_file_if_exists(&self, path: &Path) -> Result<bool> {
        match self.delete_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Total size of the files under `path`, recursively.
    async fn directory_size(&self, path: &Path) -> Result<u64> {
        let mut total = 0;
        for entry in self.list_directory(path).await? {
            let meta = self.metadata(&entry).await?;
            total += if meta.is_directory {
                self.directory_size(&entry).await?
            } else {
                meta.size
            };
        }
        Ok(total)
    }
}

/// Durable string store keyed by document name.
///
/// Values are whole JSON documents; writers replace them wholesale. Hosts
/// back this with UserDefaults, DataStore, or a SQLite table on desktop.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// `None` when nothing was written under `key`.
    async fn read(&self, key: &str) -> Result<Option<String>>;

    async fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Removing an absent key succeeds.
    async fn remove(&self, key: &str) -> Result<()>;

    async fn keys(&self) -> Result<Vec<String>>;

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.read(key).await?.is_some())
    }
}
