//! `tokio::fs` implementation of [`FileSystemAccess`].

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    storage::{FileMetadata, FileSystemAccess},
};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

const APP_DIR_NAME: &str = "lesson-player";

/// Desktop file access rooted in the platform cache and data directories.
///
/// On Linux that is `~/.cache/lesson-player` for scratch files (partial
/// downloads, playable copies) and `~/.local/share/lesson-player` for the
/// vault and translations.
pub struct TokioFileSystem {
    cache_dir: PathBuf,
    data_dir: PathBuf,
}

impl TokioFileSystem {
    pub fn new() -> Self {
        let cache_root = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        let data_root = dirs::data_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
            .unwrap_or_else(|| PathBuf::from("."));

        Self::with_directories(cache_root.join(APP_DIR_NAME), data_root.join(APP_DIR_NAME))
    }

    /// Explicit roots, for tests and portable installs.
    pub fn with_directories(cache_dir: PathBuf, data_dir: PathBuf) -> Self {
        Self { cache_dir, data_dir }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    async fn ensure_dir(dir: &Path) -> Result<PathBuf> {
        if !fs::try_exists(dir).await? {
            fs::create_dir_all(dir).await?;
            debug!(path = ?dir, "Created directory");
        }
        Ok(dir.to_path_buf())
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

impl Default for TokioFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

fn epoch_seconds(time: std::io::Result<SystemTime>) -> Option<i64> {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn scratch_directory(&self) -> Result<PathBuf> {
        Self::ensure_dir(&self.cache_dir).await
    }

    async fn data_directory(&self) -> Result<PathBuf> {
        Self::ensure_dir(&self.data_dir).await
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(fs::try_exists(path).await?)
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let meta = fs::metadata(path).await?;
        Ok(FileMetadata {
            size: meta.len(),
            modified_at: epoch_seconds(meta.modified()),
            is_directory: meta.is_dir(),
        })
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        Ok(fs::create_dir_all(path).await?)
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let data = fs::read(path).await?;
        trace!(path = ?path, size = data.len(), "Read file");
        Ok(Bytes::from(data))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        Self::ensure_parent(path).await?;
        fs::write(path, &data).await?;
        trace!(path = ?path, size = data.len(), "Wrote file");
        Ok(())
    }

    async fn append_file(&self, path: &Path, data: Bytes) -> Result<()> {
        Self::ensure_parent(path).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(&data).await?;
        // Resume offsets come from the file length.
        file.flush().await?;
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).await?;
        debug!(path = ?path, "Deleted file");
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        Self::ensure_parent(to).await?;
        fs::rename(from, to).await?;
        debug!(from = ?from, to = ?to, "Renamed file");
        Ok(())
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> Result<u64> {
        Self::ensure_parent(to).await?;
        let copied = fs::copy(from, to).await?;
        debug!(from = ?from, to = ?to, size = copied, "Copied file");
        Ok(copied)
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(path).await?;
        while let Some(entry) = dir.next_entry().await? {
            entries.push(entry.path());
        }
        Ok(entries)
    }

    async fn open_read_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
        Ok(Box::new(fs::File::open(path).await?))
    }
}
