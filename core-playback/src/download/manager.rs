//! Resumable download manager

use super::progress::DownloadProgress;
use crate::config::DownloadConfig;
use crate::error::DownloadError;
use crate::vault::sanitize_name;
use bridge_traits::http::{HttpClient, HttpRequest};
use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use core_runtime::logging::redact_url;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

type Result<T> = std::result::Result<T, DownloadError>;

/// Bytes buffered before each append to the scratch file.
const WRITE_CHUNK_BYTES: usize = 256 * 1024;

/// A completed download sitting in the scratch area (not yet in the vault).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the file contents
    pub sha256: String,
}

/// Resumable, single-flight HTTP downloader.
///
/// Bytes are staged in `<cache>/<scratch_dir>/<name>.part`. An interrupted
/// transfer leaves the partial file in place; the next call for the same
/// destination asks the server for the remaining range.
pub struct DownloadManager {
    http: Arc<dyn HttpClient>,
    fs: Arc<dyn FileSystemAccess>,
    config: DownloadConfig,
    active: Mutex<HashMap<String, CancellationToken>>,
}

/// Removes the single-flight entry when the download ends.
struct ActiveGuard<'a> {
    active: &'a Mutex<HashMap<String, CancellationToken>>,
    key: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.lock().remove(&self.key);
    }
}

impl DownloadManager {
    pub fn new(
        http: Arc<dyn HttpClient>,
        fs: Arc<dyn FileSystemAccess>,
        config: DownloadConfig,
    ) -> Self {
        Self {
            http,
            fs,
            config,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` while a download for `destination` is running.
    pub fn is_active(&self, destination: &str) -> bool {
        self.active.lock().contains_key(destination)
    }

    /// Destinations currently downloading.
    pub fn active_downloads(&self) -> Vec<String> {
        let mut names: Vec<String> = self.active.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Abort an in-flight download. The partial file is kept for resumption.
    ///
    /// Returns `false` if nothing was running.
    pub fn cancel(&self, destination: &str) -> bool {
        match self.active.lock().get(destination) {
            Some(token) => {
                token.cancel();
                info!(destination, "Download cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Path of the partial file for `destination`.
    pub async fn partial_path(&self, destination: &str) -> Result<PathBuf> {
        Ok(self.scratch_dir().await?.join(format!("{}.part", sanitize_name(destination))))
    }

    /// Delete any partial file for `destination`.
    pub async fn discard_partial(&self, destination: &str) -> Result<()> {
        let part = self.partial_path(destination).await?;
        self.fs
            .remove_file_if_exists(&part)
            .await
            .map(|_| ())
            .map_err(|e| DownloadError::Storage(e.to_string()))
    }

    /// Download `url` into the scratch area.
    ///
    /// Progress snapshots are published on `progress`. Transport failures
    /// are retried with exponential backoff, each retry resuming from the
    /// bytes already on disk. A non-success status fails immediately with
    /// [`DownloadError::RemoteRejected`].
    ///
    /// # Errors
    ///
    /// - [`DownloadError::AlreadyInProgress`] if `destination_name` is downloading
    /// - [`DownloadError::Cancelled`] after [`cancel`](Self::cancel)
    #[instrument(skip(self, url, progress), fields(url = %redact_url(url)))]
    pub async fn start_resumable_download(
        &self,
        url: &str,
        destination_name: &str,
        progress: watch::Sender<DownloadProgress>,
    ) -> Result<LocalFile> {
        let token = CancellationToken::new();
        let _guard = {
            let mut active = self.active.lock();
            if active.contains_key(destination_name) {
                warn!("Download already in progress");
                return Err(DownloadError::AlreadyInProgress(destination_name.to_string()));
            }
            active.insert(destination_name.to_string(), token.clone());
            ActiveGuard {
                active: &self.active,
                key: destination_name.to_string(),
            }
        };

        let part = self.partial_path(destination_name).await?;
        let retry = self.config.retry_policy();
        let mut last_error = None;

        for attempt in 1..=retry.max_attempts {
            debug!(attempt, max = retry.max_attempts, "Download attempt");

            let outcome = tokio::select! {
                _ = token.cancelled() => Err(DownloadError::Cancelled),
                result = self.transfer(url, &part, &progress) => result,
            };

            match outcome {
                Ok(size) => {
                    let file = self.finish(&part, size).await?;
                    progress.send_modify(|p| p.complete(size));
                    info!(size, sha256 = %file.sha256, "Download completed");
                    return Ok(file);
                }
                Err(e) if e.is_transient() && attempt < retry.max_attempts => {
                    warn!(attempt, error = %e, "Download attempt failed, will resume");
                    last_error = Some(e);

                    let delay = retry.delay_for(attempt);
                    tokio::select! {
                        _ = token.cancelled() => return Err(DownloadError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Download failed");
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            DownloadError::TransportFailure("download failed after all retries".to_string())
        }))
    }

    async fn scratch_dir(&self) -> Result<PathBuf> {
        let cache = self
            .fs
            .scratch_directory()
            .await
            .map_err(|e| DownloadError::Storage(e.to_string()))?;
        Ok(cache.join(&self.config.scratch_dir))
    }

    async fn existing_len(&self, part: &Path) -> Result<u64> {
        self.fs
            .file_len(part)
            .await
            .map(Option::unwrap_or_default)
            .map_err(|e| DownloadError::Storage(e.to_string()))
    }

    /// One transfer attempt. Returns the final size of the partial file.
    async fn transfer(
        &self,
        url: &str,
        part: &Path,
        progress: &watch::Sender<DownloadProgress>,
    ) -> Result<u64> {
        let offset = self.existing_len(part).await?;
        let request = HttpRequest::get(url).range_from(offset);

        let mut response = timeout(self.config.stall_timeout, self.http.open_download(request))
            .await
            .map_err(|_| self.stalled("response headers"))?
            .map_err(|e| DownloadError::TransportFailure(e.to_string()))?;

        if offset > 0 && response.is_range_not_satisfiable() {
            debug!(offset, "Partial file already complete");
            return Ok(offset);
        }

        if !response.is_success() {
            return Err(DownloadError::RemoteRejected {
                status: response.status,
            });
        }

        // A plain 200 means the server ignored the range: start over.
        let mut written = if response.is_partial() {
            debug!(offset, "Resuming download");
            offset
        } else {
            self.fs
                .write_file(part, Bytes::new())
                .await
                .map_err(|e| DownloadError::Storage(e.to_string()))?;
            0
        };

        let total = response
            .resource_length()
            .or_else(|| response.content_length.map(|len| len + written));
        progress.send_modify(|p| p.begin(written, total));

        let mut buf = vec![0u8; 64 * 1024];
        let mut pending: Vec<u8> = Vec::with_capacity(WRITE_CHUNK_BYTES);
        let mut last_percent = progress.borrow().progress_percent;

        loop {
            // Bytes already received are flushed first so a retry resumes after them.
            let read = match timeout(self.config.stall_timeout, response.body.read(&mut buf)).await {
                Ok(Ok(read)) => read,
                Ok(Err(e)) => {
                    self.flush_pending(part, &mut pending).await?;
                    return Err(DownloadError::TransportFailure(e.to_string()));
                }
                Err(_) => {
                    self.flush_pending(part, &mut pending).await?;
                    return Err(self.stalled("body bytes"));
                }
            };
            let done = read == 0;
            pending.extend_from_slice(&buf[..read]);

            if pending.len() >= WRITE_CHUNK_BYTES || (done && !pending.is_empty()) {
                let chunk = Bytes::from(std::mem::take(&mut pending));
                let len = chunk.len() as u64;
                self.fs
                    .append_file(part, chunk)
                    .await
                    .map_err(|e| DownloadError::Storage(e.to_string()))?;
                written += len;

                progress.send_if_modified(|p| {
                    p.update(written);
                    let step = p.progress_percent.saturating_sub(last_percent);
                    if p.total_bytes.is_none() || step >= self.config.progress_step_percent {
                        last_percent = p.progress_percent;
                        true
                    } else {
                        false
                    }
                });
            }

            if done {
                break;
            }
        }

        if let Some(total) = total {
            if written < total {
                return Err(DownloadError::TransportFailure(format!(
                    "connection closed after {} of {} bytes",
                    written, total
                )));
            }
        }

        Ok(written)
    }

    fn stalled(&self, waiting_for: &str) -> DownloadError {
        DownloadError::TransportFailure(format!(
            "no {} for {}s",
            waiting_for,
            self.config.stall_timeout.as_secs()
        ))
    }

    async fn flush_pending(&self, part: &Path, pending: &mut Vec<u8>) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        self.fs
            .append_file(part, Bytes::from(std::mem::take(pending)))
            .await
            .map_err(|e| DownloadError::Storage(e.to_string()))
    }

    /// Move the finished `.part` file to its final scratch name and hash it.
    async fn finish(&self, part: &Path, size: u64) -> Result<LocalFile> {
        let done = part.with_extension("download");
        self.fs
            .rename(part, &done)
            .await
            .map_err(|e| DownloadError::Storage(e.to_string()))?;

        let sha256 = self.hash_file(&done).await?;
        Ok(LocalFile {
            path: done,
            size_bytes: size,
            sha256,
        })
    }

    async fn hash_file(&self, path: &Path) -> Result<String> {
        let mut reader = self
            .fs
            .open_read_stream(path)
            .await
            .map_err(|e| DownloadError::Storage(e.to_string()))?;

        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let read = reader
                .read(&mut buf)
                .await
                .map_err(|e| DownloadError::Storage(e.to_string()))?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
