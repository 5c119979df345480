//! # Content Vault
//!
//! Durable storage for downloaded lessons.
//!
//! Committed files live in `<data>/<vault_dir>/<name>.<obscured_ext>`. The
//! non-playable extension and private directory keep casual file browsers
//! and media scanners away; this is obscurity, not encryption. Swapping in
//! an encrypting store must keep the `commit`/`materialize` contract.
//!
//! Playback never reads the vault file directly: [`ContentVault::materialize`]
//! copies it to `<cache>/<playback_dir>/` with a playable extension and hands
//! back a [`TempPlayable`] that owns the copy.

use crate::config::VaultConfig;
use crate::error::VaultError;
use bridge_traits::storage::FileSystemAccess;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument, warn};

type Result<T> = std::result::Result<T, VaultError>;

/// Filesystem-safe file stem.
///
/// Names made of lowercase ASCII alphanumerics and `_` pass through
/// unchanged. Any other name is reduced to that alphabet (everything else
/// becomes `_`) and suffixed with `-` and the first 8 hex digits of its
/// SHA-256, so distinct names such as `Video-1` and `video_1` get distinct
/// stems.
pub fn sanitize_name(name: &str) -> String {
    let readable: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if !readable.is_empty() && readable == name {
        return readable;
    }
    let digest = Sha256::digest(name.as_bytes());
    format!("{}-{:08x}", readable, u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]))
}

/// File name only, for logs.
pub(crate) fn display_path(path: &Path) -> String {
    core_runtime::logging::strip_path(&path.to_string_lossy()).to_string()
}

fn io_error(e: impl std::fmt::Display) -> VaultError {
    VaultError::Io(e.to_string())
}

pub struct ContentVault {
    fs: Arc<dyn FileSystemAccess>,
    config: VaultConfig,
}

impl ContentVault {
    pub fn new(fs: Arc<dyn FileSystemAccess>, config: VaultConfig) -> Self {
        Self { fs, config }
    }

    /// Vault directory, created on demand.
    pub async fn vault_dir(&self) -> Result<PathBuf> {
        let dir = self
            .fs
            .data_directory()
            .await
            .map_err(io_error)?
            .join(&self.config.vault_dir);
        self.fs.create_dir_all(&dir).await.map_err(io_error)?;
        Ok(dir)
    }

    async fn playback_dir(&self) -> Result<PathBuf> {
        let dir = self
            .fs
            .scratch_directory()
            .await
            .map_err(io_error)?
            .join(&self.config.playback_dir);
        self.fs.create_dir_all(&dir).await.map_err(io_error)?;
        Ok(dir)
    }

    /// Where `logical_name` is (or would be) stored.
    pub async fn vault_path_for(&self, logical_name: &str) -> Result<PathBuf> {
        Ok(self.vault_dir().await?.join(format!(
            "{}.{}",
            sanitize_name(logical_name),
            self.config.obscured_extension
        )))
    }

    /// Move `scratch_file` into the vault as `logical_name`.
    ///
    /// Committing the same name again replaces the previous file.
    #[instrument(skip(self, scratch_file), fields(scratch = %display_path(scratch_file)))]
    pub async fn commit(&self, scratch_file: &Path, logical_name: &str) -> Result<PathBuf> {
        if !self.fs.exists(scratch_file).await.map_err(io_error)? {
            return Err(VaultError::MissingAsset(scratch_file.to_path_buf()));
        }

        let target = self.vault_path_for(logical_name).await?;

        // Rename fails across volumes (cache and data may differ); fall back to copy.
        if let Err(e) = self.fs.rename(scratch_file, &target).await {
            debug!(error = %e, "Rename into vault failed, copying instead");
            self.fs
                .copy_file(scratch_file, &target)
                .await
                .map_err(io_error)?;
            if let Err(e) = self.fs.delete_file(scratch_file).await {
                warn!(error = %e, "Could not remove scratch file after copy");
            }
        }

        info!(name = %logical_name, "Committed to vault");
        Ok(target)
    }

    /// Copy a vault file to a temporary playable path.
    ///
    /// # Errors
    ///
    /// [`VaultError::MissingAsset`] if the vault file does not exist.
    #[instrument(skip(self, vault_path), fields(vault_file = %display_path(vault_path)))]
    pub async fn materialize(&self, vault_path: &Path) -> Result<TempPlayable> {
        if !self.fs.exists(vault_path).await.map_err(io_error)? {
            warn!("Vault file missing");
            return Err(VaultError::MissingAsset(vault_path.to_path_buf()));
        }

        let stem = vault_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "lesson".to_string());
        let temp = self.playback_dir().await?.join(format!(
            "{}-{}.{}",
            stem,
            uuid::Uuid::new_v4().simple(),
            self.config.playable_extension
        ));

        match self.fs.copy_file(vault_path, &temp).await {
            Ok(size) => {
                debug!(size, "Materialized playable copy");
                Ok(TempPlayable::new(temp, Arc::clone(&self.fs)))
            }
            // Removed between the check and the copy.
            Err(e) if e.is_not_found() => Err(VaultError::MissingAsset(vault_path.to_path_buf())),
            Err(e) => Err(io_error(e)),
        }
    }

    /// [`materialize`](Self::materialize) and check the copy's SHA-256.
    pub async fn materialize_verified(
        &self,
        vault_path: &Path,
        expected_sha256: &str,
    ) -> Result<TempPlayable> {
        let temp = self.materialize(vault_path).await?;
        let actual = self.hash(temp.path()).await?;

        if !actual.eq_ignore_ascii_case(expected_sha256) {
            warn!(expected = %expected_sha256, actual = %actual, "Vault file failed verification");
            temp.release().await.ok();
            return Err(VaultError::IntegrityMismatch {
                expected: expected_sha256.to_string(),
                actual,
            });
        }
        Ok(temp)
    }

    /// Delete a vault file. Returns `false` if it was already gone.
    #[instrument(skip(self, vault_path), fields(vault_file = %display_path(vault_path)))]
    pub async fn remove(&self, vault_path: &Path) -> Result<bool> {
        let removed = self
            .fs
            .remove_file_if_exists(vault_path)
            .await
            .map_err(io_error)?;
        if removed {
            info!("Removed vault file");
        }
        Ok(removed)
    }

    /// Bytes used by committed files.
    pub async fn usage_bytes(&self) -> Result<u64> {
        let dir = self.vault_dir().await?;
        self.fs.directory_size(&dir).await.map_err(io_error)
    }

    /// Delete temporary playable copies left behind by a crash.
    ///
    /// Only call when no session is open.
    pub async fn sweep_playback_dir(&self) -> Result<usize> {
        let dir = self.playback_dir().await?;
        let mut removed = 0;
        for entry in self.fs.list_directory(&dir).await.map_err(io_error)? {
            if self.fs.delete_file(&entry).await.is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Swept stale playback copies");
        }
        Ok(removed)
    }

    async fn hash(&self, path: &Path) -> Result<String> {
        let mut reader = self.fs.open_read_stream(path).await.map_err(io_error)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let read = reader.read(&mut buf).await.map_err(io_error)?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// A temporary playable copy of a vault file.
///
/// Call [`release`](Self::release) when playback ends. If the handle is
/// dropped without release, a best-effort synchronous delete runs instead.
pub struct TempPlayable {
    path: PathBuf,
    fs: Arc<dyn FileSystemAccess>,
    armed: bool,
}

impl TempPlayable {
    fn new(path: PathBuf, fs: Arc<dyn FileSystemAccess>) -> Self {
        Self {
            path,
            fs,
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the copy. A missing file is not an error.
    pub async fn release(mut self) -> Result<()> {
        self.armed = false;
        if self
            .fs
            .remove_file_if_exists(&self.path)
            .await
            .map_err(io_error)?
        {
            debug!("Released playable copy");
        }
        Ok(())
    }

    /// Hand the file over to the caller, who becomes responsible for it.
    pub fn into_path(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for TempPlayable {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl std::fmt::Debug for TempPlayable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempPlayable")
            .field("path", &self.path)
            .field("armed", &self.armed)
            .finish()
    }
}
