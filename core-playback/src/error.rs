//! # Playback Error Types
//!
//! Error taxonomy for adaptive delivery, offline vault and progress
//! tracking. Each subsystem has its own enum; [`PlaybackError`] is the
//! umbrella the orchestrator surfaces to hosts.

use bridge_traits::BridgeError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from [`DownloadManager`](crate::download::DownloadManager).
#[derive(Error, Debug)]
pub enum DownloadError {
    /// The server answered with a non-success status.
    #[error("Server rejected download with HTTP {status}")]
    RemoteRejected { status: u16 },

    /// Connection dropped, timed out, or the body stream failed.
    #[error("Download transport failed: {0}")]
    TransportFailure(String),

    /// A download for the same destination is already running.
    #[error("Download already in progress: {0}")]
    AlreadyInProgress(String),

    #[error("Download cancelled")]
    Cancelled,

    /// Scratch file could not be written.
    #[error("Download storage error: {0}")]
    Storage(String),
}

impl DownloadError {
    /// Returns `true` if retrying (and resuming) may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DownloadError::TransportFailure(_) => true,
            DownloadError::RemoteRejected { status } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Errors from [`ContentVault`](crate::vault::ContentVault).
#[derive(Error, Debug)]
pub enum VaultError {
    /// The vault file is absent (never committed, or removed).
    #[error("Vault file missing: {0}")]
    MissingAsset(PathBuf),

    #[error("Vault file integrity mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("Vault I/O error: {0}")]
    Io(String),
}

/// Errors from the translation cache and service.
#[derive(Error, Debug)]
pub enum TranslationError {
    /// Offline and the requested language was never cached.
    #[error("Translation for {video_id} ({language}) is not available offline")]
    NotCachedOffline { video_id: String, language: String },

    /// The asset has no translation URL for this language.
    #[error("No translation available for language: {0}")]
    LanguageUnavailable(String),

    #[error("Translation fetch failed: {0}")]
    FetchFailed(String),

    /// The remote file was empty.
    #[error("Translation file is empty")]
    EmptyText,

    #[error("Translation storage error: {0}")]
    Storage(String),
}

/// Errors surfaced by the playback orchestrator.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Subsystem Errors
    // ========================================================================
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Translation(#[from] TranslationError),

    // ========================================================================
    // Ancillary Errors (never interrupt playback)
    // ========================================================================
    /// Bandwidth probe failed; the previous estimate is kept.
    #[error("Network probe failed: {0}")]
    NetworkProbe(String),

    /// Progress could not be written; retried on the next throttled tick.
    #[error("Progress persistence failed: {0}")]
    ProgressPersistence(String),

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// Manual quality changes are disabled while battery saver is on.
    #[error("Quality is locked while battery saver is on")]
    QualityLocked,

    /// The asset metadata could not be fetched or decoded.
    #[error("Asset unavailable: {0}")]
    AssetUnavailable(String),

    /// Nothing to do for this video (e.g. removing a download that does not exist).
    #[error("Video not downloaded: {0}")]
    NotDownloaded(String),

    #[error("Playback session closed")]
    SessionClosed,

    #[error("Feature disabled: {0}")]
    FeatureDisabled(&'static str),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            PlaybackError::Download(e) => e.is_transient(),
            PlaybackError::NetworkProbe(_)
            | PlaybackError::ProgressPersistence(_)
            | PlaybackError::AssetUnavailable(_) => true,
            PlaybackError::Translation(TranslationError::FetchFailed(_)) => true,
            _ => false,
        }
    }

    /// Returns `true` if the host should show this error to the learner.
    ///
    /// Probe and persistence failures are logged only.
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            PlaybackError::NetworkProbe(_)
                | PlaybackError::ProgressPersistence(_)
                | PlaybackError::Internal(_)
        )
    }

    /// A single explicit message suitable for a toast or alert.
    pub fn user_message(&self) -> String {
        match self {
            PlaybackError::Download(DownloadError::RemoteRejected { .. }) => {
                "The video could not be downloaded. Please try again later.".to_string()
            }
            PlaybackError::Download(DownloadError::TransportFailure(_)) => {
                "The download was interrupted. Check your connection and try again.".to_string()
            }
            PlaybackError::Download(DownloadError::AlreadyInProgress(_)) => {
                "This video is already downloading.".to_string()
            }
            PlaybackError::Download(DownloadError::Cancelled) => {
                "The download was cancelled.".to_string()
            }
            PlaybackError::Download(DownloadError::Storage(_)) => {
                "There is not enough space to save this video.".to_string()
            }
            PlaybackError::Vault(VaultError::MissingAsset(_)) => {
                "This downloaded video is no longer available. Please download it again."
                    .to_string()
            }
            PlaybackError::Vault(VaultError::IntegrityMismatch { .. }) => {
                "This downloaded video is damaged. Please download it again.".to_string()
            }
            PlaybackError::Vault(VaultError::Io(_)) => {
                "The downloaded video could not be opened.".to_string()
            }
            PlaybackError::Translation(TranslationError::NotCachedOffline { .. }) => {
                "This translation is not available offline.".to_string()
            }
            PlaybackError::Translation(TranslationError::LanguageUnavailable(_)) => {
                "Translation file not found for this language.".to_string()
            }
            PlaybackError::Translation(TranslationError::EmptyText) => {
                "The translation for this language is empty.".to_string()
            }
            PlaybackError::Translation(_) => "The translation could not be loaded.".to_string(),
            PlaybackError::QualityLocked => {
                "Quality is locked to 240p while battery saver is on.".to_string()
            }
            PlaybackError::AssetUnavailable(_) => {
                "This video could not be loaded. Please try again.".to_string()
            }
            PlaybackError::NotDownloaded(_) => "This video is not downloaded.".to_string(),
            PlaybackError::FeatureDisabled(feature) => {
                format!("{} is not available in this app.", feature)
            }
            PlaybackError::SessionClosed => "This video has been closed.".to_string(),
            PlaybackError::NetworkProbe(_)
            | PlaybackError::ProgressPersistence(_)
            | PlaybackError::Config(_)
            | PlaybackError::Bridge(_)
            | PlaybackError::Internal(_) => "Something went wrong.".to_string(),
        }
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
