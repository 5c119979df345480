//! # Lesson Playback Core
//!
//! Playback, offline storage and progress tracking for video lessons.
//!
//! ## Overview
//!
//! This crate handles:
//! - Rendition selection from bandwidth samples and battery-saver state
//! - Resumable downloads into an obscured on-device vault
//! - Engagement-time tracking with throttled persistence and resume
//! - Per-language lesson translations with an offline cache
//! - The per-video session tying these to a host player

pub mod asset;
pub mod config;
pub mod download;
pub mod error;
pub mod estimator;
pub mod library;
pub mod orchestrator;
pub mod power;
pub mod progress;
pub mod selector;
pub mod session;
pub mod signals;
pub mod translation;
pub mod vault;

pub use asset::{AssetClient, Attachment, Course, LessonSummary, MediaAsset, QualityMode, Rendition};
pub use config::PlayerConfig;
pub use download::{DownloadManager, DownloadProgress, LocalFile};
pub use error::{DownloadError, PlaybackError, Result, TranslationError, VaultError};
pub use estimator::{BandwidthEstimate, NetworkQualityEstimator, ProbeDemand};
pub use library::{DownloadLibrary, DownloadRecord};
pub use orchestrator::{
    DownloadStart, PlaybackContext, PlaybackOrchestrator, PlayerCommand, PlayerCommands, PlayerEvent,
};
pub use power::{BatteryState, PowerPolicy};
pub use progress::{PersistedProgress, PlaybackStatus, ProgressStore, ProgressTracker};
pub use selector::{select, SelectedSource};
pub use session::{PlaybackSession, SessionState};
pub use signals::{SignalHub, SignalLease};
pub use translation::{Translation, TranslationCache, TranslationService};
pub use vault::{ContentVault, TempPlayable};
