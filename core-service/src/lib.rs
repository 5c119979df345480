//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, filesystem,
//! key-value store, network and power monitors) into the lesson player core
//! and hands out playback sessions. Desktop apps typically enable the
//! `desktop-shims` feature (which depends on `bridge-desktop`) and call
//! [`bootstrap_desktop`].

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use core_playback::asset::{AssetClient, Course, LessonSummary};
use core_playback::config::PlayerConfig;
use core_playback::download::DownloadManager;
use core_playback::estimator::NetworkQualityEstimator;
use core_playback::library::{DownloadLibrary, DownloadRecord};
use core_playback::orchestrator::{PlaybackContext, PlaybackOrchestrator, PlayerCommands};
use core_playback::progress::{PersistedProgress, ProgressStore};
use core_playback::signals::SignalHub;
use core_playback::translation::{TranslationCache, TranslationService};
use core_playback::vault::ContentVault;
use core_playback::PlaybackError;
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus, Receiver};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    ctx: PlaybackContext,
}

impl CoreService {
    /// Validate both configurations and build the shared components.
    ///
    /// Temporary playable copies left behind by a previous run are removed.
    pub async fn new(config: CoreConfig, player: PlayerConfig) -> Result<Self> {
        config.validate()?;
        player.validate().map_err(CoreError::InitializationFailed)?;

        let http = config
            .http_client
            .clone()
            .ok_or_else(|| CoreError::CapabilityMissing {
                capability: "HttpClient".to_string(),
                message: "The lesson API and downloads need an HttpClient.".to_string(),
            })?;
        let fs = config
            .file_system
            .clone()
            .ok_or_else(|| CoreError::CapabilityMissing {
                capability: "FileSystemAccess".to_string(),
                message: "The vault and translation cache need a FileSystemAccess.".to_string(),
            })?;

        let events = EventBus::default();
        let base_url = player
            .api
            .base_url
            .clone()
            .unwrap_or_else(|| config.api_base_url.clone());

        let vault = Arc::new(ContentVault::new(fs.clone(), player.vault.clone()));
        match vault.sweep_playback_dir().await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Removed stale playback copies"),
            Err(e) => warn!(error = %e, "Could not sweep playback copies"),
        }

        let ctx = PlaybackContext {
            features: config.features,
            events: events.clone(),
            signals: SignalHub::new(
                config.network_monitor.clone(),
                config.power_monitor.clone(),
                events.clone(),
            ),
            estimator: Arc::new(NetworkQualityEstimator::new(
                http.clone(),
                player.probe.clone(),
                events.clone(),
            )),
            downloads: Arc::new(DownloadManager::new(
                http.clone(),
                fs.clone(),
                player.download.clone(),
            )),
            vault,
            library: Arc::new(DownloadLibrary::new(config.kv_store.clone())),
            progress: Arc::new(ProgressStore::new(config.kv_store.clone())),
            translations: Arc::new(TranslationService::new(
                http.clone(),
                TranslationCache::new(fs, &player.translation),
            )),
            assets: Some(Arc::new(AssetClient::new(http, base_url))),
            config: Arc::new(player),
        };

        info!(features = ?ctx.features, "Core service ready");
        Ok(Self { ctx })
    }

    /// Components shared by every session.
    pub fn context(&self) -> &PlaybackContext {
        &self.ctx
    }

    pub fn events(&self) -> EventBus {
        self.ctx.events.clone()
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.ctx.events.subscribe()
    }

    /// Open a lesson. The returned receiver carries commands for the host player.
    #[instrument(skip(self))]
    pub async fn open_session(
        &self,
        course_id: &str,
        video_id: &str,
    ) -> Result<(PlaybackOrchestrator, PlayerCommands)> {
        Ok(PlaybackOrchestrator::open(self.ctx.clone(), course_id, video_id).await?)
    }

    /// Downloaded lessons, oldest first.
    pub async fn downloads(&self) -> Result<Vec<DownloadRecord>> {
        Ok(self.ctx.library.list().await?)
    }

    /// Delete a downloaded lesson from the downloads screen.
    pub async fn remove_download(&self, video_id: &str) -> Result<DownloadRecord> {
        let record = self
            .ctx
            .library
            .remove_download(video_id, &self.ctx.vault)
            .await?;
        self.ctx
            .events
            .emit(CoreEvent::Download(DownloadEvent::Removed {
                video_id: video_id.to_string(),
            }))
            .ok();
        Ok(record)
    }

    pub async fn progress(&self, video_id: &str) -> Result<Option<PersistedProgress>> {
        Ok(self.ctx.progress.get(video_id).await?)
    }

    pub async fn all_progress(&self) -> Result<BTreeMap<String, PersistedProgress>> {
        Ok(self.ctx.progress.all().await?)
    }

    pub async fn course(&self, course_id: &str) -> Result<Course> {
        Ok(self.asset_client()?.fetch_course(course_id).await?)
    }

    pub async fn lessons(&self, course_id: &str) -> Result<Vec<LessonSummary>> {
        Ok(self.asset_client()?.fetch_lessons(course_id).await?)
    }

    /// Bytes held in the vault.
    pub async fn vault_usage_bytes(&self) -> Result<u64> {
        self.ctx
            .vault
            .usage_bytes()
            .await
            .map_err(|e| CoreError::Playback(e.into()))
    }

    /// Stop background probing. Open sessions keep their state.
    pub fn shutdown(&self) {
        self.ctx.estimator.stop();
    }

    fn asset_client(&self) -> Result<&AssetClient> {
        self.ctx
            .assets
            .as_deref()
            .ok_or_else(|| PlaybackError::FeatureDisabled("asset_api").into())
    }
}

/// Build a [`CoreService`] backed by the desktop bridges.
///
/// State lives in the platform cache and data directories; the key-value
/// database is `lesson-player.db` in the data directory.
///
/// ```no_run
/// # async fn example() -> core_service::Result<()> {
/// let core = core_service::bootstrap_desktop("https://lessons.example.com/api").await?;
/// let (session, commands) = core.open_session("course-1", "video-1").await?;
/// # Ok(())
/// # }
/// ```
#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
pub async fn bootstrap_desktop(base_url: &str) -> Result<CoreService> {
    use bridge_desktop::TokioFileSystem;

    let fs = TokioFileSystem::new();
    let cache_dir = fs.cache_dir().to_path_buf();
    let data_dir = fs.data_dir().to_path_buf();

    let config = CoreConfig::builder()
        .api_base_url(base_url)
        .database_path(data_dir.join("lesson-player.db"))
        .cache_dir(cache_dir)
        .data_dir(data_dir)
        .file_system(Arc::new(fs))
        .build_desktop()
        .await?;

    CoreService::new(config, PlayerConfig::default()).await
}
