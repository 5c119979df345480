//! # Playback Orchestrator
//!
//! Owns one open video. The host player talks to it through two unbounded
//! channels: [`PlayerEvent`]s in, [`PlayerCommand`]s out. A session task
//! folds player events, bandwidth samples, battery changes and the idle
//! timer into the progress tracker and the session state; it never blocks
//! the player.
//!
//! ```text
//!  host player ──PlayerEvent──> ┌──────────────┐ ──PlayerCommand──> host player
//!                               │ session task │
//!  estimator ──watch──────────> │  tracker     │ ──CoreEvent──────> EventBus
//!  power policy ──watch───────> │  session     │
//!  signal hub ──watch─────────> └──────────────┘
//! ```

use crate::asset::{AssetClient, MediaAsset, QualityMode};
use crate::config::PlayerConfig;
use crate::download::{DownloadManager, DownloadProgress};
use crate::error::{PlaybackError, Result};
use crate::estimator::{BandwidthEstimate, NetworkQualityEstimator, ProbeDemand};
use crate::library::{DownloadLibrary, DownloadRecord};
use crate::power::PowerPolicy;
use crate::progress::{PersistedProgress, PlaybackStatus, ProgressStore, ProgressTracker};
use crate::selector::{select, SelectedSource};
use crate::session::{ActivityOutcome, PlaybackSession, SessionState};
use crate::signals::{SignalHub, SignalLease};
use crate::translation::{Translation, TranslationService};
use crate::vault::{display_path, ContentVault, TempPlayable};
use core_runtime::config::FeatureFlags;
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus, LessonEvents, PlaybackEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Reported by the host player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// The last `Load` finished and the player can seek.
    Ready,
    Status(PlaybackStatus),
    Error(String),
}

/// Issued to the host player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerCommand {
    Load { uri: String },
    Seek { position_ms: u64 },
    Play,
    Pause,
}

/// Receiving end of the command channel, handed to the host player.
pub type PlayerCommands = mpsc::UnboundedReceiver<PlayerCommand>;

/// Result of [`PlaybackOrchestrator::start_download`].
#[derive(Debug)]
pub enum DownloadStart {
    AlreadyDownloaded(DownloadRecord),
    Started(watch::Receiver<DownloadProgress>),
}

/// Shared components every session draws on.
#[derive(Clone)]
pub struct PlaybackContext {
    pub config: Arc<PlayerConfig>,
    pub features: FeatureFlags,
    pub events: EventBus,
    pub signals: SignalHub,
    pub estimator: Arc<NetworkQualityEstimator>,
    pub downloads: Arc<DownloadManager>,
    pub vault: Arc<ContentVault>,
    pub library: Arc<DownloadLibrary>,
    pub progress: Arc<ProgressStore>,
    pub translations: Arc<TranslationService>,
    /// `None` when no API is configured; only downloaded lessons open.
    pub assets: Option<Arc<AssetClient>>,
}

enum Control {
    UserActivity,
    Close(oneshot::Sender<()>),
}

// ============================================================================
// Handle
// ============================================================================

pub struct PlaybackOrchestrator {
    ctx: PlaybackContext,
    asset: Arc<MediaAsset>,
    power: Arc<PowerPolicy>,
    mode: watch::Sender<QualityMode>,
    state: watch::Receiver<SessionState>,
    player_tx: mpsc::UnboundedSender<PlayerEvent>,
    control: mpsc::UnboundedSender<Control>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackOrchestrator {
    /// Open `video_id` and hand its first source to the player.
    ///
    /// A downloaded lesson always plays from its vault copy. Offline, only
    /// downloaded lessons can be opened.
    #[instrument(skip(ctx))]
    pub async fn open(
        ctx: PlaybackContext,
        course_id: &str,
        video_id: &str,
    ) -> Result<(Self, PlayerCommands)> {
        let lease = ctx.signals.acquire().await;
        let record = ctx.library.get(video_id).await?;
        let asset = Arc::new(Self::resolve_asset(&ctx, course_id, video_id, record.as_ref()).await?);

        let local = match &record {
            Some(record) => {
                let vault_path = record.vault_path();
                let temp = match &record.content_hash {
                    Some(hash) => ctx.vault.materialize_verified(&vault_path, hash).await,
                    None => ctx.vault.materialize(&vault_path).await,
                };
                match temp {
                    Ok(temp) => Some(temp),
                    Err(e) => {
                        warn!(error = %e, "Downloaded copy unusable");
                        let err = PlaybackError::from(e);
                        ctx.events
                            .emit(CoreEvent::Playback(PlaybackEvent::Error {
                                video_id: Some(video_id.to_string()),
                                message: err.user_message(),
                            }))
                            .ok();
                        return Err(err);
                    }
                }
            }
            None => None,
        };

        let power = Arc::new(PowerPolicy::new(&ctx.config.power, ctx.events.clone()));
        if let Some(info) = *ctx.signals.power().borrow() {
            power.apply(info);
        }

        let (mode_tx, mode_rx) = watch::channel(QualityMode::default());
        let (state_tx, state_rx) = watch::channel(SessionState::Loading);
        let (player_tx, player_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let saver = power.saver_on();
        let source = select(
            QualityMode::default(),
            ctx.estimator.current(),
            saver,
            &asset,
            local.as_ref().map(|t| t.path()),
        )
        .ok_or_else(|| PlaybackError::AssetUnavailable(format!("{} has no playable source", video_id)))?;

        let mut probe = ctx.estimator.demand();
        probe.set(wants_probe(&ctx, QualityMode::default(), saver, local.is_some()));
        ctx.estimator.start();

        let tracker = ProgressTracker::new(
            video_id,
            ctx.progress.clone(),
            &ctx.config.progress,
            ctx.events.clone(),
        );

        let mut task = SessionTask {
            ctx: ctx.clone(),
            asset: asset.clone(),
            tracker,
            session: PlaybackSession::new(ctx.config.session.inactivity_timeout),
            power: power.clone(),
            mode: mode_rx,
            state: state_tx,
            commands: command_tx,
            local,
            current: None,
            play_after_switch: false,
            probe,
            _lease: lease,
        };
        task.load(source);

        if ctx.features.offline_translations && ctx.signals.is_online() {
            Self::prefetch_english(&ctx, &asset);
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(task.run(player_rx, control_rx, cancel.clone()));

        info!(title = %asset.title, "Playback session opened");

        Ok((
            Self {
                ctx,
                asset,
                power,
                mode: mode_tx,
                state: state_rx,
                player_tx,
                control: control_tx,
                cancel,
                task: Mutex::new(Some(handle)),
            },
            command_rx,
        ))
    }

    async fn resolve_asset(
        ctx: &PlaybackContext,
        course_id: &str,
        video_id: &str,
        record: Option<&DownloadRecord>,
    ) -> Result<MediaAsset> {
        let offline_asset = |record: &DownloadRecord| {
            MediaAsset::offline(
                record.course_id.clone(),
                record.id.clone(),
                record.title.clone(),
                record.thumbnail.clone(),
            )
        };

        let client = ctx.assets.as_ref().filter(|_| ctx.signals.is_online());
        match (client, record) {
            (Some(client), record) => match client.fetch_asset(course_id, video_id).await {
                Ok(asset) => Ok(asset),
                Err(e) => match record {
                    Some(record) => {
                        warn!(error = %e, "Asset fetch failed, using download record");
                        Ok(offline_asset(record))
                    }
                    None => Err(e),
                },
            },
            (None, Some(record)) => Ok(offline_asset(record)),
            (None, None) => Err(PlaybackError::AssetUnavailable(format!(
                "{} is not downloaded and the network is unavailable",
                video_id
            ))),
        }
    }

    /// Cache English text for offline use; failures are only logged.
    fn prefetch_english(ctx: &PlaybackContext, asset: &Arc<MediaAsset>) {
        if !asset.description_urls.contains_key("english") {
            return;
        }
        let translations = ctx.translations.clone();
        let asset = asset.clone();
        tokio::spawn(async move {
            match translations.cache().has(&asset.video_id, "en").await {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Translation cache unavailable"),
            }
            if let Err(e) = translations
                .describe(&asset.video_id, "en", &asset.description_urls, false)
                .await
            {
                debug!(error = %e, "English translation prefetch failed");
            }
        });
    }

    pub fn asset(&self) -> &MediaAsset {
        &self.asset
    }

    pub fn video_id(&self) -> &str {
        &self.asset.video_id
    }

    /// Core events about this lesson, plus process-wide ones.
    pub fn lesson_events(&self) -> LessonEvents {
        LessonEvents::new(self.ctx.events.subscribe(), self.asset.video_id.clone())
    }

    /// Sender for host player events. Never blocks.
    pub fn player_events(&self) -> mpsc::UnboundedSender<PlayerEvent> {
        self.player_tx.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn quality(&self) -> QualityMode {
        *self.mode.borrow()
    }

    pub fn bandwidth(&self) -> BandwidthEstimate {
        self.ctx.estimator.current()
    }

    pub fn saver_on(&self) -> bool {
        self.power.saver_on()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state().is_closed() {
            Err(PlaybackError::SessionClosed)
        } else {
            Ok(())
        }
    }

    /// Change the quality mode. Rejected while saver is on.
    pub fn set_quality(&self, mode: QualityMode) -> Result<()> {
        self.ensure_open()?;
        if self.power.saver_on() {
            return Err(PlaybackError::QualityLocked);
        }
        self.mode.send_replace(mode);
        Ok(())
    }

    /// Returns the resulting saver flag.
    pub fn set_manual_saver(&self, enabled: bool) -> bool {
        self.power.set_manual(enabled)
    }

    /// Any learner interaction; wakes an idle session.
    pub fn user_activity(&self) {
        self.control.send(Control::UserActivity).ok();
    }

    /// Last persisted progress for this video.
    pub async fn saved_progress(&self) -> Result<Option<PersistedProgress>> {
        self.ctx.progress.get(&self.asset.video_id).await
    }

    /// Download this lesson into the vault.
    ///
    /// Runs on its own task and finishes even if the session is closed.
    #[instrument(skip(self), fields(video_id = %self.asset.video_id))]
    pub async fn start_download(&self) -> Result<DownloadStart> {
        if !self.ctx.features.offline_downloads {
            return Err(PlaybackError::FeatureDisabled("offline_downloads"));
        }
        let video_id = self.asset.video_id.clone();
        if let Some(record) = self.ctx.library.get(&video_id).await? {
            return Ok(DownloadStart::AlreadyDownloaded(record));
        }
        if self.ctx.downloads.is_active(&video_id) {
            return Err(crate::error::DownloadError::AlreadyInProgress(video_id).into());
        }
        let url = self
            .asset
            .url
            .clone()
            .or_else(|| {
                self.asset
                    .rendition_url(crate::asset::Rendition::AutoSource)
                    .map(str::to_string)
            })
            .ok_or_else(|| PlaybackError::AssetUnavailable(format!("{} has no download URL", video_id)))?;

        let (progress_tx, progress_rx) = watch::channel(DownloadProgress::new(&video_id));
        spawn_download(self.ctx.clone(), self.asset.clone(), url, progress_tx);
        Ok(DownloadStart::Started(progress_rx))
    }

    /// Returns `false` if nothing was downloading.
    pub fn cancel_download(&self) -> bool {
        self.ctx.downloads.cancel(&self.asset.video_id)
    }

    /// Delete the downloaded copy and its record.
    pub async fn remove_download(&self) -> Result<DownloadRecord> {
        let video_id = &self.asset.video_id;
        let record = self.ctx.library.remove_download(video_id, &self.ctx.vault).await?;
        if let Err(e) = self.ctx.downloads.discard_partial(video_id).await {
            debug!(error = %e, "No partial download to discard");
        }
        self.ctx
            .events
            .emit(CoreEvent::Download(DownloadEvent::Removed {
                video_id: video_id.clone(),
            }))
            .ok();
        Ok(record)
    }

    /// A playable copy of the downloaded lesson for the share sheet.
    ///
    /// The caller owns the copy and releases it when done.
    pub async fn share_copy(&self) -> Result<TempPlayable> {
        let record = self
            .ctx
            .library
            .get(&self.asset.video_id)
            .await?
            .ok_or_else(|| PlaybackError::NotDownloaded(self.asset.video_id.clone()))?;
        let temp = match &record.content_hash {
            Some(hash) => self.ctx.vault.materialize_verified(&record.vault_path(), hash).await?,
            None => self.ctx.vault.materialize(&record.vault_path()).await?,
        };
        Ok(temp)
    }

    /// Description text in `lang`. Served from the cache only when offline.
    pub async fn translation(&self, lang: &str, offline: bool) -> Result<Translation> {
        let offline = offline || !self.ctx.signals.is_online();
        if offline && !self.ctx.features.offline_translations {
            return Err(PlaybackError::FeatureDisabled("offline_translations"));
        }
        let text = self
            .ctx
            .translations
            .describe(&self.asset.video_id, lang, &self.asset.description_urls, offline)
            .await?;
        Ok(text)
    }

    /// Flush progress, release the local copy and stop the session task.
    ///
    /// Safe to call more than once.
    pub async fn close(&self) {
        let Some(task) = self.task.lock().take() else {
            return;
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.control.send(Control::Close(reply_tx)).is_ok() {
            reply_rx.await.ok();
        }
        if let Err(e) = task.await {
            warn!(error = %e, "Session task ended abnormally");
        }
    }
}

impl Drop for PlaybackOrchestrator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn_download(
    ctx: PlaybackContext,
    asset: Arc<MediaAsset>,
    url: String,
    progress: watch::Sender<DownloadProgress>,
) {
    let video_id = asset.video_id.clone();

    let mut progress_rx = progress.subscribe();
    let events = ctx.events.clone();
    let forward_id = video_id.clone();
    tokio::spawn(async move {
        let mut last = None;
        while progress_rx.changed().await.is_ok() {
            let percent = progress_rx.borrow_and_update().progress_percent;
            if last != Some(percent) {
                last = Some(percent);
                events
                    .emit(CoreEvent::Download(DownloadEvent::Progress {
                        video_id: forward_id.clone(),
                        percent,
                    }))
                    .ok();
            }
        }
    });

    tokio::spawn(async move {
        ctx.events
            .emit(CoreEvent::Download(DownloadEvent::Started {
                video_id: video_id.clone(),
            }))
            .ok();

        let outcome = match ctx
            .downloads
            .start_resumable_download(&url, &video_id, progress)
            .await
        {
            Ok(file) => ctx.library.save_download(&asset, &file, &ctx.vault).await,
            Err(e) => Err(e.into()),
        };

        let event = match outcome {
            Ok(record) => DownloadEvent::Completed {
                video_id,
                vault_file: display_path(&record.vault_path()),
            },
            Err(e) => {
                warn!(video_id = %video_id, error = %e, "Download failed");
                DownloadEvent::Failed {
                    video_id,
                    message: e.user_message(),
                }
            }
        };
        ctx.events.emit(CoreEvent::Download(event)).ok();
    });
}

// ============================================================================
// Session Task
// ============================================================================

struct SessionTask {
    ctx: PlaybackContext,
    asset: Arc<MediaAsset>,
    tracker: ProgressTracker,
    session: PlaybackSession,
    power: Arc<PowerPolicy>,
    mode: watch::Receiver<QualityMode>,
    state: watch::Sender<SessionState>,
    commands: mpsc::UnboundedSender<PlayerCommand>,
    local: Option<TempPlayable>,
    current: Option<SelectedSource>,
    play_after_switch: bool,
    probe: ProbeDemand,
    _lease: SignalLease,
}

/// Bandwidth samples only matter for adaptive streaming.
fn wants_probe(ctx: &PlaybackContext, mode: QualityMode, saver: bool, has_local: bool) -> bool {
    ctx.features.adaptive_quality && mode.is_auto() && !saver && !has_local
}

async fn idle_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl SessionTask {
    async fn run(
        mut self,
        mut player_rx: mpsc::UnboundedReceiver<PlayerEvent>,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
        cancel: CancellationToken,
    ) {
        let mut bandwidth = self.ctx.estimator.subscribe();
        let mut battery = self.power.subscribe();
        let mut platform_power = self.ctx.signals.power();
        let mut close_reply = None;

        loop {
            let deadline = self.session.idle_deadline();
            // Queued player events are drained before anything reacts to them.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = player_rx.recv() => match event {
                    Some(event) => self.on_player_event(event).await,
                    None => break,
                },
                control = control_rx.recv() => match control {
                    Some(Control::UserActivity) => self.on_user_activity(),
                    Some(Control::Close(reply)) => {
                        close_reply = Some(reply);
                        break;
                    }
                    None => break,
                },
                Ok(()) = bandwidth.changed() => self.reselect(),
                Ok(()) = battery.changed() => self.reselect(),
                Ok(()) = self.mode.changed() => self.reselect(),
                Ok(()) = platform_power.changed() => {
                    let info = *platform_power.borrow_and_update();
                    if let Some(info) = info {
                        self.power.apply(info);
                    }
                }
                _ = idle_sleep(deadline) => self.on_idle(),
            }
            self.publish_state();
        }

        self.shutdown().await;
        if let Some(reply) = close_reply {
            reply.send(()).ok();
        }
    }

    fn video_id(&self) -> String {
        self.asset.video_id.clone()
    }

    fn send(&self, command: PlayerCommand) {
        debug!(?command, "Player command");
        // The host may have dropped its receiver; nothing to do then.
        self.commands.send(command).ok();
    }

    fn emit(&self, event: PlaybackEvent) {
        self.ctx.events.emit(CoreEvent::Playback(event)).ok();
    }

    fn publish_state(&self) {
        let next = self.session.state();
        self.state.send_if_modified(|state| {
            if *state != next {
                *state = next;
                true
            } else {
                false
            }
        });
    }

    fn load(&mut self, source: SelectedSource) {
        info!(
            video_id = %self.asset.video_id,
            rendition = source.label(),
            local = source.local,
            "Loading source"
        );
        self.emit(PlaybackEvent::SourceSelected {
            video_id: self.video_id(),
            rendition: source.label().to_string(),
            local: source.local,
        });
        self.send(PlayerCommand::Load {
            uri: source.uri.clone(),
        });
        self.current = Some(source);
    }

    /// Re-run selection after a mode, bandwidth or saver change.
    fn reselect(&mut self) {
        if self.session.state().is_closed() {
            return;
        }
        let saver = self.power.saver_on();
        let mode = *self.mode.borrow_and_update();
        let local = self.local.as_ref().map(|t| t.path());

        self.probe.set(wants_probe(&self.ctx, mode, saver, local.is_some()));

        let Some(next) = select(mode, self.ctx.estimator.current(), saver, &self.asset, local) else {
            return;
        };
        if self.current.as_ref().is_some_and(|current| current.uri == next.uri) {
            return;
        }

        let live = self.tracker.live_position_ms();
        self.play_after_switch = self.session.state() == SessionState::Playing;
        self.tracker.arm_for_switch(live);
        self.session.switching(live);
        self.load(next);
    }

    async fn on_player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::Ready => {
                self.session.ready();
                if let Some(position_ms) = self.tracker.on_load().await {
                    self.send(PlayerCommand::Seek { position_ms });
                    self.emit(PlaybackEvent::ResumeSeek {
                        video_id: self.video_id(),
                        position_ms,
                    });
                }
                if std::mem::take(&mut self.play_after_switch) {
                    self.send(PlayerCommand::Play);
                }
            }
            PlayerEvent::Status(status) => {
                self.tracker.on_status(status).await;
                self.session.on_status(status.is_playing, status.did_just_finish);
            }
            PlayerEvent::Error(message) => {
                warn!(video_id = %self.asset.video_id, %message, "Player error");
                self.emit(PlaybackEvent::Error {
                    video_id: Some(self.video_id()),
                    message,
                });
            }
        }
    }

    fn on_idle(&mut self) {
        if self.session.check_idle(Instant::now()) {
            info!(video_id = %self.asset.video_id, "Pausing after inactivity");
            self.send(PlayerCommand::Pause);
            self.emit(PlaybackEvent::Idle {
                video_id: self.video_id(),
            });
        }
    }

    fn on_user_activity(&mut self) {
        if self.session.user_activity() == ActivityOutcome::Resume {
            self.send(PlayerCommand::Play);
            self.emit(PlaybackEvent::Resumed {
                video_id: self.video_id(),
            });
        }
    }

    async fn shutdown(&mut self) {
        self.tracker.flush().await;
        self.session.close();
        self.publish_state();
        self.probe.set(false);

        if let Some(temp) = self.local.take() {
            if let Err(e) = temp.release().await {
                warn!(error = %e, "Could not release playback copy");
            }
        }

        info!(video_id = %self.asset.video_id, "Playback session closed");
        self.emit(PlaybackEvent::Closed {
            video_id: self.video_id(),
        });
    }
}
