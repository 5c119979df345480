//! Engagement tracking for one video
//!
//! ```text
//!   Uninitialized ──first status / on_load──> Tracking ──watched == duration──> Completed
//! ```
//!
//! Forward position deltas below the tick ceiling count as engagement;
//! anything else (seeks, scrubs, source switches) only moves the position.

use super::store::{PersistedProgress, ProgressStore};
use crate::config::ProgressConfig;
use core_runtime::events::{CoreEvent, EventBus, ProgressEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One status report from the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlaybackStatus {
    pub position_ms: u64,
    /// `None` until the player knows the duration.
    pub duration_ms: Option<u64>,
    pub is_playing: bool,
    /// Natural end of media was reached with this update.
    pub did_just_finish: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerPhase {
    Uninitialized,
    Tracking,
    Completed,
}

/// Progress figures for display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub watched_ms: u64,
    pub total_ms: u64,
    pub position_ms: u64,
    pub percentage: f64,
}

/// Sole writer of [`PersistedProgress`] for its video.
///
/// Owned by the session task; it is not shared.
pub struct ProgressTracker {
    video_id: String,
    store: Arc<ProgressStore>,
    events: EventBus,
    max_tick_ms: u64,
    persist_step: u64,
    phase: TrackerPhase,
    watched_ms: u64,
    total_ms: u64,
    last_position_ms: u64,
    last_persisted_seconds: u64,
    /// Seek target for the next load, if armed.
    resume_at: Option<u64>,
}

impl ProgressTracker {
    pub fn new(
        video_id: impl Into<String>,
        store: Arc<ProgressStore>,
        config: &ProgressConfig,
        events: EventBus,
    ) -> Self {
        Self {
            video_id: video_id.into(),
            store,
            events,
            max_tick_ms: config.max_tick_ms(),
            persist_step: config.persist_step_seconds,
            phase: TrackerPhase::Uninitialized,
            watched_ms: 0,
            total_ms: 0,
            last_position_ms: 0,
            last_persisted_seconds: 0,
            resume_at: None,
        }
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn phase(&self) -> TrackerPhase {
        self.phase
    }

    pub fn watched_ms(&self) -> u64 {
        self.watched_ms
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            watched_ms: self.watched_ms,
            total_ms: self.total_ms,
            position_ms: self.last_position_ms,
            percentage: super::store::percentage(self.watched_ms, self.total_ms),
        }
    }

    /// Load persisted progress once. Later calls are no-ops.
    async fn ensure_initialized(&mut self) {
        if self.phase != TrackerPhase::Uninitialized {
            return;
        }

        match self.store.get(&self.video_id).await {
            Ok(Some(saved)) => {
                debug!(video_id = %self.video_id, watched = saved.watched_seconds, "Restoring progress");
                self.watched_ms = saved.watched_seconds * 1000;
                self.total_ms = saved.total_duration * 1000;
                self.last_position_ms = saved.last_position;
                self.last_persisted_seconds = saved.watched_seconds;
                self.resume_at = Some(saved.last_position);
            }
            Ok(None) => {
                self.resume_at = Some(0);
            }
            Err(e) => {
                // Start from zero rather than block playback.
                warn!(video_id = %self.video_id, error = %e, "Could not read saved progress");
                self.resume_at = Some(0);
            }
        }

        self.phase = if self.total_ms > 0 && self.watched_ms >= self.total_ms {
            TrackerPhase::Completed
        } else {
            TrackerPhase::Tracking
        };
    }

    /// The player finished loading a source.
    ///
    /// Returns the position to seek to, at most once per arming.
    pub async fn on_load(&mut self) -> Option<u64> {
        self.ensure_initialized().await;
        match self.resume_at.take() {
            Some(target) if target > 0 => {
                info!(video_id = %self.video_id, position_ms = target, "Resuming playback");
                Some(target)
            }
            _ => None,
        }
    }

    /// Re-arm resume for a source switch using the live position.
    pub fn arm_for_switch(&mut self, live_position_ms: u64) {
        self.resume_at = Some(live_position_ms);
    }

    /// Position the last status reported.
    pub fn live_position_ms(&self) -> u64 {
        self.last_position_ms
    }

    /// Fold one player status in, persisting when due.
    pub async fn on_status(&mut self, status: PlaybackStatus) -> ProgressSnapshot {
        self.ensure_initialized().await;

        if let Some(duration) = status.duration_ms.filter(|d| *d > 0) {
            self.total_ms = duration;
        }

        let diff = status.position_ms as i64 - self.last_position_ms as i64;
        self.last_position_ms = status.position_ms;

        if status.is_playing {
            if diff > 0 && (diff as u64) < self.max_tick_ms {
                self.accept(diff as u64);
            }

            let seconds = self.watched_ms / 1000;
            if seconds >= self.last_persisted_seconds + self.persist_step {
                self.persist(seconds, status.position_ms).await;
            }
        }

        if status.did_just_finish {
            self.finish(status.duration_ms.unwrap_or(self.total_ms)).await;
        }

        self.snapshot()
    }

    /// Write whatever has been watched since the last save (session close).
    pub async fn flush(&mut self) {
        if self.phase == TrackerPhase::Uninitialized {
            return;
        }
        let seconds = self.watched_ms / 1000;
        if seconds > self.last_persisted_seconds {
            self.persist(seconds, self.last_position_ms).await;
        }
    }

    fn accept(&mut self, diff: u64) {
        if self.phase == TrackerPhase::Completed {
            return;
        }
        self.watched_ms += diff;
        if self.total_ms > 0 && self.watched_ms >= self.total_ms {
            self.watched_ms = self.total_ms;
            self.mark_completed();
        }
    }

    async fn finish(&mut self, duration_ms: u64) {
        let duration_ms = if duration_ms > 0 {
            duration_ms
        } else {
            self.last_position_ms
        };
        self.total_ms = duration_ms;
        self.watched_ms = duration_ms;
        self.last_position_ms = duration_ms;
        self.mark_completed();
        self.persist(duration_ms / 1000, duration_ms).await;
    }

    fn mark_completed(&mut self) {
        if self.phase != TrackerPhase::Completed {
            self.phase = TrackerPhase::Completed;
            info!(video_id = %self.video_id, "Lesson completed");
            self.events
                .emit(CoreEvent::Progress(ProgressEvent::Completed {
                    video_id: self.video_id.clone(),
                }))
                .ok();
        }
    }

    async fn persist(&mut self, seconds: u64, position_ms: u64) {
        // Never write a smaller value than one already written.
        let seconds = seconds.max(self.last_persisted_seconds);
        let total_seconds = self.total_ms / 1000;
        let record = PersistedProgress::new(seconds, total_seconds, position_ms);

        match self.store.put(&self.video_id, record).await {
            Ok(()) => {
                debug!(video_id = %self.video_id, watched_seconds = seconds, "Progress saved");
                self.last_persisted_seconds = seconds;
                self.events
                    .emit(CoreEvent::Progress(ProgressEvent::Persisted {
                        video_id: self.video_id.clone(),
                        watched_seconds: seconds,
                        total_seconds,
                    }))
                    .ok();
            }
            Err(e) => {
                // Retried on the next throttled tick.
                warn!(video_id = %self.video_id, error = %e, "Progress save failed");
                self.events
                    .emit(CoreEvent::Progress(ProgressEvent::PersistFailed {
                        video_id: self.video_id.clone(),
                        message: e.to_string(),
                    }))
                    .ok();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_desktop::SqliteKeyValueStore;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::storage::KeyValueStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn playing(position_ms: u64, duration_ms: u64) -> PlaybackStatus {
        PlaybackStatus {
            position_ms,
            duration_ms: Some(duration_ms),
            is_playing: true,
            did_just_finish: false,
        }
    }

    async fn tracker() -> (ProgressTracker, Arc<ProgressStore>) {
        let kv = Arc::new(SqliteKeyValueStore::in_memory().await.unwrap());
        let store = Arc::new(ProgressStore::new(kv));
        let tracker = ProgressTracker::new(
            "video123",
            store.clone(),
            &ProgressConfig::default(),
            EventBus::default(),
        );
        (tracker, store)
    }

    #[tokio::test]
    async fn test_normal_tick_counts_and_seek_does_not() {
        let (mut tracker, _) = tracker().await;

        tracker.on_status(playing(300, 100_000)).await;
        assert_eq!(tracker.watched_ms(), 300);

        // Seek forward 5 s.
        tracker.on_status(playing(5_300, 100_000)).await;
        assert_eq!(tracker.watched_ms(), 300);

        // Position advanced anyway; the next normal tick counts.
        tracker.on_status(playing(5_600, 100_000)).await;
        assert_eq!(tracker.watched_ms(), 600);

        // Backward seek.
        tracker.on_status(playing(1_000, 100_000)).await;
        assert_eq!(tracker.watched_ms(), 600);
    }

    #[tokio::test]
    async fn test_tick_band_is_exclusive() {
        let (mut tracker, _) = tracker().await;
        tracker.on_status(playing(0, 100_000)).await;
        tracker.on_status(playing(1_500, 100_000)).await;
        assert_eq!(tracker.watched_ms(), 0);
        tracker.on_status(playing(2_999, 100_000)).await;
        assert_eq!(tracker.watched_ms(), 1_499);
        // Zero diff (stalled) adds nothing.
        tracker.on_status(playing(2_999, 100_000)).await;
        assert_eq!(tracker.watched_ms(), 1_499);
    }

    #[tokio::test]
    async fn test_paused_updates_do_not_count() {
        let (mut tracker, _) = tracker().await;
        let mut status = playing(300, 100_000);
        status.is_playing = false;
        tracker.on_status(status).await;
        assert_eq!(tracker.watched_ms(), 0);
    }

    #[tokio::test]
    async fn test_throttled_persistence_reaches_thirty_seconds() {
        let (mut tracker, store) = tracker().await;
        let mut persisted = Vec::new();

        for i in 1..=100u64 {
            tracker.on_status(playing(i * 300, 100_000)).await;
            if let Some(saved) = store.get("video123").await.unwrap() {
                if persisted.last() != Some(&saved.watched_seconds) {
                    persisted.push(saved.watched_seconds);
                }
            }
        }

        assert_eq!(tracker.watched_ms(), 30_000);
        assert!(persisted.contains(&30), "persisted: {:?}", persisted);
        assert!(persisted.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(persisted.first(), Some(&3));
    }

    #[tokio::test]
    async fn test_watched_capped_at_duration() {
        let (mut tracker, _) = tracker().await;
        let mut position = 0;
        while position < 12_000 {
            position += 500;
            tracker.on_status(playing(position, 10_000)).await;
        }
        assert_eq!(tracker.watched_ms(), 10_000);
        assert_eq!(tracker.phase(), TrackerPhase::Completed);

        tracker.on_status(playing(position + 300, 10_000)).await;
        assert_eq!(tracker.watched_ms(), 10_000);
    }

    #[tokio::test]
    async fn test_did_just_finish_forces_completion() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let kv = Arc::new(SqliteKeyValueStore::in_memory().await.unwrap());
        let store = Arc::new(ProgressStore::new(kv));
        let mut tracker =
            ProgressTracker::new("video123", store.clone(), &ProgressConfig::default(), events);

        tracker.on_status(playing(1_000, 60_000)).await;
        tracker
            .on_status(PlaybackStatus {
                position_ms: 60_000,
                duration_ms: Some(60_000),
                is_playing: false,
                did_just_finish: true,
            })
            .await;

        let saved = store.get("video123").await.unwrap().unwrap();
        assert_eq!(saved.watched_seconds, 60);
        assert_eq!(saved.total_duration, 60);
        assert_eq!(saved.last_position, 60_000);
        assert_eq!(saved.percentage, 100.0);

        assert_eq!(
            rx.recv().await.unwrap(),
            CoreEvent::Progress(ProgressEvent::Completed {
                video_id: "video123".into()
            })
        );
    }

    #[tokio::test]
    async fn test_resume_once_from_saved_position() {
        let (mut tracker, store) = tracker().await;
        store
            .put("video123", PersistedProgress::new(20, 100, 42_000))
            .await
            .unwrap();

        assert_eq!(tracker.on_load().await, Some(42_000));
        assert_eq!(tracker.watched_ms(), 20_000);
        // Reloading the same source does not seek again.
        assert_eq!(tracker.on_load().await, None);

        // Quality switch re-arms with the live position, not the stale one.
        tracker.on_status(playing(42_300, 100_000)).await;
        tracker.on_status(playing(42_600, 100_000)).await;
        tracker.arm_for_switch(tracker.live_position_ms());
        assert_eq!(tracker.on_load().await, Some(42_600));
        assert_eq!(tracker.on_load().await, None);
    }

    #[tokio::test]
    async fn test_fresh_video_does_not_seek() {
        let (mut tracker, _) = tracker().await;
        assert_eq!(tracker.on_load().await, None);
    }

    /// Store that fails writes while `failing` is set.
    struct FlakyStore {
        inner: SqliteKeyValueStore,
        failing: AtomicBool,
    }

    #[async_trait]
    impl KeyValueStore for FlakyStore {
        async fn read(&self, key: &str) -> BridgeResult<Option<String>> {
            self.inner.read(key).await
        }
        async fn write(&self, key: &str, value: &str) -> BridgeResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(BridgeError::StorageError("busy".into()));
            }
            self.inner.write(key, value).await
        }
        async fn remove(&self, key: &str) -> BridgeResult<()> {
            self.inner.remove(key).await
        }
        async fn keys(&self) -> BridgeResult<Vec<String>> {
            self.inner.keys().await
        }
    }

    #[tokio::test]
    async fn test_failed_write_retried_on_next_tick() {
        let kv = Arc::new(FlakyStore {
            inner: SqliteKeyValueStore::in_memory().await.unwrap(),
            failing: AtomicBool::new(true),
        });
        let store = Arc::new(ProgressStore::new(kv.clone()));
        let mut tracker =
            ProgressTracker::new("video123", store.clone(), &ProgressConfig::default(), EventBus::default());

        for i in 1..=11u64 {
            tracker.on_status(playing(i * 300, 100_000)).await;
        }
        assert_eq!(tracker.watched_ms(), 3_300);
        assert!(store.get("video123").await.unwrap().is_none());

        kv.failing.store(false, Ordering::SeqCst);
        tracker.on_status(playing(3_600, 100_000)).await;
        assert_eq!(store.get("video123").await.unwrap().unwrap().watched_seconds, 3);
    }

    #[tokio::test]
    async fn test_flush_writes_remaining_seconds() {
        let (mut tracker, store) = tracker().await;
        for i in 1..=7u64 {
            tracker.on_status(playing(i * 300, 100_000)).await;
        }
        assert!(store.get("video123").await.unwrap().is_none());

        tracker.flush().await;
        assert_eq!(store.get("video123").await.unwrap().unwrap().watched_seconds, 2);
    }
}
