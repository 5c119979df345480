//! # Event Bus System
//!
//! Decoupled notification channel for the lesson player core, built on
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! Pieces:
//! - **Event Types**: Strongly-typed enum hierarchies per domain (network,
//!   power, downloads, progress, playback)
//! - **EventBus**: Central broadcast channel for publishing events
//! - **LessonEvents**: Subscription narrowed to the lesson on screen
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   emit    ┌───────────┐
//! │ Bandwidth probe  ├──────────>│           │
//! └──────────────────┘           │           │   subscribe   ┌────────────┐
//! ┌──────────────────┐   emit    │ EventBus  ├──────────────>│  Host UI   │
//! │ Download manager ├──────────>│ (broadcast│               └────────────┘
//! └──────────────────┘           │  channel) │   subscribe   ┌────────────┐
//! ┌──────────────────┐   emit    │           ├──────────────>│ Analytics  │
//! │ Progress tracker ├──────────>│           │               └────────────┘
//! └──────────────────┘           └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
//!
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Download(DownloadEvent::Started {
//!         video_id: "video-1".to_string(),
//!     }))
//!     .ok();
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   Non-fatal; the subscriber keeps receiving newer events.
//! - **`RecvError::Closed`**: All senders have been dropped (shutdown).
//!
//! Emitting without subscribers returns an error that producers ignore with
//! `.ok()`: events are notifications, never part of the control flow.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Download progress is the chattiest producer; subscribers that fall behind
/// receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Network(NetworkEvent),
    Power(PowerEvent),
    Download(DownloadEvent),
    Progress(ProgressEvent),
    Playback(PlaybackEvent),
}

impl CoreEvent {
    /// Human-readable description of the event
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Network(e) => e.description(),
            CoreEvent::Power(e) => e.description(),
            CoreEvent::Download(e) => e.description(),
            CoreEvent::Progress(e) => e.description(),
            CoreEvent::Playback(e) => e.description(),
        }
    }

    /// Lesson the event is about. `None` for process-wide events.
    pub fn video_id(&self) -> Option<&str> {
        match self {
            CoreEvent::Network(_) | CoreEvent::Power(_) => None,
            CoreEvent::Download(
                DownloadEvent::Started { video_id }
                | DownloadEvent::Progress { video_id, .. }
                | DownloadEvent::Completed { video_id, .. }
                | DownloadEvent::Failed { video_id, .. }
                | DownloadEvent::Removed { video_id },
            ) => Some(video_id.as_str()),
            CoreEvent::Progress(
                ProgressEvent::Persisted { video_id, .. }
                | ProgressEvent::Completed { video_id }
                | ProgressEvent::PersistFailed { video_id, .. },
            ) => Some(video_id.as_str()),
            CoreEvent::Playback(PlaybackEvent::Error { video_id, .. }) => video_id.as_deref(),
            CoreEvent::Playback(
                PlaybackEvent::SourceSelected { video_id, .. }
                | PlaybackEvent::ResumeSeek { video_id, .. }
                | PlaybackEvent::Idle { video_id }
                | PlaybackEvent::Resumed { video_id }
                | PlaybackEvent::Closed { video_id },
            ) => Some(video_id.as_str()),
        }
    }

    /// Severity used by hosts to route events (toast, log, ignore)
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Download(DownloadEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Playback(PlaybackEvent::Error { .. }) => EventSeverity::Error,
            CoreEvent::Network(NetworkEvent::ProbeFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Progress(ProgressEvent::PersistFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Download(DownloadEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Download(DownloadEvent::Removed { .. }) => EventSeverity::Info,
            CoreEvent::Power(PowerEvent::SaverChanged { .. }) => EventSeverity::Info,
            CoreEvent::Progress(ProgressEvent::Completed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Network Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum NetworkEvent {
    /// A bandwidth probe completed
    BandwidthSampled { bits_per_second: u64 },
    /// A probe failed; the previous estimate is kept
    ProbeFailed { message: String },
    ConnectivityChanged { connected: bool },
}

impl NetworkEvent {
    fn description(&self) -> &str {
        match self {
            NetworkEvent::BandwidthSampled { .. } => "Bandwidth sampled",
            NetworkEvent::ProbeFailed { .. } => "Bandwidth probe failed",
            NetworkEvent::ConnectivityChanged { .. } => "Connectivity changed",
        }
    }
}

// ============================================================================
// Power Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PowerEvent {
    SaverChanged {
        saver_on: bool,
        level_percent: Option<u8>,
    },
}

impl PowerEvent {
    fn description(&self) -> &str {
        match self {
            PowerEvent::SaverChanged { saver_on: true, .. } => "Battery saver enabled",
            PowerEvent::SaverChanged { saver_on: false, .. } => "Battery saver disabled",
        }
    }
}

// ============================================================================
// Download Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    Started {
        video_id: String,
    },
    Progress {
        video_id: String,
        percent: u8,
    },
    /// Download committed to the vault and recorded
    Completed {
        video_id: String,
        vault_file: String,
    },
    Failed {
        video_id: String,
        message: String,
    },
    Removed {
        video_id: String,
    },
}

impl DownloadEvent {
    fn description(&self) -> &str {
        match self {
            DownloadEvent::Started { .. } => "Download started",
            DownloadEvent::Progress { .. } => "Download in progress",
            DownloadEvent::Completed { .. } => "Download completed",
            DownloadEvent::Failed { .. } => "Download failed",
            DownloadEvent::Removed { .. } => "Download removed",
        }
    }
}

// ============================================================================
// Progress Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ProgressEvent {
    Persisted {
        video_id: String,
        watched_seconds: u64,
        total_seconds: u64,
    },
    /// Engagement reached the full duration
    Completed {
        video_id: String,
    },
    PersistFailed {
        video_id: String,
        message: String,
    },
}

impl ProgressEvent {
    fn description(&self) -> &str {
        match self {
            ProgressEvent::Persisted { .. } => "Progress saved",
            ProgressEvent::Completed { .. } => "Lesson completed",
            ProgressEvent::PersistFailed { .. } => "Progress could not be saved",
        }
    }
}

// ============================================================================
// Playback Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// A source was handed to the player
    SourceSelected {
        video_id: String,
        rendition: String,
        local: bool,
    },
    ResumeSeek {
        video_id: String,
        position_ms: u64,
    },
    /// Paused by the inactivity timer
    Idle {
        video_id: String,
    },
    Resumed {
        video_id: String,
    },
    Closed {
        video_id: String,
    },
    Error {
        video_id: Option<String>,
        message: String,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::SourceSelected { .. } => "Playback source selected",
            PlaybackEvent::ResumeSeek { .. } => "Resuming from saved position",
            PlaybackEvent::Idle { .. } => "Paused after inactivity",
            PlaybackEvent::Resumed { .. } => "Playback resumed",
            PlaybackEvent::Closed { .. } => "Playback session closed",
            PlaybackEvent::Error { .. } => "Playback error",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to core events.
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// Returns the number of subscribers that received it, or an error when
    /// there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Per-lesson subscription
// ============================================================================

/// Subscription narrowed to one lesson.
///
/// Events about other lessons are skipped. Process-wide events
/// (connectivity, bandwidth, battery saver) carry no lesson and pass through.
pub struct LessonEvents {
    receiver: Receiver<CoreEvent>,
    video_id: String,
}

impl LessonEvents {
    pub fn new(receiver: Receiver<CoreEvent>, video_id: impl Into<String>) -> Self {
        Self {
            receiver,
            video_id: video_id.into(),
        }
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    fn concerns(&self, event: &CoreEvent) -> bool {
        event.video_id().map_or(true, |id| id == self.video_id)
    }

    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.concerns(&event) {
                return Ok(event);
            }
        }
    }

    /// `None` when nothing relevant is buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        use broadcast::error::TryRecvError;
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.concerns(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Lagged(n)) => return Some(Err(RecvError::Lagged(n))),
                Err(TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for LessonEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LessonEvents")
            .field("video_id", &self.video_id)
            .finish_non_exhaustive()
    }
}
