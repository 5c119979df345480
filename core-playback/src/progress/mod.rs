//! # Progress Tracking
//!
//! Engagement-time accounting per video and its durable store.

pub mod store;
pub mod tracker;

pub use store::{percentage, PersistedProgress, ProgressStore, PROGRESS_KEY};
pub use tracker::{PlaybackStatus, ProgressSnapshot, ProgressTracker, TrackerPhase};
