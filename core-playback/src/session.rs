//! # Session State
//!
//! One authoritative state value per open video, plus the inactivity timer.
//!
//! ```text
//!            load                 ready             status(playing)
//!  ┌─────────────────┐  Loading ─────────> Paused ─────────────────> Playing
//!  │                      ▲                  ▲  <── status(paused) ───┘ │ ▲
//!  │        switch        │                  │                          │ │
//!  └──── Switching{at} ───┘                  │        idle timeout      │ │ user activity
//!                                            │           ┌──────────────┘ │
//!                                            │           ▼                │
//!                                            └───────── Idle ─────────────┘
//!
//!  any ── did_just_finish ──> Ended        any ── close ──> Closed (terminal)
//! ```
//!
//! The idle deadline is armed only while `Playing`; a user pause clears it.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// Source handed to the player, waiting for it to be ready.
    Loading,
    Playing,
    Paused,
    /// Paused by the inactivity timer.
    Idle,
    /// Source change in flight; playback resumes at `resume_at_ms`.
    Switching { resume_at_ms: u64 },
    Ended,
    Closed,
}

impl SessionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

/// What the caller must do after [`PlaybackSession::user_activity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityOutcome {
    /// Session was idle; issue `Play`.
    Resume,
    /// Timer re-armed.
    Refreshed,
    Ignored,
}

#[derive(Debug)]
pub struct PlaybackSession {
    state: SessionState,
    inactivity_timeout: Option<Duration>,
    idle_deadline: Option<Instant>,
}

impl PlaybackSession {
    pub fn new(inactivity_timeout: Option<Duration>) -> Self {
        Self {
            state: SessionState::Loading,
            inactivity_timeout,
            idle_deadline: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn idle_deadline(&self) -> Option<Instant> {
        self.idle_deadline
    }

    fn set(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Session transition");
            self.state = next;
        }
    }

    fn arm_idle(&mut self) {
        self.idle_deadline = self.inactivity_timeout.map(|t| Instant::now() + t);
    }

    /// A new source was handed to the player.
    pub fn loading(&mut self) {
        if self.state.is_closed() {
            return;
        }
        self.idle_deadline = None;
        self.set(SessionState::Loading);
    }

    /// Source switch at the live position.
    pub fn switching(&mut self, resume_at_ms: u64) {
        if self.state.is_closed() {
            return;
        }
        self.idle_deadline = None;
        self.set(SessionState::Switching { resume_at_ms });
    }

    /// The player finished loading.
    pub fn ready(&mut self) {
        if matches!(
            self.state,
            SessionState::Loading | SessionState::Switching { .. }
        ) {
            self.set(SessionState::Paused);
        }
    }

    /// Fold a player status in.
    pub fn on_status(&mut self, is_playing: bool, did_just_finish: bool) {
        if self.state.is_closed() {
            return;
        }
        if did_just_finish {
            self.idle_deadline = None;
            self.set(SessionState::Ended);
            return;
        }

        match (self.state, is_playing) {
            (SessionState::Playing, true) => {
                if self.idle_deadline.is_none() {
                    self.arm_idle();
                }
            }
            (_, true) => {
                self.arm_idle();
                self.set(SessionState::Playing);
            }
            (SessionState::Playing, false) => {
                self.idle_deadline = None;
                self.set(SessionState::Paused);
            }
            // Idle stays idle while the player reports the pause we issued.
            (_, false) => {}
        }
    }

    pub fn user_activity(&mut self) -> ActivityOutcome {
        match self.state {
            SessionState::Idle => {
                self.arm_idle();
                self.set(SessionState::Playing);
                ActivityOutcome::Resume
            }
            SessionState::Playing => {
                self.arm_idle();
                ActivityOutcome::Refreshed
            }
            _ => ActivityOutcome::Ignored,
        }
    }

    /// Check the idle deadline at `now`. Returns `true` on entering `Idle`.
    pub fn check_idle(&mut self, now: Instant) -> bool {
        match self.idle_deadline {
            Some(deadline) if self.state == SessionState::Playing && now >= deadline => {
                self.idle_deadline = None;
                self.set(SessionState::Idle);
                true
            }
            _ => false,
        }
    }

    pub fn close(&mut self) {
        self.idle_deadline = None;
        self.set(SessionState::Closed);
    }
}
