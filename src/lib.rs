//! Workspace umbrella crate.
//!
//! Exposes feature flags that map onto the individual workspace crates
//! (`core-service`, `core-playback`). Host applications can depend on
//! `lesson-player-workspace` and enable the documented features without wiring
//! each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service;

#[cfg(feature = "core-only")]
pub use core_playback;
