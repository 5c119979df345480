//! # Power Policy
//!
//! Derives the battery-saver flag from OS battery signals and the learner's
//! manual toggle.

use crate::config::PowerConfig;
use bridge_traits::power::PowerInfo;
use core_runtime::events::{CoreEvent, EventBus, PowerEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

/// Ephemeral battery posture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatteryState {
    /// `None` when the platform cannot report a level.
    pub level_percent: Option<u8>,
    pub os_low_power: bool,
    pub manual_saver: bool,
}

impl BatteryState {
    /// Saver is on when forced manually, requested by the OS, or the level
    /// is at or below `threshold`. An unknown level never turns it on.
    pub fn saver_on(&self, threshold: u8) -> bool {
        self.manual_saver
            || self.os_low_power
            || self.level_percent.is_some_and(|level| level <= threshold)
    }
}

/// Owner of the saver flag for one playback session.
pub struct PowerPolicy {
    threshold: u8,
    state: watch::Sender<BatteryState>,
    events: EventBus,
}

impl PowerPolicy {
    pub fn new(config: &PowerConfig, events: EventBus) -> Self {
        let (state, _) = watch::channel(BatteryState::default());
        Self {
            threshold: config.saver_threshold_percent,
            state,
            events,
        }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn state(&self) -> BatteryState {
        *self.state.borrow()
    }

    pub fn saver_on(&self) -> bool {
        self.state().saver_on(self.threshold)
    }

    pub fn subscribe(&self) -> watch::Receiver<BatteryState> {
        self.state.subscribe()
    }

    /// Fold an OS reading in. Returns the resulting saver flag.
    pub fn apply(&self, info: PowerInfo) -> bool {
        self.update(|state| {
            state.level_percent = info.level_percent;
            state.os_low_power = info.low_power_mode;
        })
    }

    /// Learner's explicit saver toggle.
    pub fn set_manual(&self, enabled: bool) -> bool {
        self.update(|state| state.manual_saver = enabled)
    }

    fn update(&self, mutate: impl FnOnce(&mut BatteryState)) -> bool {
        let before = self.saver_on();
        self.state.send_if_modified(|state| {
            let previous = *state;
            mutate(state);
            *state != previous
        });

        let state = self.state();
        let after = state.saver_on(self.threshold);
        if before != after {
            info!(saver_on = after, level = ?state.level_percent, "Battery saver changed");
            self.events
                .emit(CoreEvent::Power(PowerEvent::SaverChanged {
                    saver_on: after,
                    level_percent: state.level_percent,
                }))
                .ok();
        }
        after
    }
}
