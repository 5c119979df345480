//! Power State Abstraction
//!
//! Battery level and OS low-power mode, used to decide when the player must
//! fall back to minimal-bandwidth behavior.

use async_trait::async_trait;

use crate::error::Result;

/// Snapshot of the device power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PowerInfo {
    /// Battery charge in percent (0-100), `None` when the platform cannot tell
    /// (desktop without a battery, permission denied).
    pub level_percent: Option<u8>,
    /// OS-reported low-power / battery-saver mode
    pub low_power_mode: bool,
    pub is_charging: bool,
}

impl PowerInfo {
    /// Build from a fractional battery level (0.0-1.0) as most mobile OS APIs
    /// report it. Negative values (unknown) map to `None`.
    pub fn from_fraction(level: f32, low_power_mode: bool, is_charging: bool) -> Self {
        let level_percent = if level.is_finite() && level >= 0.0 {
            Some((level.min(1.0) * 100.0).round() as u8)
        } else {
            None
        };

        Self {
            level_percent,
            low_power_mode,
            is_charging,
        }
    }
}

/// Power monitor trait
///
/// # Platform Support
///
/// - **Desktop**: `/sys/class/power_supply` on Linux, otherwise unknown level
/// - **iOS**: `UIDevice.batteryLevel`, `ProcessInfo.isLowPowerModeEnabled`
/// - **Android**: `BatteryManager`, `PowerManager.isPowerSaveMode`
#[async_trait]
pub trait PowerMonitor: Send + Sync {
    /// One-shot read of the current power state
    async fn get_power_info(&self) -> Result<PowerInfo>;

    /// Subscribe to battery level and low-power mode changes
    async fn subscribe_changes(&self) -> Result<Box<dyn PowerChangeStream>>;
}

/// Stream of power state changes
#[async_trait]
pub trait PowerChangeStream: Send {
    /// Next power update, `None` once the stream is closed.
    async fn next(&mut self) -> Option<PowerInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_fraction_rounds() {
        assert_eq!(PowerInfo::from_fraction(0.196, false, false).level_percent, Some(20));
        assert_eq!(PowerInfo::from_fraction(1.0, false, true).level_percent, Some(100));
        assert_eq!(PowerInfo::from_fraction(-1.0, true, false).level_percent, None);
    }
}
