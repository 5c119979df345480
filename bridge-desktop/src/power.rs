//! Power Monitoring Implementation

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    power::{PowerChangeStream, PowerInfo, PowerMonitor},
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

const POWER_SUPPLY_ROOT: &str = "/sys/class/power_supply";

/// Desktop power monitor implementation
///
/// Reads the first `BAT*` entry under `/sys/class/power_supply` on Linux.
/// Machines without a battery (or other desktop OSes) report an unknown
/// level, which never enables saver mode on its own. Changes are polled.
#[derive(Debug, Clone)]
pub struct DesktopPowerMonitor {
    supply_root: PathBuf,
    poll_interval: Duration,
}

impl DesktopPowerMonitor {
    pub fn new() -> Self {
        Self {
            supply_root: PathBuf::from(POWER_SUPPLY_ROOT),
            poll_interval: Duration::from_secs(30),
        }
    }

    /// Read batteries from a different sysfs root (used by tests).
    pub fn with_supply_root(mut self, root: PathBuf) -> Self {
        self.supply_root = root;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn find_battery(&self) -> Option<PathBuf> {
        let mut entries = tokio::fs::read_dir(&self.supply_root).await.ok()?;
        let mut batteries = Vec::new();

        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_name().to_string_lossy().starts_with("BAT") {
                batteries.push(entry.path());
            }
        }

        batteries.sort();
        batteries.into_iter().next()
    }

    async fn read_trimmed(path: PathBuf) -> Option<String> {
        tokio::fs::read_to_string(path)
            .await
            .ok()
            .map(|s| s.trim().to_string())
    }

    async fn read_info(&self) -> PowerInfo {
        let Some(battery) = self.find_battery().await else {
            return PowerInfo::default();
        };

        let level_percent = Self::read_trimmed(battery.join("capacity"))
            .await
            .and_then(|s| s.parse::<u8>().ok())
            .map(|level| level.min(100));

        let is_charging = matches!(
            Self::read_trimmed(battery.join("status")).await.as_deref(),
            Some("Charging") | Some("Full")
        );

        PowerInfo {
            level_percent,
            // No portable low-power flag on desktop.
            low_power_mode: false,
            is_charging,
        }
    }
}

impl Default for DesktopPowerMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PowerMonitor for DesktopPowerMonitor {
    async fn get_power_info(&self) -> Result<PowerInfo> {
        let info = self.read_info().await;
        debug!(level = ?info.level_percent, charging = info.is_charging, "Power info read");
        Ok(info)
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn PowerChangeStream>> {
        Ok(Box::new(DesktopPowerChangeStream {
            monitor: self.clone(),
            last: None,
        }))
    }
}

/// Power change stream that polls sysfs
struct DesktopPowerChangeStream {
    monitor: DesktopPowerMonitor,
    last: Option<PowerInfo>,
}

#[async_trait]
impl PowerChangeStream for DesktopPowerChangeStream {
    async fn next(&mut self) -> Option<PowerInfo> {
        loop {
            tokio::time::sleep(self.monitor.poll_interval).await;

            let info = self.monitor.read_info().await;
            if self.last != Some(info) {
                self.last = Some(info);
                return Some(info);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fake_supply(capacity: &str, status: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("power-{}", uuid::Uuid::new_v4()));
        let battery = root.join("BAT0");
        tokio::fs::create_dir_all(&battery).await.unwrap();
        tokio::fs::write(battery.join("capacity"), capacity).await.unwrap();
        tokio::fs::write(battery.join("status"), status).await.unwrap();
        root
    }

    #[tokio::test]
    async fn test_reads_sysfs_battery() {
        let root = fake_supply("18\n", "Discharging\n").await;
        let monitor = DesktopPowerMonitor::new().with_supply_root(root.clone());

        let info = monitor.get_power_info().await.unwrap();
        assert_eq!(info.level_percent, Some(18));
        assert!(!info.is_charging);
        assert!(!info.low_power_mode);

        tokio::fs::remove_dir_all(root).await.unwrap();
    }

    #[tokio::test]
    async fn test_no_battery_is_unknown() {
        let root = std::env::temp_dir().join(format!("power-{}", uuid::Uuid::new_v4()));
        let monitor = DesktopPowerMonitor::new().with_supply_root(root);

        let info = monitor.get_power_info().await.unwrap();
        assert_eq!(info, PowerInfo::default());
    }

    #[tokio::test]
    async fn test_change_stream_reports_first_reading() {
        let root = fake_supply("55", "Charging").await;
        let monitor = DesktopPowerMonitor::new()
            .with_supply_root(root.clone())
            .with_poll_interval(Duration::from_millis(10));

        let mut stream = monitor.subscribe_changes().await.unwrap();
        let info = stream.next().await.unwrap();
        assert_eq!(info.level_percent, Some(55));
        assert!(info.is_charging);

        tokio::fs::remove_dir_all(root).await.unwrap();
    }
}
