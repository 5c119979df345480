//! Download progress reporting

use serde::{Deserialize, Serialize};

/// Progress of one resumable download.
///
/// Published through a `tokio::sync::watch` channel; readers always see the
/// latest snapshot and never slow the transfer down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// Destination name the download was started with
    pub destination: String,

    /// Full resource size in bytes, when the server reported it
    pub total_bytes: Option<u64>,

    /// Bytes on disk, including any resumed prefix
    pub downloaded_bytes: u64,

    /// Bytes that were already present when this run started
    pub resumed_from: u64,

    /// Download progress percentage (0-100)
    pub progress_percent: u8,

    /// Current download speed in bytes/second
    pub speed_bytes_per_sec: u64,

    /// Estimated time remaining in seconds
    pub eta_seconds: Option<u64>,

    /// Download started timestamp
    pub started_at: i64,

    /// Last update timestamp
    pub updated_at: i64,
}

impl DownloadProgress {
    pub fn new(destination: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();

        Self {
            destination: destination.into(),
            total_bytes: None,
            downloaded_bytes: 0,
            resumed_from: 0,
            progress_percent: 0,
            speed_bytes_per_sec: 0,
            eta_seconds: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Reset for a (re)started transfer beginning at `offset`.
    pub fn begin(&mut self, offset: u64, total_bytes: Option<u64>) {
        self.resumed_from = offset;
        self.total_bytes = total_bytes;
        self.started_at = chrono::Utc::now().timestamp();
        self.update(offset);
    }

    /// Update progress with the bytes now on disk.
    pub fn update(&mut self, downloaded_bytes: u64) {
        let now = chrono::Utc::now().timestamp();
        let elapsed = (now - self.started_at).max(1) as u64;

        self.downloaded_bytes = downloaded_bytes;
        self.updated_at = now;

        if let Some(total) = self.total_bytes.filter(|t| *t > 0) {
            let percent = (downloaded_bytes as f64 / total as f64) * 100.0;
            self.progress_percent = percent.min(100.0) as u8;
        }

        // Speed only counts bytes transferred in this run.
        self.speed_bytes_per_sec = downloaded_bytes.saturating_sub(self.resumed_from) / elapsed;

        self.eta_seconds = match (self.total_bytes, self.speed_bytes_per_sec) {
            (Some(total), speed) if speed > 0 => {
                Some(total.saturating_sub(downloaded_bytes) / speed)
            }
            _ => None,
        };
    }

    /// `bytes_written / bytes_expected` in `0.0..=1.0`, when the size is known.
    pub fn fraction(&self) -> Option<f64> {
        self.total_bytes
            .filter(|t| *t > 0)
            .map(|total| (self.downloaded_bytes as f64 / total as f64).min(1.0))
    }

    /// Mark the transfer finished at `size` bytes.
    pub fn complete(&mut self, size: u64) {
        self.total_bytes = Some(size);
        self.update(size);
        self.progress_percent = 100;
        self.eta_seconds = Some(0);
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.total_bytes, Some(total) if self.downloaded_bytes >= total)
    }

    /// Format speed as human-readable string.
    pub fn speed_string(&self) -> String {
        format_bytes_per_sec(self.speed_bytes_per_sec)
    }
}

fn format_bytes_per_sec(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B/s", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB/s", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB/s", bytes as f64 / (1024.0 * 1024.0))
    }
}
