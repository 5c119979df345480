//! # Player Configuration
//!
//! Tuning for bandwidth probing, power policy, downloads, the vault,
//! progress tracking, sessions and translations.
//!
//! Every field has a serde default, so hosts may ship a partial JSON
//! document and only override what they need:
//!
//! ```rust
//! use core_playback::config::PlayerConfig;
//!
//! let config = PlayerConfig::from_json_str(r#"{ "power": { "saver_threshold_percent": 15 } }"#)
//!     .unwrap();
//! assert_eq!(config.power.saver_threshold_percent, 15);
//! assert_eq!(config.progress.persist_step_seconds, 3);
//! ```

use bridge_traits::http::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level player configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub power: PowerConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl PlayerConfig {
    /// Parse a (possibly partial) JSON document and validate it.
    pub fn from_json_str(json: &str) -> Result<Self, String> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| format!("Invalid player config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all sections.
    pub fn validate(&self) -> Result<(), String> {
        self.probe.validate()?;
        self.power.validate()?;
        self.download.validate()?;
        self.vault.validate()?;
        self.progress.validate()?;
        self.session.validate()?;
        self.translation.validate()?;
        Ok(())
    }
}

// ============================================================================
// Bandwidth Probe
// ============================================================================

/// Bandwidth probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Reference payload URL.
    #[serde(default = "default_probe_url")]
    pub url: String,

    /// Expected size of the reference payload in bytes.
    ///
    /// Responses shorter than this are treated as truncated probes.
    #[serde(default = "default_probe_payload_bytes")]
    pub payload_bytes: u64,

    /// Time between samples.
    ///
    /// Default: 10 seconds.
    #[serde(default = "default_probe_interval")]
    pub interval: Duration,

    /// Upper bound for one probe transfer.
    #[serde(default = "default_probe_timeout")]
    pub timeout: Duration,

    /// Optional exponential smoothing factor in `(0.0, 1.0]`.
    ///
    /// `None` keeps only the latest sample.
    #[serde(default)]
    pub smoothing: Option<f64>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            url: default_probe_url(),
            payload_bytes: default_probe_payload_bytes(),
            interval: default_probe_interval(),
            timeout: default_probe_timeout(),
            smoothing: None,
        }
    }
}

impl ProbeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("probe.url cannot be empty".to_string());
        }
        if self.interval.is_zero() {
            return Err("probe.interval must be > 0".to_string());
        }
        if self.timeout.is_zero() {
            return Err("probe.timeout must be > 0".to_string());
        }
        if let Some(alpha) = self.smoothing {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err("probe.smoothing must be in (0.0, 1.0]".to_string());
            }
        }
        Ok(())
    }
}

// ============================================================================
// Power Policy
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerConfig {
    /// Battery percent at or below which saver mode turns on.
    #[serde(default = "default_saver_threshold")]
    pub saver_threshold_percent: u8,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            saver_threshold_percent: default_saver_threshold(),
        }
    }
}

impl PowerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.saver_threshold_percent > 100 {
            return Err("power.saver_threshold_percent must be <= 100".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Downloads
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory under the cache root holding `.part` files.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,

    /// Longest wait for the response headers or for the next body bytes.
    /// A transfer that keeps receiving data never times out.
    ///
    /// Default: 60 seconds.
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout: Duration,

    /// Attempts for transport failures (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay; doubles per attempt.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay: Duration,

    /// Minimum percent change between progress reports.
    #[serde(default = "default_progress_step")]
    pub progress_step_percent: u8,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            scratch_dir: default_scratch_dir(),
            stall_timeout: default_stall_timeout(),
            max_attempts: default_max_attempts(),
            retry_base_delay: default_retry_base_delay(),
            progress_step_percent: default_progress_step(),
        }
    }
}

impl DownloadConfig {
    /// Backoff between resume attempts.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.retry_base_delay)
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_dir_name("download.scratch_dir", &self.scratch_dir)?;
        if self.max_attempts == 0 {
            return Err("download.max_attempts must be > 0".to_string());
        }
        if self.stall_timeout.is_zero() {
            return Err("download.stall_timeout must be > 0".to_string());
        }
        if self.progress_step_percent == 0 || self.progress_step_percent > 100 {
            return Err("download.progress_step_percent must be in 1..=100".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Vault
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Directory under the data root holding committed files.
    #[serde(default = "default_vault_dir")]
    pub vault_dir: String,

    /// Non-playable extension given to vault files.
    #[serde(default = "default_obscured_extension")]
    pub obscured_extension: String,

    /// Directory under the cache root for temporary playable copies.
    #[serde(default = "default_playback_dir")]
    pub playback_dir: String,

    #[serde(default = "default_playable_extension")]
    pub playable_extension: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            vault_dir: default_vault_dir(),
            obscured_extension: default_obscured_extension(),
            playback_dir: default_playback_dir(),
            playable_extension: default_playable_extension(),
        }
    }
}

impl VaultConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_dir_name("vault.vault_dir", &self.vault_dir)?;
        validate_dir_name("vault.playback_dir", &self.playback_dir)?;
        validate_extension("vault.obscured_extension", &self.obscured_extension)?;
        validate_extension("vault.playable_extension", &self.playable_extension)?;
        if self.obscured_extension.eq_ignore_ascii_case(&self.playable_extension) {
            return Err("vault.obscured_extension must differ from playable_extension".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Progress Tracking
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Position deltas at or above this are treated as seeks.
    ///
    /// Default: 1500 ms.
    #[serde(default = "default_max_tick")]
    pub max_tick: Duration,

    /// Persist once watched seconds exceed the last persisted value by more than this.
    #[serde(default = "default_persist_step")]
    pub persist_step_seconds: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            max_tick: default_max_tick(),
            persist_step_seconds: default_persist_step(),
        }
    }
}

impl ProgressConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_tick.is_zero() {
            return Err("progress.max_tick must be > 0".to_string());
        }
        Ok(())
    }

    pub fn max_tick_ms(&self) -> u64 {
        self.max_tick.as_millis() as u64
    }
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Pause after this long without user activity. `None` disables.
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: default_inactivity_timeout(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if matches!(self.inactivity_timeout, Some(t) if t.is_zero()) {
            return Err("session.inactivity_timeout must be > 0 when set".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Translations
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    /// Directory under the data root holding translation files.
    #[serde(default = "default_translation_dir")]
    pub directory: String,

    /// Entries kept in memory in front of the file store.
    #[serde(default = "default_translation_capacity")]
    pub memory_capacity: usize,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            directory: default_translation_dir(),
            memory_capacity: default_translation_capacity(),
        }
    }
}

impl TranslationConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_dir_name("translation.directory", &self.directory)?;
        if self.memory_capacity == 0 {
            return Err("translation.memory_capacity must be > 0".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Asset API
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Overrides `CoreConfig::api_base_url` for asset requests.
    #[serde(default)]
    pub base_url: Option<String>,
}

fn validate_dir_name(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} cannot be empty", field));
    }
    if value.contains("..") || value.starts_with('/') || value.starts_with('\\') {
        return Err(format!("{} must be a relative directory name", field));
    }
    Ok(())
}

fn validate_extension(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(format!("{} must be alphanumeric", field));
    }
    Ok(())
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_probe_url() -> String {
    "https://speed.cloudflare.com/__down?bytes=500000".to_string()
}

fn default_probe_payload_bytes() -> u64 {
    500_000
}

fn default_probe_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_saver_threshold() -> u8 {
    20
}

fn default_scratch_dir() -> String {
    "downloads".to_string()
}

fn default_stall_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_progress_step() -> u8 {
    1
}

fn default_vault_dir() -> String {
    "vault".to_string()
}

fn default_obscured_extension() -> String {
    "dat".to_string()
}

fn default_playback_dir() -> String {
    "playback".to_string()
}

fn default_playable_extension() -> String {
    "mp4".to_string()
}

fn default_max_tick() -> Duration {
    Duration::from_millis(1500)
}

fn default_persist_step() -> u64 {
    3
}

fn default_inactivity_timeout() -> Option<Duration> {
    Some(Duration::from_secs(30))
}

fn default_translation_dir() -> String {
    "Translations".to_string()
}

fn default_translation_capacity() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PlayerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.probe.interval, Duration::from_secs(10));
        assert_eq!(config.power.saver_threshold_percent, 20);
        assert_eq!(config.progress.max_tick_ms(), 1500);
        assert_eq!(config.session.inactivity_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.vault.obscured_extension, "dat");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PlayerConfig::from_json_str(
            r#"{ "session": { "inactivity_timeout": null }, "probe": { "smoothing": 0.5 } }"#,
        )
        .unwrap();

        assert_eq!(config.session.inactivity_timeout, None);
        assert_eq!(config.probe.smoothing, Some(0.5));
        assert_eq!(config.translation.directory, "Translations");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = PlayerConfig::default();
        config.probe.smoothing = Some(0.0);
        assert!(config.validate().is_err());

        let mut config = PlayerConfig::default();
        config.vault.vault_dir = "../escape".to_string();
        assert!(config.validate().is_err());

        let mut config = PlayerConfig::default();
        config.vault.obscured_extension = "MP4".to_string();
        assert!(config.validate().is_err());

        let mut config = PlayerConfig::default();
        config.download.max_attempts = 0;
        assert!(config.validate().is_err());

        assert!(PlayerConfig::from_json_str("{ not json").is_err());
    }
}
