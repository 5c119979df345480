//! # Core Configuration
//!
//! Host-facing configuration for the lesson player core: where state lives,
//! which API to talk to, and which platform bridges are injected.
//!
//! ## Overview
//!
//! `CoreConfig` is assembled with [`CoreConfigBuilder`]. Building fails fast
//! when a required capability is missing or when an enabled feature has no
//! bridge to back it, so misconfiguration surfaces at startup rather than in
//! the middle of a lesson.
//!
//! ## Required capabilities
//!
//! - [`KeyValueStore`]: durable store for download records and progress
//!
//! ## Optional capabilities
//!
//! - [`HttpClient`]: required by `adaptive_quality` and `offline_downloads`
//! - [`FileSystemAccess`]: required by `offline_downloads` and `offline_translations`
//! - [`NetworkMonitor`]: connectivity for offline fallback (assumed online when absent)
//! - [`PowerMonitor`]: battery state for saver mode (manual override only when absent)
//!
//! ## Desktop shims
//!
//! With the `desktop-shims` feature, [`CoreConfigBuilder::build_desktop`]
//! fills every missing bridge with the `bridge-desktop` implementation and
//! opens a SQLite key-value store at `database_path`.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .api_base_url("https://lessons.example.com/api")
//!     .database_path("/data/player/state.db")
//!     .cache_dir("/cache/player")
//!     .data_dir("/data/player")
//!     .kv_store(Arc::new(my_store))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{FileSystemAccess, HttpClient, KeyValueStore, NetworkMonitor, PowerMonitor};
use std::path::PathBuf;
use std::sync::Arc;

/// Core configuration for the lesson player
#[derive(Clone)]
pub struct CoreConfig {
    /// Base URL of the course/asset API, without trailing slash
    pub api_base_url: String,

    /// Location of the durable key-value database (desktop shims)
    pub database_path: PathBuf,

    /// Scratch area root (partial downloads, temporary playable copies)
    pub cache_dir: PathBuf,

    /// Durable area root (vault, translations)
    pub data_dir: PathBuf,

    pub http_client: Option<Arc<dyn HttpClient>>,

    pub file_system: Option<Arc<dyn FileSystemAccess>>,

    /// Durable store for `downloads` and `videoProgress`
    pub kv_store: Arc<dyn KeyValueStore>,

    pub network_monitor: Option<Arc<dyn NetworkMonitor>>,

    pub power_monitor: Option<Arc<dyn PowerMonitor>>,

    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("api_base_url", &self.api_base_url)
            .field("database_path", &self.database_path)
            .field("cache_dir", &self.cache_dir)
            .field("data_dir", &self.data_dir)
            .field(
                "http_client",
                &self.http_client.as_ref().map(|_| "HttpClient { ... }"),
            )
            .field(
                "file_system",
                &self
                    .file_system
                    .as_ref()
                    .map(|_| "FileSystemAccess { ... }"),
            )
            .field("kv_store", &"KeyValueStore { ... }")
            .field(
                "network_monitor",
                &self
                    .network_monitor
                    .as_ref()
                    .map(|_| "NetworkMonitor { ... }"),
            )
            .field(
                "power_monitor",
                &self.power_monitor.as_ref().map(|_| "PowerMonitor { ... }"),
            )
            .field("features", &self.features)
            .finish()
    }
}

/// Feature toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Periodic bandwidth probing and automatic rendition selection
    pub adaptive_quality: bool,

    /// Downloading lessons into the local vault
    pub offline_downloads: bool,

    /// Caching lesson translations on disk for offline reading
    pub offline_translations: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            adaptive_quality: true,
            offline_downloads: true,
            offline_translations: true,
        }
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validate paths, URL shape and feature/bridge consistency
    pub fn validate(&self) -> Result<()> {
        if self.api_base_url.is_empty() {
            return Err(Error::Config("API base URL cannot be empty".to_string()));
        }

        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            return Err(Error::Config(format!(
                "API base URL must start with http:// or https://, got '{}'",
                self.api_base_url
            )));
        }

        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("Cache directory cannot be empty".to_string()));
        }

        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("Data directory cannot be empty".to_string()));
        }

        if self.http_client.is_none()
            && (self.features.adaptive_quality || self.features.offline_downloads)
        {
            return Err(Error::CapabilityMissing {
                capability: "HttpClient".to_string(),
                message: "Adaptive quality and offline downloads need an HttpClient. \
                          Disable both features or inject an HttpClient implementation."
                    .to_string(),
            });
        }

        if self.file_system.is_none()
            && (self.features.offline_downloads || self.features.offline_translations)
        {
            return Err(Error::CapabilityMissing {
                capability: "FileSystemAccess".to_string(),
                message: "Offline downloads and offline translations need FileSystemAccess. \
                          Disable both features or inject a FileSystemAccess implementation."
                    .to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn kv_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "KeyValueStore".to_string(),
        message: "KeyValueStore implementation is required for download records and progress. \
                 Desktop: enable the 'desktop-shims' feature and use build_desktop(). \
                 Mobile: inject platform-native storage (UserDefaults/DataStore)."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn kv_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "KeyValueStore".to_string(),
        message: "KeyValueStore implementation is required for download records and progress. \
                 Use build_desktop() to open the default SQLite store."
            .to_string(),
    }
}

/// Builder for [`CoreConfig`]
#[derive(Default)]
pub struct CoreConfigBuilder {
    api_base_url: Option<String>,
    database_path: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    kv_store: Option<Arc<dyn KeyValueStore>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    power_monitor: Option<Arc<dyn PowerMonitor>>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn kv_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.kv_store = Some(store);
        self
    }

    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn power_monitor(mut self, monitor: Arc<dyn PowerMonitor>) -> Self {
        self.power_monitor = Some(monitor);
        self
    }

    pub fn enable_adaptive_quality(mut self, enabled: bool) -> Self {
        self.features.adaptive_quality = enabled;
        self
    }

    pub fn enable_offline_downloads(mut self, enabled: bool) -> Self {
        self.features.offline_downloads = enabled;
        self
    }

    pub fn enable_offline_translations(mut self, enabled: bool) -> Self {
        self.features.offline_translations = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<CoreConfig> {
        let api_base_url = self.api_base_url.ok_or_else(|| {
            Error::Config("API base URL is required. Use .api_base_url() to set it.".to_string())
        })?;

        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let cache_dir = self.cache_dir.ok_or_else(|| {
            Error::Config("Cache directory is required. Use .cache_dir() to set it.".to_string())
        })?;

        let data_dir = self.data_dir.ok_or_else(|| {
            Error::Config("Data directory is required. Use .data_dir() to set it.".to_string())
        })?;

        let kv_store = self.kv_store.ok_or_else(kv_store_missing_error)?;

        let config = CoreConfig {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            database_path,
            cache_dir,
            data_dir,
            http_client: self.http_client,
            file_system: self.file_system,
            kv_store,
            network_monitor: self.network_monitor,
            power_monitor: self.power_monitor,
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }

    /// Fill missing bridges with desktop implementations, then build.
    ///
    /// Async because opening the SQLite store needs the caller's runtime;
    /// the pool must live on the runtime that uses it.
    #[cfg(feature = "desktop-shims")]
    pub async fn build_desktop(mut self) -> Result<CoreConfig> {
        use bridge_desktop::{
            DesktopNetworkMonitor, DesktopPowerMonitor, ReqwestHttpClient, SqliteKeyValueStore,
            TokioFileSystem,
        };

        let database_path = self.database_path.clone().ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;
        let cache_dir = self.cache_dir.clone().ok_or_else(|| {
            Error::Config("Cache directory is required. Use .cache_dir() to set it.".to_string())
        })?;
        let data_dir = self.data_dir.clone().ok_or_else(|| {
            Error::Config("Data directory is required. Use .data_dir() to set it.".to_string())
        })?;

        if self.kv_store.is_none() {
            let store = SqliteKeyValueStore::new(database_path).await.map_err(|e| {
                Error::Internal(format!("Failed to initialize default KeyValueStore: {}", e))
            })?;
            self.kv_store = Some(Arc::new(store));
        }

        if self.http_client.is_none() {
            self.http_client = Some(Arc::new(ReqwestHttpClient::new()));
        }

        if self.file_system.is_none() {
            self.file_system = Some(Arc::new(TokioFileSystem::with_directories(
                cache_dir, data_dir,
            )));
        }

        if self.network_monitor.is_none() {
            let monitor = match &self.api_base_url {
                Some(url) => DesktopNetworkMonitor::for_api(url),
                None => DesktopNetworkMonitor::new(),
            };
            self.network_monitor = Some(Arc::new(monitor));
        }

        if self.power_monitor.is_none() {
            self.power_monitor = Some(Arc::new(DesktopPowerMonitor::new()));
        }

        self.build()
    }
}
