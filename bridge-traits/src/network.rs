//! Connectivity reporting.
//!
//! The core only needs to know whether remote fetches are worth trying:
//! offline, translations come from the cache and opening a lesson requires
//! a downloaded copy.

use async_trait::async_trait;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    Cellular,
    WiFi,
    Ethernet,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Connected,
    Disconnected,
    /// The platform could not tell, e.g. a captive portal or a probe timeout.
    Indeterminate,
}

impl NetworkStatus {
    /// Whether remote fetches should be attempted.
    ///
    /// Only a definite `Disconnected` counts as offline; real failures in
    /// the indeterminate case surface from the fetch itself.
    pub fn is_online(&self) -> bool {
        !matches!(self, NetworkStatus::Disconnected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub status: NetworkStatus,
    pub network_type: Option<NetworkType>,
    /// Data is capped or billed per byte.
    pub is_metered: bool,
}

impl NetworkInfo {
    pub fn offline() -> Self {
        Self {
            status: NetworkStatus::Disconnected,
            network_type: None,
            is_metered: false,
        }
    }

    pub fn online(network_type: NetworkType) -> Self {
        Self {
            status: NetworkStatus::Connected,
            network_type: Some(network_type),
            is_metered: network_type == NetworkType::Cellular,
        }
    }
}

/// Platform connectivity source: NWPathMonitor on iOS, ConnectivityManager
/// on Android, a reachability probe on desktop.
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    async fn get_network_info(&self) -> Result<NetworkInfo>;

    /// Changes from now on. The current state is read with
    /// [`get_network_info`](Self::get_network_info).
    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>>;
}

#[async_trait]
pub trait NetworkChangeStream: Send {
    /// `None` once the platform stops reporting.
    async fn next(&mut self) -> Option<NetworkInfo>;
}
