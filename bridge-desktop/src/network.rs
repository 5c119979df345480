//! Reachability-based [`NetworkMonitor`].

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType},
};
use std::time::Duration;
use tracing::debug;

const FALLBACK_PROBE_ADDR: &str = "1.1.1.1:443";

/// Desktop connectivity: a TCP connect to the lesson API host.
///
/// A refused or timed-out connect reports `Disconnected`. Desktop links are
/// assumed unmetered. Changes are detected by polling.
#[derive(Debug, Clone)]
pub struct DesktopNetworkMonitor {
    probe_addr: String,
    connect_timeout: Duration,
    poll_interval: Duration,
}

impl DesktopNetworkMonitor {
    pub fn new() -> Self {
        Self {
            probe_addr: FALLBACK_PROBE_ADDR.to_string(),
            connect_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_secs(5),
        }
    }

    /// Probe the host serving `base_url` rather than a public resolver.
    pub fn for_api(base_url: &str) -> Self {
        let monitor = Self::new();
        match probe_addr_of(base_url) {
            Some(addr) => monitor.with_probe_addr(addr),
            None => monitor,
        }
    }

    pub fn with_probe_addr(mut self, addr: impl Into<String>) -> Self {
        self.probe_addr = addr.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn probe(&self) -> NetworkStatus {
        let connect = tokio::net::TcpStream::connect(self.probe_addr.as_str());
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(_)) => NetworkStatus::Connected,
            _ => NetworkStatus::Disconnected,
        }
    }
}

impl Default for DesktopNetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// `host:port` for a URL, defaulting the port from the scheme.
fn probe_addr_of(base_url: &str) -> Option<String> {
    let url = reqwest::Url::parse(base_url).ok()?;
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{}:{}", host, port))
}

#[async_trait]
impl NetworkMonitor for DesktopNetworkMonitor {
    async fn get_network_info(&self) -> Result<NetworkInfo> {
        let info = match self.probe().await {
            NetworkStatus::Connected => NetworkInfo::online(NetworkType::Other),
            _ => NetworkInfo::offline(),
        };
        debug!(probe = %self.probe_addr, status = ?info.status, "Probed connectivity");
        Ok(info)
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>> {
        let current = self.probe().await;
        Ok(Box::new(PollingStream {
            monitor: self.clone(),
            last: current,
        }))
    }
}

struct PollingStream {
    monitor: DesktopNetworkMonitor,
    last: NetworkStatus,
}

#[async_trait]
impl NetworkChangeStream for PollingStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        loop {
            tokio::time::sleep(self.monitor.poll_interval).await;
            let info = self.monitor.get_network_info().await.ok()?;
            if info.status != self.last {
                self.last = info.status;
                return Some(info);
            }
        }
    }
}
