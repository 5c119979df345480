//! # Platform Signal Hub
//!
//! Process-wide battery and connectivity readings shared by every open
//! session. Monitors are polled only while at least one [`SignalLease`] is
//! held; subscribers attach through `watch` receivers and come and go
//! independently of the lease count.

use bridge_traits::network::{NetworkInfo, NetworkMonitor};
use bridge_traits::power::{PowerInfo, PowerMonitor};
use core_runtime::events::{CoreEvent, EventBus, NetworkEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

fn is_connected(info: &NetworkInfo) -> bool {
    info.status.is_online()
}

#[derive(Default)]
struct LeaseState {
    count: usize,
    cancel: Option<CancellationToken>,
}

struct HubInner {
    network: Option<Arc<dyn NetworkMonitor>>,
    power: Option<Arc<dyn PowerMonitor>>,
    connectivity: watch::Sender<bool>,
    power_info: watch::Sender<Option<PowerInfo>>,
    leases: Mutex<LeaseState>,
    events: EventBus,
}

impl HubInner {
    fn publish_connectivity(&self, connected: bool) {
        let changed = self.connectivity.send_if_modified(|current| {
            if *current != connected {
                *current = connected;
                true
            } else {
                false
            }
        });
        if changed {
            info!(connected, "Connectivity changed");
            self.events
                .emit(CoreEvent::Network(NetworkEvent::ConnectivityChanged { connected }))
                .ok();
        }
    }

    fn publish_power(&self, info: PowerInfo) {
        self.power_info.send_if_modified(|current| {
            if current.as_ref() != Some(&info) {
                *current = Some(info);
                true
            } else {
                false
            }
        });
    }

    async fn read_once(&self) {
        if let Some(network) = &self.network {
            match network.get_network_info().await {
                Ok(info) => self.publish_connectivity(is_connected(&info)),
                Err(e) => warn!(error = %e, "Network status unavailable"),
            }
        }
        if let Some(power) = &self.power {
            match power.get_power_info().await {
                Ok(info) => self.publish_power(info),
                Err(e) => warn!(error = %e, "Power status unavailable"),
            }
        }
    }
}

/// Shared owner of the platform monitors.
#[derive(Clone)]
pub struct SignalHub {
    inner: Arc<HubInner>,
}

impl SignalHub {
    pub fn new(
        network: Option<Arc<dyn NetworkMonitor>>,
        power: Option<Arc<dyn PowerMonitor>>,
        events: EventBus,
    ) -> Self {
        let (connectivity, _) = watch::channel(true);
        let (power_info, _) = watch::channel(None);
        Self {
            inner: Arc::new(HubInner {
                network,
                power,
                connectivity,
                power_info,
                leases: Mutex::new(LeaseState::default()),
                events,
            }),
        }
    }

    /// Hub without platform monitors: always online, battery unknown.
    pub fn detached(events: EventBus) -> Self {
        Self::new(None, None, events)
    }

    /// Take a lease, starting the monitors on the first one.
    ///
    /// The current readings are refreshed before this returns. The lease is
    /// live from the start, so dropping this future mid-read releases it.
    pub async fn acquire(&self) -> SignalLease {
        let lease = {
            let mut leases = self.inner.leases.lock();
            leases.count += 1;
            if leases.count == 1 {
                let token = CancellationToken::new();
                leases.cancel = Some(token.clone());
                debug!("Starting signal monitors");
                self.spawn_pumps(token);
            }
            SignalLease {
                inner: self.inner.clone(),
            }
        };

        self.inner.read_once().await;
        lease
    }

    pub fn lease_count(&self) -> usize {
        self.inner.leases.lock().count
    }

    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.inner.connectivity.subscribe()
    }

    pub fn is_online(&self) -> bool {
        *self.inner.connectivity.borrow()
    }

    pub fn power(&self) -> watch::Receiver<Option<PowerInfo>> {
        self.inner.power_info.subscribe()
    }

    fn spawn_pumps(&self, token: CancellationToken) {
        if let Some(network) = self.inner.network.clone() {
            let inner = self.inner.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let mut stream = match network.subscribe_changes().await {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(error = %e, "Network change stream unavailable");
                        return;
                    }
                };
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        next = stream.next() => match next {
                            Some(info) => inner.publish_connectivity(is_connected(&info)),
                            None => break,
                        },
                    }
                }
                debug!("Network pump stopped");
            });
        }

        if let Some(power) = self.inner.power.clone() {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                let mut stream = match power.subscribe_changes().await {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(error = %e, "Power change stream unavailable");
                        return;
                    }
                };
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        next = stream.next() => match next {
                            Some(info) => inner.publish_power(info),
                            None => break,
                        },
                    }
                }
                debug!("Power pump stopped");
            });
        }
    }
}

/// Keeps the monitors running while alive.
pub struct SignalLease {
    inner: Arc<HubInner>,
}

impl Drop for SignalLease {
    fn drop(&mut self) {
        let mut leases = self.inner.leases.lock();
        leases.count = leases.count.saturating_sub(1);
        if leases.count == 0 {
            if let Some(token) = leases.cancel.take() {
                debug!("Stopping signal monitors");
                token.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::network::{NetworkChangeStream, NetworkType};
    use bridge_traits::power::PowerChangeStream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct FakeNetwork {
        connected: parking_lot::Mutex<bool>,
        changes: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<NetworkInfo>>>,
        subscriptions: AtomicUsize,
        read_delay: Duration,
    }

    struct ChannelStream<T>(mpsc::UnboundedReceiver<T>);

    #[async_trait]
    impl NetworkChangeStream for ChannelStream<NetworkInfo> {
        async fn next(&mut self) -> Option<NetworkInfo> {
            self.0.recv().await
        }
    }

    #[async_trait]
    impl PowerChangeStream for ChannelStream<PowerInfo> {
        async fn next(&mut self) -> Option<PowerInfo> {
            self.0.recv().await
        }
    }

    fn info(connected: bool) -> NetworkInfo {
        if connected {
            NetworkInfo::online(NetworkType::WiFi)
        } else {
            NetworkInfo::offline()
        }
    }

    #[async_trait]
    impl NetworkMonitor for FakeNetwork {
        async fn get_network_info(&self) -> BridgeResult<NetworkInfo> {
            tokio::time::sleep(self.read_delay).await;
            Ok(info(*self.connected.lock()))
        }

        async fn subscribe_changes(&self) -> BridgeResult<Box<dyn NetworkChangeStream>> {
            self.subscriptions.fetch_add(1, Ordering::SeqCst);
            let rx = match self.changes.lock().take() {
                Some(rx) => rx,
                None => mpsc::unbounded_channel().1,
            };
            Ok(Box::new(ChannelStream(rx)))
        }
    }

    struct FakePower {
        changes: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<PowerInfo>>>,
    }

    #[async_trait]
    impl PowerMonitor for FakePower {
        async fn get_power_info(&self) -> BridgeResult<PowerInfo> {
            Ok(PowerInfo {
                level_percent: Some(80),
                low_power_mode: false,
                is_charging: false,
            })
        }

        async fn subscribe_changes(&self) -> BridgeResult<Box<dyn PowerChangeStream>> {
            let rx = match self.changes.lock().take() {
                Some(rx) => rx,
                None => mpsc::unbounded_channel().1,
            };
            Ok(Box::new(ChannelStream(rx)))
        }
    }

    #[tokio::test]
    async fn test_initial_reading_and_change_stream() {
        let (net_tx, net_rx) = mpsc::unbounded_channel();
        let network = Arc::new(FakeNetwork {
            connected: parking_lot::Mutex::new(false),
            changes: parking_lot::Mutex::new(Some(net_rx)),
            subscriptions: AtomicUsize::new(0),
            read_delay: Duration::ZERO,
        });
        let events = EventBus::default();
        let mut event_rx = events.subscribe();
        let hub = SignalHub::new(Some(network), None, events);

        let lease = hub.acquire().await;
        assert!(!hub.is_online());
        assert_eq!(
            event_rx.recv().await.unwrap(),
            CoreEvent::Network(NetworkEvent::ConnectivityChanged { connected: false })
        );

        let mut rx = hub.connectivity();
        net_tx.send(info(true)).unwrap();
        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(*rx.borrow());
        drop(lease);
    }

    #[tokio::test]
    async fn test_pumps_follow_lease_count() {
        let network = Arc::new(FakeNetwork {
            connected: parking_lot::Mutex::new(true),
            changes: parking_lot::Mutex::new(None),
            subscriptions: AtomicUsize::new(0),
            read_delay: Duration::ZERO,
        });
        let hub = SignalHub::new(Some(network.clone()), None, EventBus::default());

        let first = hub.acquire().await;
        let second = hub.acquire().await;
        assert_eq!(hub.lease_count(), 2);
        tokio::task::yield_now().await;
        assert_eq!(network.subscriptions.load(Ordering::SeqCst), 1);

        drop(first);
        assert_eq!(hub.lease_count(), 1);
        drop(second);
        assert_eq!(hub.lease_count(), 0);

        // A new first lease starts the pumps again.
        let _third = hub.acquire().await;
        tokio::task::yield_now().await;
        assert_eq!(network.subscriptions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_power_subscribers_are_independent() {
        let (power_tx, power_rx) = mpsc::unbounded_channel();
        let power = Arc::new(FakePower {
            changes: parking_lot::Mutex::new(Some(power_rx)),
        });
        let hub = SignalHub::new(None, Some(power), EventBus::default());
        let _lease = hub.acquire().await;

        let mut a = hub.power();
        let b = hub.power();
        assert_eq!(a.borrow().and_then(|p| p.level_percent), Some(80));
        drop(b);

        power_tx
            .send(PowerInfo {
                level_percent: Some(15),
                low_power_mode: false,
                is_charging: false,
            })
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), a.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a.borrow().and_then(|p| p.level_percent), Some(15));
    }

    #[tokio::test]
    async fn test_detached_hub_is_online() {
        let hub = SignalHub::detached(EventBus::default());
        let _lease = hub.acquire().await;
        assert!(hub.is_online());
        assert!(hub.power().borrow().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_acquire_releases_its_lease() {
        let network = Arc::new(FakeNetwork {
            connected: parking_lot::Mutex::new(true),
            changes: parking_lot::Mutex::new(None),
            subscriptions: AtomicUsize::new(0),
            read_delay: Duration::from_secs(5),
        });
        let hub = SignalHub::new(Some(network.clone()), None, EventBus::default());

        let abandoned = tokio::time::timeout(Duration::from_secs(1), hub.acquire()).await;
        assert!(abandoned.is_err());
        assert_eq!(hub.lease_count(), 0);

        // The next first lease starts fresh pumps.
        let lease = hub.acquire().await;
        assert_eq!(hub.lease_count(), 1);
        tokio::task::yield_now().await;
        assert_eq!(network.subscriptions.load(Ordering::SeqCst), 2);

        drop(lease);
        assert_eq!(hub.lease_count(), 0);
    }
}
