//! # Network Quality Estimator
//!
//! Periodically downloads a reference payload and publishes the observed
//! throughput. Probing is suspendable: while inactive no request is made.
//!
//! The estimate is published through a `tokio::sync::watch` channel so any
//! number of readers see the latest value without polling the estimator.

use crate::config::ProbeConfig;
use crate::error::{PlaybackError, Result};
use bridge_traits::http::{HttpClient, HttpRequest};
use core_runtime::events::{CoreEvent, EventBus, NetworkEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

const BITS_PER_MEGABIT: f64 = 1024.0 * 1024.0;

/// Latest bandwidth knowledge.
///
/// `NoSample` is distinct from a measured zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BandwidthEstimate {
    #[default]
    NoSample,
    Measured { bits_per_second: u64 },
}

impl BandwidthEstimate {
    /// Throughput in Mbps (`bits / 1024 / 1024`), if measured.
    pub fn mbps(&self) -> Option<f64> {
        match self {
            BandwidthEstimate::NoSample => None,
            BandwidthEstimate::Measured { bits_per_second } => {
                Some(*bits_per_second as f64 / BITS_PER_MEGABIT)
            }
        }
    }

    pub fn is_measured(&self) -> bool {
        matches!(self, BandwidthEstimate::Measured { .. })
    }

    /// Build an estimate from a Mbps figure (mostly for tests and hosts
    /// that measure bandwidth themselves).
    pub fn from_mbps(mbps: f64) -> Self {
        BandwidthEstimate::Measured {
            bits_per_second: (mbps.max(0.0) * BITS_PER_MEGABIT).round() as u64,
        }
    }
}

struct ProbeInner {
    http: Arc<dyn HttpClient>,
    config: ProbeConfig,
    events: EventBus,
    estimate: watch::Sender<BandwidthEstimate>,
}

impl ProbeInner {
    async fn sample(&self) -> Result<BandwidthEstimate> {
        let request = HttpRequest::get(&self.config.url)
            .header("Cache-Control", "no-cache")
            .timeout(self.config.timeout);

        let started = Instant::now();
        let outcome = self.http.execute(request).await;
        let elapsed = started.elapsed();

        let measured = match outcome {
            Ok(response) if response.is_success() => {
                let bytes = response.body.len() as u64;
                if bytes < self.config.payload_bytes {
                    Err(format!(
                        "truncated probe: {} of {} bytes",
                        bytes, self.config.payload_bytes
                    ))
                } else {
                    // Sub-millisecond transfers are clamped to avoid dividing by zero.
                    let secs = elapsed.as_secs_f64().max(0.001);
                    Ok((bytes as f64 * 8.0) / secs)
                }
            }
            Ok(response) => Err(format!("probe returned HTTP {}", response.status)),
            Err(e) => Err(e.to_string()),
        };

        match measured {
            Ok(bits_per_second) => {
                let next = self.smooth(bits_per_second);
                self.estimate.send_replace(next);

                if let BandwidthEstimate::Measured { bits_per_second } = next {
                    debug!(bits_per_second, elapsed_ms = elapsed.as_millis() as u64, "Bandwidth sampled");
                    self.events
                        .emit(CoreEvent::Network(NetworkEvent::BandwidthSampled { bits_per_second }))
                        .ok();
                }
                Ok(next)
            }
            Err(message) => {
                warn!(error = %message, "Bandwidth probe failed; keeping previous estimate");
                self.events
                    .emit(CoreEvent::Network(NetworkEvent::ProbeFailed {
                        message: message.clone(),
                    }))
                    .ok();
                Err(PlaybackError::NetworkProbe(message))
            }
        }
    }

    fn smooth(&self, sample: f64) -> BandwidthEstimate {
        let value = match (self.config.smoothing, *self.estimate.borrow()) {
            (Some(alpha), BandwidthEstimate::Measured { bits_per_second }) => {
                alpha * sample + (1.0 - alpha) * bits_per_second as f64
            }
            _ => sample,
        };
        BandwidthEstimate::Measured {
            bits_per_second: value.round() as u64,
        }
    }

    async fn run(self: Arc<Self>, mut active: watch::Receiver<bool>, shutdown: CancellationToken) {
        loop {
            // Park until probing is wanted.
            while !*active.borrow_and_update() {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    changed = active.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = self.sample() => {}
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.config.interval) => {}
                changed = active.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Count of consumers that want samples; probing runs while it is non-zero.
struct Demand {
    wanting: Mutex<usize>,
    active: watch::Sender<bool>,
}

impl Demand {
    fn adjust(&self, want: bool) {
        let mut wanting = self.wanting.lock();
        if want {
            *wanting += 1;
        } else {
            *wanting = wanting.saturating_sub(1);
        }
        let active = *wanting > 0;
        let changed = self.active.send_if_modified(|current| {
            if *current == active {
                false
            } else {
                *current = active;
                true
            }
        });
        if changed {
            debug!(active, consumers = *wanting, "Bandwidth probing toggled");
        }
    }
}

/// One consumer's interest in bandwidth samples.
///
/// Each session holds one and flips it as its quality mode, saver state and
/// source change. Dropping the handle withdraws its interest without
/// touching other consumers.
pub struct ProbeDemand {
    demand: Arc<Demand>,
    wanted: bool,
}

impl ProbeDemand {
    pub fn set(&mut self, wanted: bool) {
        if self.wanted != wanted {
            self.wanted = wanted;
            self.demand.adjust(wanted);
        }
    }

    pub fn is_wanted(&self) -> bool {
        self.wanted
    }
}

impl Drop for ProbeDemand {
    fn drop(&mut self) {
        self.set(false);
    }
}

/// Periodic bandwidth prober.
///
/// Created inactive. Consumers take a [`ProbeDemand`] and the estimator
/// probes while at least one of them wants samples; dropping the estimator
/// stops its task.
pub struct NetworkQualityEstimator {
    inner: Arc<ProbeInner>,
    demand: Arc<Demand>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkQualityEstimator {
    pub fn new(http: Arc<dyn HttpClient>, config: ProbeConfig, events: EventBus) -> Self {
        let (estimate, _) = watch::channel(BandwidthEstimate::NoSample);
        let (active, _) = watch::channel(false);
        Self {
            inner: Arc::new(ProbeInner {
                http,
                config,
                events,
                estimate,
            }),
            demand: Arc::new(Demand {
                wanting: Mutex::new(0),
                active,
            }),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Spawn the probe loop. Calling it again is a no-op.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() || self.shutdown.is_cancelled() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(
            inner.run(self.demand.active.subscribe(), self.shutdown.clone()),
        ));
    }

    /// Stop the probe loop permanently.
    pub fn stop(&self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    /// A new, initially idle, interest handle. The first handle to want
    /// samples resumes probing, which samples immediately.
    pub fn demand(&self) -> ProbeDemand {
        ProbeDemand {
            demand: Arc::clone(&self.demand),
            wanted: false,
        }
    }

    pub fn is_active(&self) -> bool {
        *self.demand.active.borrow()
    }

    pub fn current(&self) -> BandwidthEstimate {
        *self.inner.estimate.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<BandwidthEstimate> {
        self.inner.estimate.subscribe()
    }

    /// Take one sample now, regardless of the active flag.
    ///
    /// On failure the previous estimate is kept and
    /// [`PlaybackError::NetworkProbe`] is returned.
    #[instrument(skip(self))]
    pub async fn sample(&self) -> Result<BandwidthEstimate> {
        self.inner.sample().await
    }
}

impl Drop for NetworkQualityEstimator {
    fn drop(&mut self) {
        self.stop();
    }
}
