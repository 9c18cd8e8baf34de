//! Per-entity metrics collectors
//!
//! A collector produces a metrics stream and a log stream for one entity.
//! Backends differ in how samples are acquired (cgroup polling for runc,
//! synthetic values for the mock backend) but share the [`Collector`]
//! contract: `Stopped -> start() -> Running -> stop() -> Stopped`, with the
//! stream closing exactly once after stop takes effect or the underlying
//! resource disappears.

mod cgroup_v1;
mod cgroup_v2;
mod mock;
mod runc;

#[cfg(test)]
pub(crate) mod testing;

pub use cgroup_v1::{detect_cgroup_version, CgroupVersion};
pub use mock::MockCollector;
pub use runc::{CgroupSample, CgroupTarget, RuncCollector};

use crate::error::CollectorError;
use crate::models::{LogLine, Metrics};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn, Instrument, Span};

pub use async_trait::async_trait;

/// Capacity of a collector's metrics stream
const STREAM_BUFFER: usize = 16;

/// Metrics and log acquisition for a single entity
#[async_trait]
pub trait Collector: Send + Sync {
    /// Begin acquiring metrics. A failed start leaves the collector stopped.
    async fn start(&self) -> Result<(), CollectorError>;

    /// Signal acquisition to end; safe to call when never started
    async fn stop(&self);

    /// Whether the collector is currently started
    fn running(&self) -> bool;

    /// Take the stream opened by the most recent `start()`
    ///
    /// Returns `None` once the stream has been handed out, so at most one
    /// consumer exists per start.
    fn stream(&self) -> Option<mpsc::Receiver<Metrics>>;

    /// Log source for this entity, independent of run state
    fn logs(&self) -> Arc<dyn LogCollector>;
}

/// Log stream for a single entity
pub trait LogCollector: Send + Sync {
    fn stream(&self) -> mpsc::Receiver<LogLine>;
    fn stop(&self);
}

/// Log collector for backends without a log source
///
/// Hands out streams that are already closed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogCollector;

impl LogCollector for NoopLogCollector {
    fn stream(&self) -> mpsc::Receiver<LogLine> {
        let (_tx, rx) = mpsc::channel(1);
        rx
    }

    fn stop(&self) {}
}

/// Produces one metrics sample per poll tick
#[async_trait]
pub trait Sampler: Send + 'static {
    /// `Ok(None)` means the underlying resource is gone and polling ends
    async fn sample(&mut self) -> anyhow::Result<Option<Metrics>>;
}

/// Timer-driven acquisition shared by polling collectors
///
/// Owns the running flag, the not-yet-consumed stream and the stop signal
/// for the poll task. Dropping the poller stops the task.
pub struct Poller {
    id: String,
    period: Duration,
    running: AtomicBool,
    state: Mutex<PollerState>,
}

#[derive(Default)]
struct PollerState {
    stream: Option<mpsc::Receiver<Metrics>>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl Poller {
    pub fn new(id: impl Into<String>, period: Duration) -> Self {
        Self {
            id: id.into(),
            period,
            running: AtomicBool::new(false),
            state: Mutex::new(PollerState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the poll task feeding a fresh stream
    pub fn start<S: Sampler>(&self, mut sampler: S) -> Result<(), CollectorError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning(self.id.clone()));
        }

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let (stop_tx, mut stop_rx) = oneshot::channel();
        state.stream = Some(rx);
        state.stop_tx = Some(stop_tx);

        let id = self.id.clone();
        let mut ticker = interval(self.period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        _ = &mut stop_rx => break,
                        _ = ticker.tick() => {
                            let metrics = match sampler.sample().await {
                                Ok(Some(metrics)) => metrics,
                                Ok(None) => {
                                    debug!(id = %id, "Collected resource disappeared");
                                    break;
                                }
                                Err(e) => {
                                    warn!(id = %id, error = %e, "Failed to sample metrics");
                                    continue;
                                }
                            };
                            tokio::select! {
                                _ = &mut stop_rx => break,
                                sent = tx.send(metrics) => {
                                    if sent.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
                debug!(id = %id, "Poll task finished, closing stream");
            }
            .instrument(Span::current()),
        );

        Ok(())
    }

    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.running.store(false, Ordering::SeqCst);
        // an untaken stream would otherwise keep buffered samples around
        state.stream = None;
        if let Some(stop_tx) = state.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }

    pub fn stream(&self) -> Option<mpsc::Receiver<Metrics>> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stream
            .take()
    }
}
