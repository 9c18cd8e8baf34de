//! Monitored workload units
//!
//! Every entity variant (container, node, service, task) composes one
//! [`EntityCore`], which owns the metrics snapshot, the metadata, the
//! collector and the handle of the single metrics reader task. The
//! collector runs exactly when the last state passed to
//! [`EntityCore::set_state`] is [`RUNNING`].

mod container;
mod meta;
mod node;
mod service;
mod task;


pub use container::{Container, ContainerView, DisplayFilter};
pub use meta::{Meta, NoopUpdater, WidgetUpdater};
pub use node::Node;
pub use service::Service;
pub use task::Task;

use crate::collector::{Collector, LogCollector};
use crate::models::Metrics;
use crate::observability::DashboardMetrics;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument, Span};

/// State token for a running entity
pub const RUNNING: &str = "running";

/// Terminal state token; the entity is removed one refresh later
pub const DESTROYED: &str = "destroyed";

/// Meta key holding the state token
pub const STATE_KEY: &str = "state";

/// How long a new reader waits for the previous one to drain
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Read/write surface shared by every entity variant
#[async_trait]
pub trait Entity: Send + Sync {
    fn core(&self) -> &EntityCore;

    fn id(&self) -> &str {
        self.core().id()
    }

    fn get_meta(&self, key: &str) -> String {
        self.core().get_meta(key)
    }

    fn set_meta(&self, key: &str, value: &str) {
        self.core().set_meta(key, value)
    }

    fn get_metrics(&self) -> Metrics {
        self.core().get_metrics()
    }

    fn display(&self) -> bool {
        self.core().display()
    }

    fn logs(&self) -> Arc<dyn LogCollector> {
        self.core().logs()
    }

    async fn set_state(&self, state: &str) {
        self.core().set_state(state).await
    }
}

/// State shared between an entity and its reader task
struct EntityState {
    metrics: RwLock<Metrics>,
    meta: RwLock<Meta>,
    readers: AtomicUsize,
}

impl EntityState {
    fn updater(&self) -> Arc<dyn WidgetUpdater> {
        self.meta
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .updater()
    }

    fn replace_metrics(&self, metrics: Metrics) {
        let updater = self.updater();
        updater.set_metrics(&metrics);
        *self.metrics.write().unwrap_or_else(PoisonError::into_inner) = metrics;
    }

    fn reset(&self) {
        *self.metrics.write().unwrap_or_else(PoisonError::into_inner) = Metrics::default();
        self.updater().reset();
    }
}

/// Counts a live reader task for as long as it is held
struct ReaderGuard(Arc<EntityState>);

impl ReaderGuard {
    fn new(state: Arc<EntityState>) -> Self {
        state.readers.fetch_add(1, Ordering::SeqCst);
        DashboardMetrics::new().inc_readers_active();
        Self(state)
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.0.readers.fetch_sub(1, Ordering::SeqCst);
        DashboardMetrics::new().dec_readers_active();
    }
}

/// Behavior common to all entity variants
pub struct EntityCore {
    id: String,
    state: Arc<EntityState>,
    collector: Arc<dyn Collector>,
    reader: Mutex<Option<JoinHandle<()>>>,
    retired: AtomicBool,
}

impl EntityCore {
    pub fn new(id: impl Into<String>, collector: Arc<dyn Collector>) -> Self {
        let id = id.into();
        Self {
            state: Arc::new(EntityState {
                metrics: RwLock::new(Metrics::default()),
                meta: RwLock::new(Meta::new(&id)),
                readers: AtomicUsize::new(0),
            }),
            id,
            collector,
            reader: Mutex::new(None),
            retired: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get_meta(&self, key: &str) -> String {
        self.state
            .meta
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .to_string()
    }

    pub fn set_meta(&self, key: &str, value: &str) {
        let updater = {
            let mut meta = self.state.meta.write().unwrap_or_else(PoisonError::into_inner);
            meta.set(key, value);
            meta.updater()
        };
        updater.set_meta(key, value);
    }

    /// Copy of every metadata entry
    pub fn meta_entries(&self) -> BTreeMap<String, String> {
        self.state
            .meta
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .data()
            .clone()
    }

    pub fn display(&self) -> bool {
        self.state
            .meta
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .display()
    }

    pub fn set_display(&self, display: bool) {
        self.state
            .meta
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set_display(display);
    }

    pub fn set_updater(&self, updater: Arc<dyn WidgetUpdater>) {
        self.state
            .meta
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set_updater(updater);
    }

    pub fn get_metrics(&self) -> Metrics {
        self.state
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the snapshot with an externally produced value
    pub fn set_metrics(&self, metrics: Metrics) {
        self.state.replace_metrics(metrics);
    }

    pub fn logs(&self) -> Arc<dyn LogCollector> {
        self.collector.logs()
    }

    pub fn collector(&self) -> &Arc<dyn Collector> {
        &self.collector
    }

    /// Number of metrics reader tasks currently alive
    pub fn active_readers(&self) -> usize {
        self.state.readers.load(Ordering::SeqCst)
    }

    /// Record a state token and start or stop the collector to match it
    ///
    /// Idempotent. A reader task is spawned only when entering the running
    /// state with a stopped collector; leaving it stops the collector and
    /// lets the reader exit once the stream closes.
    pub async fn set_state(&self, state: &str) {
        // held across start so check-then-start cannot interleave
        let mut reader = self.reader.lock().await;

        if self.retired.load(Ordering::SeqCst) {
            debug!(id = %self.id, state, "Ignoring state change for retired entity");
            return;
        }
        self.set_meta(STATE_KEY, state);

        if state == RUNNING && !self.collector.running() {
            if let Some(previous) = reader.take() {
                self.join_reader(previous).await;
            }

            if let Err(e) = self.collector.start().await {
                warn!(id = %self.id, error = %e, "Failed to start collector");
                return;
            }

            match self.collector.stream() {
                Some(stream) => *reader = Some(self.read(stream)),
                None => warn!(id = %self.id, "Collector started without a metrics stream"),
            }
        }

        if state != RUNNING && self.collector.running() {
            self.collector.stop().await;
        }
    }

    /// Final teardown once the entity leaves its registry
    ///
    /// Records `destroyed`, stops the collector and waits for the reader to
    /// drain. Later `set_state` calls are ignored, so a refresh still holding
    /// the entity cannot restart its collector.
    pub async fn retire(&self) {
        let mut reader = self.reader.lock().await;
        if self.retired.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_meta(STATE_KEY, DESTROYED);

        if self.collector.running() {
            self.collector.stop().await;
        }
        if let Some(handle) = reader.take() {
            self.join_reader(handle).await;
        }
    }

    pub fn retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Wait for a stopped reader to observe stream closure
    async fn join_reader(&self, mut handle: JoinHandle<()>) {
        if tokio::time::timeout(READER_DRAIN_TIMEOUT, &mut handle)
            .await
            .is_err()
        {
            warn!(id = %self.id, "Previous reader did not drain, aborting it");
            handle.abort();
            let _ = handle.await;
            self.state.reset();
        }
    }

    /// Spawn the task consuming the collector's metrics stream
    fn read(&self, mut stream: mpsc::Receiver<Metrics>) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let guard = ReaderGuard::new(Arc::clone(&state));
        let id = self.id.clone();
        info!(id = %id, "Reader started");

        tokio::spawn(
            async move {
                let _guard = guard;
                while let Some(metrics) = stream.recv().await {
                    state.replace_metrics(metrics);
                }
                info!(id = %id, "Reader stopped");
                state.reset();
            }
            .instrument(Span::current()),
        )
    }
}
