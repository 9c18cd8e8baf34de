//! Generic connector over a container runtime
//!
//! [`RuntimeConnector`] implements discovery, the serialized refresh loop
//! and the registry contract once; backends only describe how to list
//! container ids, load a handle, and read status from it.

use super::{Connector, ConnectorConfig, Manager, Registry};
use crate::collector::Collector;
use crate::entity::{Container, Entity, DESTROYED, STATE_KEY};
use crate::error::RuntimeError;
use crate::health::{components, HealthRegistry};
use crate::models::Metrics;
use crate::observability::DashboardMetrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument, Span};

/// Length of the display name derived from a container id
const SHORT_NAME_LEN: usize = 12;

/// Format of the `created` meta entry, e.g. `Mon Jan 2 15:04:05 2006`
const CREATED_FORMAT: &str = "%a %b %-d %H:%M:%S %Y";

/// Backend-native view of one container
#[async_trait]
pub trait RuntimeHandle: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Current lifecycle state token, e.g. `running` or `destroyed`
    async fn status(&self) -> Result<String, RuntimeError>;

    async fn created(&self) -> Result<DateTime<Utc>, RuntimeError>;

    fn rootfs(&self) -> Option<String>;
}

/// A container runtime a [`RuntimeConnector`] can observe
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    type Handle: RuntimeHandle;

    /// Backend key, used as the logging tag
    fn name(&self) -> &'static str;

    /// Ids of every container the backend can see
    async fn list(&self) -> Result<Vec<String>, RuntimeError>;

    /// Resolve the handle for `id`; [`RuntimeError::NotExists`] when gone
    async fn load(&self, id: &str) -> Result<Self::Handle, RuntimeError>;

    fn collector(&self, handle: &Self::Handle) -> Arc<dyn Collector>;

    fn manager(&self, handle: &Self::Handle) -> Arc<dyn Manager>;
}

/// Registry, discovery and refresh loop for one container runtime
pub struct RuntimeConnector<R: ContainerRuntime> {
    runtime: R,
    registry: RwLock<Registry<R::Handle>>,
    refresh_tx: mpsc::Sender<String>,
    refresh_rx: Mutex<Option<mpsc::Receiver<String>>>,
    config: ConnectorConfig,
    health: HealthRegistry,
    metrics: DashboardMetrics,
    span: Span,
    shutdown: broadcast::Sender<()>,
}

impl<R: ContainerRuntime> RuntimeConnector<R> {
    /// Create an idle connector; see [`RuntimeConnector::start`]
    pub fn new(runtime: R, config: ConnectorConfig, health: HealthRegistry) -> Arc<Self> {
        let (refresh_tx, refresh_rx) = mpsc::channel(config.refresh_queue_size.max(1));
        let (shutdown, _) = broadcast::channel(1);
        let span = info_span!("connector", backend = runtime.name());

        Arc::new(Self {
            runtime,
            registry: RwLock::new(Registry::new()),
            refresh_tx,
            refresh_rx: Mutex::new(Some(refresh_rx)),
            config,
            health,
            metrics: DashboardMetrics::new(),
            span,
            shutdown,
        })
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Spawn the discovery and refresh tasks
    pub fn start(self: &Arc<Self>) {
        self.spawn_refresh_loop();
        self.spawn_discovery_loop();
    }

    /// Stop both background tasks
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Stop both background tasks and retire every registered container
    pub async fn teardown(&self) {
        self.shutdown();
        let containers = self.registry.read().await.containers();
        for container in &containers {
            container.core().retire().await;
        }
        info!(count = containers.len(), "Stopped all container collectors");
    }

    /// Ids waiting in the refresh queue
    pub fn pending_refreshes(&self) -> usize {
        self.refresh_tx.max_capacity() - self.refresh_tx.capacity()
    }

    /// One discovery pass: register newly seen containers, drop vanished
    /// ones, then queue every registered id for refresh
    ///
    /// Blocks while the refresh queue is full.
    pub async fn discover(&self) {
        match self.runtime.list().await {
            Ok(ids) => {
                for id in &ids {
                    if let Some(handle) = self.load(id).await {
                        self.ensure(id, handle).await;
                    }
                }
                self.health.set_healthy(components::DISCOVERY).await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to enumerate containers");
                self.health
                    .set_degraded(components::DISCOVERY, e.to_string())
                    .await;
            }
        }

        let ids = self.registry.read().await.ids();
        self.metrics.set_entities_tracked(ids.len());
        for id in &ids {
            if self.refresh_tx.send(id.clone()).await.is_err() {
                warn!("Refresh queue closed");
                return;
            }
        }
        debug!(count = ids.len(), "Queued containers for refresh");
        self.metrics.inc_discovery_passes();
    }

    /// Bring one registered container in line with its backend state
    ///
    /// A container whose last recorded state is `destroyed` is removed
    /// here, one pass after it first reported that state.
    pub async fn refresh(&self, id: &str) {
        let started = Instant::now();

        let Some(handle) = self.load(id).await else {
            return;
        };
        let Some(container) = self
            .registry
            .write()
            .await
            .refresh_handle(id, handle.clone())
        else {
            return;
        };

        if container.get_meta(STATE_KEY) == DESTROYED {
            self.remove(id).await;
            return;
        }

        match handle.status().await {
            Ok(status) => {
                container.set_state(&status).await;
                self.health.recover(components::REFRESH, id).await;
            }
            Err(e) => {
                warn!(id, error = %e, "Failed to read status for container");
                self.metrics.inc_refresh_errors();
                self.health
                    .fail(components::REFRESH, id, e.to_string())
                    .await;
            }
        }

        match handle.created().await {
            Ok(created) => {
                let created = created.format(CREATED_FORMAT).to_string();
                container.set_meta("created", &created);
            }
            Err(e) => {
                warn!(id, error = %e, "Failed to read state for container");
                self.metrics.inc_refresh_errors();
            }
        }

        if let Some(rootfs) = handle.rootfs() {
            container.set_meta("rootfs", &rootfs);
        }

        self.metrics
            .observe_refresh_latency(started.elapsed().as_secs_f64());
    }

    /// Drop `id` from the registry and retire its entity
    pub async fn remove(&self, id: &str) -> Option<Arc<Container>> {
        let (removed, remaining) = {
            let mut registry = self.registry.write().await;
            let removed = registry.remove(id);
            (removed, registry.len())
        };

        let container = removed?;
        container.core().retire().await;
        self.health.recover(components::REFRESH, id).await;
        info!(id, "Removed dead container");
        self.metrics.inc_entities_removed();
        self.metrics.set_entities_tracked(remaining);
        Some(container)
    }

    /// Refresh every queued id on the calling task
    #[cfg(test)]
    pub(crate) async fn drain_refresh_queue(&self) -> usize {
        let taken = self
            .refresh_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut queue) = taken else {
            return 0;
        };

        let mut drained = 0;
        while let Ok(id) = queue.try_recv() {
            self.refresh(&id).await;
            drained += 1;
        }
        *self.refresh_rx.lock().unwrap_or_else(PoisonError::into_inner) = Some(queue);
        drained
    }

    /// Consume the refresh queue on a dedicated task, one id at a time
    ///
    /// The queue has a single consumer; later calls return `None`.
    pub fn spawn_refresh_loop(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut queue = self
            .refresh_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let connector: Weak<Self> = Arc::downgrade(self);
        let health = self.health.clone();
        let mut shutdown = self.shutdown.subscribe();

        let task = async move {
            health.register(components::REFRESH).await;
            loop {
                tokio::select! {
                    next = queue.recv() => {
                        let Some(id) = next else { break };
                        let Some(connector) = connector.upgrade() else { break };
                        connector.refresh(&id).await;
                    }
                    _ = shutdown.recv() => break,
                }
            }
            info!("Shutting down refresh loop");
        };
        Some(tokio::spawn(task.instrument(self.span.clone())))
    }

    /// Run a discovery pass every discovery interval, starting immediately
    pub fn spawn_discovery_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let connector: Weak<Self> = Arc::downgrade(self);
        let health = self.health.clone();
        let period = self.config.discovery_interval();
        let mut shutdown = self.shutdown.subscribe();

        let task = async move {
            health.register(components::DISCOVERY).await;
            info!(interval_secs = period.as_secs(), "Starting discovery loop");

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut first_pass = true;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.recv() => break,
                }
                let Some(connector) = connector.upgrade() else {
                    break;
                };
                tokio::select! {
                    _ = connector.discover() => {}
                    _ = shutdown.recv() => break,
                }
                if first_pass {
                    health.set_ready(true).await;
                    first_pass = false;
                }
            }
            info!("Shutting down discovery loop");
        };
        tokio::spawn(task.instrument(self.span.clone()))
    }

    /// Resolve a handle, dropping the container when the backend says it
    /// no longer exists
    async fn load(&self, id: &str) -> Option<R::Handle> {
        match self.runtime.load(id).await {
            Ok(handle) => Some(handle),
            Err(e) if e.is_not_exists() => {
                self.remove(id).await;
                None
            }
            Err(e) => {
                warn!(id, error = %e, "Failed to read container");
                None
            }
        }
    }

    /// Registered container for `id`, created and wired on first sight
    async fn ensure(&self, id: &str, handle: R::Handle) -> Arc<Container> {
        if let Some(existing) = self
            .registry
            .write()
            .await
            .refresh_handle(id, handle.clone())
        {
            return existing;
        }

        let container = Arc::new(Container::new(
            id,
            self.runtime.collector(&handle),
            self.runtime.manager(&handle),
        ));
        container.set_meta("name", &short_name(handle.id()));

        let (container, inserted) = self
            .registry
            .write()
            .await
            .insert_if_absent(id, container, handle);
        if inserted {
            debug!(id, "Saw new container");
        }
        container
    }
}

#[async_trait]
impl<R: ContainerRuntime> Connector for RuntimeConnector<R> {
    async fn all_containers(&self) -> Vec<Arc<Container>> {
        let snapshot = self.registry.read().await.containers();
        self.config.filter.apply(snapshot)
    }

    async fn get_container(&self, id: &str) -> Option<Arc<Container>> {
        self.registry.read().await.get(id)
    }

    async fn set_metrics(&self, metrics: Metrics) {
        if let Some(container) = self.get_container(&metrics.id).await {
            container.set_metrics(metrics);
        }
    }
}

fn short_name(id: &str) -> String {
    id.chars().take(SHORT_NAME_LEN).collect()
}
