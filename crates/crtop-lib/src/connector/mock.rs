//! In-memory backend
//!
//! Serves synthetic containers and one host node without touching the
//! system. State changes made through [`MockRuntime`] or a container's
//! [`MockManager`] are observed on the next refresh, which makes this the
//! deterministic backend for tests.

use super::{
    Connector, ConnectorConfig, ContainerRuntime, Manager, RuntimeConnector, RuntimeHandle,
};
use crate::collector::{Collector, MockCollector};
use crate::entity::{Container, Entity, Node, RUNNING};
use crate::error::{ConnectorError, ManagerError, RuntimeError};
use crate::health::HealthRegistry;
use crate::models::Metrics;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{info, Instrument};

/// Builds the collector for a container id
pub type CollectorFactory = Arc<dyn Fn(&str) -> Arc<dyn Collector> + Send + Sync>;

const HOST_NODE_ID: &str = "host";

/// Containers the mock backend starts with
const SEED: &[(&str, &str)] = &[
    ("api-gateway", "running"),
    ("nginx-proxy", "running"),
    ("postgres-db", "running"),
    ("redis-cache", "paused"),
    ("report-worker-7f3c", "stopped"),
    ("schema-migrate", "created"),
];

/// A synthetic container
#[derive(Debug, Clone, PartialEq)]
pub struct MockContainer {
    pub id: String,
    pub status: String,
    pub created: DateTime<Utc>,
    pub rootfs: String,
}

impl MockContainer {
    pub fn new(id: impl Into<String>, status: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            rootfs: format!("/var/lib/mock/{id}/rootfs"),
            id,
            status: status.into(),
            created: Utc::now(),
        }
    }
}

#[derive(Default)]
struct MockState {
    containers: BTreeMap<String, MockContainer>,
    fail_load: HashSet<String>,
    fail_status: HashSet<String>,
    list_error: bool,
}

/// Shared, mutable set of synthetic containers
#[derive(Clone)]
pub struct MockRuntime {
    state: Arc<Mutex<MockState>>,
    collectors: CollectorFactory,
}

impl MockRuntime {
    /// Empty runtime building collectors with `collectors`
    pub fn new(collectors: CollectorFactory) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            collectors,
        }
    }

    /// Runtime pre-populated with a few containers in mixed states
    pub fn seeded(stats_interval: Duration) -> Self {
        let runtime = Self::new(Arc::new(move |id: &str| {
            Arc::new(MockCollector::new(id, stats_interval)) as Arc<dyn Collector>
        }));
        let now = Utc::now();
        for (age, (id, status)) in SEED.iter().enumerate() {
            let mut container = MockContainer::new(*id, *status);
            container.created = now - ChronoDuration::minutes(17 * (age as i64 + 1));
            runtime.insert(container);
        }
        runtime
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, container: MockContainer) {
        self.lock()
            .containers
            .insert(container.id.clone(), container);
    }

    pub fn add(&self, id: &str, status: &str) {
        self.insert(MockContainer::new(id, status));
    }

    /// Make `id` vanish from the backend
    pub fn remove(&self, id: &str) -> Option<MockContainer> {
        self.lock().containers.remove(id)
    }

    /// Change the status of a known container; false when unknown
    pub fn set_status(&self, id: &str, status: &str) -> bool {
        match self.lock().containers.get_mut(id) {
            Some(container) => {
                container.status = status.to_string();
                true
            }
            None => false,
        }
    }

    pub fn status(&self, id: &str) -> Option<String> {
        self.lock().containers.get(id).map(|c| c.status.clone())
    }

    /// Fail loads of `id` with a backend error other than "does not exist"
    pub fn set_fail_load(&self, id: &str, fail: bool) {
        toggle(&mut self.lock().fail_load, id, fail);
    }

    /// Fail status reads of `id`
    pub fn set_fail_status(&self, id: &str, fail: bool) {
        toggle(&mut self.lock().fail_status, id, fail);
    }

    /// Fail enumeration
    pub fn set_list_error(&self, fail: bool) {
        self.lock().list_error = fail;
    }
}

fn toggle(set: &mut HashSet<String>, id: &str, on: bool) {
    if on {
        set.insert(id.to_string());
    } else {
        set.remove(id);
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    type Handle = MockHandle;

    fn name(&self) -> &'static str {
        "mock"
    }

    async fn list(&self) -> Result<Vec<String>, RuntimeError> {
        let state = self.lock();
        if state.list_error {
            return Err(RuntimeError::Backend("injected list failure".into()));
        }
        Ok(state.containers.keys().cloned().collect())
    }

    async fn load(&self, id: &str) -> Result<MockHandle, RuntimeError> {
        let state = self.lock();
        if state.fail_load.contains(id) {
            return Err(RuntimeError::Backend(format!("injected load failure for {id}")));
        }
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| RuntimeError::NotExists(id.to_string()))?;
        Ok(MockHandle {
            container: container.clone(),
            runtime: self.clone(),
        })
    }

    fn collector(&self, handle: &MockHandle) -> Arc<dyn Collector> {
        (self.collectors)(handle.id())
    }

    fn manager(&self, handle: &MockHandle) -> Arc<dyn Manager> {
        Arc::new(MockManager {
            id: handle.id().to_string(),
            runtime: self.clone(),
        })
    }
}

/// Loaded synthetic container; status is read live from the runtime
#[derive(Clone)]
pub struct MockHandle {
    container: MockContainer,
    runtime: MockRuntime,
}

impl fmt::Debug for MockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockHandle")
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RuntimeHandle for MockHandle {
    fn id(&self) -> &str {
        &self.container.id
    }

    async fn status(&self) -> Result<String, RuntimeError> {
        let state = self.runtime.lock();
        if state.fail_status.contains(&self.container.id) {
            return Err(RuntimeError::Backend(format!(
                "injected status failure for {}",
                self.container.id
            )));
        }
        state
            .containers
            .get(&self.container.id)
            .map(|c| c.status.clone())
            .ok_or_else(|| RuntimeError::NotExists(self.container.id.clone()))
    }

    async fn created(&self) -> Result<DateTime<Utc>, RuntimeError> {
        Ok(self.container.created)
    }

    fn rootfs(&self) -> Option<String> {
        Some(self.container.rootfs.clone())
    }
}

/// Lifecycle actions applied to the mock runtime
pub struct MockManager {
    id: String,
    runtime: MockRuntime,
}

impl MockManager {
    fn transition(&self, status: &str) -> Result<(), ManagerError> {
        if self.runtime.set_status(&self.id, status) {
            Ok(())
        } else {
            Err(ManagerError::NotFound(self.id.clone()))
        }
    }
}

#[async_trait]
impl Manager for MockManager {
    async fn start(&self) -> Result<(), ManagerError> {
        self.transition("running")
    }

    async fn stop(&self) -> Result<(), ManagerError> {
        self.transition("stopped")
    }

    async fn pause(&self) -> Result<(), ManagerError> {
        self.transition("paused")
    }

    async fn unpause(&self) -> Result<(), ManagerError> {
        self.transition("running")
    }

    async fn restart(&self) -> Result<(), ManagerError> {
        self.transition("running")
    }

    async fn remove(&self) -> Result<(), ManagerError> {
        self.runtime
            .remove(&self.id)
            .map(|_| ())
            .ok_or_else(|| ManagerError::NotFound(self.id.clone()))
    }
}

/// Mock containers plus a synthetic host node
pub struct MockConnector {
    inner: Arc<RuntimeConnector<MockRuntime>>,
    host: Arc<Node>,
}

impl MockConnector {
    pub fn new(
        runtime: MockRuntime,
        config: ConnectorConfig,
        health: HealthRegistry,
    ) -> Arc<Self> {
        let host = Arc::new(Node::new(HOST_NODE_ID, (runtime.collectors)(HOST_NODE_ID)));
        Arc::new(Self {
            inner: RuntimeConnector::new(runtime, config, health),
            host,
        })
    }

    pub fn inner(&self) -> &Arc<RuntimeConnector<MockRuntime>> {
        &self.inner
    }

    pub fn host(&self) -> &Arc<Node> {
        &self.host
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn all_nodes(&self) -> Vec<Arc<Node>> {
        vec![Arc::clone(&self.host)]
    }

    async fn all_containers(&self) -> Vec<Arc<Container>> {
        self.inner.all_containers().await
    }

    async fn get_container(&self, id: &str) -> Option<Arc<Container>> {
        self.inner.get_container(id).await
    }

    async fn set_metrics(&self, metrics: Metrics) {
        if metrics.id == self.host.id() {
            self.host.core().set_metrics(metrics);
        } else {
            self.inner.set_metrics(metrics).await;
        }
    }

    async fn down(&self) {
        info!("Shutting down mock connector");
        self.inner.teardown().await;
        self.host.set_state("stopped").await;
    }
}

pub(super) fn new_mock(
    config: &ConnectorConfig,
    health: &HealthRegistry,
) -> Result<Arc<dyn Connector>, ConnectorError> {
    let runtime = MockRuntime::seeded(config.stats_interval());
    let connector = MockConnector::new(runtime, config.clone(), health.clone());
    connector.inner().start();

    let host = Arc::clone(connector.host());
    tokio::spawn(async move { host.set_state(RUNNING).await }.in_current_span());
    Ok(connector)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> MockRuntime {
        MockRuntime::seeded(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_seeded_runtime_lists_in_order() {
        let ids = runtime().list().await.unwrap();
        assert_eq!(ids.len(), SEED.len());
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[tokio::test]
    async fn test_handle_reads_live_status() {
        let runtime = runtime();
        let handle = runtime.load("redis-cache").await.unwrap();
        assert_eq!(handle.status().await.unwrap(), "paused");

        runtime.set_status("redis-cache", "running");
        assert_eq!(handle.status().await.unwrap(), "running");

        runtime.set_fail_status("redis-cache", true);
        assert!(handle.status().await.is_err());

        runtime.remove("redis-cache");
        runtime.set_fail_status("redis-cache", false);
        assert!(handle.status().await.unwrap_err().is_not_exists());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let runtime = runtime();
        runtime.set_fail_load("nginx-proxy", true);
        let err = runtime.load("nginx-proxy").await.unwrap_err();
        assert!(!err.is_not_exists());

        assert!(runtime.load("missing").await.unwrap_err().is_not_exists());

        runtime.set_list_error(true);
        assert!(runtime.list().await.is_err());
    }

    #[tokio::test]
    async fn test_handle_debug_names_container() {
        let handle = runtime().load("api-gateway").await.unwrap();
        let debug = format!("{handle:?}");
        assert!(debug.starts_with("MockHandle"));
        assert!(debug.contains("api-gateway"));
    }

    #[tokio::test]
    async fn test_manager_mutates_runtime() {
        let runtime = runtime();
        let handle = runtime.load("postgres-db").await.unwrap();
        let manager = runtime.manager(&handle);

        manager.pause().await.unwrap();
        assert_eq!(runtime.status("postgres-db").as_deref(), Some("paused"));
        manager.unpause().await.unwrap();
        assert_eq!(runtime.status("postgres-db").as_deref(), Some("running"));
        manager.stop().await.unwrap();
        assert_eq!(runtime.status("postgres-db").as_deref(), Some("stopped"));

        manager.remove().await.unwrap();
        assert!(runtime.status("postgres-db").is_none());
        assert!(matches!(
            manager.start().await,
            Err(ManagerError::NotFound(_))
        ));
    }
}
