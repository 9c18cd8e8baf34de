//! Backend connectors
//!
//! A connector owns the entity registry for one backend, runs the
//! discovery and refresh loops, and exposes the backend-agnostic
//! [`Connector`] contract consumed by the UI and by metrics routers.
//! Connectors are instantiated by key through [`by_name`].

mod manager;
mod mock;
mod registry;
mod runc;
mod runtime;

#[cfg(test)]
mod tests;

pub use manager::{Manager, ReadOnlyManager};
pub use mock::{
    CollectorFactory, MockConnector, MockContainer, MockHandle, MockManager, MockRuntime,
};
pub use registry::Registry;
pub use runc::{RuncCgroups, RuncConfig, RuncHandle, RuncOpts, RuncRuntime, RuncState};
pub use runtime::{ContainerRuntime, RuntimeConnector, RuntimeHandle};

use crate::entity::{Container, DisplayFilter, Node, Service, Task};
use crate::error::ConnectorError;
use crate::health::HealthRegistry;
use crate::models::Metrics;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Registry operations every backend provides
///
/// Snapshot methods return point-in-time copies; lookups never create
/// entities. Nodes, services and tasks are optional capabilities and
/// default to empty.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn all_nodes(&self) -> Vec<Arc<Node>> {
        Vec::new()
    }

    async fn all_services(&self) -> Vec<Arc<Service>> {
        Vec::new()
    }

    /// Containers passing the display filter, sorted by id
    async fn all_containers(&self) -> Vec<Arc<Container>>;

    async fn all_tasks(&self) -> Vec<Arc<Task>> {
        Vec::new()
    }

    async fn get_container(&self, id: &str) -> Option<Arc<Container>>;

    async fn get_service(&self, _id: &str) -> Option<Arc<Service>> {
        None
    }

    async fn get_task(&self, _id: &str) -> Option<Arc<Task>> {
        None
    }

    /// Route an externally produced snapshot to the entity with its id
    async fn set_metrics(&self, metrics: Metrics);

    /// Backend teardown hook
    async fn down(&self) {
        warn!("Call unsupported method, down()");
    }
}

/// Settings shared by every connector
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    /// Seconds between discovery passes
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_secs: u64,

    /// Capacity of the refresh queue
    #[serde(default = "default_refresh_queue_size")]
    pub refresh_queue_size: usize,

    /// Milliseconds between collector samples
    #[serde(default = "default_stats_interval")]
    pub stats_interval_ms: u64,

    #[serde(default)]
    pub filter: DisplayFilter,
}

fn default_discovery_interval() -> u64 {
    5
}

fn default_refresh_queue_size() -> usize {
    60
}

fn default_stats_interval() -> u64 {
    1000
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            discovery_interval_secs: default_discovery_interval(),
            refresh_queue_size: default_refresh_queue_size(),
            stats_interval_ms: default_stats_interval(),
            filter: DisplayFilter::default(),
        }
    }
}

impl ConnectorConfig {
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs.max(1))
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms.max(1))
    }
}

/// Builds and starts a connector; must run inside a tokio runtime
pub type Constructor =
    fn(&ConnectorConfig, &HealthRegistry) -> Result<Arc<dyn Connector>, ConnectorError>;

const ENABLED: &[(&str, Constructor)] = &[("runc", runc::new_runc), ("mock", mock::new_mock)];

/// Keys accepted by [`by_name`]
pub fn enabled() -> Vec<&'static str> {
    ENABLED.iter().map(|(name, _)| *name).collect()
}

/// Construct the connector registered under `name`
pub fn by_name(
    name: &str,
    config: &ConnectorConfig,
    health: &HealthRegistry,
) -> Result<Arc<dyn Connector>, ConnectorError> {
    match ENABLED.iter().find(|(key, _)| *key == name) {
        Some((_, constructor)) => constructor(config, health),
        None => Err(ConnectorError::InvalidConnector {
            name: name.to_string(),
            valid: ENABLED
                .iter()
                .map(|(key, _)| format!("\n  {key}"))
                .collect(),
        }),
    }
}
