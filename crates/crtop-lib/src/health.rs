//! Component health for the dashboard backend
//!
//! Each component (discovery, refresh, api) tracks its open failures keyed
//! by subject: a container id for refresh, the component itself for
//! whole-pass failures. A component is degraded while any failure is open
//! and unhealthy once a fatal error is recorded. Clearing one subject never
//! clears another.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Component names for health tracking
pub mod components {
    /// Periodic enumeration of backend entities
    pub const DISCOVERY: &str = "discovery";
    /// Per-entity status refresh
    pub const REFRESH: &str = "refresh";
    pub const API: &str = "api";
}

/// Ordered from best to worst so the aggregate is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    /// Degraded components still serve requests
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

/// Point-in-time view of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Subjects with an open failure, sorted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failing: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate over every registered component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug)]
struct Component {
    failures: BTreeMap<String, String>,
    fatal: Option<String>,
    updated_at: DateTime<Utc>,
}

impl Component {
    fn new() -> Self {
        Self {
            failures: BTreeMap::new(),
            fatal: None,
            updated_at: Utc::now(),
        }
    }

    fn status(&self) -> ComponentStatus {
        if self.fatal.is_some() {
            ComponentStatus::Unhealthy
        } else if !self.failures.is_empty() {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }

    fn snapshot(&self) -> ComponentHealth {
        let message = match (&self.fatal, self.failures.iter().next()) {
            (Some(fatal), _) => Some(fatal.clone()),
            (None, Some((subject, error))) if self.failures.len() == 1 => {
                Some(format!("{subject}: {error}"))
            }
            (None, Some((subject, error))) => Some(format!(
                "{subject}: {error} (and {} more)",
                self.failures.len() - 1
            )),
            (None, None) => None,
        };

        ComponentHealth {
            status: self.status(),
            message,
            failing: self.failures.keys().cloned().collect(),
            updated_at: self.updated_at,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Default)]
struct Inner {
    components: RwLock<BTreeMap<String, Component>>,
    ready: AtomicBool,
}

/// Shared health state; clones observe the same components
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    inner: Arc<Inner>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `name` visible as healthy; keeps any failures already recorded
    pub async fn register(&self, name: &str) {
        self.inner
            .components
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(Component::new);
    }

    /// Open (or replace) the failure of `subject` within `name`
    pub async fn fail(&self, name: &str, subject: &str, message: impl Into<String>) {
        let mut components = self.inner.components.write().await;
        let component = components
            .entry(name.to_string())
            .or_insert_with(Component::new);
        component.failures.insert(subject.to_string(), message.into());
        component.touch();
    }

    /// Close the failure of `subject` within `name`, if one is open
    pub async fn recover(&self, name: &str, subject: &str) {
        let mut components = self.inner.components.write().await;
        if let Some(component) = components.get_mut(name) {
            if component.failures.remove(subject).is_some() {
                component.touch();
            }
        }
    }

    /// Whole-component failure, recorded under the component's own name
    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.fail(name, name, message).await;
    }

    /// Fatal error; only `set_healthy` clears it
    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        let mut components = self.inner.components.write().await;
        let component = components
            .entry(name.to_string())
            .or_insert_with(Component::new);
        component.fatal = Some(message.into());
        component.touch();
    }

    /// Clear the component-level failure and any fatal error
    ///
    /// Failures opened for other subjects stay open.
    pub async fn set_healthy(&self, name: &str) {
        let mut components = self.inner.components.write().await;
        let component = components
            .entry(name.to_string())
            .or_insert_with(Component::new);
        component.failures.remove(name);
        component.fatal = None;
        component.touch();
    }

    pub async fn set_ready(&self, ready: bool) {
        self.inner.ready.store(ready, Ordering::SeqCst);
    }

    pub async fn component(&self, name: &str) -> Option<ComponentHealth> {
        self.inner
            .components
            .read()
            .await
            .get(name)
            .map(Component::snapshot)
    }

    pub async fn health(&self) -> HealthResponse {
        let components: BTreeMap<String, ComponentHealth> = self
            .inner
            .components
            .read()
            .await
            .iter()
            .map(|(name, component)| (name.clone(), component.snapshot()))
            .collect();
        let status = components
            .values()
            .map(|health| health.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);

        HealthResponse { status, components }
    }

    /// Ready once the first discovery pass ran and nothing is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        if !self.inner.ready.load(Ordering::SeqCst) {
            return ReadinessResponse {
                ready: false,
                reason: Some("no discovery pass has completed".to_string()),
            };
        }

        let components = self.inner.components.read().await;
        let unhealthy = components
            .iter()
            .find(|(_, component)| !component.status().is_operational());

        match unhealthy {
            Some((name, _)) => ReadinessResponse {
                ready: false,
                reason: Some(format!("{name} is unhealthy")),
            },
            None => ReadinessResponse {
                ready: true,
                reason: None,
            },
        }
    }
}
