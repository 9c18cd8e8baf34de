//! Containers and the display filter applied to registry snapshots

use super::{Entity, EntityCore, RUNNING, STATE_KEY};
use crate::collector::Collector;
use crate::connector::Manager;
use crate::models::Metrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Metrics and metadata representing a container
pub struct Container {
    core: EntityCore,
    manager: Arc<dyn Manager>,
}

impl Container {
    pub fn new(
        id: impl Into<String>,
        collector: Arc<dyn Collector>,
        manager: Arc<dyn Manager>,
    ) -> Self {
        Self {
            core: EntityCore::new(id, collector),
            manager,
        }
    }

    /// Lifecycle actions for this container
    pub fn manager(&self) -> &Arc<dyn Manager> {
        &self.manager
    }

    pub fn set_metrics(&self, metrics: Metrics) {
        self.core.set_metrics(metrics);
    }

    pub fn set_display(&self, display: bool) {
        self.core.set_display(display);
    }

    /// Point-in-time copy for serialization
    pub fn view(&self) -> ContainerView {
        ContainerView {
            id: self.core.id().to_string(),
            display: self.core.display(),
            meta: self.core.meta_entries(),
            metrics: self.core.get_metrics(),
        }
    }
}

impl Entity for Container {
    fn core(&self) -> &EntityCore {
        &self.core
    }
}

/// Serializable snapshot of a container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerView {
    pub id: String,
    pub display: bool,
    pub meta: BTreeMap<String, String>,
    pub metrics: Metrics,
}

/// Decides which containers the UI shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayFilter {
    /// Substring the container name must contain; empty matches all
    #[serde(default)]
    pub pattern: String,
    /// Show containers in every state, not only running ones
    #[serde(default = "default_show_all")]
    pub show_all: bool,
}

fn default_show_all() -> bool {
    true
}

impl Default for DisplayFilter {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            show_all: default_show_all(),
        }
    }
}

impl DisplayFilter {
    pub fn matches(&self, container: &Container) -> bool {
        if !self.pattern.is_empty() && !container.get_meta("name").contains(&self.pattern) {
            return false;
        }
        self.show_all || container.get_meta(STATE_KEY) == RUNNING
    }

    /// Update every container's display flag and keep the visible ones
    pub fn apply(&self, containers: Vec<Arc<Container>>) -> Vec<Arc<Container>> {
        containers
            .into_iter()
            .filter(|container| {
                let display = self.matches(container);
                container.set_display(display);
                display
            })
            .collect()
    }
}
