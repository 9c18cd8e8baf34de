//! Cluster or host nodes

use super::{Entity, EntityCore};
use crate::collector::Collector;
use std::sync::Arc;

/// Metrics and metadata representing a node
pub struct Node {
    core: EntityCore,
}

impl Node {
    pub fn new(id: impl Into<String>, collector: Arc<dyn Collector>) -> Self {
        Self {
            core: EntityCore::new(id, collector),
        }
    }
}

impl Entity for Node {
    fn core(&self) -> &EntityCore {
        &self.core
    }
}
