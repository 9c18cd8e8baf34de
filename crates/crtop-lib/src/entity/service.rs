//! Orchestrated services

use super::{Entity, EntityCore};
use crate::collector::Collector;
use std::sync::Arc;

/// Metrics and metadata representing a service
pub struct Service {
    core: EntityCore,
}

impl Service {
    pub fn new(id: impl Into<String>, collector: Arc<dyn Collector>) -> Self {
        Self {
            core: EntityCore::new(id, collector),
        }
    }
}

impl Entity for Service {
    fn core(&self) -> &EntityCore {
        &self.core
    }
}
