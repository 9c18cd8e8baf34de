//! Service tasks

use super::{Entity, EntityCore};
use crate::collector::Collector;
use std::sync::Arc;

/// Metrics and metadata representing one task of a service
pub struct Task {
    core: EntityCore,
    service_id: String,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        service_id: impl Into<String>,
        collector: Arc<dyn Collector>,
    ) -> Self {
        Self {
            core: EntityCore::new(id, collector),
            service_id: service_id.into(),
        }
    }

    /// Id of the service this task belongs to
    pub fn service_id(&self) -> &str {
        &self.service_id
    }
}

impl Entity for Task {
    fn core(&self) -> &EntityCore {
        &self.core
    }
}
