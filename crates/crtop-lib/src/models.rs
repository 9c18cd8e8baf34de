//! Core data models shared by entities, collectors and connectors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latest resource usage snapshot for one entity
///
/// Snapshots are replaced wholesale; the default value is the empty
/// snapshot an entity falls back to once its collector stops.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub id: String,
    pub cpu_util: f64,
    pub net_rx: u64,
    pub net_tx: u64,
    pub mem_limit: u64,
    pub mem_percent: f64,
    pub mem_usage: u64,
    pub io_read: u64,
    pub io_write: u64,
    pub pids: u64,
}

impl Metrics {
    /// Empty snapshot tagged with an entity id
    pub fn for_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// True when this is the empty snapshot
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A single line emitted by a log collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}
