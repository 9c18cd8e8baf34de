//! Per-entity metadata and the UI update sink

use crate::models::Metrics;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Receiver of entity changes on the presentation side
///
/// The registry pushes updates through this sink so it never depends on
/// any rendering code.
pub trait WidgetUpdater: Send + Sync {
    fn set_metrics(&self, metrics: &Metrics);
    fn set_meta(&self, key: &str, value: &str);
    /// Clear any widgets showing this entity's metrics
    fn reset(&self);
}

/// Update sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUpdater;

impl WidgetUpdater for NoopUpdater {
    fn set_metrics(&self, _metrics: &Metrics) {}
    fn set_meta(&self, _key: &str, _value: &str) {}
    fn reset(&self) {}
}

/// Key/value metadata plus the display flag and update sink
#[derive(Clone)]
pub struct Meta {
    data: BTreeMap<String, String>,
    display: bool,
    updater: Arc<dyn WidgetUpdater>,
}

impl Meta {
    pub fn new(id: &str) -> Self {
        let mut data = BTreeMap::new();
        data.insert("id".to_string(), id.to_string());
        Self {
            data,
            display: false,
            updater: Arc::new(NoopUpdater),
        }
    }

    /// Value for `key`, or an empty string when unset
    pub fn get(&self, key: &str) -> &str {
        self.data.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.data.insert(key.to_string(), value.to_string());
    }

    pub fn data(&self) -> &BTreeMap<String, String> {
        &self.data
    }

    pub fn display(&self) -> bool {
        self.display
    }

    pub fn set_display(&mut self, display: bool) {
        self.display = display;
    }

    pub fn updater(&self) -> Arc<dyn WidgetUpdater> {
        Arc::clone(&self.updater)
    }

    pub fn set_updater(&mut self, updater: Arc<dyn WidgetUpdater>) {
        self.updater = updater;
    }
}

impl fmt::Debug for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Meta")
            .field("data", &self.data)
            .field("display", &self.display)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_last_write_wins() {
        let mut meta = Meta::new("abc");
        assert_eq!(meta.get("id"), "abc");
        assert_eq!(meta.get("state"), "");

        meta.set("state", "running");
        meta.set("state", "paused");
        assert_eq!(meta.get("state"), "paused");
        assert!(!meta.display());
    }

    #[test]
    fn test_meta_keys_are_ordered() {
        let mut meta = Meta::new("abc");
        meta.set("rootfs", "/rootfs");
        meta.set("created", "now");

        let keys: Vec<&str> = meta.data().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["created", "id", "rootfs"]);
    }
}
