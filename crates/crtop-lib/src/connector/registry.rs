//! Entity registry owned by a connector
//!
//! Two parallel maps, `id -> Container` and `id -> backend handle`, that are
//! always mutated together. The owning connector guards the whole registry
//! with one lock.

use crate::entity::{Container, Entity};
use std::collections::HashMap;
use std::sync::Arc;

/// Live containers and their backend-native handles
pub struct Registry<H> {
    containers: HashMap<String, Arc<Container>>,
    handles: HashMap<String, H>,
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self {
            containers: HashMap::new(),
            handles: HashMap::new(),
        }
    }
}

impl<H> Registry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Container>> {
        self.containers.get(id).cloned()
    }

    pub fn handle(&self, id: &str) -> Option<&H> {
        self.handles.get(id)
    }

    /// Register `container` unless one already exists for `id`
    ///
    /// The handle is replaced either way. Returns the registered container
    /// and whether it was newly inserted.
    pub fn insert_if_absent(
        &mut self,
        id: &str,
        container: Arc<Container>,
        handle: H,
    ) -> (Arc<Container>, bool) {
        self.handles.insert(id.to_string(), handle);
        match self.containers.get(id) {
            Some(existing) => (Arc::clone(existing), false),
            None => {
                self.containers.insert(id.to_string(), Arc::clone(&container));
                (container, true)
            }
        }
    }

    /// Replace the handle of a registered container, returning the container
    pub fn refresh_handle(&mut self, id: &str, handle: H) -> Option<Arc<Container>> {
        let container = self.containers.get(id).cloned()?;
        self.handles.insert(id.to_string(), handle);
        Some(container)
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<Container>> {
        self.handles.remove(id);
        self.containers.remove(id)
    }

    /// Registered ids in sorted order
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.containers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Every registered container, sorted by id
    pub fn containers(&self) -> Vec<Arc<Container>> {
        let mut containers: Vec<Arc<Container>> = self.containers.values().cloned().collect();
        containers.sort_by(|a, b| a.id().cmp(b.id()));
        containers
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::testing::InstrumentedCollector;
    use crate::connector::ReadOnlyManager;

    fn container(id: &str) -> Arc<Container> {
        Arc::new(Container::new(
            id,
            InstrumentedCollector::new(),
            Arc::new(ReadOnlyManager::new("test")),
        ))
    }

    #[test]
    fn test_insert_if_absent_keeps_first_container() {
        let mut registry: Registry<u32> = Registry::new();

        let first = container("abc");
        let (registered, inserted) = registry.insert_if_absent("abc", first.clone(), 1);
        assert!(inserted);
        assert!(Arc::ptr_eq(&registered, &first));

        let (registered, inserted) = registry.insert_if_absent("abc", container("abc"), 2);
        assert!(!inserted);
        assert!(Arc::ptr_eq(&registered, &first));
        assert_eq!(registry.handle("abc"), Some(&2));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_drops_both_maps() {
        let mut registry: Registry<u32> = Registry::new();
        registry.insert_if_absent("abc", container("abc"), 1);

        assert!(registry.remove("abc").is_some());
        assert!(registry.get("abc").is_none());
        assert!(registry.handle("abc").is_none());
        assert!(registry.is_empty());
        assert!(registry.remove("abc").is_none());
    }

    #[test]
    fn test_refresh_handle_requires_registration() {
        let mut registry: Registry<u32> = Registry::new();
        assert!(registry.refresh_handle("abc", 1).is_none());
        assert!(registry.handle("abc").is_none());

        registry.insert_if_absent("abc", container("abc"), 1);
        assert!(registry.refresh_handle("abc", 5).is_some());
        assert_eq!(registry.handle("abc"), Some(&5));
    }

    #[test]
    fn test_snapshots_are_sorted() {
        let mut registry: Registry<u32> = Registry::new();
        for id in ["c", "a", "b"] {
            registry.insert_if_absent(id, container(id), 0);
        }

        assert_eq!(registry.ids(), vec!["a", "b", "c"]);
        let ids: Vec<String> = registry
            .containers()
            .iter()
            .map(|c| c.id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
