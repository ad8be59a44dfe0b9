//! Ownership table of live map instances keyed by container id.

use dashmap::DashMap;
use std::sync::Arc;

use crate::host::MapHandle;

/// Map instances keyed by the id of the container they render into.
///
/// Injected into each [`crate::MapSynchronizer`]; a container owns at most one
/// map at a time.
#[derive(Default)]
pub struct MapRegistry {
    maps: DashMap<String, Arc<dyn MapHandle>>,
}

impl MapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `map` for `container_id`, disposing any map it replaces.
    pub fn register(&self, container_id: &str, map: Arc<dyn MapHandle>) {
        if let Some(previous) = self.maps.insert(container_id.to_string(), map) {
            tracing::debug!(container_id, "replacing registered map instance");
            previous.remove();
        }
    }

    pub fn get(&self, container_id: &str) -> Option<Arc<dyn MapHandle>> {
        self.maps.get(container_id).map(|m| Arc::clone(m.value()))
    }

    pub fn contains(&self, container_id: &str) -> bool {
        self.maps.contains_key(container_id)
    }

    /// Dispose and forget the map for `container_id`. Returns whether one existed.
    pub fn cleanup(&self, container_id: &str) -> bool {
        match self.maps.remove(container_id) {
            Some((_, map)) => {
                map.remove();
                tracing::debug!(container_id, "map instance cleaned up");
                true
            }
            None => false,
        }
    }

    pub fn cleanup_all(&self) -> usize {
        let ids: Vec<String> = self.maps.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.cleanup(id)).count()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}
