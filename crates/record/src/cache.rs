use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::graph::VertexField;

/// Per-connection vertex store supplying canonical vertex instances.
///
/// Message decoding consults it before materializing a transmitted vertex, so
/// vertices seen by earlier messages are reused.
pub trait VertexCache: Send + Sync {
    fn try_get(&self, vertex_id: &str) -> Option<Arc<VertexField>>;

    /// Stores `vertex` as the canonical instance for `vertex_id` and returns it.
    fn add_or_update(&self, vertex_id: &str, vertex: VertexField) -> Arc<VertexField>;
}

#[derive(Debug, Default)]
pub struct InMemoryVertexCache {
    vertices: RwLock<HashMap<String, Arc<VertexField>>>,
}

impl InMemoryVertexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.vertices
            .read()
            .expect("vertex cache lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VertexCache for InMemoryVertexCache {
    fn try_get(&self, vertex_id: &str) -> Option<Arc<VertexField>> {
        self.vertices
            .read()
            .expect("vertex cache lock poisoned")
            .get(vertex_id)
            .cloned()
    }

    fn add_or_update(&self, vertex_id: &str, vertex: VertexField) -> Arc<VertexField> {
        let vertex = Arc::new(vertex);
        self.vertices
            .write()
            .expect("vertex cache lock poisoned")
            .insert(vertex_id.to_string(), Arc::clone(&vertex));
        vertex
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_or_update_replaces_canonical_instance() {
        let cache = InMemoryVertexCache::new();
        assert!(cache.try_get("v1").is_none());
        let first = cache.add_or_update("v1", VertexField::new("v1", "person", "0"));
        let hit = cache.try_get("v1").expect("cached");
        assert!(Arc::ptr_eq(&first, &hit));

        let second = cache.add_or_update("v1", VertexField::new("v1", "robot", "0"));
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.try_get("v1").map(|v| v.label.clone()).as_deref(), Some("robot"));
        assert_eq!(cache.len(), 1);
    }
}
