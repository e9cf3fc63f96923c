use std::sync::Arc;

use crisismap_store::{
    AuthorizationRecord, CatalogEntryRecord, Datastore, MemorySearchIndex, MemoryStore,
    SearchIndex,
};
use serde_json::Value;

use crate::cache::Cache;

/// The model layer's caches. Every mutation site evicts the keys it affects.
pub struct Caches {
    /// Keyed by `[domain, label]`.
    pub catalog_entry: Cache<Option<CatalogEntryRecord>>,
    /// Keyed by domain, or `*` for all domains.
    pub catalog: Cache<Vec<CatalogEntryRecord>>,
    /// Keyed by domain, or `*` for all domains.
    pub listed_catalog: Cache<Vec<CatalogEntryRecord>>,
    /// Keyed by `[domain, label]`.
    pub published_map_root: Cache<Value>,
    /// Keyed by map ID.
    pub map_root: Cache<Value>,
    /// Keyed by API key.
    pub authorization: Cache<Option<AuthorizationRecord>>,
}

impl Caches {
    pub fn new() -> Self {
        Self {
            catalog_entry: Cache::new("model.catalog_entry", 300.0, 0.5),
            catalog: Cache::new("model.catalog", 300.0, 0.1),
            listed_catalog: Cache::new("model.listed_catalog", 300.0, 0.5),
            published_map_root: Cache::new("model.published_map_root", 300.0, 0.5),
            map_root: Cache::new("model.map_root", 300.0, 0.5),
            authorization: Cache::new("model.authorization", 300.0, 1.0),
        }
    }

    pub fn clear_all(&self) {
        self.catalog_entry.clear();
        self.catalog.clear();
        self.listed_catalog.clear();
        self.published_map_root.clear();
        self.map_root.clear();
        self.authorization.clear();
    }
}

impl Default for Caches {
    fn default() -> Self {
        Self::new()
    }
}

/// Central dependency container passed to every model operation.
#[derive(Clone)]
pub struct ModelDeps {
    pub store: Arc<dyn Datastore>,
    pub index: Arc<dyn SearchIndex>,
    pub caches: Arc<Caches>,
}

impl ModelDeps {
    pub fn new(store: Arc<dyn Datastore>, index: Arc<dyn SearchIndex>) -> Self {
        Self {
            store,
            index,
            caches: Arc::new(Caches::new()),
        }
    }

    /// Memory-backed deps for tests and local development.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySearchIndex::new()),
        )
    }
}
