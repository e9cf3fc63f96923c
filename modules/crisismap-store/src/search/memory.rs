use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tracing::debug;

use super::query::parse_query;
use super::{Document, SearchIndex};
use crate::error::StoreResult;

/// Linear-scan index held in process memory. Rebuilt from the datastore at
/// start-up.
#[derive(Default)]
pub struct MemorySearchIndex {
    documents: RwLock<HashMap<String, Document>>,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn put(&self, documents: Vec<Document>) {
        let mut index = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        for doc in documents {
            index.insert(doc.id.clone(), doc);
        }
    }

    async fn search(&self, query: &str, limit: usize) -> StoreResult<Vec<String>> {
        let parsed = parse_query(query)?;
        let index = self.documents.read().unwrap_or_else(PoisonError::into_inner);

        let mut hits: Vec<(&Document, f64)> = index
            .values()
            .filter(|doc| parsed.matches(doc))
            .map(|doc| (doc, doc.number_value("updated").unwrap_or(f64::MIN)))
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));

        debug!(query, hits = hits.len(), "Search index query");
        Ok(hits.into_iter().take(limit).map(|(doc, _)| doc.id.clone()).collect())
    }
}
