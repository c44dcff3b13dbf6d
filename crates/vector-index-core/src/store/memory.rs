//! In-memory [`StorageProvider`] for tests and embedded use.
//!
//! Collections live in one shared map keyed by index name, so handles
//! created with [`InMemoryStorage::scoped`] behave like tenants of one
//! physical store. Search is a brute-force cosine scan; ties break on
//! document key so results are deterministic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::models::{Document, EmbeddedDocument};

use super::{IndexScope, StorageProvider, VectorQuery};

type Collections = HashMap<String, IndexMap<String, EmbeddedDocument>>;

pub struct InMemoryStorage {
    collections: Arc<RwLock<Collections>>,
    scope: IndexScope,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
            scope: IndexScope::new("default"),
        }
    }

    /// A new handle on the same collections with its own index name.
    pub fn scoped(&self, index_name: &str) -> Self {
        Self {
            collections: self.collections.clone(),
            scope: IndexScope::new(index_name),
        }
    }

    /// Number of documents in this handle's collection.
    pub fn count(&self) -> usize {
        self.collections
            .read()
            .get(&self.scope.get())
            .map_or(0, IndexMap::len)
    }

    pub fn get(&self, document_key: &str) -> Option<EmbeddedDocument> {
        self.collections
            .read()
            .get(&self.scope.get())
            .and_then(|c| c.get(document_key).cloned())
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageProvider for InMemoryStorage {
    fn index_name(&self) -> String {
        self.scope.get()
    }

    fn set_index_name(&self, name: &str) {
        self.scope.set(name);
    }

    async fn add(&self, documents: &[EmbeddedDocument]) -> Result<()> {
        let name = self.scope.get();
        let mut collections = self.collections.write();
        let collection = collections.entry(name).or_default();
        for doc in documents {
            collection.insert(doc.document_key().to_string(), doc.clone());
        }
        Ok(())
    }

    async fn delete(&self, document_keys: &[String]) -> Result<()> {
        let name = self.scope.get();
        if let Some(collection) = self.collections.write().get_mut(&name) {
            for key in document_keys {
                collection.shift_remove(key);
            }
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.collections.write().remove(&self.scope.get());
        Ok(())
    }

    async fn query(&self, query: &VectorQuery) -> Result<Vec<Document>> {
        query.validate()?;
        let collections = self.collections.read();
        let Some(collection) = collections.get(&self.scope.get()) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f32, &EmbeddedDocument)> = collection
            .values()
            .filter(|d| query.matches(&d.document.metadata))
            .map(|d| (cosine_similarity(&query.embedding, &d.vector), d))
            .collect();
        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.document_key().cmp(b.1.document_key()))
        });

        Ok(scored
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .map(|(_, d)| d.document.clone())
            .collect())
    }
}
