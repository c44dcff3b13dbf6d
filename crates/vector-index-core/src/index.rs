//! Index orchestration and the explicit index registry.
//!
//! A [`VectorIndex`] bundles ordered sources, one embedding transformer,
//! and one storage provider under a name. It never rebuilds implicitly:
//! callers drive [`build`](VectorIndex::build) and
//! [`update`](VectorIndex::update), and the write path of the backing
//! store reports changes through [`object_saved`](VectorIndex::object_saved)
//! and [`object_deleted`](VectorIndex::object_deleted).
//!
//! An [`IndexRegistry`] is built once at startup and passed to whatever
//! needs lookups by name.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::TryStreamExt;
use indexmap::IndexMap;
use tracing::{info, warn};

use crate::embedding::{EmbeddingTransformer, DEFAULT_BATCH_SIZE};
use crate::error::{IndexError, Result};
use crate::models::Document;
use crate::query::{DocumentResults, OverfetchConfig, QueryHandler, SearchResults, SourceResults};
use crate::source::{IndexChange, IndexObject, MembershipRegistry, ObjectSource, Source};
use crate::store::StorageProvider;

/// Derive a collection-safe id from an index name: `MediaIndex` becomes
/// `media_index`, `Docs v2` becomes `docs_v2`.
pub fn index_id_for(name: &str) -> String {
    let mut id = String::with_capacity(name.len() + 4);
    let mut prev: Option<char> = None;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && prev.is_some_and(|p| p.is_lowercase() || p.is_numeric()) {
                id.push('_');
            }
            id.extend(c.to_lowercase());
        } else if !id.is_empty() && !id.ends_with('_') {
            id.push('_');
        }
        prev = Some(c);
    }
    id.trim_end_matches('_').to_string()
}

/// Outcome of a successful [`VectorIndex::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub index: String,
    pub documents: usize,
    pub elapsed: Duration,
}

/// A named, searchable configuration of sources, transformer, and storage.
pub struct VectorIndex {
    name: String,
    index_id: String,
    sources: Vec<Arc<dyn Source>>,
    transformer: Arc<dyn EmbeddingTransformer>,
    storage: Arc<dyn StorageProvider>,
    batch_size: usize,
    handler: QueryHandler,
}

pub struct VectorIndexBuilder {
    name: String,
    sources: Vec<Arc<dyn Source>>,
    transformer: Option<Arc<dyn EmbeddingTransformer>>,
    storage: Option<Arc<dyn StorageProvider>>,
    batch_size: usize,
    overfetch: OverfetchConfig,
}

impl VectorIndexBuilder {
    pub fn source(mut self, source: Arc<dyn Source>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn transformer(mut self, transformer: Arc<dyn EmbeddingTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn StorageProvider>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn overfetch(mut self, overfetch: OverfetchConfig) -> Self {
        self.overfetch = overfetch;
        self
    }

    /// Validate the wiring and point the storage provider at this index's
    /// collection.
    pub fn build(self) -> Result<VectorIndex> {
        let index_id = index_id_for(&self.name);
        if index_id.is_empty() {
            return Err(IndexError::config(format!(
                "index name '{}' has no usable characters",
                self.name
            )));
        }
        let transformer = self.transformer.ok_or_else(|| {
            IndexError::config(format!("index '{}' has no embedding transformer", self.name))
        })?;
        let storage = self.storage.ok_or_else(|| {
            IndexError::config(format!("index '{}' has no storage provider", self.name))
        })?;
        if self.sources.is_empty() {
            return Err(IndexError::config(format!(
                "index '{}' has no sources",
                self.name
            )));
        }
        if self.batch_size == 0 {
            return Err(IndexError::config("batch_size must be greater than 0"));
        }
        if self.overfetch.multiplier == 0 || self.overfetch.max_iterations == 0 {
            return Err(IndexError::config(
                "overfetch multiplier and max iterations must be at least 1",
            ));
        }
        for (i, source) in self.sources.iter().enumerate() {
            if self.sources[..i]
                .iter()
                .any(|s| s.source_id() == source.source_id())
            {
                return Err(IndexError::config(format!(
                    "index '{}' lists source '{}' twice",
                    self.name,
                    source.source_id()
                )));
            }
        }

        storage.set_index_name(&index_id);
        let handler = QueryHandler::new(
            self.sources.clone(),
            transformer.clone(),
            storage.clone(),
            self.overfetch,
        );
        Ok(VectorIndex {
            name: self.name,
            index_id,
            sources: self.sources,
            transformer,
            storage,
            batch_size: self.batch_size,
            handler,
        })
    }
}

impl fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources: Vec<&str> = self.sources.iter().map(|s| s.source_id()).collect();
        f.debug_struct("VectorIndex")
            .field("name", &self.name)
            .field("index_id", &self.index_id)
            .field("sources", &sources)
            .field("transformer", &self.transformer.transformer_id())
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl VectorIndex {
    pub fn builder(name: impl Into<String>) -> VectorIndexBuilder {
        VectorIndexBuilder {
            name: name.into(),
            sources: Vec::new(),
            transformer: None,
            storage: None,
            batch_size: DEFAULT_BATCH_SIZE,
            overfetch: OverfetchConfig::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    pub fn sources(&self) -> &[Arc<dyn Source>] {
        &self.sources
    }

    pub fn transformer(&self) -> &Arc<dyn EmbeddingTransformer> {
        &self.transformer
    }

    pub fn storage(&self) -> &Arc<dyn StorageProvider> {
        &self.storage
    }

    /// Pull every document from every source, in source order, and
    /// [`update`](Self::update) with them. Zero documents is a warning,
    /// not an error.
    pub async fn build(&self) -> Result<BuildReport> {
        let started = Instant::now();
        let mut documents = Vec::new();
        for source in &self.sources {
            info!(index = %self.name, source = source.source_id(), "collecting documents");
            let batch: Vec<Document> = source.documents().try_collect().await?;
            documents.extend(batch);
        }

        if documents.is_empty() {
            warn!(index = %self.name, "no documents provided by sources");
            return Ok(BuildReport {
                index: self.name.clone(),
                documents: 0,
                elapsed: started.elapsed(),
            });
        }

        let count = self.write(documents, true).await?;
        Ok(BuildReport {
            index: self.name.clone(),
            documents: count,
            elapsed: started.elapsed(),
        })
    }

    /// Embed and store `documents`, then run every source's
    /// `post_index_update` hook in declaration order with
    /// [`IndexChange::Written`]. Nothing is written if embedding fails.
    pub async fn update(&self, documents: Vec<Document>) -> Result<usize> {
        self.write(documents, false).await
    }

    async fn write(&self, documents: Vec<Document>, rebuild: bool) -> Result<usize> {
        let expected = documents.len();
        info!(index = %self.name, documents = expected, "embedding documents");
        let embedded = self
            .transformer
            .embed_documents(documents, self.batch_size)
            .await?;
        if embedded.len() != expected {
            return Err(IndexError::Integrity {
                operation: format!("embed documents for index '{}'", self.name),
                expected,
                actual: embedded.len(),
            });
        }

        info!(index = %self.name, documents = expected, "storing documents");
        self.storage.add(&embedded).await?;
        let change = if rebuild {
            IndexChange::Rebuilt
        } else {
            IndexChange::Written(&embedded[..])
        };
        self.run_hooks(change).await?;
        Ok(expected)
    }

    async fn run_hooks(&self, change: IndexChange<'_>) -> Result<()> {
        for source in &self.sources {
            source.post_index_update(self, change).await?;
        }
        Ok(())
    }

    pub async fn search_documents(&self, query: &str) -> Result<SearchResults<DocumentResults>> {
        self.handler.search_documents(query).await
    }

    pub async fn search_sources(&self, query: &str) -> Result<SearchResults<SourceResults>> {
        self.handler.search_sources(query).await
    }

    /// Objects similar to `object`. Only the object's first chunk is
    /// embedded, so long objects are represented by their opening.
    pub async fn find_similar(
        &self,
        object: &Arc<dyn IndexObject>,
    ) -> Result<SearchResults<SourceResults>> {
        self.handler.find_similar(object).await
    }

    pub async fn find_similar_documents(
        &self,
        object: &Arc<dyn IndexObject>,
    ) -> Result<SearchResults<DocumentResults>> {
        self.handler.find_similar_documents(object).await
    }

    /// Sources able to convert `object`, in declaration order.
    fn object_sources_for<'a>(
        &'a self,
        object: &'a Arc<dyn IndexObject>,
    ) -> impl Iterator<Item = &'a dyn ObjectSource> + 'a {
        self.sources
            .iter()
            .filter_map(|s| s.as_object_source())
            .filter(move |s| s.provides_object(object.as_ref()))
    }

    /// True when some source of this index can convert `object`.
    pub fn provides_object(&self, object: &Arc<dyn IndexObject>) -> bool {
        self.object_sources_for(object).next().is_some()
    }

    /// Re-embed and upsert `object` after its backing record changed.
    /// Returns the number of documents written; zero when no source of
    /// this index provides the object.
    pub async fn object_saved(&self, object: &Arc<dyn IndexObject>) -> Result<usize> {
        let mut documents = Vec::new();
        for source in self.object_sources_for(object) {
            documents.extend(source.objects_to_documents(std::slice::from_ref(object))?);
        }
        if documents.is_empty() {
            return Ok(0);
        }
        self.update(documents).await
    }

    /// Remove the documents `object` currently maps to.
    pub async fn object_deleted(&self, object: &Arc<dyn IndexObject>) -> Result<usize> {
        let mut documents = Vec::new();
        for source in self.object_sources_for(object) {
            documents.extend(source.objects_to_documents(std::slice::from_ref(object))?);
        }
        if documents.is_empty() {
            return Ok(0);
        }
        let keys: Vec<String> = documents.iter().map(|d| d.document_key.clone()).collect();
        self.storage.delete(&keys).await?;
        self.run_hooks(IndexChange::Removed(&documents[..])).await?;
        Ok(keys.len())
    }

    pub async fn delete_documents(&self, document_keys: &[String]) -> Result<()> {
        self.storage.delete(document_keys).await
    }

    /// Drop this index's collection. Other indexes sharing the backend are
    /// untouched.
    pub async fn clear(&self) -> Result<()> {
        self.storage.clear().await
    }
}

// ============ Registry ============

/// Result of rebuilding one index through [`IndexRegistry::build_all`].
#[derive(Debug)]
pub struct IndexOutcome {
    pub name: String,
    pub elapsed: Duration,
    pub result: Result<BuildReport>,
}

#[derive(Debug, Default)]
pub struct RebuildSummary {
    pub outcomes: Vec<IndexOutcome>,
    pub elapsed: Duration,
}

impl RebuildSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Named indexes, in registration order.
#[derive(Default)]
pub struct IndexRegistry {
    indexes: IndexMap<String, Arc<VectorIndex>>,
    membership: Option<Arc<dyn MembershipRegistry>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `membership` for [`indexes_for_object`](Self::indexes_for_object).
    pub fn with_membership(mut self, membership: Arc<dyn MembershipRegistry>) -> Self {
        self.membership = Some(membership);
        self
    }

    pub fn register(&mut self, index: VectorIndex) -> Result<Arc<VectorIndex>> {
        if self.indexes.contains_key(index.name()) {
            return Err(IndexError::config(format!(
                "index '{}' is already registered",
                index.name()
            )));
        }
        let index = Arc::new(index);
        self.indexes.insert(index.name().to_string(), index.clone());
        Ok(index)
    }

    pub fn get(&self, name: &str) -> Result<Arc<VectorIndex>> {
        self.indexes
            .get(name)
            .cloned()
            .ok_or_else(|| IndexError::not_found(format!("index '{name}'")))
    }

    pub fn names(&self) -> Vec<&str> {
        self.indexes.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<VectorIndex>> {
        self.indexes.values()
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Indexes recorded as containing the object. Falls back to every
    /// index with a source providing the object when no membership
    /// registry is configured.
    pub async fn indexes_for_object(
        &self,
        object: &Arc<dyn IndexObject>,
    ) -> Result<Vec<Arc<VectorIndex>>> {
        match &self.membership {
            Some(membership) => {
                let names = membership.indexes_for_object(&object.object_key()).await?;
                Ok(names
                    .iter()
                    .filter_map(|n| self.indexes.get(n).cloned())
                    .collect())
            }
            None => Ok(self
                .indexes
                .values()
                .filter(|i| i.provides_object(object))
                .cloned()
                .collect()),
        }
    }

    /// Propagate a save to every index whose sources provide the object,
    /// including ones that have not indexed it yet. Returns the names of
    /// the indexes written.
    pub async fn object_saved(&self, object: &Arc<dyn IndexObject>) -> Result<Vec<String>> {
        let mut updated = Vec::new();
        for index in self.indexes.values() {
            if index.object_saved(object).await? > 0 {
                updated.push(index.name().to_string());
            }
        }
        Ok(updated)
    }

    /// Propagate a delete to every index and drop the object's memberships.
    pub async fn object_deleted(&self, object: &Arc<dyn IndexObject>) -> Result<Vec<String>> {
        let mut touched = Vec::new();
        for index in self.indexes.values() {
            if index.object_deleted(object).await? > 0 {
                touched.push(index.name().to_string());
            }
        }
        if let Some(membership) = &self.membership {
            membership.remove_object(&object.object_key()).await?;
        }
        Ok(touched)
    }

    /// Rebuild the named indexes (all when `names` is empty) one after
    /// another. Unknown names fail the whole call before anything is built;
    /// individual build failures are reported per index.
    pub async fn build_all(&self, names: &[String]) -> Result<RebuildSummary> {
        let unknown: Vec<&String> = names
            .iter()
            .filter(|n| !self.indexes.contains_key(n.as_str()))
            .collect();
        if !unknown.is_empty() {
            return Err(IndexError::not_found(format!("unknown index names: {unknown:?}")));
        }

        let selected: Vec<Arc<VectorIndex>> = if names.is_empty() {
            self.indexes.values().cloned().collect()
        } else {
            names.iter().filter_map(|n| self.indexes.get(n).cloned()).collect()
        };

        let started = Instant::now();
        let mut summary = RebuildSummary::default();
        for index in selected {
            let t = Instant::now();
            let result = index.build().await;
            if let Err(e) = &result {
                warn!(index = index.name(), error = %e, "index rebuild failed");
            }
            summary.outcomes.push(IndexOutcome {
                name: index.name().to_string(),
                elapsed: t.elapsed(),
                result,
            });
        }
        summary.elapsed = started.elapsed();
        Ok(summary)
    }
}
