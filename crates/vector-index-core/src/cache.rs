//! Content-addressed embedding cache.
//!
//! [`CachedEmbeddingTransformer`] wraps a base [`EmbeddingTransformer`] and
//! consults an [`EmbeddingCacheBackend`] before calling it. Entries are
//! keyed by `(sha256(content), base transformer id)`:
//!
//! - the hash covers the raw content only, never metadata;
//! - the partition is the *base* id, so every wrapper around the same base
//!   model shares entries, while the wrapper itself reports
//!   `cached_{base id}`.
//!
//! Entries are never invalidated implicitly. Two concurrent misses for the
//! same content may both compute and store; the backend keeps one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::embedding::EmbeddingTransformer;
use crate::error::{IndexError, Result};
use crate::models::{Document, EmbeddedDocument};

/// SHA-256 of `content` as lowercase hex. The cache key's content half.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Pluggable persistence for cached embeddings.
///
/// Backends receive raw content and hash it themselves with
/// [`content_hash`]. The batch methods default to sequential calls of the
/// single-item methods; backends with a bulk path should override them.
#[async_trait]
pub trait EmbeddingCacheBackend: Send + Sync {
    async fn get_embedding(&self, content: &str, transformer_id: &str) -> Result<Option<Vec<f32>>>;

    async fn store_embedding(
        &self,
        content: &str,
        transformer_id: &str,
        embedding: &[f32],
    ) -> Result<()>;

    /// Look up many contents at once. The returned map holds only hits,
    /// keyed by content.
    async fn get_embeddings_batch(
        &self,
        contents: &[String],
        transformer_id: &str,
    ) -> Result<HashMap<String, Vec<f32>>> {
        let mut found = HashMap::new();
        for content in contents {
            if found.contains_key(content) {
                continue;
            }
            if let Some(v) = self.get_embedding(content, transformer_id).await? {
                found.insert(content.clone(), v);
            }
        }
        Ok(found)
    }

    async fn store_embeddings_batch(
        &self,
        entries: &[(String, Vec<f32>)],
        transformer_id: &str,
    ) -> Result<()> {
        for (content, embedding) in entries {
            self.store_embedding(content, transformer_id, embedding).await?;
        }
        Ok(())
    }

    /// Remove every cached embedding, across all transformer ids.
    async fn clear_cache(&self) -> Result<()>;
}

/// Process-local cache backend.
#[derive(Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<(String, String), Vec<f32>>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl EmbeddingCacheBackend for InMemoryCacheBackend {
    async fn get_embedding(&self, content: &str, transformer_id: &str) -> Result<Option<Vec<f32>>> {
        let key = (content_hash(content), transformer_id.to_string());
        Ok(self.entries.read().get(&key).cloned())
    }

    async fn store_embedding(
        &self,
        content: &str,
        transformer_id: &str,
        embedding: &[f32],
    ) -> Result<()> {
        let key = (content_hash(content), transformer_id.to_string());
        self.entries.write().insert(key, embedding.to_vec());
        Ok(())
    }

    async fn clear_cache(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }
}

/// An [`EmbeddingTransformer`] that serves repeated content from a cache.
pub struct CachedEmbeddingTransformer {
    base: Arc<dyn EmbeddingTransformer>,
    backend: Arc<dyn EmbeddingCacheBackend>,
    id: String,
    hits: AtomicUsize,
}

impl CachedEmbeddingTransformer {
    pub fn new(base: Arc<dyn EmbeddingTransformer>, backend: Arc<dyn EmbeddingCacheBackend>) -> Self {
        let id = format!("cached_{}", base.transformer_id());
        Self {
            base,
            backend,
            id,
            hits: AtomicUsize::new(0),
        }
    }

    /// The id cache entries are partitioned under.
    pub fn base_transformer_id(&self) -> &str {
        self.base.transformer_id()
    }

    /// Number of documents or strings served from the cache so far.
    pub fn cache_hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn backend(&self) -> &Arc<dyn EmbeddingCacheBackend> {
        &self.backend
    }
}

#[async_trait]
impl EmbeddingTransformer for CachedEmbeddingTransformer {
    fn transformer_id(&self) -> &str {
        &self.id
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let documents = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Document::new(i.to_string(), t.clone()))
            .collect();
        let embedded = self.embed_documents(documents, texts.len().max(1)).await?;
        Ok(embedded.into_iter().map(|e| e.vector).collect())
    }

    async fn embed_string(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let base_id = self.base.transformer_id();
        if let Some(v) = self.backend.get_embedding(text, base_id).await? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(v));
        }
        let computed = self.base.embed_string(text).await?;
        if let Some(v) = &computed {
            self.backend.store_embedding(text, base_id, v).await?;
        }
        Ok(computed)
    }

    async fn embed_documents(
        &self,
        documents: Vec<Document>,
        batch_size: usize,
    ) -> Result<Vec<EmbeddedDocument>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let base_id = self.base.transformer_id();

        let contents: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let cached = self.backend.get_embeddings_batch(&contents, base_id).await?;

        let total = documents.len();
        let mut slots: Vec<Option<EmbeddedDocument>> = Vec::with_capacity(total);
        let mut misses = Vec::new();
        let mut miss_slots = Vec::new();

        for (i, doc) in documents.into_iter().enumerate() {
            match cached.get(&doc.content) {
                Some(vector) => {
                    debug!(document_key = %doc.document_key, "embedding cache hit");
                    slots.push(Some(doc.with_embedding(vector.clone())));
                }
                None => {
                    debug!(document_key = %doc.document_key, "embedding cache miss");
                    slots.push(None);
                    misses.push(doc);
                    miss_slots.push(i);
                }
            }
        }
        self.hits.fetch_add(total - misses.len(), Ordering::Relaxed);

        if !misses.is_empty() {
            let requested = misses.len();
            let embedded = self.base.embed_documents(misses, batch_size).await?;
            if embedded.len() != requested {
                return Err(IndexError::Integrity {
                    operation: format!("{base_id} embed uncached documents"),
                    expected: requested,
                    actual: embedded.len(),
                });
            }

            let mut fresh: IndexMap<String, Vec<f32>> = IndexMap::new();
            for e in &embedded {
                fresh
                    .entry(e.document.content.clone())
                    .or_insert_with(|| e.vector.clone());
            }
            let entries: Vec<(String, Vec<f32>)> = fresh.into_iter().collect();
            self.backend.store_embeddings_batch(&entries, base_id).await?;

            for (slot, e) in miss_slots.into_iter().zip(embedded) {
                slots[slot] = Some(e);
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
}
