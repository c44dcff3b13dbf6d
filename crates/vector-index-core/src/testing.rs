//! Test doubles shared by unit tests across modules.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use crate::embedding::EmbeddingTransformer;
use crate::error::{IndexError, Result};
use crate::models::{Document, EmbeddedDocument};
use crate::source::{DocumentStream, Source};
use crate::store::{IndexScope, StorageProvider, VectorQuery};

/// Embeds `text` as `[byte length, 1.0]` and counts backend calls.
pub struct StaticTransformer {
    id: String,
    calls: AtomicUsize,
    texts: AtomicUsize,
}

impl StaticTransformer {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingTransformer for StaticTransformer {
    fn transformer_id(&self) -> &str {
        &self.id
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
    }
}

/// Always returns one vector fewer than requested.
pub struct ShortTransformer;

#[async_trait]
impl EmbeddingTransformer for ShortTransformer {
    fn transformer_id(&self) -> &str {
        "short"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().skip(1).map(|_| vec![1.0]).collect())
    }
}

/// Fails every call with a backend error.
pub struct FailingTransformer;

#[async_trait]
impl EmbeddingTransformer for FailingTransformer {
    fn transformer_id(&self) -> &str {
        "failing"
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(IndexError::backend("embedding request", "connection reset"))
    }
}

/// Embeds text as `[occurrences of "alpha", occurrences of "beta", 1.0]`
/// (case-insensitive), so similarity follows keyword overlap.
#[derive(Default)]
pub struct KeywordTransformer {
    calls: AtomicUsize,
}

impl KeywordTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingTransformer for KeywordTransformer {
    fn transformer_id(&self) -> &str {
        "keyword"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                vec![
                    lower.matches("alpha").count() as f32,
                    lower.matches("beta").count() as f32,
                    1.0,
                ]
            })
            .collect())
    }
}

/// Storage that ignores the embedding and replays a fixed ranking,
/// recording the window of every query.
pub struct ScriptedStorage {
    ranked: Vec<Document>,
    repeat_first: bool,
    scope: IndexScope,
    windows: Mutex<Vec<(usize, usize)>>,
}

impl ScriptedStorage {
    pub fn new(ranked: Vec<Document>) -> Self {
        Self {
            ranked,
            repeat_first: false,
            scope: IndexScope::new("scripted"),
            windows: Mutex::new(Vec::new()),
        }
    }

    /// Answer every query with `limit` copies of the first document, so
    /// results never run short and never gain new objects.
    pub fn repeating(document: Document) -> Self {
        Self {
            repeat_first: true,
            ..Self::new(vec![document])
        }
    }

    /// `(offset, limit)` of each query so far.
    pub fn windows(&self) -> Vec<(usize, usize)> {
        self.windows.lock().clone()
    }
}

#[async_trait]
impl StorageProvider for ScriptedStorage {
    fn index_name(&self) -> String {
        self.scope.get()
    }

    fn set_index_name(&self, name: &str) {
        self.scope.set(name);
    }

    async fn add(&self, _documents: &[EmbeddedDocument]) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _document_keys: &[String]) -> Result<()> {
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }

    async fn query(&self, query: &VectorQuery) -> Result<Vec<Document>> {
        query.validate()?;
        self.windows.lock().push((query.offset, query.limit));
        if self.repeat_first {
            return Ok(std::iter::repeat(self.ranked[0].clone())
                .take(query.limit)
                .collect());
        }
        Ok(self
            .ranked
            .iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }
}

/// A plain [`Source`] over a fixed document list.
pub struct StaticSource {
    id: String,
    documents: Vec<Document>,
}

impl StaticSource {
    pub fn new(id: &str, documents: Vec<Document>) -> Self {
        Self {
            id: id.to_string(),
            documents,
        }
    }
}

#[async_trait]
impl Source for StaticSource {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn documents(&self) -> DocumentStream<'_> {
        stream::iter(self.documents.clone().into_iter().map(Ok)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keyword_transformer_default_counts_from_zero() {
        let transformer = KeywordTransformer::default();
        assert_eq!(transformer.calls(), 0);
        let vectors = transformer
            .embed_batch(&["Alpha beta BETA".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 2.0, 1.0]]);
        assert_eq!(transformer.calls(), 1);
    }
}
