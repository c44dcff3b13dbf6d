//! Storage abstraction for embedded documents.
//!
//! The [`StorageProvider`] trait is the contract every vector backend
//! meets, so callers see identical behavior from the in-memory, SQLite,
//! and Qdrant implementations.
//!
//! A provider owns one named collection ("index name") inside its backend.
//! The orchestrator assigns the name before first use, which lets one
//! provider type back many indexes. `clear` touches only that collection.
//!
//! Stored documents have two states, absent and present. `add` upserts by
//! document key; `delete` and `clear` remove.

pub mod memory;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{IndexError, Result};
use crate::models::{Document, EmbeddedDocument, MetadataValue};

/// A similarity query as a backend sees it.
///
/// `embedding` is required. `filters` are equality conditions on metadata
/// fields, ANDed. `offset` and `limit` select a window of the ranked
/// results, nearest first.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VectorQuery {
    pub embedding: Vec<f32>,
    pub filters: Vec<(String, MetadataValue)>,
    pub ordering: Vec<String>,
    pub offset: usize,
    pub limit: usize,
}

impl VectorQuery {
    pub fn new(embedding: Vec<f32>, offset: usize, limit: usize) -> Self {
        Self {
            embedding,
            offset,
            limit,
            ..Self::default()
        }
    }

    /// Reject shapes no backend can serve: a missing embedding, or ordering
    /// by anything other than similarity.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.is_empty() {
            return Err(IndexError::config(
                "an embedding filter is required for vector search",
            ));
        }
        if !self.ordering.is_empty() {
            return Err(IndexError::unsupported(format!(
                "ordering by {:?}; results are ranked by similarity only",
                self.ordering
            )));
        }
        Ok(())
    }

    /// True when `metadata` satisfies every equality filter, compared with
    /// [`MetadataValue::filter_matches`]. A missing field never matches.
    pub fn matches(&self, metadata: &crate::models::Metadata) -> bool {
        self.filters.iter().all(|(field, value)| {
            metadata
                .get(field)
                .is_some_and(|stored| value.filter_matches(stored))
        })
    }
}

/// Pluggable vector backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add`](StorageProvider::add) | Bulk upsert keyed by document key |
/// | [`delete`](StorageProvider::delete) | Remove keys; unknown keys are ignored |
/// | [`clear`](StorageProvider::clear) | Drop this provider's collection only |
/// | [`query`](StorageProvider::query) | Ranked, filtered, paginated search |
#[async_trait]
pub trait StorageProvider: Send + Sync {
    fn index_name(&self) -> String;

    /// Point the provider at another collection.
    fn set_index_name(&self, name: &str);

    /// Insert or update documents in one bulk operation. A key added twice
    /// holds only the latest content, metadata, and vector.
    async fn add(&self, documents: &[EmbeddedDocument]) -> Result<()>;

    async fn delete(&self, document_keys: &[String]) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    /// Return documents ranked by descending cosine similarity to
    /// `query.embedding`, windowed by `offset` and `limit`.
    async fn query(&self, query: &VectorQuery) -> Result<Vec<Document>>;
}

/// The mutable collection name shared by provider implementations.
#[derive(Debug, Default)]
pub struct IndexScope {
    name: RwLock<String>,
}

impl IndexScope {
    pub fn new(name: &str) -> Self {
        Self {
            name: RwLock::new(name.to_string()),
        }
    }

    pub fn get(&self) -> String {
        self.name.read().clone()
    }

    pub fn set(&self, name: &str) {
        *self.name.write() = name.to_string();
    }
}
