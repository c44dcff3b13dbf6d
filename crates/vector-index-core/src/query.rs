//! Query and result resolution.
//!
//! Storage ranks chunks, but callers usually want objects. A
//! [`SearchResults`] is a lazy, filterable, sliceable view over one
//! similarity query, parametrized by a [`ResultMode`]:
//!
//! - [`DocumentResults`] returns the storage window unchanged.
//! - [`SourceResults`] returns unique source objects ranked by their best
//!   chunk, over-fetching to make up for objects with many chunks.
//!
//! # Over-fetch
//!
//! With `total = offset + limit`, iteration `i` (from 0) fetches the top
//! `total × multiplier × (i + 1)` chunks and deduplicates them by object,
//! keeping first-seen (closest) order. New candidates are mapped to
//! objects with one bulk conversion per source; objects that no longer
//! exist drop out. It stops once `total` objects have resolved, after
//! `max_iterations` fetches, or when storage returns fewer chunks than
//! requested, then slices to `[offset, offset + limit)`. Window arithmetic
//! saturates, so an unbounded limit asks storage for everything.

use std::collections::HashMap;
use std::ops::Range;
use std::slice;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::embedding::EmbeddingTransformer;
use crate::error::{IndexError, Result};
use crate::models::{Document, MetadataValue};
use crate::source::{IndexObject, Source};
use crate::store::{StorageProvider, VectorQuery};

/// Results per page when the caller sets no limit.
pub const DEFAULT_LIMIT: usize = 10;

/// A search hit in object mode.
#[derive(Debug, Clone)]
pub enum ResolvedObject {
    /// An object resolved through an [`ObjectSource`](crate::source::ObjectSource).
    Object(Arc<dyn IndexObject>),
    /// A document from a plain source, or one no source claims.
    Document(Document),
}

impl ResolvedObject {
    /// Object key, or the document key for pass-through documents.
    pub fn key(&self) -> String {
        match self {
            ResolvedObject::Object(o) => o.object_key(),
            ResolvedObject::Document(d) => d.document_key.clone(),
        }
    }

    /// The resolved object as a concrete type, such as a record type
    /// returned by a [`RecordStore`](crate::source::RecordStore).
    /// `None` for pass-through documents or a different type.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        match self {
            ResolvedObject::Object(o) => o.as_any().downcast_ref::<T>(),
            ResolvedObject::Document(_) => None,
        }
    }

    /// The document behind a pass-through hit.
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            ResolvedObject::Document(d) => Some(d),
            ResolvedObject::Object(_) => None,
        }
    }
}

/// Over-fetch tuning for [`SourceResults`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverfetchConfig {
    /// Raw documents requested per needed object in the first batch.
    /// Later batches grow linearly with the iteration number.
    pub multiplier: usize,
    /// Batches to try before returning a short page.
    pub max_iterations: usize,
}

impl Default for OverfetchConfig {
    fn default() -> Self {
        Self {
            multiplier: 3,
            max_iterations: 3,
        }
    }
}

/// How a [`SearchResults`] turns a query window into items.
#[async_trait]
pub trait ResultMode: Clone + Send + Sync {
    type Item: Send;

    /// Items for `query`'s window, best first.
    async fn resolve(
        &self,
        storage: &dyn StorageProvider,
        query: &VectorQuery,
    ) -> Result<Vec<Self::Item>>;
}

/// Raw chunk documents, no deduplication.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentResults;

#[async_trait]
impl ResultMode for DocumentResults {
    type Item = Document;

    async fn resolve(
        &self,
        storage: &dyn StorageProvider,
        query: &VectorQuery,
    ) -> Result<Vec<Document>> {
        storage.query(query).await
    }
}

/// Unique source objects ranked by their closest chunk.
#[derive(Clone)]
pub struct SourceResults {
    sources: Vec<Arc<dyn Source>>,
    overfetch: OverfetchConfig,
}

/// A deduplicated hit before conversion: the owning source (by position)
/// and the closest document seen for it.
struct Candidate {
    owner: Option<usize>,
    document: Document,
}

impl SourceResults {
    /// `sources` in declaration order; the first source providing a
    /// document owns it.
    pub fn new(sources: Vec<Arc<dyn Source>>, overfetch: OverfetchConfig) -> Self {
        Self { sources, overfetch }
    }

    pub fn overfetch(&self) -> OverfetchConfig {
        self.overfetch
    }

    /// First source claiming the document. Later claimants are reported
    /// once per batch since overlapping ownership is a misconfiguration.
    fn owner_of(&self, document: &Document, warned: &mut bool) -> Option<usize> {
        let mut owners = self
            .sources
            .iter()
            .enumerate()
            .filter(|(_, s)| s.provides_document(document))
            .map(|(i, _)| i);
        let first = owners.next()?;
        if let Some(second) = owners.next() {
            if !*warned {
                warn!(
                    document_key = %document.document_key,
                    first = self.sources[first].source_id(),
                    second = self.sources[second].source_id(),
                    "multiple sources claim document; using the first"
                );
                *warned = true;
            }
        }
        Some(first)
    }

    /// Collapse ranked documents to one candidate per object, in
    /// first-seen order.
    fn dedupe(&self, documents: Vec<Document>) -> IndexMap<String, Candidate> {
        let mut unique: IndexMap<String, Candidate> = IndexMap::new();
        let mut warned = false;
        for document in documents {
            let owner = self.owner_of(&document, &mut warned);
            let key = owner
                .and_then(|i| self.sources[i].as_object_source())
                .and_then(|s| s.object_key_for_document(&document))
                .unwrap_or_else(|| document.document_key.clone());
            unique
                .entry(key)
                .or_insert(Candidate { owner, document });
        }
        unique
    }

    /// Convert the candidates not already in `resolved`, with one bulk
    /// fetch per source. Objects that no longer exist are recorded as
    /// `None` so later batches do not ask for them again.
    async fn resolve_new(
        &self,
        candidates: &IndexMap<String, Candidate>,
        resolved: &mut HashMap<String, Option<Arc<dyn IndexObject>>>,
    ) -> Result<()> {
        let mut groups: IndexMap<usize, Vec<(&str, &Document)>> = IndexMap::new();
        for (key, candidate) in candidates {
            if resolved.contains_key(key) {
                continue;
            }
            if let Some(i) = candidate.owner {
                if self.sources[i].as_object_source().is_some() {
                    groups
                        .entry(i)
                        .or_default()
                        .push((key.as_str(), &candidate.document));
                }
            }
        }

        for (i, pending) in groups {
            let Some(source) = self.sources[i].as_object_source() else {
                continue;
            };
            let documents: Vec<Document> = pending.iter().map(|(_, d)| (*d).clone()).collect();
            let mut found: HashMap<String, Arc<dyn IndexObject>> = HashMap::new();
            for object in source.objects_from_documents(&documents).await? {
                found.entry(object.object_key()).or_insert(object);
            }
            for (key, _) in pending {
                resolved.insert(key.to_string(), found.remove(key));
            }
        }
        Ok(())
    }

    /// Candidates as results, in rank order. Object candidates that did not
    /// resolve are skipped; plain documents pass through.
    fn hits(
        &self,
        candidates: &IndexMap<String, Candidate>,
        resolved: &HashMap<String, Option<Arc<dyn IndexObject>>>,
    ) -> Vec<ResolvedObject> {
        candidates
            .iter()
            .filter_map(|(key, candidate)| {
                let object_source = candidate
                    .owner
                    .and_then(|i| self.sources[i].as_object_source());
                match object_source {
                    Some(_) => resolved
                        .get(key)
                        .cloned()
                        .flatten()
                        .map(ResolvedObject::Object),
                    None => Some(ResolvedObject::Document(candidate.document.clone())),
                }
            })
            .collect()
    }
}

#[async_trait]
impl ResultMode for SourceResults {
    type Item = ResolvedObject;

    async fn resolve(
        &self,
        storage: &dyn StorageProvider,
        query: &VectorQuery,
    ) -> Result<Vec<ResolvedObject>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }
        let total_needed = query.offset.saturating_add(query.limit);
        let multiplier = self.overfetch.multiplier.max(1);
        let max_iterations = self.overfetch.max_iterations.max(1);

        let mut resolved = HashMap::new();
        let mut iteration: usize = 0;
        let hits = loop {
            let batch_size = total_needed
                .saturating_mul(multiplier)
                .saturating_mul(iteration.saturating_add(1));
            let batch = VectorQuery {
                offset: 0,
                limit: batch_size,
                ..query.clone()
            };
            let documents = storage.query(&batch).await?;
            let exhausted = documents.len() < batch_size;
            let candidates = self.dedupe(documents);
            self.resolve_new(&candidates, &mut resolved).await?;
            let hits = self.hits(&candidates, &resolved);
            iteration += 1;

            debug!(
                iteration,
                batch_size,
                unique = candidates.len(),
                resolved = hits.len(),
                total_needed,
                "over-fetch batch"
            );
            if hits.len() >= total_needed || iteration >= max_iterations || exhausted {
                break hits;
            }
        };

        Ok(hits
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }
}

/// A lazy similarity search. Nothing runs until [`fetch`](Self::fetch).
#[derive(Clone)]
pub struct SearchResults<M> {
    storage: Arc<dyn StorageProvider>,
    mode: M,
    query: VectorQuery,
}

impl<M: ResultMode> SearchResults<M> {
    /// An unfiltered search for `embedding` with the first
    /// [`DEFAULT_LIMIT`] results as its window.
    pub fn new(storage: Arc<dyn StorageProvider>, mode: M, embedding: Vec<f32>) -> Self {
        Self {
            storage,
            mode,
            query: VectorQuery::new(embedding, 0, DEFAULT_LIMIT),
        }
    }

    /// Restrict results to documents whose metadata `field` equals `value`.
    /// The embedding itself is not a metadata filter.
    pub fn filter(mut self, field: &str, value: impl Into<MetadataValue>) -> Result<Self> {
        if field.trim().is_empty() {
            return Err(IndexError::config("filter field must not be empty"));
        }
        if field == "embedding" {
            return Err(IndexError::config(
                "invalid filter field 'embedding': the query vector is set by the search call",
            ));
        }
        self.query.filters.push((field.to_string(), value.into()));
        Ok(self)
    }

    /// Record an ordering. Backends rank by similarity only, so fetching
    /// an ordered query fails with [`IndexError::Unsupported`].
    pub fn order_by(mut self, field: &str) -> Self {
        self.query.ordering.push(field.to_string());
        self
    }

    /// Skip the first `offset` results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = offset;
        self
    }

    /// Return at most `limit` results. Zero yields an empty page.
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = limit;
        self
    }

    /// Narrow the current window like a slice: `range` is relative to the
    /// current offset and clipped to the current limit.
    pub fn slice(mut self, range: Range<usize>) -> Self {
        let end = range.end.min(self.query.limit);
        let start = range.start.min(end);
        self.query.offset = self.query.offset.saturating_add(start);
        self.query.limit = end - start;
        self
    }

    pub fn query(&self) -> &VectorQuery {
        &self.query
    }

    /// Run the query. Each call hits storage again.
    ///
    /// # Errors
    ///
    /// [`IndexError::Unsupported`] for ordered queries, and any storage,
    /// source, or conversion failure.
    pub async fn fetch(&self) -> Result<Vec<M::Item>> {
        self.query.validate()?;
        self.mode.resolve(self.storage.as_ref(), &self.query).await
    }

    /// The top result of the current window, if any.
    pub async fn first(&self) -> Result<Option<M::Item>> {
        let single = self.clone().slice(0..1);
        Ok(single.fetch().await?.into_iter().next())
    }
}

/// Embeds queries and builds result sets for one index's components.
#[derive(Clone)]
pub struct QueryHandler {
    sources: Vec<Arc<dyn Source>>,
    transformer: Arc<dyn EmbeddingTransformer>,
    storage: Arc<dyn StorageProvider>,
    overfetch: OverfetchConfig,
}

impl QueryHandler {
    pub fn new(
        sources: Vec<Arc<dyn Source>>,
        transformer: Arc<dyn EmbeddingTransformer>,
        storage: Arc<dyn StorageProvider>,
        overfetch: OverfetchConfig,
    ) -> Self {
        Self {
            sources,
            transformer,
            storage,
            overfetch,
        }
    }

    /// Embed `query` and search raw chunk documents.
    pub async fn search_documents(&self, query: &str) -> Result<SearchResults<DocumentResults>> {
        let embedding = self.embed_query(query).await?;
        Ok(SearchResults::new(self.storage.clone(), DocumentResults, embedding))
    }

    /// Embed `query` and search unique source objects. Fails with
    /// [`IndexError::InvalidQuery`] on blank text.
    pub async fn search_sources(&self, query: &str) -> Result<SearchResults<SourceResults>> {
        let embedding = self.embed_query(query).await?;
        Ok(SearchResults::new(
            self.storage.clone(),
            self.source_mode(),
            embedding,
        ))
    }

    /// Objects similar to `object`, using its first chunk as the query.
    pub async fn find_similar(
        &self,
        object: &Arc<dyn IndexObject>,
    ) -> Result<SearchResults<SourceResults>> {
        let embedding = self.embed_object(object).await?;
        Ok(SearchResults::new(
            self.storage.clone(),
            self.source_mode(),
            embedding,
        ))
    }

    /// Chunk documents similar to `object`'s first chunk.
    pub async fn find_similar_documents(
        &self,
        object: &Arc<dyn IndexObject>,
    ) -> Result<SearchResults<DocumentResults>> {
        let embedding = self.embed_object(object).await?;
        Ok(SearchResults::new(self.storage.clone(), DocumentResults, embedding))
    }

    fn source_mode(&self) -> SourceResults {
        SourceResults::new(self.sources.clone(), self.overfetch)
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if query.trim().is_empty() {
            return Err(IndexError::InvalidQuery(
                "search query cannot be empty".into(),
            ));
        }
        self.embed_text(query, "embed search query").await
    }

    async fn embed_object(&self, object: &Arc<dyn IndexObject>) -> Result<Vec<f32>> {
        let source = self
            .sources
            .iter()
            .filter_map(|s| s.as_object_source())
            .find(|s| s.provides_object(object.as_ref()))
            .ok_or_else(|| {
                IndexError::InvalidQuery(format!(
                    "no configured source provides object {}",
                    object.object_key()
                ))
            })?;

        let documents = source.objects_to_documents(slice::from_ref(object))?;
        let first = documents.into_iter().next().ok_or_else(|| {
            IndexError::InvalidQuery(format!(
                "object {} produced no documents",
                object.object_key()
            ))
        })?;
        self.embed_text(&first.content, "embed similarity query").await
    }

    async fn embed_text(&self, text: &str, operation: &str) -> Result<Vec<f32>> {
        self.transformer
            .embed_string(text)
            .await?
            .ok_or_else(|| IndexError::Integrity {
                operation: operation.to_string(),
                expected: 1,
                actual: 0,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::FixedSizeChunker;
    use crate::source::{MapRecord, MemoryRecordStore, Record, RecordSource};
    use crate::testing::{KeywordTransformer, ScriptedStorage, StaticSource};

    type Books = MemoryRecordStore<MapRecord>;

    fn books(n: i64) -> Arc<Books> {
        Arc::new(MemoryRecordStore::new(
            "library.Book",
            (1..=n).map(|pk| MapRecord::new("library.Book", pk).with_field("title", format!("Book {pk}"))),
        ))
    }

    fn book_source(store: Arc<Books>) -> Arc<dyn Source> {
        Arc::new(
            RecordSource::builder(store)
                .chunker(Box::new(FixedSizeChunker::default()))
                .build()
                .unwrap(),
        )
    }

    /// A ranked chunk of book `pk`.
    fn chunk(pk: i64, idx: usize) -> Document {
        Document::new(format!("library.Book:{pk}:{idx}"), format!("chunk {idx} of {pk}"))
            .with_metadata("model", "library.Book")
            .with_metadata("pk", pk)
            .with_metadata("source_id", "library.Book")
    }

    fn pks(results: &[ResolvedObject]) -> Vec<i64> {
        results
            .iter()
            .map(|r| match r.downcast_ref::<MapRecord>().map(|b| b.field("title")) {
                Some(Some(MetadataValue::Text(t))) => t.trim_start_matches("Book ").parse().unwrap(),
                other => panic!("unexpected result {other:?}"),
            })
            .collect()
    }

    fn results<M: ResultMode>(storage: Arc<ScriptedStorage>, mode: M) -> SearchResults<M> {
        SearchResults::new(storage, mode, vec![1.0])
    }

    fn object_mode(store: Arc<Books>) -> SourceResults {
        SourceResults::new(vec![book_source(store)], OverfetchConfig::default())
    }

    #[tokio::test]
    async fn test_document_mode_returns_raw_chunks() {
        let storage = Arc::new(ScriptedStorage::new(vec![chunk(1, 0), chunk(1, 1), chunk(2, 0)]));
        let docs = results(storage, DocumentResults).fetch().await.unwrap();
        let keys: Vec<&str> = docs.iter().map(|d| d.document_key.as_str()).collect();
        assert_eq!(keys, vec!["library.Book:1:0", "library.Book:1:1", "library.Book:2:0"]);
    }

    #[tokio::test]
    async fn test_object_mode_deduplicates_chunks() {
        // A has three chunks ranked first, then B and C.
        let storage = Arc::new(ScriptedStorage::new(vec![
            chunk(1, 0),
            chunk(1, 1),
            chunk(1, 2),
            chunk(2, 0),
            chunk(3, 0),
        ]));
        let store = books(3);
        let found = results(storage, object_mode(store.clone()))
            .limit(2)
            .fetch()
            .await
            .unwrap();
        assert_eq!(pks(&found), vec![1, 2]);
        assert_eq!(store.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn test_offset_and_limit_slice_unique_objects() {
        let storage = Arc::new(ScriptedStorage::new((1..=5).map(|pk| chunk(pk, 0)).collect()));
        let found = results(storage, object_mode(books(5)))
            .slice(2..4)
            .fetch()
            .await
            .unwrap();
        assert_eq!(pks(&found), vec![3, 4]);
    }

    #[tokio::test]
    async fn test_overfetch_stops_at_max_iterations() {
        let storage = Arc::new(ScriptedStorage::repeating(chunk(1, 0)));
        let mode = SourceResults::new(
            vec![book_source(books(1))],
            OverfetchConfig {
                multiplier: 1,
                max_iterations: 2,
            },
        );
        let found = results(storage.clone(), mode).limit(10).fetch().await.unwrap();

        assert_eq!(pks(&found), vec![1]);
        assert_eq!(storage.windows(), vec![(0, 10), (0, 20)]);
    }

    #[tokio::test]
    async fn test_overfetch_stops_when_storage_runs_short() {
        let storage = Arc::new(ScriptedStorage::new(vec![chunk(1, 0), chunk(1, 1)]));
        let found = results(storage.clone(), object_mode(books(1)))
            .limit(5)
            .fetch()
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(storage.windows().len(), 1);
    }

    #[tokio::test]
    async fn test_custom_multiplier_sets_first_batch() {
        let storage = Arc::new(ScriptedStorage::new(vec![]));
        let mode = SourceResults::new(
            vec![book_source(books(1))],
            OverfetchConfig {
                multiplier: 5,
                max_iterations: 3,
            },
        );
        let found = results(storage.clone(), mode).limit(2).fetch().await.unwrap();
        assert!(found.is_empty());
        assert_eq!(storage.windows(), vec![(0, 10)]);
    }

    #[tokio::test]
    async fn test_plain_source_documents_pass_through() {
        let doc = Document::new("notes:doc1", "free text");
        let storage = Arc::new(ScriptedStorage::new(vec![doc.clone()]));
        let notes: Arc<dyn Source> = Arc::new(StaticSource::new("notes", vec![]));
        let mode = SourceResults::new(vec![notes], OverfetchConfig::default());

        let found = results(storage, mode).fetch().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].as_document(), Some(&doc));
    }

    #[tokio::test]
    async fn test_missing_objects_are_skipped() {
        let storage = Arc::new(ScriptedStorage::new(vec![chunk(9, 0), chunk(1, 0)]));
        let found = results(storage, object_mode(books(1))).fetch().await.unwrap();
        assert_eq!(pks(&found), vec![1]);
    }

    #[tokio::test]
    async fn test_missing_objects_do_not_fill_the_page() {
        let storage = Arc::new(ScriptedStorage::new(vec![
            chunk(97, 0),
            chunk(98, 0),
            chunk(99, 0),
            chunk(1, 0),
        ]));
        let store = books(1);
        let found = results(storage.clone(), object_mode(store.clone()))
            .limit(1)
            .fetch()
            .await
            .unwrap();

        assert_eq!(pks(&found), vec![1]);
        assert_eq!(storage.windows(), vec![(0, 3), (0, 6)]);
        // Books 97..99 are looked up once, not again in the second batch.
        assert_eq!(store.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn test_unbounded_window_saturates() {
        let storage = Arc::new(ScriptedStorage::new(vec![chunk(1, 0), chunk(2, 0)]));
        let found = results(storage.clone(), object_mode(books(2)))
            .limit(usize::MAX)
            .fetch()
            .await
            .unwrap();
        assert_eq!(pks(&found), vec![1, 2]);
        assert_eq!(storage.windows(), vec![(0, usize::MAX)]);

        let past_end = results(storage.clone(), object_mode(books(2)))
            .offset(usize::MAX)
            .limit(usize::MAX)
            .fetch()
            .await
            .unwrap();
        assert!(past_end.is_empty());

        let docs = results(storage, DocumentResults)
            .offset(usize::MAX)
            .limit(usize::MAX)
            .fetch()
            .await
            .unwrap();
        assert!(docs.is_empty());
    }

    #[test]
    fn test_slice_offset_saturates() {
        let storage = Arc::new(ScriptedStorage::new(vec![]));
        let r = results(storage, DocumentResults)
            .offset(usize::MAX - 1)
            .limit(10)
            .slice(5..10);
        assert_eq!((r.query().offset, r.query().limit), (usize::MAX, 5));
    }

    #[tokio::test]
    async fn test_first_overlapping_source_wins() {
        let storage = Arc::new(ScriptedStorage::new(vec![chunk(1, 0)]));
        let plain: Arc<dyn Source> = Arc::new(StaticSource::new("library.Book", vec![]));
        let mode = SourceResults::new(
            vec![plain, book_source(books(1))],
            OverfetchConfig::default(),
        );
        let found = results(storage, mode).fetch().await.unwrap();
        assert!(found[0].as_document().is_some());
    }

    #[tokio::test]
    async fn test_filter_validation_and_ordering() {
        let storage = Arc::new(ScriptedStorage::new(vec![]));
        let r = results(storage, DocumentResults);
        assert!(matches!(
            r.clone().filter("embedding", "x"),
            Err(IndexError::Config(_))
        ));
        assert!(r.clone().filter("", "x").is_err());

        let ordered = r.order_by("title");
        assert!(ordered.fetch().await.unwrap_err().is_unsupported());
    }

    #[test]
    fn test_slice_is_relative_to_window() {
        let storage = Arc::new(ScriptedStorage::new(vec![]));
        let r = results(storage, DocumentResults).offset(5).limit(10).slice(2..4);
        assert_eq!((r.query().offset, r.query().limit), (7, 2));
        let r = r.slice(1..100);
        assert_eq!((r.query().offset, r.query().limit), (8, 1));
    }

    #[tokio::test]
    async fn test_first_returns_top_item() {
        let storage = Arc::new(ScriptedStorage::new(vec![chunk(2, 0), chunk(1, 0)]));
        let top = results(storage, object_mode(books(2))).first().await.unwrap();
        assert_eq!(top.map(|o| o.key()), Some("library.Book:2".to_string()));
    }

    #[tokio::test]
    async fn test_handler_rejects_blank_query() {
        let handler = QueryHandler::new(
            vec![],
            Arc::new(KeywordTransformer::new()),
            Arc::new(ScriptedStorage::new(vec![])),
            OverfetchConfig::default(),
        );
        for q in ["", "   \n"] {
            assert!(matches!(
                handler.search_sources(q).await,
                Err(IndexError::InvalidQuery(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_handler_find_similar_embeds_first_chunk() {
        let store = books(2);
        let transformer = Arc::new(KeywordTransformer::new());
        let storage = Arc::new(ScriptedStorage::new(vec![chunk(2, 0)]));
        let handler = QueryHandler::new(
            vec![book_source(store.clone())],
            transformer.clone(),
            storage,
            OverfetchConfig::default(),
        );

        let object: Arc<dyn IndexObject> = store.get(&1i64.into()).unwrap();
        let similar = handler.find_similar(&object).await.unwrap();
        assert_eq!(similar.query().embedding, vec![0.0, 0.0, 1.0]);
        assert_eq!(pks(&similar.fetch().await.unwrap()), vec![2]);
        assert_eq!(transformer.calls(), 1);

        let stranger: Arc<dyn IndexObject> = Arc::new(MapRecord::new("shop.Item", 1));
        assert!(matches!(
            handler.find_similar(&stranger).await,
            Err(IndexError::InvalidQuery(_))
        ));
    }
}
