//! Source adapters: where documents come from and how they map back.
//!
//! A [`Source`] enumerates documents and claims ownership of a document
//! from its key alone. An [`ObjectSource`] can also convert domain
//! objects to documents and back. The capability is reached through
//! [`Source::as_object_source`] rather than runtime type checks.
//!
//! [`RecordSource`] is the concrete adapter for structured-record stores:
//!
//! ```text
//! RecordStore ──records()──▶ content fields ─▶ chunker ─▶ Document
//!      ▲                      metadata fields ─┘          │
//!      └─────── fetch_many(pks) ◀── metadata["pk"] ◀──────┘
//! ```
//!
//! Document keys are `{source_id}:{pk}:{chunk_index}` and every document
//! carries `model`, `pk`, and `source_id` metadata, so reverse mapping
//! needs one batched fetch and no side table.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use tracing::debug;

use crate::chunk::{ChunkTransformer, FixedSizeChunker};
use crate::error::{IndexError, Result};
use crate::index::VectorIndex;
use crate::models::{Document, EmbeddedDocument, Metadata, MetadataValue};

/// Stream of documents produced incrementally by a source.
pub type DocumentStream<'a> = BoxStream<'a, Result<Document>>;

/// What a completed index write covered, as reported to
/// [`Source::post_index_update`].
#[derive(Debug, Clone, Copy)]
pub enum IndexChange<'a> {
    /// A full build wrote every document the sources produced.
    Rebuilt,
    /// An incremental update stored these documents.
    Written(&'a [EmbeddedDocument]),
    /// These documents were deleted from storage.
    Removed(&'a [Document]),
}

/// A type-erased domain object that can appear in search results.
pub trait IndexObject: fmt::Debug + Send + Sync + 'static {
    /// Stable identity, `{model}:{pk}` for records. Used for deduplication
    /// and membership lookups.
    fn object_key(&self) -> String;

    fn as_any(&self) -> &dyn Any;
}

/// A named provider of documents.
#[async_trait]
pub trait Source: Send + Sync {
    /// Stable identifier. Embedded in every document key this source
    /// produces, so it must not change between runs.
    fn source_id(&self) -> &str;

    /// Every document currently backing the collection, produced lazily.
    fn documents(&self) -> DocumentStream<'_>;

    /// Ownership check from the document key prefix alone.
    fn provides_document(&self, document: &Document) -> bool {
        key_source_id(&document.document_key) == self.source_id()
    }

    /// `Some` when this source can also convert objects.
    fn as_object_source(&self) -> Option<&dyn ObjectSource> {
        None
    }

    /// Called after every successful build, update, or delete on `index`,
    /// with a description of what was written.
    async fn post_index_update(&self, _index: &VectorIndex, _change: IndexChange<'_>) -> Result<()> {
        Ok(())
    }
}

/// A [`Source`] that converts between domain objects and documents.
///
/// Implementations must keep [`object_key_for_document`] consistent with
/// [`IndexObject::object_key`]: result deduplication and membership
/// tracking both rely on it.
///
/// [`object_key_for_document`]: ObjectSource::object_key_for_document
#[async_trait]
pub trait ObjectSource: Source {
    /// True when `object` is of the kind this source indexes.
    fn provides_object(&self, object: &dyn IndexObject) -> bool;

    /// Chunk each object and attach metadata. Objects this source does not
    /// provide are a configuration error.
    fn objects_to_documents(&self, objects: &[Arc<dyn IndexObject>]) -> Result<Vec<Document>>;

    /// Resolve documents back to objects in input order, considering only
    /// documents this source owns and skipping objects that no longer
    /// exist. Must use one batched fetch.
    async fn objects_from_documents(&self, documents: &[Document])
        -> Result<Vec<Arc<dyn IndexObject>>>;

    /// The identity of the object behind `document`, without fetching it.
    /// Equal to that object's [`IndexObject::object_key`].
    fn object_key_for_document(&self, document: &Document) -> Option<String>;
}

/// The source id embedded in a document key (text before the first `:`).
pub fn key_source_id(document_key: &str) -> &str {
    document_key
        .split_once(':')
        .map(|(prefix, _)| prefix)
        .unwrap_or(document_key)
}

// ============ Records ============

/// A structured record from a backing store.
pub trait Record: fmt::Debug + Send + Sync + 'static {
    /// Primary key. Must be a non-null scalar unique within the model.
    fn pk(&self) -> MetadataValue;

    /// Model label, such as `library.Book`.
    fn model_label(&self) -> &str;

    /// Field value, `None` when the field does not exist.
    fn field(&self, name: &str) -> Option<MetadataValue>;

    /// Names of the record's simple fields in declaration order. Used for
    /// content when no content fields are configured.
    fn field_names(&self) -> Vec<String>;
}

impl<R: Record> IndexObject for R {
    fn object_key(&self) -> String {
        format!("{}:{}", self.model_label(), self.pk())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Backing collection of records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    type Record: Record;

    /// Label shared by every record in the store, such as `library.Book`.
    fn model_label(&self) -> &str;

    /// Iterate all records without materializing the collection.
    fn records(&self) -> BoxStream<'_, Result<Arc<Self::Record>>>;

    /// Fetch the records with the given primary keys in one call. Order is
    /// unspecified; missing keys are skipped.
    async fn fetch_many(&self, pks: &[MetadataValue]) -> Result<Vec<Arc<Self::Record>>>;

    /// Known field names, when the store has a schema. Used to reject
    /// unknown configured fields up front.
    fn schema(&self) -> Option<Vec<String>> {
        None
    }
}

/// A record backed by an ordered field map.
#[derive(Debug, Clone, PartialEq)]
pub struct MapRecord {
    model: String,
    pk: MetadataValue,
    fields: IndexMap<String, MetadataValue>,
}

impl MapRecord {
    /// An empty record of `model` with primary key `pk`.
    pub fn new(model: impl Into<String>, pk: impl Into<MetadataValue>) -> Self {
        Self {
            model: model.into(),
            pk: pk.into(),
            fields: IndexMap::new(),
        }
    }

    /// Set `name`, replacing an earlier value in place.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Build a record from a JSON object. `pk_field` must hold a non-null
    /// scalar. Nested arrays and objects are kept as compact JSON text.
    pub fn from_json(model: &str, pk_field: &str, value: &serde_json::Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| IndexError::config(format!("{model} record is not a JSON object")))?;

        let pk = object
            .get(pk_field)
            .and_then(MetadataValue::from_json)
            .filter(|v| *v != MetadataValue::Null)
            .ok_or_else(|| {
                IndexError::config(format!("{model} record has no scalar '{pk_field}' field"))
            })?;

        let mut record = MapRecord::new(model, pk);
        for (name, v) in object {
            let scalar = MetadataValue::from_json(v)
                .unwrap_or_else(|| MetadataValue::Text(v.to_string()));
            record.fields.insert(name.clone(), scalar);
        }
        Ok(record)
    }
}

impl Record for MapRecord {
    fn pk(&self) -> MetadataValue {
        self.pk.clone()
    }

    fn model_label(&self) -> &str {
        &self.model
    }

    fn field(&self, name: &str) -> Option<MetadataValue> {
        self.fields.get(name).cloned()
    }

    fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }
}

/// In-process record store. Counts full scans and batched fetches so
/// callers can verify reverse mapping stays bulk.
pub struct MemoryRecordStore<R> {
    model: String,
    records: RwLock<Vec<Arc<R>>>,
    schema: Option<Vec<String>>,
    scan_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl<R: Record> MemoryRecordStore<R> {
    /// A store for `model` holding `records` in iteration order.
    pub fn new(model: impl Into<String>, records: impl IntoIterator<Item = R>) -> Self {
        Self {
            model: model.into(),
            records: RwLock::new(records.into_iter().map(Arc::new).collect()),
            schema: None,
            scan_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    /// Declare the known field names, enabling field validation in
    /// [`RecordSourceBuilder::build`].
    pub fn with_schema<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schema = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Insert or replace the record with the same primary key.
    pub fn upsert(&self, record: R) -> Arc<R> {
        let record = Arc::new(record);
        let pk = record.pk();
        let mut records = self.records.write();
        match records.iter_mut().find(|r| r.pk() == pk) {
            Some(slot) => *slot = record.clone(),
            None => records.push(record.clone()),
        }
        record
    }

    /// Remove and return the record with primary key `pk`.
    pub fn remove(&self, pk: &MetadataValue) -> Option<Arc<R>> {
        let mut records = self.records.write();
        let pos = records.iter().position(|r| r.pk() == *pk)?;
        Some(records.remove(pos))
    }

    /// The record with primary key `pk`. Not counted as a fetch.
    pub fn get(&self, pk: &MetadataValue) -> Option<Arc<R>> {
        self.records.read().iter().find(|r| r.pk() == *pk).cloned()
    }

    /// Number of [`RecordStore::records`] scans so far.
    pub fn scan_calls(&self) -> usize {
        self.scan_calls.load(Ordering::SeqCst)
    }

    /// Number of [`RecordStore::fetch_many`] calls so far.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R: Record> RecordStore for MemoryRecordStore<R> {
    type Record = R;

    fn model_label(&self) -> &str {
        &self.model
    }

    fn records(&self) -> BoxStream<'_, Result<Arc<R>>> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        let snapshot: Vec<Result<Arc<R>>> = self.records.read().iter().cloned().map(Ok).collect();
        stream::iter(snapshot).boxed()
    }

    async fn fetch_many(&self, pks: &[MetadataValue]) -> Result<Vec<Arc<R>>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let wanted: BTreeSet<String> = pks.iter().map(|pk| pk.to_string()).collect();
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| wanted.contains(&r.pk().to_string()))
            .cloned()
            .collect())
    }

    fn schema(&self) -> Option<Vec<String>> {
        self.schema.clone()
    }
}

// ============ Membership ============

/// Side table recording which indexes contain which objects, keyed by
/// `(index name, source id, object key)`.
#[async_trait]
pub trait MembershipRegistry: Send + Sync {
    /// Replace every row for `(index_name, source_id)` with `object_keys`.
    async fn replace_memberships(
        &self,
        index_name: &str,
        source_id: &str,
        object_keys: &[String],
    ) -> Result<()>;

    /// Add `object_keys` to `(index_name, source_id)`, keeping other rows.
    async fn add_memberships(
        &self,
        index_name: &str,
        source_id: &str,
        object_keys: &[String],
    ) -> Result<()>;

    /// Drop `object_keys` from `(index_name, source_id)` only.
    async fn remove_memberships(
        &self,
        index_name: &str,
        source_id: &str,
        object_keys: &[String],
    ) -> Result<()>;

    /// Names of indexes containing the object, sorted.
    async fn indexes_for_object(&self, object_key: &str) -> Result<Vec<String>>;

    /// Drop the object from every index.
    async fn remove_object(&self, object_key: &str) -> Result<()>;
}

/// [`MembershipRegistry`] held in process memory.
#[derive(Default)]
pub struct InMemoryMembershipRegistry {
    rows: RwLock<HashMap<(String, String), BTreeSet<String>>>,
}

impl InMemoryMembershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MembershipRegistry for InMemoryMembershipRegistry {
    async fn replace_memberships(
        &self,
        index_name: &str,
        source_id: &str,
        object_keys: &[String],
    ) -> Result<()> {
        self.rows.write().insert(
            (index_name.to_string(), source_id.to_string()),
            object_keys.iter().cloned().collect(),
        );
        Ok(())
    }

    async fn add_memberships(
        &self,
        index_name: &str,
        source_id: &str,
        object_keys: &[String],
    ) -> Result<()> {
        self.rows
            .write()
            .entry((index_name.to_string(), source_id.to_string()))
            .or_default()
            .extend(object_keys.iter().cloned());
        Ok(())
    }

    async fn remove_memberships(
        &self,
        index_name: &str,
        source_id: &str,
        object_keys: &[String],
    ) -> Result<()> {
        if let Some(keys) = self
            .rows
            .write()
            .get_mut(&(index_name.to_string(), source_id.to_string()))
        {
            for key in object_keys {
                keys.remove(key);
            }
        }
        Ok(())
    }

    async fn indexes_for_object(&self, object_key: &str) -> Result<Vec<String>> {
        let names: BTreeSet<String> = self
            .rows
            .read()
            .iter()
            .filter(|(_, keys)| keys.contains(object_key))
            .map(|((index, _), _)| index.clone())
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn remove_object(&self, object_key: &str) -> Result<()> {
        for keys in self.rows.write().values_mut() {
            keys.remove(object_key);
        }
        Ok(())
    }
}

// ============ RecordSource ============

/// A field whose value is computed from the record on each read.
pub type ComputedField<R> = Arc<dyn Fn(&R) -> Option<MetadataValue> + Send + Sync>;

/// [`ObjectSource`] over a [`RecordStore`].
pub struct RecordSource<S: RecordStore> {
    store: Arc<S>,
    source_id: String,
    content_fields: Option<Vec<String>>,
    metadata_fields: Vec<String>,
    computed: BTreeMap<String, ComputedField<S::Record>>,
    chunker: Box<dyn ChunkTransformer>,
    membership: Option<Arc<dyn MembershipRegistry>>,
}

/// Builder for [`RecordSource`]. Validation happens in
/// [`build`](RecordSourceBuilder::build).
pub struct RecordSourceBuilder<S: RecordStore> {
    store: Arc<S>,
    source_id: Option<String>,
    content_fields: Option<Vec<String>>,
    metadata_fields: Vec<String>,
    computed: BTreeMap<String, ComputedField<S::Record>>,
    chunker: Option<Box<dyn ChunkTransformer>>,
    membership: Option<Arc<dyn MembershipRegistry>>,
}

impl<S: RecordStore> RecordSource<S> {
    /// Start configuring a source over `store`.
    pub fn builder(store: Arc<S>) -> RecordSourceBuilder<S> {
        RecordSourceBuilder {
            store,
            source_id: None,
            content_fields: None,
            metadata_fields: Vec::new(),
            computed: BTreeMap::new(),
            chunker: None,
            membership: None,
        }
    }

    /// The backing store, for callers that write records and then report
    /// them through [`VectorIndex::object_saved`].
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Object keys behind the documents this source owns, deduplicated in
    /// first-seen order.
    fn owned_object_keys<'d>(&self, documents: impl Iterator<Item = &'d Document>) -> Vec<String>
    where
        S: 'static,
    {
        let keys: IndexSet<String> = documents
            .filter(|d| self.provides_document(d))
            .filter_map(|d| self.object_key_for_document(d))
            .collect();
        keys.into_iter().collect()
    }

    fn field_value(&self, record: &S::Record, name: &str) -> Option<MetadataValue> {
        match self.computed.get(name) {
            Some(compute) => compute(record),
            None => record.field(name),
        }
    }

    /// Content fields joined by newlines, skipping absent and null values.
    pub fn content_for(&self, record: &S::Record) -> String {
        let names = match &self.content_fields {
            Some(fields) => fields.clone(),
            None => record.field_names(),
        };
        names
            .iter()
            .filter_map(|name| self.field_value(record, name))
            .filter(|v| *v != MetadataValue::Null)
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Configured metadata fields plus `model`, `pk`, and `source_id`,
    /// which always win over a configured field of the same name.
    pub fn metadata_for(&self, record: &S::Record) -> Metadata {
        let mut metadata: Metadata = self
            .metadata_fields
            .iter()
            .map(|name| {
                let value = self.field_value(record, name).unwrap_or(MetadataValue::Null);
                (name.clone(), value)
            })
            .collect();
        metadata.insert("model".into(), record.model_label().into());
        metadata.insert("pk".into(), record.pk());
        metadata.insert("source_id".into(), self.source_id.clone().into());
        metadata
    }

    /// Chunk one record into documents keyed `{source_id}:{pk}:{chunk}`.
    pub fn record_documents(&self, record: &S::Record) -> Vec<Document> {
        let metadata = self.metadata_for(record);
        let pk = record.pk();
        self.chunker
            .transform(&self.content_for(record))
            .into_iter()
            .enumerate()
            .map(|(idx, content)| Document {
                document_key: format!("{}:{}:{}", self.source_id, pk, idx),
                content,
                metadata: metadata.clone(),
            })
            .collect()
    }
}

impl<S: RecordStore> RecordSourceBuilder<S> {
    /// Defaults to the store's model label.
    pub fn source_id(mut self, id: impl Into<String>) -> Self {
        self.source_id = Some(id.into());
        self
    }

    /// Fields concatenated into content. Defaults to all simple fields.
    pub fn content_fields<I, T>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.content_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Fields copied into every document's metadata.
    pub fn metadata_fields<I, T>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.metadata_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Register a callable field usable in content or metadata lists.
    pub fn computed_field<F>(mut self, name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&S::Record) -> Option<MetadataValue> + Send + Sync + 'static,
    {
        self.computed.insert(name.into(), Arc::new(compute));
        self
    }

    /// Defaults to [`FixedSizeChunker::default`].
    pub fn chunker(mut self, chunker: Box<dyn ChunkTransformer>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Keep `registry` in step with what this source has indexed.
    pub fn membership(mut self, registry: Arc<dyn MembershipRegistry>) -> Self {
        self.membership = Some(registry);
        self
    }

    /// Validate and build the source.
    ///
    /// # Errors
    ///
    /// [`IndexError::Config`] when the source id is blank or contains `:`,
    /// or when a configured field is neither in the store's schema nor a
    /// computed field.
    pub fn build(self) -> Result<RecordSource<S>> {
        let source_id = self
            .source_id
            .unwrap_or_else(|| self.store.model_label().to_string());
        if source_id.trim().is_empty() || source_id.contains(':') {
            return Err(IndexError::config(format!(
                "malformed source id '{source_id}': must be non-empty and contain no ':'"
            )));
        }

        if let Some(schema) = self.store.schema() {
            let configured = self
                .content_fields
                .iter()
                .flatten()
                .chain(self.metadata_fields.iter());
            for field in configured {
                if !schema.contains(field) && !self.computed.contains_key(field) {
                    return Err(IndexError::config(format!(
                        "unsupported field '{field}' on source '{source_id}'"
                    )));
                }
            }
        }

        Ok(RecordSource {
            store: self.store,
            source_id,
            content_fields: self.content_fields,
            metadata_fields: self.metadata_fields,
            computed: self.computed,
            chunker: self
                .chunker
                .unwrap_or_else(|| Box::new(FixedSizeChunker::default())),
            membership: self.membership,
        })
    }
}

#[async_trait]
impl<S: RecordStore + 'static> Source for RecordSource<S> {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn documents(&self) -> DocumentStream<'_> {
        self.store
            .records()
            .map(move |record| {
                let docs: Vec<Result<Document>> = match record {
                    Ok(r) => self.record_documents(&r).into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(docs)
            })
            .flatten()
            .boxed()
    }

    fn as_object_source(&self) -> Option<&dyn ObjectSource> {
        Some(self)
    }

    /// Rebuilds replace this source's rows for the index with a full scan
    /// of the store. Incremental writes and deletes touch only the rows of
    /// the objects involved.
    async fn post_index_update(&self, index: &VectorIndex, change: IndexChange<'_>) -> Result<()> {
        let Some(registry) = &self.membership else {
            return Ok(());
        };
        match change {
            IndexChange::Rebuilt => {
                let keys: Vec<String> = self
                    .store
                    .records()
                    .map_ok(|r| r.object_key())
                    .try_collect()
                    .await?;
                debug!(
                    index = index.name(),
                    source = %self.source_id,
                    objects = keys.len(),
                    "replacing index memberships"
                );
                registry
                    .replace_memberships(index.name(), &self.source_id, &keys)
                    .await
            }
            IndexChange::Written(embedded) => {
                let keys = self.owned_object_keys(embedded.iter().map(|e| &e.document));
                if keys.is_empty() {
                    return Ok(());
                }
                registry
                    .add_memberships(index.name(), &self.source_id, &keys)
                    .await
            }
            IndexChange::Removed(documents) => {
                let keys = self.owned_object_keys(documents.iter());
                if keys.is_empty() {
                    return Ok(());
                }
                registry
                    .remove_memberships(index.name(), &self.source_id, &keys)
                    .await
            }
        }
    }
}

#[async_trait]
impl<S: RecordStore + 'static> ObjectSource for RecordSource<S> {
    fn provides_object(&self, object: &dyn IndexObject) -> bool {
        object
            .as_any()
            .downcast_ref::<S::Record>()
            .is_some_and(|r| r.model_label() == self.store.model_label())
    }

    fn objects_to_documents(&self, objects: &[Arc<dyn IndexObject>]) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        for object in objects {
            let record = object
                .as_any()
                .downcast_ref::<S::Record>()
                .filter(|r| r.model_label() == self.store.model_label())
                .ok_or_else(|| {
                    IndexError::config(format!(
                        "object {} does not belong to source '{}'",
                        object.object_key(),
                        self.source_id
                    ))
                })?;
            documents.extend(self.record_documents(record));
        }
        Ok(documents)
    }

    async fn objects_from_documents(
        &self,
        documents: &[Document],
    ) -> Result<Vec<Arc<dyn IndexObject>>> {
        let owned: Vec<&MetadataValue> = documents
            .iter()
            .filter(|d| self.provides_document(d))
            .filter_map(|d| d.metadata.get("pk"))
            .collect();
        if owned.is_empty() {
            return Ok(Vec::new());
        }

        let mut unique: IndexMap<String, MetadataValue> = IndexMap::new();
        for pk in &owned {
            unique
                .entry(pk.to_string())
                .or_insert_with(|| (*pk).clone());
        }
        let pks: Vec<MetadataValue> = unique.into_values().collect();

        let fetched = self.store.fetch_many(&pks).await?;
        let by_pk: HashMap<String, Arc<S::Record>> = fetched
            .into_iter()
            .map(|r| (r.pk().to_string(), r))
            .collect();

        Ok(owned
            .iter()
            .filter_map(|pk| by_pk.get(&pk.to_string()))
            .map(|r| r.clone() as Arc<dyn IndexObject>)
            .collect())
    }

    fn object_key_for_document(&self, document: &Document) -> Option<String> {
        let model = document.metadata.get("model")?;
        let pk = document.metadata.get("pk")?;
        Some(format!("{model}:{pk}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(pk: i64, title: &str, body: &str) -> MapRecord {
        MapRecord::new("library.Book", pk)
            .with_field("title", title)
            .with_field("body", body)
            .with_field("genre", "fiction")
    }

    fn store() -> Arc<MemoryRecordStore<MapRecord>> {
        Arc::new(
            MemoryRecordStore::new(
                "library.Book",
                vec![
                    book(1, "Dune", "Spice and sand."),
                    book(2, "Emma", &"Long novel text. ".repeat(20)),
                    book(3, "Ubik", "Reality slips."),
                ],
            )
            .with_schema(["title", "body", "genre"]),
        )
    }

    fn source(store: Arc<MemoryRecordStore<MapRecord>>) -> RecordSource<MemoryRecordStore<MapRecord>> {
        RecordSource::builder(store)
            .content_fields(["title", "body"])
            .metadata_fields(["genre"])
            .chunker(Box::new(FixedSizeChunker::new(100, 10).unwrap()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_key_source_id() {
        assert_eq!(key_source_id("library.Book:1:0"), "library.Book");
        assert_eq!(key_source_id("bare"), "bare");
    }

    #[test]
    fn test_record_documents_keys_content_metadata() {
        let src = source(store());
        let docs = src.record_documents(&book(1, "Dune", "Spice and sand."));
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].document_key, "library.Book:1:0");
        assert_eq!(docs[0].content, "Dune\nSpice and sand.");
        assert_eq!(docs[0].metadata["model"], MetadataValue::from("library.Book"));
        assert_eq!(docs[0].metadata["pk"], MetadataValue::Int(1));
        assert_eq!(docs[0].metadata["source_id"], MetadataValue::from("library.Book"));
        assert_eq!(docs[0].metadata["genre"], MetadataValue::from("fiction"));
    }

    #[test]
    fn test_default_content_uses_all_fields_and_skips_null() {
        let src = RecordSource::builder(store()).build().unwrap();
        let record = MapRecord::new("library.Book", 9)
            .with_field("title", "T")
            .with_field("subtitle", MetadataValue::Null)
            .with_field("pages", 12i64);
        assert_eq!(src.content_for(&record), "T\n12");
    }

    #[test]
    fn test_computed_field_invoked() {
        let src = RecordSource::builder(store())
            .content_fields(["shout"])
            .computed_field("shout", |r: &MapRecord| {
                r.field("title")
                    .and_then(|t| t.as_str().map(|s| s.to_uppercase().into()))
            })
            .build()
            .unwrap();
        assert_eq!(src.content_for(&book(1, "Dune", "")), "DUNE");
    }

    #[test]
    fn test_build_rejects_malformed_id_and_unknown_field() {
        let err = RecordSource::builder(store()).source_id("a:b").build();
        assert!(matches!(err, Err(IndexError::Config(_))));

        let err = RecordSource::builder(store())
            .content_fields(["missing"])
            .build();
        assert!(matches!(err, Err(IndexError::Config(msg)) if msg.contains("missing")));
    }

    #[test]
    fn test_provides_document_by_prefix() {
        let src = source(store());
        assert!(src.provides_document(&Document::new("library.Book:7:0", "")));
        assert!(!src.provides_document(&Document::new("library.BookX:7:0", "")));
        assert!(!src.provides_document(&Document::new("shop.Item:7:0", "")));
    }

    #[tokio::test]
    async fn test_documents_streams_all_chunks() {
        let src = source(store());
        let docs: Vec<Document> = src.documents().try_collect().await.unwrap();
        let keys: Vec<&str> = docs.iter().map(|d| d.document_key.as_str()).collect();
        assert_eq!(keys.first(), Some(&"library.Book:1:0"));
        assert!(keys.contains(&"library.Book:2:3"));
        assert_eq!(keys.last(), Some(&"library.Book:3:0"));
    }

    #[tokio::test]
    async fn test_round_trip_objects_single_fetch() {
        let store = store();
        let src = source(store.clone());
        let objects: Vec<Arc<dyn IndexObject>> = vec![
            store.get(&1i64.into()).unwrap(),
            store.get(&2i64.into()).unwrap(),
            store.get(&3i64.into()).unwrap(),
        ];
        let docs = src.objects_to_documents(&objects).unwrap();
        assert!(docs.len() > 3);

        let back = src.objects_from_documents(&docs).await.unwrap();
        let keys: BTreeSet<String> = back.iter().map(|o| o.object_key()).collect();
        let expected: BTreeSet<String> = objects.iter().map(|o| o.object_key()).collect();
        assert_eq!(keys, expected);
        assert_eq!(store.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn test_objects_from_documents_order_and_missing() {
        let store = store();
        let src = source(store.clone());
        let docs = vec![
            Document::new("library.Book:3:0", "").with_metadata("pk", 3i64),
            Document::new("shop.Item:1:0", "").with_metadata("pk", 1i64),
            Document::new("library.Book:99:0", "").with_metadata("pk", 99i64),
            Document::new("library.Book:1:0", "").with_metadata("pk", 1i64),
        ];
        let back = src.objects_from_documents(&docs).await.unwrap();
        let keys: Vec<String> = back.iter().map(|o| o.object_key()).collect();
        assert_eq!(keys, vec!["library.Book:3", "library.Book:1"]);
    }

    #[test]
    fn test_provides_object_and_foreign_object_rejected() {
        let src = source(store());
        let mine: Arc<dyn IndexObject> = Arc::new(book(1, "Dune", ""));
        let other: Arc<dyn IndexObject> = Arc::new(MapRecord::new("shop.Item", 1));
        assert!(src.provides_object(mine.as_ref()));
        assert!(!src.provides_object(other.as_ref()));
        assert!(src.objects_to_documents(&[other]).is_err());
    }

    #[test]
    fn test_object_key_for_document() {
        let src = source(store());
        let doc = &src.record_documents(&book(2, "Emma", "x"))[0];
        assert_eq!(
            src.object_key_for_document(doc),
            Some("library.Book:2".to_string())
        );
    }

    #[test]
    fn test_map_record_from_json() {
        let json = serde_json::json!({"id": 5, "title": "X", "tags": ["a", "b"]});
        let r = MapRecord::from_json("library.Book", "id", &json).unwrap();
        assert_eq!(r.pk(), MetadataValue::Int(5));
        assert_eq!(r.field("tags"), Some(MetadataValue::from("[\"a\",\"b\"]")));
        assert!(MapRecord::from_json("library.Book", "missing", &json).is_err());
    }

    #[tokio::test]
    async fn test_membership_registry_replaces_rows() {
        let reg = InMemoryMembershipRegistry::new();
        reg.replace_memberships("idx", "src", &["m:1".into(), "m:2".into()])
            .await
            .unwrap();
        reg.replace_memberships("other", "src", &["m:1".into()])
            .await
            .unwrap();
        assert_eq!(reg.indexes_for_object("m:1").await.unwrap(), vec!["idx", "other"]);

        reg.replace_memberships("idx", "src", &["m:2".into()])
            .await
            .unwrap();
        assert_eq!(reg.indexes_for_object("m:1").await.unwrap(), vec!["other"]);

        reg.remove_object("m:2").await.unwrap();
        assert!(reg.indexes_for_object("m:2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_membership_registry_incremental_rows() {
        let reg = InMemoryMembershipRegistry::new();
        reg.replace_memberships("idx", "src", &["m:1".into()])
            .await
            .unwrap();
        reg.add_memberships("idx", "src", &["m:2".into(), "m:1".into()])
            .await
            .unwrap();
        reg.add_memberships("other", "src", &["m:2".into()])
            .await
            .unwrap();
        assert_eq!(reg.indexes_for_object("m:1").await.unwrap(), vec!["idx"]);
        assert_eq!(reg.indexes_for_object("m:2").await.unwrap(), vec!["idx", "other"]);

        reg.remove_memberships("idx", "src", &["m:2".into(), "m:9".into()])
            .await
            .unwrap();
        assert_eq!(reg.indexes_for_object("m:2").await.unwrap(), vec!["other"]);
        assert_eq!(reg.indexes_for_object("m:1").await.unwrap(), vec!["idx"]);
    }
}
