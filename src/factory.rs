//! Turn a loaded [`Config`] into live indexes.
//!
//! [`open`] connects to SQLite, applies the schema, builds the configured
//! transformer (wrapped in the SQLite embedding cache when enabled), and
//! registers one [`VectorIndex`] per `[[indexes]]` entry.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;

use vector_index_core::cache::CachedEmbeddingTransformer;
use vector_index_core::embedding::EmbeddingTransformer;
use vector_index_core::index::{IndexRegistry, VectorIndex};
use vector_index_core::source::{IndexObject, MembershipRegistry, RecordSource, RecordStore, Source};
use vector_index_core::store::memory::InMemoryStorage;
use vector_index_core::store::StorageProvider;
use vector_index_core::{IndexError, MetadataValue};

use crate::config::{Config, IndexConfig, SourceConfig, StorageKind};
use crate::embedding::create_transformer;
use crate::membership::SqliteMembershipRegistry;
use crate::qdrant::QdrantStorage;
use crate::records::JsonLinesRecordStore;
use crate::sqlite_cache::SqliteCacheBackend;
use crate::sqlite_store::SqliteStorage;
use crate::migrate;

/// Everything a command needs after startup.
pub struct App {
    pub config: Config,
    pub pool: SqlitePool,
    pub registry: IndexRegistry,
    pub transformer: Arc<dyn EmbeddingTransformer>,
    stores: HashMap<(String, String), Arc<JsonLinesRecordStore>>,
}

pub async fn open(config: Config) -> Result<App> {
    let pool = migrate::open(&config).await?;

    let base = create_transformer(&config.embedding)?;
    let transformer: Arc<dyn EmbeddingTransformer> = if config.cache.enabled {
        let backend = Arc::new(SqliteCacheBackend::new(pool.clone()));
        Arc::new(CachedEmbeddingTransformer::new(base, backend))
    } else {
        base
    };

    let membership: Arc<dyn MembershipRegistry> =
        Arc::new(SqliteMembershipRegistry::new(pool.clone()));
    let mut registry = IndexRegistry::new().with_membership(membership.clone());
    let mut stores = HashMap::new();

    for index_config in &config.indexes {
        let mut sources: Vec<Arc<dyn Source>> = Vec::new();
        for source_config in &index_config.sources {
            let store = Arc::new(record_store(source_config));
            stores.insert(
                (index_config.name.clone(), source_config.source_id().to_string()),
                store.clone(),
            );
            sources.push(record_source(source_config, store, membership.clone())?);
        }

        let storage = storage_for(&config, index_config, &pool)?;
        let mut builder = VectorIndex::builder(&index_config.name)
            .transformer(transformer.clone())
            .storage(storage)
            .batch_size(config.embedding.batch_size)
            .overfetch(config.retrieval.overfetch());
        for source in sources {
            builder = builder.source(source);
        }
        let index = builder
            .build()
            .with_context(|| format!("failed to set up index '{}'", index_config.name))?;
        registry.register(index)?;
    }

    Ok(App {
        config,
        pool,
        registry,
        transformer,
        stores,
    })
}

fn record_store(config: &SourceConfig) -> JsonLinesRecordStore {
    let store = JsonLinesRecordStore::new(&config.model, &config.path, &config.pk_field);
    match &config.fields {
        Some(fields) => store.with_schema(fields.clone()),
        None => store,
    }
}

fn record_source(
    config: &SourceConfig,
    store: Arc<JsonLinesRecordStore>,
    membership: Arc<dyn MembershipRegistry>,
) -> Result<Arc<dyn Source>> {
    let mut builder = RecordSource::builder(store)
        .source_id(config.source_id())
        .metadata_fields(config.metadata_fields.iter().cloned())
        .chunker(config.chunker.build()?)
        .membership(membership);
    if let Some(fields) = &config.content_fields {
        builder = builder.content_fields(fields.iter().cloned());
    }
    Ok(Arc::new(builder.build()?))
}

fn storage_for(
    config: &Config,
    index: &IndexConfig,
    pool: &SqlitePool,
) -> Result<Arc<dyn StorageProvider>> {
    Ok(match index.storage {
        StorageKind::Sqlite => Arc::new(SqliteStorage::new(pool.clone())),
        StorageKind::Memory => Arc::new(InMemoryStorage::new()),
        StorageKind::Qdrant => {
            let qdrant = config
                .qdrant
                .as_ref()
                .context("[qdrant] section is required for qdrant storage")?;
            Arc::new(QdrantStorage::new(qdrant)?)
        }
    })
}

impl App {
    pub fn index(&self, name: &str) -> Result<Arc<VectorIndex>> {
        Ok(self.registry.get(name)?)
    }

    /// Load one record of `source_id` in index `index` by primary key.
    pub async fn load_object(
        &self,
        index: &str,
        source_id: &str,
        pk: &str,
    ) -> Result<Arc<dyn IndexObject>> {
        let store = self
            .stores
            .get(&(index.to_string(), source_id.to_string()))
            .ok_or_else(|| {
                IndexError::not_found(format!("source '{source_id}' in index '{index}'"))
            })?;
        let found = store.fetch_many(&[MetadataValue::from(pk)]).await?;
        let record = found.into_iter().next().ok_or_else(|| {
            IndexError::not_found(format!("record '{pk}' in source '{source_id}'"))
        })?;
        Ok(record)
    }
}
