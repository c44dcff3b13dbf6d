//! TOML configuration for the `vidx` application.
//!
//! [`load_config`] reads and parses the file, then validates it. Every
//! validation failure names the offending key so a broken config is
//! rejected before any database or network work starts.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use vector_index_core::chunk::ChunkerConfig;
use vector_index_core::query::OverfetchConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub qdrant: Option<QdrantConfig>,
    #[serde(default)]
    pub indexes: Vec<IndexConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: 0,
            timeout_secs: default_timeout_secs(),
            base_url: None,
        }
    }
}

fn default_provider() -> String {
    "hashing".to_string()
}
fn default_dims() -> usize {
    256
}
fn default_batch_size() -> usize {
    vector_index_core::embedding::DEFAULT_BATCH_SIZE
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_multiplier")]
    pub overfetch_multiplier: usize,
    #[serde(default = "default_iterations")]
    pub max_overfetch_iterations: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            overfetch_multiplier: default_multiplier(),
            max_overfetch_iterations: default_iterations(),
        }
    }
}

impl RetrievalConfig {
    pub fn overfetch(&self) -> OverfetchConfig {
        OverfetchConfig {
            multiplier: self.overfetch_multiplier,
            max_iterations: self.max_overfetch_iterations,
        }
    }
}

fn default_limit() -> usize {
    vector_index_core::query::DEFAULT_LIMIT
}
fn default_multiplier() -> usize {
    OverfetchConfig::default().multiplier
}
fn default_iterations() -> usize {
    OverfetchConfig::default().max_iterations
}

#[derive(Debug, Deserialize, Clone)]
pub struct QdrantConfig {
    pub url: String,
    /// Name of the environment variable holding the API key, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Sqlite,
    Qdrant,
    Memory,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Sqlite => "sqlite",
            StorageKind::Qdrant => "qdrant",
            StorageKind::Memory => "memory",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub name: String,
    #[serde(default)]
    pub storage: StorageKind,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// One JSON-lines record file exposed as a source.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Model label, e.g. `library.Book`. Also the default source id.
    pub model: String,
    #[serde(default)]
    pub source_id: Option<String>,
    pub path: PathBuf,
    #[serde(default = "default_pk_field")]
    pub pk_field: String,
    #[serde(default)]
    pub content_fields: Option<Vec<String>>,
    #[serde(default)]
    pub metadata_fields: Vec<String>,
    /// Declared record schema; enables field validation when present.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub chunker: ChunkerConfig,
}

fn default_pk_field() -> String {
    "id".to_string()
}

impl SourceConfig {
    pub fn source_id(&self) -> &str {
        self.source_id.as_deref().unwrap_or(&self.model)
    }
}

impl Config {
    pub fn index(&self, name: &str) -> Option<&IndexConfig> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn uses_storage(&self, kind: StorageKind) -> bool {
        self.indexes.iter().any(|i| i.storage == kind)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Embedding
    match config.embedding.provider.as_str() {
        "hashing" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                bail!("embedding.model must be specified when provider is 'openai'");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hashing or openai.",
            other
        ),
    }
    if config.embedding.dims == 0 {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    // Retrieval
    if config.retrieval.default_limit == 0 {
        bail!("retrieval.default_limit must be >= 1");
    }
    if config.retrieval.overfetch_multiplier == 0 {
        bail!("retrieval.overfetch_multiplier must be >= 1");
    }
    if config.retrieval.max_overfetch_iterations == 0 {
        bail!("retrieval.max_overfetch_iterations must be >= 1");
    }

    // Indexes
    if config.indexes.is_empty() {
        bail!("at least one [[indexes]] entry is required");
    }
    let mut names = HashSet::new();
    for index in &config.indexes {
        if index.name.trim().is_empty() {
            bail!("indexes.name must not be empty");
        }
        if !names.insert(index.name.as_str()) {
            bail!("duplicate index name: '{}'", index.name);
        }
        if index.sources.is_empty() {
            bail!("index '{}' must declare at least one source", index.name);
        }
        let mut source_ids = HashSet::new();
        for source in &index.sources {
            if !source_ids.insert(source.source_id()) {
                bail!(
                    "index '{}' declares source '{}' twice",
                    index.name,
                    source.source_id()
                );
            }
            source.chunker.build().with_context(|| {
                format!(
                    "invalid chunker for source '{}' in index '{}'",
                    source.source_id(),
                    index.name
                )
            })?;
        }
    }

    if config.uses_storage(StorageKind::Qdrant) && config.qdrant.is_none() {
        bail!("[qdrant] section is required when an index uses storage = \"qdrant\"");
    }

    Ok(())
}
