//! `vidx cache clear`.

use anyhow::Result;

use vector_index_core::cache::EmbeddingCacheBackend;

use crate::config::Config;
use crate::sqlite_cache::SqliteCacheBackend;
use crate::migrate;

pub async fn run_cache_clear(config: &Config) -> Result<()> {
    let pool = migrate::open(config).await?;
    let cache = SqliteCacheBackend::new(pool.clone());
    let entries = cache.len().await?;
    cache.clear_cache().await?;
    pool.close().await;
    println!("Embedding cache cleared ({} entries removed).", entries);
    Ok(())
}
