//! SQLite persistence for the embedding cache.
//!
//! Rows are unique on `(content_hash, transformer_id)`. Inserts use
//! `ON CONFLICT DO NOTHING`, so two processes that miss on the same
//! content both succeed and the first vector wins.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use vector_index_core::cache::{content_hash, EmbeddingCacheBackend};
use vector_index_core::embedding::{blob_to_vec, vec_to_blob};
use vector_index_core::{IndexError, Result};

/// SQLite's default bound-parameter limit is 999; stay well below it.
const LOOKUP_CHUNK: usize = 500;

pub struct SqliteCacheBackend {
    pool: SqlitePool,
}

impl SqliteCacheBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn len(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embedding_cache")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| IndexError::backend("cache count", e))?;
        Ok(n as usize)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

const INSERT: &str = r#"
    INSERT INTO embedding_cache (content_hash, transformer_id, content, embedding, dims, created_at)
    VALUES (?, ?, ?, ?, ?, ?)
    ON CONFLICT(content_hash, transformer_id) DO NOTHING
"#;

#[async_trait]
impl EmbeddingCacheBackend for SqliteCacheBackend {
    async fn get_embedding(&self, content: &str, transformer_id: &str) -> Result<Option<Vec<f32>>> {
        let row = sqlx::query(
            "SELECT embedding FROM embedding_cache WHERE content_hash = ? AND transformer_id = ?",
        )
        .bind(content_hash(content))
        .bind(transformer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IndexError::backend("cache lookup", e))?;

        Ok(row.map(|r| {
            let blob: Vec<u8> = r.get("embedding");
            blob_to_vec(&blob)
        }))
    }

    async fn store_embedding(
        &self,
        content: &str,
        transformer_id: &str,
        embedding: &[f32],
    ) -> Result<()> {
        sqlx::query(INSERT)
            .bind(content_hash(content))
            .bind(transformer_id)
            .bind(content)
            .bind(vec_to_blob(embedding))
            .bind(embedding.len() as i64)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| IndexError::backend("cache store", e))?;
        Ok(())
    }

    async fn get_embeddings_batch(
        &self,
        contents: &[String],
        transformer_id: &str,
    ) -> Result<HashMap<String, Vec<f32>>> {
        let mut by_hash: HashMap<String, &String> = HashMap::new();
        for content in contents {
            by_hash.entry(content_hash(content)).or_insert(content);
        }
        let hashes: Vec<&String> = by_hash.keys().collect();

        let mut found = HashMap::new();
        for chunk in hashes.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT content_hash, embedding FROM embedding_cache \
                 WHERE transformer_id = ? AND content_hash IN ({placeholders})"
            );
            let mut select = sqlx::query(&sql).bind(transformer_id);
            for hash in chunk {
                select = select.bind(hash.as_str());
            }
            let rows = select
                .fetch_all(&self.pool)
                .await
                .map_err(|e| IndexError::backend("cache batch lookup", e))?;
            for row in rows {
                let hash: String = row.get("content_hash");
                let blob: Vec<u8> = row.get("embedding");
                if let Some(content) = by_hash.get(&hash) {
                    found.insert((*content).clone(), blob_to_vec(&blob));
                }
            }
        }
        Ok(found)
    }

    async fn store_embeddings_batch(
        &self,
        entries: &[(String, Vec<f32>)],
        transformer_id: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexError::backend("cache batch store", e))?;
        for (content, embedding) in entries {
            sqlx::query(INSERT)
                .bind(content_hash(content))
                .bind(transformer_id)
                .bind(content)
                .bind(vec_to_blob(embedding))
                .bind(embedding.len() as i64)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| IndexError::backend("cache batch store", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| IndexError::backend("cache batch store", e))?;
        Ok(())
    }

    async fn clear_cache(&self) -> Result<()> {
        sqlx::query("DELETE FROM embedding_cache")
            .execute(&self.pool)
            .await
            .map_err(|e| IndexError::backend("cache clear", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use tempfile::TempDir;

    async fn backend(tmp: &TempDir) -> SqliteCacheBackend {
        let pool = migrate::open_path(&tmp.path().join("cache.sqlite"))
            .await
            .unwrap();
        SqliteCacheBackend::new(pool)
    }

    #[tokio::test]
    async fn test_store_and_get_partitioned_by_transformer() {
        let tmp = TempDir::new().unwrap();
        let cache = backend(&tmp).await;
        cache.store_embedding("hello", "hashing:4", &[1.0, 2.0]).await.unwrap();

        assert_eq!(
            cache.get_embedding("hello", "hashing:4").await.unwrap(),
            Some(vec![1.0, 2.0])
        );
        assert_eq!(cache.get_embedding("hello", "openai:x").await.unwrap(), None);
        assert_eq!(cache.get_embedding("other", "hashing:4").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_first_write_wins() {
        let tmp = TempDir::new().unwrap();
        let cache = backend(&tmp).await;
        cache.store_embedding("hello", "t", &[1.0]).await.unwrap();
        cache.store_embedding("hello", "t", &[9.0]).await.unwrap();
        assert_eq!(cache.len().await.unwrap(), 1);
        assert_eq!(cache.get_embedding("hello", "t").await.unwrap(), Some(vec![1.0]));
    }

    #[tokio::test]
    async fn test_batch_roundtrip_and_clear() {
        let tmp = TempDir::new().unwrap();
        let cache = backend(&tmp).await;
        cache
            .store_embeddings_batch(
                &[("a".to_string(), vec![1.0]), ("b".to_string(), vec![2.0])],
                "t",
            )
            .await
            .unwrap();

        let found = cache
            .get_embeddings_batch(&["a".to_string(), "c".to_string(), "a".to_string()], "t")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["a"], vec![1.0]);

        cache.clear_cache().await.unwrap();
        assert!(cache.is_empty().await.unwrap());
    }
}
