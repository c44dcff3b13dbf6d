//! SQLite-backed [`StorageProvider`].
//!
//! Every index shares the `vector_documents` table, partitioned by
//! `index_name`. Vectors are stored as little-endian `f32` BLOBs and
//! ranked in Rust by cosine similarity; metadata filters are pushed down
//! to SQL through `json_type` and `json_extract`, with the same equality
//! rule as [`MetadataValue::filter_matches`].

use async_trait::async_trait;
use sqlx::sqlite::SqliteArguments;
use sqlx::{query::Query, Row, Sqlite, SqlitePool};

use vector_index_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use vector_index_core::models::{Document, EmbeddedDocument, Metadata, MetadataValue};
use vector_index_core::store::{IndexScope, StorageProvider, VectorQuery};
use vector_index_core::{IndexError, Result};

/// SQLite implementation of the [`StorageProvider`] trait.
pub struct SqliteStorage {
    pool: SqlitePool,
    scope: IndexScope,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            scope: IndexScope::new("default"),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Number of documents stored under the current index name.
    pub async fn count(&self) -> Result<usize> {
        let n: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM vector_documents WHERE index_name = ?")
                .bind(self.scope.get())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| IndexError::backend("sqlite count", e))?;
        Ok(n as usize)
    }
}

/// JSON path for a top-level metadata field, quoted so dots in field
/// names are not read as nesting.
fn json_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('"', "\\\""))
}

/// SQL for one equality filter. `json_type` pins the stored kind so
/// SQLite's loose comparisons (`true = 1`, `'1' = 1`) cannot leak through;
/// integers and reals still compare by value.
fn filter_clause(value: &MetadataValue) -> &'static str {
    match value {
        MetadataValue::Null => " AND json_type(metadata_json, ?) = 'null'",
        MetadataValue::Bool(_) => " AND json_type(metadata_json, ?) = ?",
        MetadataValue::Int(_) | MetadataValue::Float(_) => {
            " AND json_type(metadata_json, ?) IN ('integer', 'real') \
             AND json_extract(metadata_json, ?) = ?"
        }
        MetadataValue::Text(_) => {
            " AND json_type(metadata_json, ?) = 'text' AND json_extract(metadata_json, ?) = ?"
        }
    }
}

/// Bind the parameters of [`filter_clause`] in order.
fn bind_filter<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    field: &str,
    value: &MetadataValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    let path = json_path(field);
    match value {
        MetadataValue::Null => query.bind(path),
        MetadataValue::Bool(b) => query.bind(path).bind(if *b { "true" } else { "false" }),
        MetadataValue::Int(i) => query.bind(path.clone()).bind(path).bind(*i),
        MetadataValue::Float(x) => query.bind(path.clone()).bind(path).bind(*x),
        MetadataValue::Text(s) => query.bind(path.clone()).bind(path).bind(s.clone()),
    }
}

#[async_trait]
impl StorageProvider for SqliteStorage {
    fn index_name(&self) -> String {
        self.scope.get()
    }

    fn set_index_name(&self, name: &str) {
        self.scope.set(name);
    }

    async fn add(&self, documents: &[EmbeddedDocument]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let index_name = self.scope.get();
        let now = chrono::Utc::now().timestamp();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexError::backend("sqlite add", e))?;

        for doc in documents {
            let metadata_json = serde_json::to_string(&doc.document.metadata)
                .map_err(|e| IndexError::backend("encode metadata", e))?;
            sqlx::query(
                r#"
                INSERT INTO vector_documents (index_name, document_key, content,
                                              metadata_json, embedding, dims, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(index_name, document_key) DO UPDATE SET
                    content = excluded.content,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding,
                    dims = excluded.dims,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&index_name)
            .bind(&doc.document.document_key)
            .bind(&doc.document.content)
            .bind(&metadata_json)
            .bind(vec_to_blob(&doc.vector))
            .bind(doc.vector.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| IndexError::backend("sqlite add", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| IndexError::backend("sqlite add", e))?;
        Ok(())
    }

    async fn delete(&self, document_keys: &[String]) -> Result<()> {
        let index_name = self.scope.get();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexError::backend("sqlite delete", e))?;
        for key in document_keys {
            sqlx::query("DELETE FROM vector_documents WHERE index_name = ? AND document_key = ?")
                .bind(&index_name)
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(|e| IndexError::backend("sqlite delete", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| IndexError::backend("sqlite delete", e))?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM vector_documents WHERE index_name = ?")
            .bind(self.scope.get())
            .execute(&self.pool)
            .await
            .map_err(|e| IndexError::backend("sqlite clear", e))?;
        Ok(())
    }

    async fn query(&self, query: &VectorQuery) -> Result<Vec<Document>> {
        query.validate()?;
        if query.limit == 0 {
            return Ok(Vec::new());
        }

        let mut sql = String::from(
            "SELECT document_key, content, metadata_json, embedding \
             FROM vector_documents WHERE index_name = ?",
        );
        for (_, value) in &query.filters {
            sql.push_str(filter_clause(value));
        }

        let mut select = sqlx::query(&sql).bind(self.scope.get());
        for (field, value) in &query.filters {
            select = bind_filter(select, field, value);
        }
        let rows = select
            .fetch_all(&self.pool)
            .await
            .map_err(|e| IndexError::backend("sqlite query", e))?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let score = cosine_similarity(&query.embedding, &blob_to_vec(&blob));
            let metadata_json: String = row.get("metadata_json");
            let metadata: Metadata = serde_json::from_str(&metadata_json)
                .map_err(|e| IndexError::backend("decode metadata", e))?;
            scored.push((
                score,
                Document {
                    document_key: row.get("document_key"),
                    content: row.get("content"),
                    metadata,
                },
            ));
        }

        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.document_key.cmp(&b.1.document_key))
        });
        Ok(scored
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .map(|(_, doc)| doc)
            .collect())
    }
}
