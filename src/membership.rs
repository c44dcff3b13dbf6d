//! SQLite-backed [`MembershipRegistry`]: the `index_memberships` table.

use async_trait::async_trait;
use sqlx::{Sqlite, SqlitePool, Transaction};

use vector_index_core::source::MembershipRegistry;
use vector_index_core::{IndexError, Result};

pub struct SqliteMembershipRegistry {
    pool: SqlitePool,
}

impl SqliteMembershipRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

async fn insert_rows(
    tx: &mut Transaction<'_, Sqlite>,
    index_name: &str,
    source_id: &str,
    object_keys: &[String],
    operation: &str,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    for key in object_keys {
        sqlx::query(
            r#"
            INSERT INTO index_memberships (index_name, source_id, object_key, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(index_name, source_id, object_key) DO UPDATE SET
                updated_at = excluded.updated_at
            "#,
        )
        .bind(index_name)
        .bind(source_id)
        .bind(key)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| IndexError::backend(operation, e))?;
    }
    Ok(())
}

#[async_trait]
impl MembershipRegistry for SqliteMembershipRegistry {
    async fn replace_memberships(
        &self,
        index_name: &str,
        source_id: &str,
        object_keys: &[String],
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexError::backend("replace memberships", e))?;

        sqlx::query("DELETE FROM index_memberships WHERE index_name = ? AND source_id = ?")
            .bind(index_name)
            .bind(source_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| IndexError::backend("replace memberships", e))?;

        insert_rows(&mut tx, index_name, source_id, object_keys, "replace memberships").await?;
        tx.commit()
            .await
            .map_err(|e| IndexError::backend("replace memberships", e))?;
        Ok(())
    }

    async fn add_memberships(
        &self,
        index_name: &str,
        source_id: &str,
        object_keys: &[String],
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexError::backend("add memberships", e))?;
        insert_rows(&mut tx, index_name, source_id, object_keys, "add memberships").await?;
        tx.commit()
            .await
            .map_err(|e| IndexError::backend("add memberships", e))?;
        Ok(())
    }

    async fn remove_memberships(
        &self,
        index_name: &str,
        source_id: &str,
        object_keys: &[String],
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexError::backend("remove memberships", e))?;
        for key in object_keys {
            sqlx::query(
                "DELETE FROM index_memberships WHERE index_name = ? AND source_id = ? AND object_key = ?",
            )
            .bind(index_name)
            .bind(source_id)
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(|e| IndexError::backend("remove memberships", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| IndexError::backend("remove memberships", e))?;
        Ok(())
    }

    async fn indexes_for_object(&self, object_key: &str) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT DISTINCT index_name FROM index_memberships WHERE object_key = ? ORDER BY index_name",
        )
        .bind(object_key)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IndexError::backend("membership lookup", e))
    }

    async fn remove_object(&self, object_key: &str) -> Result<()> {
        sqlx::query("DELETE FROM index_memberships WHERE object_key = ?")
            .bind(object_key)
            .execute(&self.pool)
            .await
            .map_err(|e| IndexError::backend("remove membership", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_replace_lookup_remove() {
        let tmp = TempDir::new().unwrap();
        let pool = migrate::open_path(&tmp.path().join("m.sqlite")).await.unwrap();
        let registry = SqliteMembershipRegistry::new(pool);

        let keys = |ks: &[&str]| ks.iter().map(|k| k.to_string()).collect::<Vec<_>>();
        registry
            .replace_memberships("Media", "library.Book", &keys(&["library.Book:1", "library.Book:2"]))
            .await
            .unwrap();
        registry
            .replace_memberships("Archive", "books", &keys(&["library.Book:2"]))
            .await
            .unwrap();

        assert_eq!(
            registry.indexes_for_object("library.Book:2").await.unwrap(),
            vec!["Archive", "Media"]
        );

        registry
            .replace_memberships("Media", "library.Book", &keys(&["library.Book:1"]))
            .await
            .unwrap();
        assert_eq!(
            registry.indexes_for_object("library.Book:2").await.unwrap(),
            vec!["Archive"]
        );

        registry.remove_object("library.Book:2").await.unwrap();
        assert!(registry
            .indexes_for_object("library.Book:2")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            registry.indexes_for_object("library.Book:1").await.unwrap(),
            vec!["Media"]
        );
    }

    #[tokio::test]
    async fn test_add_and_remove_single_rows() {
        let tmp = TempDir::new().unwrap();
        let pool = migrate::open_path(&tmp.path().join("m.sqlite")).await.unwrap();
        let registry = SqliteMembershipRegistry::new(pool);

        let keys = |ks: &[&str]| ks.iter().map(|k| k.to_string()).collect::<Vec<_>>();
        registry
            .replace_memberships("Media", "books", &keys(&["library.Book:1"]))
            .await
            .unwrap();
        registry
            .add_memberships("Media", "books", &keys(&["library.Book:2", "library.Book:1"]))
            .await
            .unwrap();
        assert_eq!(
            registry.indexes_for_object("library.Book:2").await.unwrap(),
            vec!["Media"]
        );

        registry
            .remove_memberships("Media", "books", &keys(&["library.Book:2"]))
            .await
            .unwrap();
        assert!(registry
            .indexes_for_object("library.Book:2")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            registry.indexes_for_object("library.Book:1").await.unwrap(),
            vec!["Media"]
        );
    }
}
