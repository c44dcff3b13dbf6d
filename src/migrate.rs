//! Opening the SQLite database and idempotent schema setup for the
//! SQLite-backed components.
//!
//! | Table | Owner |
//! |-------|-------|
//! | `vector_documents` | [`SqliteStorage`](crate::sqlite_store::SqliteStorage) |
//! | `embedding_cache` | [`SqliteCacheBackend`](crate::sqlite_cache::SqliteCacheBackend) |
//! | `index_memberships` | [`SqliteMembershipRegistry`](crate::membership::SqliteMembershipRegistry) |
//!
//! Connections run in WAL mode with a busy timeout, so a `vidx build`
//! writing to the database does not fail concurrent searches.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::config::Config;

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = open(config).await?;
    pool.close().await;
    Ok(())
}

/// Open the configured database with every table in place.
pub async fn open(config: &Config) -> Result<SqlitePool> {
    open_path(&config.db.path).await
}

/// Open (creating if missing, along with parent directories) the database
/// at `db_path` and apply the schema.
pub async fn open_path(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await
        .with_context(|| format!("opening {}", db_path.display()))?;
    apply_schema(&pool).await?;
    Ok(pool)
}

/// Create every table and index if missing.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_documents (
            index_name TEXT NOT NULL,
            document_key TEXT NOT NULL,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (index_name, document_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_cache (
            content_hash TEXT NOT NULL,
            transformer_id TEXT NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(content_hash, transformer_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_memberships (
            index_name TEXT NOT NULL,
            source_id TEXT NOT NULL,
            object_key TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (index_name, source_id, object_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embedding_cache_transformer ON embedding_cache(transformer_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_index_memberships_object ON index_memberships(object_key)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
