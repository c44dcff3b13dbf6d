//! # vector-index core
//!
//! Backend-agnostic logic for vector indexes: the document model,
//! chunkers, the embedding transformer trait and its content-addressed
//! cache, source adapters, the storage provider trait, the result
//! resolution engine, and the index orchestrator.
//!
//! This crate contains no tokio runtime, sqlx, HTTP client, or filesystem
//! I/O. Native backends (SQLite, Qdrant, OpenAI) live in the `vector-index`
//! application crate and plug in through the traits defined here.

pub mod cache;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod query;
pub mod source;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{IndexError, Result};
pub use models::{Document, EmbeddedDocument, Metadata, MetadataValue};
