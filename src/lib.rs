//! # vector-index
//!
//! Native integrations and the `vidx` CLI for the `vector-index-core`
//! library.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ JSONL record │──▶│ Chunk+Embed │──▶│ SQLite/Qdrant│
//! │    stores    │   │  (+cache)   │   │   storage    │
//! └──────────────┘   └─────────────┘   └──────┬───────┘
//!                                             │
//!                                        ┌────▼─────┐
//!                                        │  Query   │
//!                                        │ resolve  │
//!                                        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! vidx init                           # create database
//! vidx build                          # embed and store every index
//! vidx search MediaIndex "space opera"
//! vidx similar MediaIndex library.Book 42
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`migrate`] | Database open and schema setup |
//! | [`sqlite_store`] | SQLite storage provider |
//! | [`qdrant`] | Qdrant storage provider |
//! | [`sqlite_cache`] | SQLite embedding cache backend |
//! | [`membership`] | SQLite object→index membership registry |
//! | [`embedding`] | OpenAI and hashing transformers |
//! | [`records`] | JSON-lines record store |
//! | [`factory`] | Config → index registry |

pub mod build_cmd;
pub mod cache_cmd;
pub mod config;
pub mod embedding;
pub mod factory;
pub mod membership;
pub mod migrate;
pub mod qdrant;
pub mod records;
pub mod search;
pub mod sqlite_cache;
pub mod sqlite_store;
