//! Error taxonomy shared by every component.
//!
//! Each variant is a distinct kind so boundary layers (CLI, HTTP) can map
//! them to exit codes or status codes without string matching.

use std::error::Error as StdError;

/// Boxed backend error carried by [`IndexError::Backend`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors raised by the indexing core and its backends.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Missing wiring, malformed identifier, unknown field, or an invalid
    /// filter. Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unknown index or other named entity.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller misuse, such as an empty query string.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Network or database failure in an embedding, storage, or cache
    /// backend. Not retried by the core.
    #[error("{operation} failed: {source}")]
    Backend {
        operation: String,
        #[source]
        source: BoxError,
    },

    /// The embedding backend returned a different number of vectors than
    /// it was asked for.
    #[error("{operation}: expected {expected} vectors, got {actual}")]
    Integrity {
        operation: String,
        expected: usize,
        actual: usize,
    },

    /// The backend cannot express the requested query shape.
    #[error("not implemented for this backend: {0}")]
    Unsupported(String),
}

impl IndexError {
    pub fn config(msg: impl Into<String>) -> Self {
        IndexError::Config(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        IndexError::NotFound(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        IndexError::Unsupported(msg.into())
    }

    /// Wrap a backend failure with the name of the operation that hit it.
    pub fn backend<E>(operation: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        IndexError::Backend {
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, IndexError::NotFound(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, IndexError::Unsupported(_))
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
