//! Embedding transformer trait and vector utilities.
//!
//! An [`EmbeddingTransformer`] turns text into fixed-length vectors. Every
//! transformer exposes a stable `transformer_id` that names the model
//! configuration; it partitions the embedding cache, so it must change
//! whenever the underlying model does.
//!
//! Concrete transformers (OpenAI-compatible HTTP, local hashing) live in
//! the `vector-index` app crate. The cache wrapper lives in
//! [`crate::cache`].

use async_trait::async_trait;

use crate::error::{IndexError, Result};
use crate::models::{Document, EmbeddedDocument};

/// Default number of documents sent to the backend per call.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Turns text into vectors, singly or in batches.
///
/// Implementors provide [`embed_batch`](Self::embed_batch), one backend
/// call per invocation. The provided methods build on it. A failing batch
/// is not retried or partially recovered; the error goes to the caller.
#[async_trait]
pub trait EmbeddingTransformer: Send + Sync {
    /// Stable identifier for this transformer and model configuration.
    fn transformer_id(&self) -> &str;

    /// Embed `texts` in a single backend call, returning one vector per
    /// input in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed one string. `None` when the backend produced no vector.
    async fn embed_string(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        Ok(if vectors.is_empty() {
            None
        } else {
            Some(vectors.swap_remove(0))
        })
    }

    /// Embed documents in groups of `batch_size`, preserving order and
    /// count.
    async fn embed_documents(
        &self,
        documents: Vec<Document>,
        batch_size: usize,
    ) -> Result<Vec<EmbeddedDocument>> {
        embed_in_batches(self, documents, batch_size).await
    }
}

/// Split `documents` into groups of `batch_size` and embed each group with
/// one [`EmbeddingTransformer::embed_batch`] call.
///
/// A backend error is re-labelled with the failing batch's index range.
/// A batch that comes back with a different number of vectors is an
/// [`IndexError::Integrity`] error; results are never truncated.
pub async fn embed_in_batches<T>(
    transformer: &T,
    documents: Vec<Document>,
    batch_size: usize,
) -> Result<Vec<EmbeddedDocument>>
where
    T: EmbeddingTransformer + ?Sized,
{
    if batch_size == 0 {
        return Err(IndexError::config("batch_size must be greater than 0"));
    }

    let mut embedded = Vec::with_capacity(documents.len());
    let mut pending = documents.into_iter().peekable();
    let mut start = 0;

    while pending.peek().is_some() {
        let batch: Vec<Document> = pending.by_ref().take(batch_size).collect();
        let end = start + batch.len();
        let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();

        let vectors = transformer
            .embed_batch(&texts)
            .await
            .map_err(|e| with_batch_context(e, transformer.transformer_id(), start, end))?;

        if vectors.len() != batch.len() {
            return Err(IndexError::Integrity {
                operation: format!(
                    "{} embed batch {}..{}",
                    transformer.transformer_id(),
                    start,
                    end
                ),
                expected: batch.len(),
                actual: vectors.len(),
            });
        }

        embedded.extend(
            batch
                .into_iter()
                .zip(vectors)
                .map(|(doc, vector)| doc.with_embedding(vector)),
        );
        start = end;
    }

    Ok(embedded)
}

fn with_batch_context(err: IndexError, transformer_id: &str, start: usize, end: usize) -> IndexError {
    match err {
        IndexError::Backend { operation, source } => IndexError::Backend {
            operation: format!("{operation} ({transformer_id} batch {start}..{end})"),
            source,
        },
        other => other,
    }
}

// ============ Vector utilities ============

/// Pack a vector as little-endian `f32` bytes, four per component.
///
/// ```rust
/// use vector_index_core::embedding::{blob_to_vec, vec_to_blob};
///
/// let v = vec![0.25f32, -1.0, 8.0];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]. Trailing bytes that do not form a whole
/// `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine of the angle between `a` and `b`, in `[-1.0, 1.0]`.
///
/// Mismatched lengths, empty input, and zero vectors all score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| {
            (dot + x * y, na + x * x, nb + y * y)
        });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
