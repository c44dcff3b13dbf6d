//! Concrete embedding transformers.
//!
//! - **[`OpenAiTransformer`]** calls an OpenAI-compatible `/embeddings`
//!   endpoint with optional retry and backoff.
//! - **[`HashingTransformer`]** is a local, deterministic feature-hashing
//!   embedding. No network, no model download; useful offline and in tests.
//!
//! Use [`create_transformer`] to pick one from configuration:
//!
//! ```rust,no_run
//! # use vector_index::config::EmbeddingConfig;
//! # use vector_index::embedding::create_transformer;
//! let config = EmbeddingConfig::default(); // provider = "hashing", dims = 256
//! let transformer = create_transformer(&config).unwrap();
//! assert_eq!(transformer.transformer_id(), "hashing:256");
//! ```
//!
//! # Retry Strategy
//!
//! `max_retries` defaults to 0: a failed batch goes straight back to the
//! caller. When raised, the OpenAI transformer retries transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use vector_index_core::embedding::EmbeddingTransformer;
use vector_index_core::IndexError;

use crate::config::EmbeddingConfig;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Build the transformer named by `config.provider`.
pub fn create_transformer(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingTransformer>> {
    match config.provider.as_str() {
        "hashing" => Ok(Arc::new(HashingTransformer::new(config.dims)?)),
        "openai" => Ok(Arc::new(OpenAiTransformer::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ OpenAI ============

/// Transformer backed by the OpenAI embeddings API (or any server that
/// speaks the same protocol at `base_url`).
///
/// The id is `openai:{model}`, so switching models starts a fresh cache
/// partition.
pub struct OpenAiTransformer {
    id: String,
    model: String,
    endpoint: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiTransformer {
    /// Create a transformer from configuration, reading `OPENAI_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` is not set or the key is not in the
    /// environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: impl Into<String>) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_OPENAI_BASE_URL)
            .trim_end_matches('/');

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            id: format!("openai:{model}"),
            endpoint: format!("{base_url}/embeddings"),
            model,
            api_key: api_key.into(),
            max_retries: config.max_retries,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl EmbeddingTransformer for OpenAiTransformer {
    fn transformer_id(&self) -> &str {
        &self.id
    }

    async fn embed_batch(&self, texts: &[String]) -> vector_index_core::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, "retrying embeddings request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| IndexError::backend("openai embeddings", e))?;
                        return parse_openai_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = IndexError::backend(
                        "openai embeddings",
                        format!("API error {status}: {body_text}"),
                    );
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(IndexError::backend("openai embeddings", e));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            IndexError::backend("openai embeddings", "embedding failed after retries")
        }))
    }
}

/// Extract `data[].embedding` arrays, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> vector_index_core::Result<Vec<Vec<f32>>> {
    let invalid = |what: &str| {
        IndexError::backend(
            "openai embeddings",
            format!("invalid response: missing {what}"),
        )
    };

    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| invalid("data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| invalid("embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Hashing ============

/// Bag-of-words feature hashing into `dims` buckets.
///
/// Tokens are lowercase alphanumeric runs. Each token's SHA-256 digest
/// picks a bucket (first 8 bytes) and a sign (9th byte), which keeps
/// collisions from only ever adding up. The result is L2-normalized;
/// text with no tokens embeds as the zero vector.
pub struct HashingTransformer {
    id: String,
    dims: usize,
}

impl HashingTransformer {
    pub fn new(dims: usize) -> vector_index_core::Result<Self> {
        if dims == 0 {
            return Err(IndexError::config("hashing dims must be greater than 0"));
        }
        Ok(Self {
            id: format!("hashing:{dims}"),
            dims,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingTransformer for HashingTransformer {
    fn transformer_id(&self) -> &str {
        &self.id
    }

    async fn embed_batch(&self, texts: &[String]) -> vector_index_core::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vector_index_core::embedding::cosine_similarity;

    #[test]
    fn test_hashing_is_deterministic_and_normalized() {
        let t = HashingTransformer::new(64).unwrap();
        let a = t.embed_text("The quick brown fox");
        assert_eq!(a, t.embed_text("the QUICK brown, fox!"));
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(t.transformer_id(), "hashing:64");
    }

    #[test]
    fn test_hashing_overlap_ranks_higher() {
        let t = HashingTransformer::new(256).unwrap();
        let query = t.embed_text("rust borrow checker");
        let close = t.embed_text("the borrow checker in rust enforces ownership");
        let far = t.embed_text("baking sourdough bread at home");
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[test]
    fn test_hashing_empty_text_is_zero_vector() {
        let t = HashingTransformer::new(8).unwrap();
        assert_eq!(t.embed_text("  ... "), vec![0.0; 8]);
        assert!(HashingTransformer::new(0).is_err());
    }

    #[tokio::test]
    async fn test_hashing_embed_batch_preserves_order() {
        let t = HashingTransformer::new(32).unwrap();
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let vectors = t.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], t.embed_text("beta"));
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.5, 0.5]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.5, 0.5]]);

        let err = parse_openai_response(&serde_json::json!({"error": "x"})).unwrap_err();
        assert!(err.to_string().contains("missing data array"));
    }

    #[test]
    fn test_create_transformer() {
        let config = EmbeddingConfig::default();
        let t = create_transformer(&config).unwrap();
        assert_eq!(t.transformer_id(), "hashing:256");

        let unknown = EmbeddingConfig {
            provider: "nope".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(create_transformer(&unknown).is_err());
    }

    #[tokio::test]
    async fn test_openai_unreachable_is_backend_error() {
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            model: Some("text-embedding-3-small".to_string()),
            base_url: Some("http://127.0.0.1:9/v1/".to_string()),
            timeout_secs: 2,
            ..EmbeddingConfig::default()
        };
        let t = OpenAiTransformer::with_api_key(&config, "test-key").unwrap();
        assert_eq!(t.transformer_id(), "openai:text-embedding-3-small");

        let err = t.embed_batch(&["hello".to_string()]).await.unwrap_err();
        assert!(matches!(err, IndexError::Backend { .. }));
    }
}
