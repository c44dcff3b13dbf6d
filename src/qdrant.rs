//! Qdrant [`StorageProvider`] over the REST API.
//!
//! One Qdrant collection per index name, created on first write with
//! cosine distance and the dimension of the first vector seen. Point ids
//! are UUIDv5 of the document key so re-adding a key overwrites the same
//! point. The payload carries `key`, `content`, and `metadata`; metadata
//! filters become `must` conditions on `metadata.<field>`.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;

use vector_index_core::models::{Document, EmbeddedDocument, Metadata, MetadataValue};
use vector_index_core::store::{IndexScope, StorageProvider, VectorQuery};
use vector_index_core::{IndexError, Result};

use crate::config::QdrantConfig;

pub struct QdrantStorage {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    scope: IndexScope,
    /// Collections known to exist.
    ready: Mutex<HashSet<String>>,
}

impl QdrantStorage {
    pub fn new(config: &QdrantConfig) -> anyhow::Result<Self> {
        let api_key = match &config.api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                anyhow::anyhow!("{var} environment variable not set (qdrant.api_key_env)")
            })?),
            None => None,
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key,
            client,
            scope: IndexScope::new("default"),
            ready: Mutex::new(HashSet::new()),
        })
    }

    /// Send a request and return `(status, body)`. Non-success statuses
    /// other than 404 are backend errors.
    async fn call(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let mut request = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| IndexError::backend(operation, e))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok((status, Value::Null));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(IndexError::backend(
                operation,
                format!("Qdrant error {status}: {text}"),
            ));
        }
        let json = response
            .json()
            .await
            .map_err(|e| IndexError::backend(operation, e))?;
        Ok((status, json))
    }

    async fn ensure_collection(&self, name: &str, dims: usize) -> Result<()> {
        if self.ready.lock().contains(name) {
            return Ok(());
        }
        let path = format!("/collections/{name}");
        let (status, _) = self
            .call("qdrant get collection", Method::GET, &path, None)
            .await?;
        if status == StatusCode::NOT_FOUND {
            tracing::info!(collection = name, dims, "creating Qdrant collection");
            self.call(
                "qdrant create collection",
                Method::PUT,
                &path,
                Some(json!({ "vectors": { "size": dims, "distance": "Cosine" } })),
            )
            .await?;
        }
        self.ready.lock().insert(name.to_string());
        Ok(())
    }
}

/// Stable point id for a document key.
pub fn point_id(document_key: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, document_key.as_bytes()).to_string()
}

fn point_json(doc: &EmbeddedDocument) -> Value {
    json!({
        "id": point_id(&doc.document.document_key),
        "vector": doc.vector,
        "payload": {
            "key": doc.document.document_key,
            "content": doc.document.content,
            "metadata": doc.document.metadata,
        }
    })
}

/// One equality condition. Numbers become a closed range so integer and
/// float payloads compare by value, as in the other backends.
fn condition(field: &str, value: &MetadataValue) -> Value {
    let key = format!("metadata.{field}");
    match value {
        MetadataValue::Null => json!({ "is_null": { "key": key } }),
        MetadataValue::Int(i) => json!({ "key": key, "range": { "gte": i, "lte": i } }),
        MetadataValue::Float(x) => json!({ "key": key, "range": { "gte": x, "lte": x } }),
        other => json!({ "key": key, "match": { "value": other.to_json() } }),
    }
}

/// `must` filter for equality conditions, or `None` without filters.
pub fn filter_json(filters: &[(String, MetadataValue)]) -> Option<Value> {
    if filters.is_empty() {
        return None;
    }
    let must: Vec<Value> = filters.iter().map(|(f, v)| condition(f, v)).collect();
    Some(json!({ "must": must }))
}

fn parse_search_response(json: &Value) -> Result<Vec<Document>> {
    let invalid = |what: &str| {
        IndexError::backend("qdrant search", format!("invalid response: missing {what}"))
    };
    let hits = json
        .get("result")
        .and_then(|r| r.as_array())
        .ok_or_else(|| invalid("result array"))?;

    hits.iter()
        .map(|hit| {
            let payload = hit.get("payload").ok_or_else(|| invalid("payload"))?;
            let document_key = payload
                .get("key")
                .and_then(|k| k.as_str())
                .ok_or_else(|| invalid("payload.key"))?;
            let content = payload
                .get("content")
                .and_then(|c| c.as_str())
                .unwrap_or_default();
            let metadata: Metadata = match payload.get("metadata") {
                Some(m) => serde_json::from_value(m.clone())
                    .map_err(|e| IndexError::backend("qdrant search", e))?,
                None => Metadata::new(),
            };
            Ok(Document {
                document_key: document_key.to_string(),
                content: content.to_string(),
                metadata,
            })
        })
        .collect()
}

#[async_trait]
impl StorageProvider for QdrantStorage {
    fn index_name(&self) -> String {
        self.scope.get()
    }

    fn set_index_name(&self, name: &str) {
        self.scope.set(name);
    }

    async fn add(&self, documents: &[EmbeddedDocument]) -> Result<()> {
        let Some(first) = documents.first() else {
            return Ok(());
        };
        let name = self.scope.get();
        self.ensure_collection(&name, first.vector.len()).await?;

        let points: Vec<Value> = documents.iter().map(point_json).collect();
        self.call(
            "qdrant upsert",
            Method::PUT,
            &format!("/collections/{name}/points?wait=true"),
            Some(json!({ "points": points })),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, document_keys: &[String]) -> Result<()> {
        if document_keys.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = document_keys.iter().map(|k| point_id(k)).collect();
        self.call(
            "qdrant delete",
            Method::POST,
            &format!("/collections/{}/points/delete?wait=true", self.scope.get()),
            Some(json!({ "points": ids })),
        )
        .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let name = self.scope.get();
        self.call(
            "qdrant drop collection",
            Method::DELETE,
            &format!("/collections/{name}"),
            None,
        )
        .await?;
        self.ready.lock().remove(&name);
        Ok(())
    }

    async fn query(&self, query: &VectorQuery) -> Result<Vec<Document>> {
        query.validate()?;
        if query.limit == 0 {
            return Ok(Vec::new());
        }

        let mut body = json!({
            "vector": query.embedding,
            "limit": query.limit,
            "offset": query.offset,
            "with_payload": true,
        });
        if let Some(filter) = filter_json(&query.filters) {
            body["filter"] = filter;
        }

        let (status, json) = self
            .call(
                "qdrant search",
                Method::POST,
                &format!("/collections/{}/points/search", self.scope.get()),
                Some(body),
            )
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        parse_search_response(&json)
    }
}
