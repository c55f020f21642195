//! Chroma [`VectorStore`] over the REST v2 API.
//!
//! The collection is created with `hnsw:space = cosine`, so Chroma's
//! distance is `1 - cosine similarity` and converts back directly.
//! Clearing the store drops the collection and recreates it, which gives
//! it a new server-side id.

use std::sync::RwLock;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use ragchat_core::error::{RagError, Result};
use ragchat_core::models::{RetrievalResult, StoredRecord};
use ragchat_core::store::{check_batch_dims, check_dims, rank_results, VectorStore};

use crate::config::ChromaConfig;

use super::rejected;

const BACKEND: &str = "chroma";

pub struct ChromaStore {
    client: reqwest::Client,
    base_url: String,
    tenant: String,
    database: String,
    collection: String,
    dims: usize,
    collection_id: RwLock<String>,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    id: String,
    #[serde(default)]
    dimension: Option<usize>,
}

/// Column-major result of a single-vector query.
#[derive(Debug, Deserialize)]
pub(crate) struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Value>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
}

impl ChromaStore {
    /// Check the server heartbeat, then get or create the collection.
    pub async fn open(
        client: reqwest::Client,
        config: &ChromaConfig,
        collection: &str,
        dims: usize,
    ) -> Result<Self> {
        let store = Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            tenant: config.tenant.clone(),
            database: config.database.clone(),
            collection: collection.to_string(),
            dims,
            collection_id: RwLock::new(String::new()),
        };

        let response = store
            .client
            .get(format!("{}/api/v2/heartbeat", store.base_url))
            .send()
            .await
            .map_err(|e| RagError::connection(BACKEND, format!("{}: {}", store.base_url, e)))?;
        if !response.status().is_success() {
            return Err(RagError::connection(
                BACKEND,
                format!("{} heartbeat returned HTTP {}", store.base_url, response.status()),
            ));
        }

        store.get_or_create().await?;
        Ok(store)
    }

    fn collections_url(&self) -> String {
        format!(
            "{}/api/v2/tenants/{}/databases/{}/collections",
            self.base_url, self.tenant, self.database
        )
    }

    fn collection_url(&self, action: &str) -> Result<String> {
        let id = self
            .collection_id
            .read()
            .map_err(|_| RagError::backend(BACKEND, "collection id lock poisoned"))?
            .clone();
        Ok(format!("{}/{}/{}", self.collections_url(), id, action))
    }

    async fn get_or_create(&self) -> Result<()> {
        let body = json!({
            "name": self.collection,
            "metadata": { "hnsw:space": "cosine" },
            "get_or_create": true,
        });
        let response = self
            .client
            .post(self.collections_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::connection(BACKEND, e))?;
        if !response.status().is_success() {
            return Err(rejected(BACKEND, response).await);
        }
        let info: CollectionInfo = response
            .json()
            .await
            .map_err(|e| RagError::backend(BACKEND, format!("invalid collection response: {}", e)))?;

        if let Some(existing) = info.dimension {
            if existing != self.dims {
                return Err(RagError::dimension_mismatch(&self.collection, existing, self.dims));
            }
        }
        debug!(collection = %self.collection, id = %info.id, "chroma collection ready");

        *self
            .collection_id
            .write()
            .map_err(|_| RagError::backend(BACKEND, "collection id lock poisoned"))? = info.id;
        Ok(())
    }

    async fn post(&self, action: &str, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.collection_url(action)?)
            .json(body)
            .send()
            .await
            .map_err(|e| RagError::connection(BACKEND, e))?;
        if !response.status().is_success() {
            return Err(rejected(BACKEND, response).await);
        }
        Ok(response)
    }
}

#[async_trait]
impl VectorStore for ChromaStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    fn target(&self) -> String {
        self.base_url.clone()
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn count(&self) -> Result<usize> {
        let response = self
            .client
            .get(self.collection_url("count")?)
            .send()
            .await
            .map_err(|e| RagError::connection(BACKEND, e))?;
        if !response.status().is_success() {
            return Err(rejected(BACKEND, response).await);
        }
        response
            .json::<usize>()
            .await
            .map_err(|e| RagError::backend(BACKEND, format!("invalid count response: {}", e)))
    }

    async fn upsert_batch(&self, records: &[StoredRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        check_batch_dims(&self.collection, self.dims, records)?;
        self.post("upsert", &upsert_body(records)).await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<RetrievalResult>> {
        check_dims(&self.collection, self.dims, vector)?;
        let body = json!({
            "query_embeddings": [vector],
            "n_results": limit,
            "include": ["documents", "metadatas", "distances"],
        });
        let response = self.post("query", &body).await?;
        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| RagError::backend(BACKEND, format!("invalid query response: {}", e)))?;
        Ok(rank_results(parse_query_response(parsed), limit))
    }

    async fn delete_all(&self) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/{}", self.collections_url(), self.collection))
            .send()
            .await
            .map_err(|e| RagError::connection(BACKEND, e))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(collection = %self.collection, "collection already absent");
        } else if !status.is_success() {
            return Err(rejected(BACKEND, response).await);
        }
        self.get_or_create().await
    }
}

fn upsert_body(records: &[StoredRecord]) -> Value {
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    let embeddings: Vec<&[f32]> = records.iter().map(|r| r.vector.as_slice()).collect();
    let documents: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
    let metadatas: Vec<Value> = records
        .iter()
        .map(|r| {
            json!({
                "category": r.category,
                "source_path": r.source_path,
                "sequence_index": r.sequence_index,
            })
        })
        .collect();
    json!({
        "ids": ids,
        "embeddings": embeddings,
        "documents": documents,
        "metadatas": metadatas,
    })
}

pub(crate) fn parse_query_response(response: QueryResponse) -> Vec<RetrievalResult> {
    let ids = response.ids.into_iter().next().unwrap_or_default();
    let documents = first_row(response.documents);
    let metadatas = first_row(response.metadatas);
    let distances = first_row(response.distances);

    ids.into_iter()
        .enumerate()
        .map(|(i, id)| {
            let metadata = metadatas.get(i).cloned().flatten().unwrap_or(Value::Null);
            let distance = distances.get(i).copied().flatten().unwrap_or(1.0);
            RetrievalResult {
                id,
                text: documents.get(i).cloned().flatten().unwrap_or_default(),
                category: metadata_str(&metadata, "category"),
                source_path: metadata_str(&metadata, "source_path"),
                similarity: 1.0 - distance,
            }
        })
        .collect()
}

fn first_row<T>(column: Option<Vec<Vec<T>>>) -> Vec<T> {
    column
        .and_then(|rows| rows.into_iter().next())
        .unwrap_or_default()
}

fn metadata_str(metadata: &Value, key: &str) -> String {
    metadata
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}
