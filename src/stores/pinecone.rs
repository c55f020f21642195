//! Pinecone [`VectorStore`] over the REST API.
//!
//! The control plane (`https://api.pinecone.io`) describes the index and
//! creates it as a serverless cosine index when absent. Data operations go
//! to the index host it reports. Chunk text and provenance travel as
//! vector metadata.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use ragchat_core::error::{RagError, Result};
use ragchat_core::models::{RetrievalResult, StoredRecord};
use ragchat_core::store::{check_batch_dims, check_dims, rank_results, VectorStore};

use crate::config::PineconeConfig;

use super::rejected;

const BACKEND: &str = "pinecone";
const API_VERSION: &str = "2024-07";
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);
const READY_POLL_ATTEMPTS: u32 = 60;

pub struct PineconeStore {
    client: reqwest::Client,
    api_key: String,
    host: String,
    index: String,
    namespace: String,
    dims: usize,
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    dimension: usize,
    #[serde(default)]
    host: String,
    #[serde(default)]
    status: IndexStatus,
}

#[derive(Debug, Default, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<Match>,
}

#[derive(Debug, Deserialize)]
struct Match {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Value>,
}

/// Longest index name Pinecone accepts.
const MAX_INDEX_NAME_LEN: usize = 45;

/// Map a collection name onto Pinecone's index naming rules: lowercase
/// letters, digits, and inner hyphens, at most 45 characters.
pub fn index_name(collection: &str) -> Result<String> {
    let mapped: String = collection
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let truncated: String = mapped
        .trim_matches('-')
        .chars()
        .take(MAX_INDEX_NAME_LEN)
        .collect();
    let name = truncated.trim_end_matches('-').to_string();
    if name.is_empty() {
        return Err(RagError::Config(format!(
            "collection '{}' cannot be used as a Pinecone index name",
            collection
        )));
    }
    Ok(name)
}

impl PineconeStore {
    /// Describe the index, creating it and waiting for readiness if absent.
    pub async fn open(
        client: reqwest::Client,
        config: &PineconeConfig,
        api_key: &str,
        collection: &str,
        dims: usize,
    ) -> Result<Self> {
        let control = config.control_url.trim_end_matches('/').to_string();
        let index = index_name(collection)?;

        let mut description = describe_index(&client, &control, api_key, &index).await?;
        if description.is_none() {
            info!(index = %index, cloud = %config.cloud, region = %config.region, "creating pinecone index");
            let body = json!({
                "name": index,
                "dimension": dims,
                "metric": "cosine",
                "spec": { "serverless": { "cloud": config.cloud, "region": config.region } },
            });
            let response = client
                .post(format!("{}/indexes", control))
                .header("Api-Key", api_key)
                .header("X-Pinecone-API-Version", API_VERSION)
                .json(&body)
                .send()
                .await
                .map_err(|e| RagError::connection(BACKEND, e))?;
            // 409: created concurrently by someone else.
            if !response.status().is_success() && response.status() != reqwest::StatusCode::CONFLICT {
                return Err(rejected(BACKEND, response).await);
            }
        }

        let mut attempts = 0;
        let description = loop {
            if let Some(d) = description.take() {
                if d.status.ready && !d.host.is_empty() {
                    break d;
                }
            }
            attempts += 1;
            if attempts > READY_POLL_ATTEMPTS {
                return Err(RagError::backend(
                    BACKEND,
                    format!("index '{}' did not become ready", index),
                ));
            }
            debug!(index = %index, attempts, "waiting for pinecone index");
            tokio::time::sleep(READY_POLL_INTERVAL).await;
            description = describe_index(&client, &control, api_key, &index).await?;
        };

        if description.dimension != dims {
            return Err(RagError::dimension_mismatch(&index, description.dimension, dims));
        }

        let host = if description.host.starts_with("http") {
            description.host
        } else {
            format!("https://{}", description.host)
        };

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            host,
            index,
            namespace: config.namespace.clone(),
            dims,
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        self.client
            .post(format!("{}/{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| RagError::connection(BACKEND, e))
    }

    async fn post_ok(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        let response = self.post(path, body).await?;
        if !response.status().is_success() {
            return Err(rejected(BACKEND, response).await);
        }
        Ok(response)
    }
}

async fn describe_index(
    client: &reqwest::Client,
    control: &str,
    api_key: &str,
    index: &str,
) -> Result<Option<IndexDescription>> {
    let response = client
        .get(format!("{}/indexes/{}", control, index))
        .header("Api-Key", api_key)
        .header("X-Pinecone-API-Version", API_VERSION)
        .send()
        .await
        .map_err(|e| RagError::connection(BACKEND, format!("{}: {}", control, e)))?;
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(RagError::Config(
            "PINECONE_API_KEY was rejected by Pinecone".to_string(),
        ));
    }
    if !status.is_success() {
        return Err(rejected(BACKEND, response).await);
    }
    response
        .json()
        .await
        .map(Some)
        .map_err(|e| RagError::backend(BACKEND, format!("invalid index description: {}", e)))
}

#[async_trait]
impl VectorStore for PineconeStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    fn target(&self) -> String {
        self.host.clone()
    }

    fn collection(&self) -> &str {
        &self.index
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn count(&self) -> Result<usize> {
        let response = self.post_ok("describe_index_stats", &json!({})).await?;
        let stats: Value = response
            .json()
            .await
            .map_err(|e| RagError::backend(BACKEND, format!("invalid stats response: {}", e)))?;
        Ok(namespace_count(&stats, &self.namespace))
    }

    async fn upsert_batch(&self, records: &[StoredRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        check_batch_dims(&self.index, self.dims, records)?;
        let vectors: Vec<Value> = records
            .iter()
            .map(|r| {
                json!({
                    "id": r.id,
                    "values": r.vector,
                    "metadata": {
                        "text": r.text,
                        "category": r.category,
                        "source_path": r.source_path,
                        "sequence_index": r.sequence_index,
                    },
                })
            })
            .collect();
        self.post_ok(
            "vectors/upsert",
            &json!({ "vectors": vectors, "namespace": self.namespace }),
        )
        .await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<RetrievalResult>> {
        check_dims(&self.index, self.dims, vector)?;
        let body = json!({
            "vector": vector,
            "topK": limit,
            "includeMetadata": true,
            "includeValues": false,
            "namespace": self.namespace,
        });
        let response = self.post_ok("query", &body).await?;
        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| RagError::backend(BACKEND, format!("invalid query response: {}", e)))?;
        Ok(rank_results(parse_matches(parsed), limit))
    }

    async fn delete_all(&self) -> Result<()> {
        let response = self
            .post(
                "vectors/delete",
                &json!({ "deleteAll": true, "namespace": self.namespace }),
            )
            .await?;
        // Deleting from a namespace that was never written is a 404.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(namespace = %self.namespace, "namespace already empty");
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(rejected(BACKEND, response).await);
        }
        Ok(())
    }
}

fn namespace_count(stats: &Value, namespace: &str) -> usize {
    stats["namespaces"][namespace]["vectorCount"]
        .as_u64()
        .unwrap_or(0) as usize
}

fn parse_matches(response: QueryResponse) -> Vec<RetrievalResult> {
    response
        .matches
        .into_iter()
        .map(|m| {
            let metadata = m.metadata.unwrap_or(Value::Null);
            let field = |key: &str| {
                metadata
                    .get(key)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            RetrievalResult {
                text: field("text"),
                category: field("category"),
                source_path: field("source_path"),
                id: m.id,
                similarity: m.score,
            }
        })
        .collect()
}
