//! OpenAI embedding client.
//!
//! [`OpenAiEmbedder`] implements [`Embedder`] against the
//! `POST {base_url}/embeddings` endpoint. A failed call surfaces as
//! [`RagError::Embedding`] (or [`RagError::Connection`] when the API
//! cannot be reached); nothing is retried.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use ragchat_core::embedding::Embedder;
use ragchat_core::error::{RagError, Result};

use crate::config::Config;

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    /// Model name (e.g. `"text-embedding-3-small"`).
    model: String,
    /// Vector dimensionality (e.g. `1536`).
    dims: usize,
}

impl OpenAiEmbedder {
    /// Create an embedder from configuration.
    ///
    /// # Errors
    ///
    /// [`RagError::Config`] if the API key is missing or a placeholder.
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config.openai_api_key()?.to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.openai.timeout_secs))
            .build()
            .map_err(|e| RagError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.openai.base_url.trim_end_matches('/').to_string(),
            model: config.embedding.model.clone(),
            dims: config.embedding.dims,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        debug!(model = %self.model, inputs = texts.len(), "requesting embeddings");
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::connection("openai", e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RagError::Embedding(format!(
                "OpenAI API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RagError::Embedding(format!("invalid response body: {}", e)))?;
        let vectors = parse_embeddings_response(&json)?;

        if vectors.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(RagError::Embedding(format!(
                "model '{}' returned {}-dimensional vectors, configured for {}",
                self.model,
                bad.len(),
                self.dims
            )));
        }
        Ok(vectors)
    }
}

/// Parse an OpenAI embeddings response.
///
/// Extracts `data[].embedding` and orders the vectors by `data[].index`
/// so they line up with the request inputs.
pub fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::Embedding("invalid response: missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| RagError::Embedding("invalid response: missing embedding".into()))?;
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
    Ok(indexed.into_iter().map(|(_, vec)| vec).collect())
}
