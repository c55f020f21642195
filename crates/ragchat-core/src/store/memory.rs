//! In-memory [`VectorStore`] implementation.
//!
//! Records live in a `BTreeMap` keyed by id behind `std::sync::RwLock`.
//! Queries are brute-force cosine similarity over all stored vectors.
//! Nothing survives the process.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::models::{RetrievalResult, StoredRecord};

use super::{check_batch_dims, check_dims, rank_results, VectorStore};

pub struct InMemoryStore {
    collection: String,
    dims: usize,
    records: RwLock<BTreeMap<String, StoredRecord>>,
}

impl InMemoryStore {
    pub fn new(collection: impl Into<String>, dims: usize) -> Self {
        Self {
            collection: collection.into(),
            dims,
            records: RwLock::new(BTreeMap::new()),
        }
    }
}

fn poisoned<T>(_: T) -> RagError {
    RagError::backend("memory", "store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn backend(&self) -> &str {
        "memory"
    }

    fn target(&self) -> String {
        "in-process".to_string()
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().map_err(poisoned)?.len())
    }

    async fn upsert_batch(&self, records: &[StoredRecord]) -> Result<()> {
        check_batch_dims(&self.collection, self.dims, records)?;
        let mut stored = self.records.write().map_err(poisoned)?;
        for record in records {
            stored.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<RetrievalResult>> {
        check_dims(&self.collection, self.dims, vector)?;
        let stored = self.records.read().map_err(poisoned)?;
        let results = stored
            .values()
            .map(|r| RetrievalResult {
                id: r.id.clone(),
                text: r.text.clone(),
                category: r.category.clone(),
                source_path: r.source_path.clone(),
                similarity: cosine_similarity(vector, &r.vector),
            })
            .collect();
        Ok(rank_results(results, limit))
    }

    async fn delete_all(&self) -> Result<()> {
        self.records.write().map_err(poisoned)?.clear();
        Ok(())
    }
}
