//! Vector store abstraction for ragchat.
//!
//! The [`VectorStore`] trait is the single interface every backend
//! implements (in-memory, SQLite, Chroma, Pinecone). Opening a store is
//! each backend's own async constructor: it creates the collection when
//! absent, opens it when present, and fails with
//! [`RagError::Connection`](crate::error::RagError::Connection) or
//! [`RagError::Schema`](crate::error::RagError::Schema).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::error::{RagError, Result};
use crate::models::{RetrievalResult, StoredRecord};

/// Abstract vector storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`count`](VectorStore::count) | Number of stored records |
/// | [`upsert_batch`](VectorStore::upsert_batch) | Insert or overwrite records by id |
/// | [`query`](VectorStore::query) | Nearest records by cosine similarity |
/// | [`delete_all`](VectorStore::delete_all) | Clear the collection for a rebuild |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend identifier (`"memory"`, `"sqlite"`, `"chroma"`, `"pinecone"`).
    fn backend(&self) -> &str;

    /// Human-readable connection target (URL, file path, index host).
    fn target(&self) -> String;

    /// Collection, table, or index name.
    fn collection(&self) -> &str;

    /// Vector dimension every record must have.
    fn dims(&self) -> usize;

    async fn count(&self) -> Result<usize>;

    /// Insert or overwrite records by id.
    ///
    /// Each call is one unit at the backend's discretion; there is no
    /// atomicity across calls.
    async fn upsert_batch(&self, records: &[StoredRecord]) -> Result<()>;

    /// Return up to `limit` records ordered by decreasing similarity.
    ///
    /// An empty store yields an empty vector.
    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<RetrievalResult>>;

    /// Remove every record. A collection that is already gone is not an error.
    async fn delete_all(&self) -> Result<()>;
}

/// Reject vectors whose length differs from the collection dimension.
pub fn check_dims(collection: &str, dims: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != dims {
        return Err(RagError::dimension_mismatch(collection, dims, vector.len()));
    }
    Ok(())
}

/// [`check_dims`] over every record in a batch.
pub fn check_batch_dims(collection: &str, dims: usize, records: &[StoredRecord]) -> Result<()> {
    records
        .iter()
        .try_for_each(|r| check_dims(collection, dims, &r.vector))
}

/// Sort by decreasing similarity and keep the first `limit`.
pub fn rank_results(mut results: Vec<RetrievalResult>, limit: usize) -> Vec<RetrievalResult> {
    results.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(limit);
    results
}
