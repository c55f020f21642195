//! SQLite-backed [`VectorStore`].
//!
//! One database file can hold several collections. Vectors are stored as
//! little-endian `f32` blobs and scored with brute-force cosine
//! similarity, which is plenty for a local knowledge base.
//!
//! ```text
//! collections(name PK, dims, created_at)
//! records(collection, id, text, category, source_path, sequence_index, vector)
//!         PK (collection, id)
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use ragchat_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use ragchat_core::error::{RagError, Result};
use ragchat_core::models::{RetrievalResult, StoredRecord};
use ragchat_core::store::{check_batch_dims, check_dims, rank_results, VectorStore};

use crate::db;

const BACKEND: &str = "sqlite";

pub struct SqliteStore {
    pool: SqlitePool,
    path: PathBuf,
    collection: String,
    dims: usize,
}

fn sql_err(e: sqlx::Error) -> RagError {
    RagError::backend(BACKEND, e)
}

impl SqliteStore {
    /// Open the database at `path`, creating the file, the schema, and the
    /// collection as needed.
    ///
    /// Fails with [`RagError::Schema`] when the collection already exists
    /// with a different dimension.
    pub async fn open(path: &Path, collection: &str, dims: usize) -> Result<Self> {
        let pool = db::connect(path).await?;
        ensure_schema(&pool).await?;

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM collections WHERE name = ?")
                .bind(collection)
                .fetch_optional(&pool)
                .await
                .map_err(sql_err)?;

        match existing {
            Some(stored) if stored as usize != dims => {
                return Err(RagError::dimension_mismatch(collection, stored as usize, dims));
            }
            Some(_) => debug!(collection, "opened existing collection"),
            None => {
                sqlx::query("INSERT INTO collections (name, dims, created_at) VALUES (?, ?, ?)")
                    .bind(collection)
                    .bind(dims as i64)
                    .bind(chrono::Utc::now().timestamp())
                    .execute(&pool)
                    .await
                    .map_err(sql_err)?;
                debug!(collection, dims, "created collection");
            }
        }

        Ok(Self {
            pool,
            path: path.to_path_buf(),
            collection: collection.to_string(),
            dims,
        })
    }
}

async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(sql_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            text TEXT NOT NULL,
            category TEXT NOT NULL,
            source_path TEXT NOT NULL,
            sequence_index INTEGER NOT NULL,
            vector BLOB NOT NULL,
            PRIMARY KEY (collection, id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(sql_err)?;

    Ok(())
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    fn target(&self) -> String {
        self.path.display().to_string()
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(count as usize)
    }

    async fn upsert_batch(&self, records: &[StoredRecord]) -> Result<()> {
        check_batch_dims(&self.collection, self.dims, records)?;

        let mut tx = self.pool.begin().await.map_err(sql_err)?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO records
                    (collection, id, text, category, source_path, sequence_index, vector)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    text = excluded.text,
                    category = excluded.category,
                    source_path = excluded.source_path,
                    sequence_index = excluded.sequence_index,
                    vector = excluded.vector
                "#,
            )
            .bind(&self.collection)
            .bind(&record.id)
            .bind(&record.text)
            .bind(&record.category)
            .bind(&record.source_path)
            .bind(record.sequence_index as i64)
            .bind(vec_to_blob(&record.vector))
            .execute(&mut *tx)
            .await
            .map_err(sql_err)?;
        }
        tx.commit().await.map_err(sql_err)?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<RetrievalResult>> {
        check_dims(&self.collection, self.dims, vector)?;

        let rows = sqlx::query(
            "SELECT id, text, category, source_path, vector FROM records WHERE collection = ?",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await
        .map_err(sql_err)?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.try_get("vector").map_err(sql_err)?;
            results.push(RetrievalResult {
                id: row.try_get("id").map_err(sql_err)?,
                text: row.try_get("text").map_err(sql_err)?,
                category: row.try_get("category").map_err(sql_err)?,
                source_path: row.try_get("source_path").map_err(sql_err)?,
                similarity: cosine_similarity(vector, &blob_to_vec(&blob)),
            });
        }
        Ok(rank_results(results, limit))
    }

    async fn delete_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM records WHERE collection = ?")
            .bind(&self.collection)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(())
    }
}
