//! Vector store backends.
//!
//! [`open_store`] turns the `[store]` config section into a ready
//! [`VectorStore`]: the collection exists and its dimension matches the
//! embedding model. Every backend implements the same trait, so the
//! engine never knows which one it is talking to.
//!
//! | Backend | Module | Persistence |
//! |---------|--------|-------------|
//! | `memory` | [`ragchat_core::store::memory`] | process lifetime |
//! | `sqlite` | [`sqlite`] | local file |
//! | `chroma` | [`chroma`] | Chroma server (REST v2) |
//! | `pinecone` | [`pinecone`] | Pinecone serverless index |

pub mod chroma;
pub mod pinecone;
pub mod sqlite;

use std::time::Duration;

use tracing::info;

use ragchat_core::error::{RagError, Result};
use ragchat_core::store::memory::InMemoryStore;
use ragchat_core::store::VectorStore;

use crate::config::{Backend, Config};

/// Open (creating when absent) the configured collection.
pub async fn open_store(config: &Config) -> Result<Box<dyn VectorStore>> {
    let collection = config.store.collection.as_str();
    let dims = config.embedding.dims;

    let store: Box<dyn VectorStore> = match config.store.backend {
        Backend::Memory => Box::new(InMemoryStore::new(collection, dims)),
        Backend::Sqlite => {
            Box::new(sqlite::SqliteStore::open(&config.store.sqlite_path, collection, dims).await?)
        }
        Backend::Chroma => {
            let client = http_client(config.openai.timeout_secs)?;
            Box::new(chroma::ChromaStore::open(client, &config.store.chroma, collection, dims).await?)
        }
        Backend::Pinecone => {
            let client = http_client(config.openai.timeout_secs)?;
            let api_key = config.pinecone_api_key()?;
            Box::new(
                pinecone::PineconeStore::open(client, &config.store.pinecone, api_key, collection, dims)
                    .await?,
            )
        }
    };

    info!(
        backend = store.backend(),
        target = %store.target(),
        collection = store.collection(),
        dims = store.dims(),
        "vector store ready"
    );
    Ok(store)
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RagError::Config(format!("failed to build HTTP client: {}", e)))
}

/// Turn a non-success response into a [`RagError::Backend`].
pub(crate) async fn rejected(backend: &str, response: reqwest::Response) -> RagError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    RagError::backend(backend, format!("HTTP {}: {}", status, body.trim()))
}
