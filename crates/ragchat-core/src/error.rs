//! Error kinds shared by every ragchat component.
//!
//! Initialization surfaces these as fatal errors; once the chat loop is
//! running, the engine contains them within a single turn.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Missing or placeholder credential, or an invalid setting.
    #[error("configuration error: {0}")]
    Config(String),

    /// The backend could not be reached.
    #[error("cannot reach {backend}: {message}")]
    Connection { backend: String, message: String },

    /// Dimension or collection mismatch.
    #[error("schema mismatch: {0}")]
    Schema(String),

    #[error("embedding request failed: {0}")]
    Embedding(String),

    #[error("completion request failed: {0}")]
    Completion(String),

    /// The backend was reachable but rejected the operation.
    #[error("{backend} rejected the request: {message}")]
    Backend { backend: String, message: String },
}

impl RagError {
    pub fn connection(backend: &str, err: impl fmt::Display) -> Self {
        RagError::Connection {
            backend: backend.to_string(),
            message: err.to_string(),
        }
    }

    pub fn backend(backend: &str, err: impl fmt::Display) -> Self {
        RagError::Backend {
            backend: backend.to_string(),
            message: err.to_string(),
        }
    }

    pub fn dimension_mismatch(collection: &str, expected: usize, actual: usize) -> Self {
        RagError::Schema(format!(
            "collection '{}' holds {}-dimensional vectors, got {}",
            collection, expected, actual
        ))
    }
}

/// A single file or folder that could not be ingested.
///
/// Warnings are logged and collected; they never abort a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionWarning {
    pub path: String,
    pub reason: String,
}

impl fmt::Display for IngestionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
