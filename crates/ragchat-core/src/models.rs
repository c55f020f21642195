//! Core data models used throughout ragchat.
//!
//! These types represent the documents, chunks, stored records, retrieval
//! results, and conversation turns that flow through the build and query
//! pipelines.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A text file read from the knowledge base, tagged with its category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Stable id derived from the category and relative path.
    pub id: String,
    pub text: String,
    /// Name of the first-level folder the file was found under.
    pub category: String,
    /// Path relative to the knowledge-base root.
    pub source_path: String,
    /// File modification time (unix seconds).
    pub modified_at: i64,
}

/// A bounded slice of a [`Document`], the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub category: String,
    pub source_path: String,
    pub sequence_index: usize,
}

/// A chunk paired with its embedding vector.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// The persisted form of an [`EmbeddedChunk`] inside a vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub text: String,
    pub category: String,
    pub source_path: String,
    pub sequence_index: usize,
    pub vector: Vec<f32>,
}

impl From<EmbeddedChunk> for StoredRecord {
    fn from(embedded: EmbeddedChunk) -> Self {
        let EmbeddedChunk { chunk, vector } = embedded;
        Self {
            id: chunk.id,
            text: chunk.text,
            category: chunk.category,
            source_path: chunk.source_path,
            sequence_index: chunk.sequence_index,
            vector,
        }
    }
}

/// A record returned by a nearest-neighbor query.
///
/// `similarity` is cosine similarity: higher is closer. Backends that
/// report a distance convert it before returning.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub id: String,
    pub text: String,
    pub category: String,
    pub source_path: String,
    pub similarity: f32,
}

/// Speaker of a [`ConversationTurn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}
