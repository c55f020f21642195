//! Configuration loading and validation.
//!
//! Settings come from three layers, lowest precedence first:
//!
//! 1. built-in defaults,
//! 2. an optional TOML file (`--config`, skipped when absent),
//! 3. environment variables.
//!
//! Validation fails fast with [`RagError::Config`] on a missing or
//! placeholder credential and on settings the pipeline cannot honor.
//! There is no fallback credential for any backend.
//!
//! # Environment
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `OPENAI_API_KEY` | `openai.api_key` | required |
//! | `OPENAI_BASE_URL` | `openai.base_url` | `https://api.openai.com/v1` |
//! | `RAGCHAT_TIMEOUT_SECS` | `openai.timeout_secs` | `60` |
//! | `RAGCHAT_CHAT_MODEL` | `chat.model` | `gpt-4o-mini` |
//! | `RAGCHAT_TEMPERATURE` | `chat.temperature` | `0.7` |
//! | `RAGCHAT_MAX_HISTORY` | `chat.max_history` | `20` |
//! | `RAGCHAT_EMBEDDING_MODEL` | `embedding.model` | `text-embedding-3-small` |
//! | `RAGCHAT_EMBEDDING_DIMS` | `embedding.dims` | `1536` |
//! | `RAGCHAT_BATCH_SIZE` | `embedding.batch_size` | `100` |
//! | `RAGCHAT_BATCH_PAUSE_MS` | `embedding.batch_pause_ms` | `500` |
//! | `RAGCHAT_VECTOR_BACKEND` | `store.backend` | `memory` |
//! | `RAGCHAT_COLLECTION` | `store.collection` | `knowledge_base` |
//! | `RAGCHAT_SQLITE_PATH` | `store.sqlite_path` | `./data/ragchat.sqlite` |
//! | `CHROMA_URL` | `store.chroma.url` | `http://localhost:8000` |
//! | `CHROMA_TENANT` | `store.chroma.tenant` | `default_tenant` |
//! | `CHROMA_DATABASE` | `store.chroma.database` | `default_database` |
//! | `PINECONE_API_KEY` | `store.pinecone.api_key` | required for `pinecone` |
//! | `PINECONE_CLOUD` | `store.pinecone.cloud` | `aws` |
//! | `PINECONE_REGION` | `store.pinecone.region` | `us-east-1` |
//! | `PINECONE_NAMESPACE` | `store.pinecone.namespace` | empty |
//! | `KNOWLEDGE_BASE_DIR` | `knowledge_base.root` | `./knowledge_base` |
//! | `RAGCHAT_CHUNK_SIZE` | `chunking.chunk_size` | `1000` |
//! | `RAGCHAT_CHUNK_OVERLAP` | `chunking.overlap` | `200` |
//! | `RAGCHAT_TOP_K` | `retrieval.top_k` | `3` |

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use ragchat_core::error::{RagError, Result};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub openai: OpenAiConfig,
    pub chat: ChatConfig,
    pub embedding: EmbeddingConfig,
    pub store: StoreConfig,
    pub knowledge_base: KnowledgeBaseConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChatConfig {
    pub model: String,
    pub temperature: f32,
    pub max_history: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_history: ragchat_core::conversation::DEFAULT_MAX_TURNS,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dims: usize,
    /// Chunks per embedding request and per store upsert.
    pub batch_size: usize,
    /// Pause between batches while building the knowledge base.
    pub batch_pause_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dims: 1536,
            batch_size: 100,
            batch_pause_ms: 500,
        }
    }
}

/// Which vector store implementation to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
    Sqlite,
    Chroma,
    Pinecone,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Memory => "memory",
            Backend::Sqlite => "sqlite",
            Backend::Chroma => "chroma",
            Backend::Pinecone => "pinecone",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "sqlite" => Ok(Backend::Sqlite),
            "chroma" => Ok(Backend::Chroma),
            "pinecone" => Ok(Backend::Pinecone),
            other => Err(RagError::Config(format!(
                "unknown vector backend '{}'. Must be memory, sqlite, chroma, or pinecone",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: Backend,
    pub collection: String,
    pub sqlite_path: PathBuf,
    pub chroma: ChromaConfig,
    pub pinecone: PineconeConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            collection: "knowledge_base".to_string(),
            sqlite_path: PathBuf::from("./data/ragchat.sqlite"),
            chroma: ChromaConfig::default(),
            pinecone: PineconeConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChromaConfig {
    pub url: String,
    pub tenant: String,
    pub database: String,
}

impl Default for ChromaConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            tenant: "default_tenant".to_string(),
            database: "default_database".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PineconeConfig {
    pub api_key: Option<String>,
    /// Control-plane endpoint used to describe and create indexes.
    pub control_url: String,
    pub cloud: String,
    pub region: String,
    pub namespace: String,
}

impl Default for PineconeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            control_url: "https://api.pinecone.io".to_string(),
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
            namespace: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct KnowledgeBaseConfig {
    pub root: PathBuf,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./knowledge_base"),
            include_globs: vec![
                "**/*.txt".to_string(),
                "**/*.md".to_string(),
                "**/*.markdown".to_string(),
                "**/*.rst".to_string(),
            ],
            exclude_globs: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length in bytes.
    pub chunk_size: usize,
    /// Bytes shared by neighboring chunks.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 3 }
    }
}

/// Load configuration from `path` (when present) and the process environment.
pub fn load_config(path: &Path) -> Result<Config> {
    let base = if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RagError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        parse_toml(&content)?
    } else {
        Config::default()
    };

    let config = base.with_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Parse a TOML document into a [`Config`]; missing keys take defaults.
pub fn parse_toml(content: &str) -> Result<Config> {
    toml::from_str(content).map_err(|e| RagError::Config(format!("invalid config file: {}", e)))
}

impl Config {
    /// Apply environment overrides read through `lookup`.
    ///
    /// Empty values are treated as unset. Tests pass a map lookup instead
    /// of touching the process environment.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("OPENAI_API_KEY") {
            self.openai.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.openai.base_url = v;
        }
        set_parsed(&get, "RAGCHAT_TIMEOUT_SECS", &mut self.openai.timeout_secs)?;

        if let Some(v) = get("RAGCHAT_CHAT_MODEL") {
            self.chat.model = v;
        }
        set_parsed(&get, "RAGCHAT_TEMPERATURE", &mut self.chat.temperature)?;
        set_parsed(&get, "RAGCHAT_MAX_HISTORY", &mut self.chat.max_history)?;

        if let Some(v) = get("RAGCHAT_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        set_parsed(&get, "RAGCHAT_EMBEDDING_DIMS", &mut self.embedding.dims)?;
        set_parsed(&get, "RAGCHAT_BATCH_SIZE", &mut self.embedding.batch_size)?;
        set_parsed(&get, "RAGCHAT_BATCH_PAUSE_MS", &mut self.embedding.batch_pause_ms)?;

        if let Some(v) = get("RAGCHAT_VECTOR_BACKEND") {
            self.store.backend = v.parse()?;
        }
        if let Some(v) = get("RAGCHAT_COLLECTION") {
            self.store.collection = v;
        }
        if let Some(v) = get("RAGCHAT_SQLITE_PATH") {
            self.store.sqlite_path = PathBuf::from(v);
        }
        if let Some(v) = get("CHROMA_URL") {
            self.store.chroma.url = v;
        }
        if let Some(v) = get("CHROMA_TENANT") {
            self.store.chroma.tenant = v;
        }
        if let Some(v) = get("CHROMA_DATABASE") {
            self.store.chroma.database = v;
        }
        if let Some(v) = get("PINECONE_API_KEY") {
            self.store.pinecone.api_key = Some(v);
        }
        if let Some(v) = get("PINECONE_CLOUD") {
            self.store.pinecone.cloud = v;
        }
        if let Some(v) = get("PINECONE_REGION") {
            self.store.pinecone.region = v;
        }
        if let Some(v) = get("PINECONE_NAMESPACE") {
            self.store.pinecone.namespace = v;
        }

        if let Some(v) = get("KNOWLEDGE_BASE_DIR") {
            self.knowledge_base.root = PathBuf::from(v);
        }
        set_parsed(&get, "RAGCHAT_CHUNK_SIZE", &mut self.chunking.chunk_size)?;
        set_parsed(&get, "RAGCHAT_CHUNK_OVERLAP", &mut self.chunking.overlap)?;
        set_parsed(&get, "RAGCHAT_TOP_K", &mut self.retrieval.top_k)?;

        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        require_secret(self.openai.api_key.as_deref(), "OPENAI_API_KEY")?;
        if self.store.backend == Backend::Pinecone {
            require_secret(self.store.pinecone.api_key.as_deref(), "PINECONE_API_KEY")?;
        }

        if self.chunking.chunk_size == 0 {
            return Err(RagError::Config("chunking.chunk_size must be > 0".into()));
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(RagError::Config(
                "chunking.overlap must be smaller than chunking.chunk_size".into(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(RagError::Config("retrieval.top_k must be >= 1".into()));
        }
        if self.chat.max_history == 0 {
            return Err(RagError::Config("chat.max_history must be >= 1".into()));
        }
        if !(0.0..=2.0).contains(&self.chat.temperature) {
            return Err(RagError::Config("chat.temperature must be in [0.0, 2.0]".into()));
        }
        if self.embedding.dims == 0 {
            return Err(RagError::Config("embedding.dims must be > 0".into()));
        }
        if self.embedding.batch_size == 0 {
            return Err(RagError::Config("embedding.batch_size must be > 0".into()));
        }
        if self.store.collection.trim().is_empty() {
            return Err(RagError::Config("store.collection must not be empty".into()));
        }
        Ok(())
    }

    /// The OpenAI key, or a [`RagError::Config`] if missing or a placeholder.
    pub fn openai_api_key(&self) -> Result<&str> {
        require_secret(self.openai.api_key.as_deref(), "OPENAI_API_KEY")
    }

    /// The Pinecone key, or a [`RagError::Config`] if missing or a placeholder.
    pub fn pinecone_api_key(&self) -> Result<&str> {
        require_secret(self.store.pinecone.api_key.as_deref(), "PINECONE_API_KEY")
    }
}

fn set_parsed<T, G>(get: &G, key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| RagError::Config(format!("{} has an invalid value: '{}'", key, raw)))?;
    }
    Ok(())
}

fn require_secret<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    match value {
        Some(v) if !is_placeholder(v) => Ok(v.trim()),
        Some(_) => Err(RagError::Config(format!(
            "{} looks like a placeholder; set a real credential",
            name
        ))),
        None => Err(RagError::Config(format!("{} is not set", name))),
    }
}

/// True for empty values and the usual template stand-ins
/// (`your-api-key`, `<key>`, `changeme`, `sk-xxxx`, `...placeholder...`).
pub fn is_placeholder(value: &str) -> bool {
    let v = value.trim().to_ascii_lowercase();
    v.is_empty()
        || v.starts_with("your")
        || v.starts_with('<')
        || v.contains("placeholder")
        || v.contains("changeme")
        || v.starts_with("sk-xxx")
        || v.starts_with("sk-...")
        || v.chars().all(|c| c == 'x' || c == '*' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let config = Config::default().with_env(env(pairs))?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_defaults_with_key() {
        let config = config_from(&[("OPENAI_API_KEY", "sk-live-123")]).unwrap();
        assert_eq!(config.chat.model, "gpt-4o-mini");
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.embedding.dims, 1536);
        assert_eq!(config.store.backend, Backend::Memory);
        assert_eq!(config.store.collection, "knowledge_base");
        assert_eq!(config.chat.max_history, 20);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.openai_api_key().unwrap(), "sk-live-123");
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let err = config_from(&[]).unwrap_err();
        assert!(matches!(err, RagError::Config(ref m) if m.contains("OPENAI_API_KEY")));
    }

    #[test]
    fn test_placeholder_keys_rejected() {
        for key in [
            "your-openai-api-key",
            "YOUR_API_KEY_HERE",
            "<api-key>",
            "sk-xxxxxxxx",
            "api-key-placeholder",
            "changeme",
            "xxxx",
        ] {
            let err = config_from(&[("OPENAI_API_KEY", key)]).unwrap_err();
            assert!(matches!(err, RagError::Config(_)), "accepted {}", key);
        }
    }

    #[test]
    fn test_pinecone_requires_its_own_key() {
        let err = config_from(&[
            ("OPENAI_API_KEY", "sk-live-123"),
            ("RAGCHAT_VECTOR_BACKEND", "pinecone"),
        ])
        .unwrap_err();
        assert!(matches!(err, RagError::Config(ref m) if m.contains("PINECONE_API_KEY")));

        let config = config_from(&[
            ("OPENAI_API_KEY", "sk-live-123"),
            ("RAGCHAT_VECTOR_BACKEND", "Pinecone"),
            ("PINECONE_API_KEY", "pc-real-key"),
        ])
        .unwrap();
        assert_eq!(config.store.backend, Backend::Pinecone);
    }

    #[test]
    fn test_unknown_backend() {
        let err = config_from(&[
            ("OPENAI_API_KEY", "sk-live-123"),
            ("RAGCHAT_VECTOR_BACKEND", "faiss"),
        ])
        .unwrap_err();
        assert!(matches!(err, RagError::Config(ref m) if m.contains("faiss")));
    }

    #[test]
    fn test_invalid_number() {
        let err = config_from(&[
            ("OPENAI_API_KEY", "sk-live-123"),
            ("RAGCHAT_TOP_K", "three"),
        ])
        .unwrap_err();
        assert!(matches!(err, RagError::Config(ref m) if m.contains("RAGCHAT_TOP_K")));
    }

    #[test]
    fn test_overlap_must_be_below_chunk_size() {
        let err = config_from(&[
            ("OPENAI_API_KEY", "sk-live-123"),
            ("RAGCHAT_CHUNK_SIZE", "100"),
            ("RAGCHAT_CHUNK_OVERLAP", "100"),
        ])
        .unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = parse_toml(
            r#"
[chat]
model = "gpt-4o"
max_history = 10

[store]
backend = "sqlite"
collection = "docs"

[chunking]
chunk_size = 500
overlap = 50
"#,
        )
        .unwrap();
        assert_eq!(file.store.backend, Backend::Sqlite);
        assert_eq!(file.chunking.chunk_size, 500);

        let config = file
            .with_env(env(&[
                ("OPENAI_API_KEY", "sk-live-123"),
                ("RAGCHAT_CHAT_MODEL", "gpt-4.1-mini"),
                ("RAGCHAT_COLLECTION", ""),
            ]))
            .unwrap();
        config.validate().unwrap();
        assert_eq!(config.chat.model, "gpt-4.1-mini");
        assert_eq!(config.chat.max_history, 10);
        assert_eq!(config.store.collection, "docs");
        assert_eq!(config.chunking.overlap, 50);
    }

    #[test]
    fn test_invalid_toml() {
        let err = parse_toml("[chat\nmodel = 1").unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }
}
