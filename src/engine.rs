//! Retrieval-augmented chat orchestration.
//!
//! [`RagEngine`] owns one embedder, one vector store, one completion
//! streamer, and the conversation history. Collaborators are injected as
//! trait objects, so tests run the whole pipeline with fakes over the
//! in-memory store.
//!
//! # Build
//!
//! ```text
//! scan folder → chunk documents → embed batch → upsert batch → pause → …
//! ```
//!
//! # Ask
//!
//! ```text
//! embed question → query top_k → assemble prompt → stream completion
//! ```
//!
//! A failed question never escapes [`RagEngine::ask`]: the error is logged,
//! the user sees [`APOLOGY`], and the history is left as it was.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use ragchat_core::chunk::chunk_document;
use ragchat_core::conversation::{assemble_prompt, ConversationHistory};
use ragchat_core::embedding::Embedder;
use ragchat_core::error::{IngestionWarning, RagError, Result};
use ragchat_core::models::{Chunk, EmbeddedChunk, RetrievalResult, Role, StoredRecord};
use ragchat_core::store::VectorStore;

use crate::completion::{CompletionStreamer, OpenAiCompleter};
use crate::config::{Config, KnowledgeBaseConfig};
use crate::embedding::OpenAiEmbedder;
use crate::ingest::{scan_knowledge_base, IngestReport};
use crate::progress::{BuildProgressEvent, BuildProgressReporter, NoProgress};
use crate::stores::open_store;

/// Shown to the user when a turn fails for any reason.
pub const APOLOGY: &str =
    "Sorry, I ran into a problem answering that. Please try again in a moment.";

/// The engine's share of the configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub knowledge_base: KnowledgeBaseConfig,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub max_history: usize,
    pub batch_size: usize,
    pub batch_pause: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            knowledge_base: config.knowledge_base.clone(),
            chunk_size: config.chunking.chunk_size,
            chunk_overlap: config.chunking.overlap,
            top_k: config.retrieval.top_k,
            max_history: config.chat.max_history,
            batch_size: config.embedding.batch_size.max(1),
            batch_pause: Duration::from_millis(config.embedding.batch_pause_ms),
        }
    }
}

/// Outcome of building or rebuilding the knowledge base.
#[derive(Debug, Default, Clone)]
pub struct BuildReport {
    pub documents: usize,
    pub chunks: usize,
    pub records_written: usize,
    pub warnings: Vec<IngestionWarning>,
    /// The store already held this many records, so nothing was ingested.
    pub existing_records: Option<usize>,
    /// The knowledge-base folder was missing and a sample was created.
    pub created_example: bool,
    /// A partial build with this many records was found and replaced.
    pub replaced_incomplete: Option<usize>,
}

/// Scanned documents and their chunks, ready to embed.
struct Prepared {
    scan: IngestReport,
    chunks: Vec<Chunk>,
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(existing) = self.existing_records {
            return write!(
                f,
                "Knowledge base already holds {} records; use 'rebuild' to reload it.",
                existing
            );
        }
        if self.created_example {
            return write!(
                f,
                "No knowledge base folder was found; an example folder was created. \
                 Add files and run 'rebuild'."
            );
        }
        if let Some(partial) = self.replaced_incomplete {
            write!(
                f,
                "Previous build was incomplete ({} records); reloaded. ",
                partial
            )?;
        }
        write!(
            f,
            "Loaded {} documents as {} chunks ({} records written)",
            self.documents, self.chunks, self.records_written
        )?;
        if !self.warnings.is_empty() {
            write!(f, ", {} files skipped", self.warnings.len())?;
        }
        Ok(())
    }
}

/// One answered (or failed) question.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// Retrieved chunks the answer was grounded on.
    pub sources: Vec<RetrievalResult>,
    /// The turn failed and `text` is [`APOLOGY`].
    pub failed: bool,
}

/// Snapshot for the `status` command.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub backend: String,
    pub target: String,
    pub collection: String,
    /// `None` when the store could not be reached.
    pub records: Option<usize>,
    pub history_len: usize,
    pub max_history: usize,
    pub chat_model: String,
    pub embedding_model: String,
    pub embedding_dims: usize,
    pub last_build: Option<DateTime<Utc>>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let records = self
            .records
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unavailable".to_string());
        let last_build = self
            .last_build
            .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
            .unwrap_or_else(|| "not this session".to_string());

        writeln!(f, "Backend:     {} ({})", self.backend, self.target)?;
        writeln!(f, "Collection:  {}", self.collection)?;
        writeln!(f, "Records:     {}", records)?;
        writeln!(f, "History:     {} / {} turns", self.history_len, self.max_history)?;
        writeln!(f, "Chat model:  {}", self.chat_model)?;
        writeln!(
            f,
            "Embeddings:  {} ({} dims)",
            self.embedding_model, self.embedding_dims
        )?;
        write!(f, "Last build:  {}", last_build)
    }
}

pub struct RagEngine {
    embedder: Box<dyn Embedder>,
    store: Box<dyn VectorStore>,
    completer: Box<dyn CompletionStreamer>,
    settings: EngineSettings,
    history: ConversationHistory,
    progress: Box<dyn BuildProgressReporter>,
    last_build: Option<DateTime<Utc>>,
}

impl RagEngine {
    pub fn new(
        embedder: Box<dyn Embedder>,
        store: Box<dyn VectorStore>,
        completer: Box<dyn CompletionStreamer>,
        settings: EngineSettings,
    ) -> Self {
        let history = ConversationHistory::new(settings.max_history);
        Self {
            embedder,
            store,
            completer,
            settings,
            history,
            progress: Box::new(NoProgress),
            last_build: None,
        }
    }

    /// Wire up the OpenAI clients and the configured vector store.
    ///
    /// Credentials are checked before any network call.
    pub async fn connect(config: &Config) -> Result<Self> {
        let embedder = OpenAiEmbedder::new(config)?;
        let completer = OpenAiCompleter::new(config)?;
        let store = open_store(config).await?;
        Ok(Self::new(
            Box::new(embedder),
            store,
            Box::new(completer),
            EngineSettings::from_config(config),
        ))
    }

    pub fn with_progress(mut self, progress: Box<dyn BuildProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Populate the store unless it already holds the whole knowledge base.
    ///
    /// A store holding fewer records than the folder now chunks into is
    /// left over from an interrupted or failed build; it is cleared and
    /// loaded again.
    pub async fn build_knowledge_base(&mut self) -> Result<BuildReport> {
        let existing = self.store.count().await?;
        let prepared = self.prepare()?;
        if existing == 0 {
            return self.ingest(prepared).await;
        }

        let expected = prepared.chunks.len();
        if existing >= expected {
            info!(
                records = existing,
                collection = self.store.collection(),
                "knowledge base already populated, skipping ingestion"
            );
            return Ok(BuildReport {
                existing_records: Some(existing),
                ..BuildReport::default()
            });
        }

        warn!(
            records = existing,
            expected,
            collection = self.store.collection(),
            "knowledge base is incomplete, reloading"
        );
        self.store.delete_all().await?;
        let mut report = self.ingest(prepared).await?;
        report.replaced_incomplete = Some(existing);
        Ok(report)
    }

    /// Clear the store and ingest the knowledge-base folder from scratch.
    pub async fn rebuild(&mut self) -> Result<BuildReport> {
        info!(collection = self.store.collection(), "rebuilding knowledge base");
        self.store.delete_all().await?;
        let prepared = self.prepare()?;
        self.ingest(prepared).await
    }

    /// Scan the folder and chunk every document.
    fn prepare(&self) -> Result<Prepared> {
        self.progress.report(BuildProgressEvent::Scanning {
            root: self.settings.knowledge_base.root.display().to_string(),
        });
        let scan = scan_knowledge_base(&self.settings.knowledge_base)?;

        let chunks: Vec<Chunk> = scan
            .documents
            .iter()
            .flat_map(|doc| {
                chunk_document(doc, self.settings.chunk_size, self.settings.chunk_overlap)
            })
            .collect();
        Ok(Prepared { scan, chunks })
    }

    async fn ingest(&mut self, prepared: Prepared) -> Result<BuildReport> {
        let Prepared { scan, chunks } = prepared;
        let mut report = BuildReport {
            documents: scan.documents.len(),
            chunks: chunks.len(),
            warnings: scan.warnings,
            created_example: scan.created_example,
            ..BuildReport::default()
        };

        let total = chunks.len() as u64;
        for (i, batch) in chunks.chunks(self.settings.batch_size).enumerate() {
            if i > 0 && !self.settings.batch_pause.is_zero() {
                tokio::time::sleep(self.settings.batch_pause).await;
            }
            report.records_written += self.embed_and_store(batch).await?;
            self.progress.report(BuildProgressEvent::Embedding {
                n: report.records_written as u64,
                total,
            });
        }

        self.last_build = Some(Utc::now());
        info!(
            documents = report.documents,
            chunks = report.chunks,
            records = report.records_written,
            warnings = report.warnings.len(),
            "knowledge base built"
        );
        Ok(report)
    }

    async fn embed_and_store(&self, batch: &[Chunk]) -> Result<usize> {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != batch.len() {
            return Err(RagError::Embedding(format!(
                "expected {} vectors, got {}",
                batch.len(),
                vectors.len()
            )));
        }

        let records: Vec<StoredRecord> = batch
            .iter()
            .cloned()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddedChunk { chunk, vector }.into())
            .collect();
        self.store.upsert_batch(&records).await?;
        Ok(records.len())
    }

    /// Answer `question`, passing each streamed fragment to `on_fragment`.
    ///
    /// On success the question and the full answer are appended to the
    /// history. On failure the returned answer is [`APOLOGY`] and the
    /// history is untouched.
    pub async fn ask<F>(&mut self, question: &str, mut on_fragment: F) -> Answer
    where
        F: FnMut(&str),
    {
        match self.answer(question, &mut on_fragment).await {
            Ok((text, sources)) => {
                self.history.append_turn(Role::User, question.trim());
                self.history.append_turn(Role::Assistant, text.clone());
                Answer {
                    text,
                    sources,
                    failed: false,
                }
            }
            Err(e) => {
                error!(error = %e, "question failed");
                Answer {
                    text: APOLOGY.to_string(),
                    sources: Vec::new(),
                    failed: true,
                }
            }
        }
    }

    async fn answer<F>(
        &self,
        question: &str,
        on_fragment: &mut F,
    ) -> Result<(String, Vec<RetrievalResult>)>
    where
        F: FnMut(&str),
    {
        let vector = self.embedder.embed_one(question).await?;
        let sources = self.store.query(&vector, self.settings.top_k).await?;
        let prompt = assemble_prompt(question, &sources, self.history.turns());

        let mut stream = self
            .completer
            .stream_completion(&prompt.system_prompt, &prompt.user_message)
            .await?;
        let mut text = String::new();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            on_fragment(&fragment);
            text.push_str(&fragment);
        }
        Ok((text, sources))
    }

    pub async fn status(&self) -> StatusReport {
        let records = match self.store.count().await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(error = %e, "could not count records");
                None
            }
        };
        StatusReport {
            backend: self.store.backend().to_string(),
            target: self.store.target(),
            collection: self.store.collection().to_string(),
            records,
            history_len: self.history.len(),
            max_history: self.history.max_turns(),
            chat_model: self.completer.model_name().to_string(),
            embedding_model: self.embedder.model_name().to_string(),
            embedding_dims: self.embedder.dims(),
            last_build: self.last_build,
        }
    }
}
