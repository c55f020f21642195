//! End-to-end engine scenarios with a deterministic embedder and a
//! scripted completer over the in-memory store. No network access.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use ragchat::completion::{CompletionStreamer, FragmentStream};
use ragchat::config::KnowledgeBaseConfig;
use ragchat::engine::{EngineSettings, RagEngine, APOLOGY};
use ragchat_core::embedding::Embedder;
use ragchat_core::error::{RagError, Result};
use ragchat_core::store::memory::InMemoryStore;

const DIMS: usize = 256;

/// Which `embed_batch` calls fail.
#[derive(Debug, Clone, Copy)]
enum Failure {
    Never,
    Always,
    /// Only the n-th call (1-based) fails.
    OnCall(usize),
}

/// Bag-of-words embedder: each lowercase word hashes (FNV-1a) into one bucket.
struct HashingEmbedder {
    batches: Arc<AtomicUsize>,
    calls: AtomicUsize,
    failure: Failure,
}

fn fnv1a(word: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in word.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn embed_text(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        v[(fnv1a(&word.to_lowercase()) % DIMS as u64) as usize] += 1.0;
    }
    v
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing-test"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let fails = match self.failure {
            Failure::Never => false,
            Failure::Always => true,
            Failure::OnCall(n) => call == n,
        };
        if fails {
            return Err(RagError::Embedding("quota exceeded".to_string()));
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| embed_text(t)).collect())
    }
}

/// Replays scripted fragments and records every prompt it receives.
struct ScriptedCompleter {
    fragments: Vec<std::result::Result<String, String>>,
    prompts: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl CompletionStreamer for ScriptedCompleter {
    fn model_name(&self) -> &str {
        "scripted-chat"
    }

    async fn stream_completion(&self, system_prompt: &str, user_message: &str) -> Result<FragmentStream> {
        self.prompts
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), user_message.to_string()));
        Ok(FragmentStream::from_fragments(self.fragments.iter().map(
            |f| match f {
                Ok(text) => Ok(text.clone()),
                Err(message) => Err(RagError::Completion(message.clone())),
            },
        )))
    }
}

struct Harness {
    _tmp: TempDir,
    engine: RagEngine,
    prompts: Arc<Mutex<Vec<(String, String)>>>,
    batches: Arc<AtomicUsize>,
}

fn write_kb(root: &Path) {
    fs::create_dir_all(root.join("facts")).unwrap();
    fs::create_dir_all(root.join("nature")).unwrap();
    fs::write(root.join("facts/sky.txt"), "The sky is blue.").unwrap();
    fs::write(root.join("nature/grass.txt"), "Grass grows green in spring.").unwrap();
    fs::write(root.join("nature/rivers.md"), "Rivers flow downhill toward oceans.").unwrap();
}

fn harness_with(
    fragments: Vec<std::result::Result<String, String>>,
    failure: Failure,
    batch_size: usize,
) -> Harness {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("kb");
    write_kb(&root);

    let prompts = Arc::new(Mutex::new(Vec::new()));
    let batches = Arc::new(AtomicUsize::new(0));
    let settings = EngineSettings {
        knowledge_base: KnowledgeBaseConfig {
            root,
            ..KnowledgeBaseConfig::default()
        },
        chunk_size: 1000,
        chunk_overlap: 200,
        top_k: 1,
        max_history: 20,
        batch_size,
        batch_pause: Duration::ZERO,
    };
    let engine = RagEngine::new(
        Box::new(HashingEmbedder {
            batches: batches.clone(),
            calls: AtomicUsize::new(0),
            failure,
        }),
        Box::new(InMemoryStore::new("knowledge_base", DIMS)),
        Box::new(ScriptedCompleter {
            fragments,
            prompts: prompts.clone(),
        }),
        settings,
    );
    Harness {
        _tmp: tmp,
        engine,
        prompts,
        batches,
    }
}

fn harness() -> Harness {
    harness_with(
        vec![Ok("The sky ".to_string()), Ok("is blue.".to_string())],
        Failure::Never,
        100,
    )
}

#[tokio::test]
async fn test_sky_question_is_grounded_in_facts() {
    let mut h = harness();
    let report = h.engine.rebuild().await.unwrap();
    assert_eq!(report.documents, 3);
    assert_eq!(report.records_written, 3);

    let mut streamed = Vec::new();
    let answer = h
        .engine
        .ask("What color is the sky?", |f| streamed.push(f.to_string()))
        .await;

    assert!(!answer.failed);
    assert_eq!(answer.text, "The sky is blue.");
    assert_eq!(streamed, vec!["The sky ", "is blue."]);
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].category, "facts");
    assert!(answer.sources[0].text.contains("sky is blue"));

    let prompts = h.prompts.lock().unwrap();
    let (system, user) = &prompts[0];
    assert!(system.contains("not supported by the knowledge base"));
    assert!(user.contains("The sky is blue."));
    assert!(user.contains("What color is the sky?"));
    assert!(user.contains("(category: facts, source: facts/sky.txt)"));
}

#[tokio::test]
async fn test_rebuild_keeps_the_same_record_count() {
    let mut h = harness();
    h.engine.build_knowledge_base().await.unwrap();
    let fresh = h.engine.status().await.records;
    assert_eq!(fresh, Some(3));

    h.engine.rebuild().await.unwrap();
    assert_eq!(h.engine.status().await.records, fresh);
    h.engine.rebuild().await.unwrap();
    assert_eq!(h.engine.status().await.records, fresh);
}

#[tokio::test]
async fn test_build_skips_populated_store() {
    let mut h = harness();
    let first = h.engine.build_knowledge_base().await.unwrap();
    assert_eq!(first.existing_records, None);
    let calls = h.batches.load(Ordering::SeqCst);

    let second = h.engine.build_knowledge_base().await.unwrap();
    assert_eq!(second.existing_records, Some(3));
    assert_eq!(second.records_written, 0);
    assert_eq!(h.batches.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn test_build_reloads_after_partial_failure() {
    let mut h = harness_with(vec![Ok("ok".to_string())], Failure::OnCall(2), 1);

    let err = h.engine.build_knowledge_base().await.unwrap_err();
    assert!(matches!(err, RagError::Embedding(_)));
    assert_eq!(h.engine.status().await.records, Some(1));

    let report = h.engine.build_knowledge_base().await.unwrap();
    assert_eq!(report.existing_records, None);
    assert_eq!(report.replaced_incomplete, Some(1));
    assert_eq!(report.records_written, 3);
    assert!(report.to_string().contains("incomplete (1 records)"));
    assert_eq!(h.engine.status().await.records, Some(3));

    let third = h.engine.build_knowledge_base().await.unwrap();
    assert_eq!(third.existing_records, Some(3));
    assert_eq!(third.replaced_incomplete, None);
}

#[tokio::test]
async fn test_chunks_are_embedded_in_batches() {
    let mut h = harness_with(vec![Ok("ok".to_string())], Failure::Never, 1);
    let report = h.engine.rebuild().await.unwrap();
    assert_eq!(report.chunks, 3);
    assert_eq!(h.batches.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_status_before_any_question() {
    let h = harness();
    let status = h.engine.status().await;
    assert_eq!(status.history_len, 0);
    assert_eq!(status.backend, "memory");
    let text = status.to_string();
    assert!(text.contains("scripted-chat"));
    assert!(text.contains("History:     0 / 20 turns"));
}

#[tokio::test]
async fn test_history_feeds_the_next_prompt() {
    let mut h = harness();
    h.engine.rebuild().await.unwrap();
    h.engine.ask("What color is the sky?", |_| {}).await;
    assert_eq!(h.engine.history().len(), 2);

    h.engine.ask("And the grass?", |_| {}).await;
    assert_eq!(h.engine.history().len(), 4);
    assert_eq!(h.engine.status().await.history_len, 4);

    let prompts = h.prompts.lock().unwrap();
    let second = &prompts[1].1;
    assert!(second.contains("Conversation so far:"));
    assert!(second.contains("user: What color is the sky?"));
    assert!(second.contains("assistant: The sky is blue."));
}

#[tokio::test]
async fn test_clear_resets_history() {
    let mut h = harness();
    h.engine.ask("What color is the sky?", |_| {}).await;
    assert_eq!(h.engine.history().len(), 2);
    h.engine.clear_history();
    assert_eq!(h.engine.status().await.history_len, 0);
}

#[tokio::test]
async fn test_completion_failure_returns_apology() {
    let mut h = harness_with(
        vec![
            Ok("The sky".to_string()),
            Err("connection reset".to_string()),
        ],
        Failure::Never,
        100,
    );
    h.engine.rebuild().await.unwrap();

    let mut streamed = String::new();
    let answer = h
        .engine
        .ask("What color is the sky?", |f| streamed.push_str(f))
        .await;
    assert!(answer.failed);
    assert_eq!(answer.text, APOLOGY);
    assert_eq!(streamed, "The sky");
    assert_eq!(h.engine.history().len(), 0);
}

#[tokio::test]
async fn test_embedding_failure_returns_apology() {
    let mut h = harness_with(vec![Ok("unused".to_string())], Failure::Always, 100);
    let answer = h.engine.ask("What color is the sky?", |_| {}).await;
    assert!(answer.failed);
    assert_eq!(answer.text, APOLOGY);
    assert!(h.prompts.lock().unwrap().is_empty());
    assert!(h.engine.history().is_empty());

    // Building fails loudly instead.
    assert!(matches!(
        h.engine.rebuild().await,
        Err(RagError::Embedding(_))
    ));
}

#[tokio::test]
async fn test_empty_store_still_answers() {
    let mut h = harness();
    let answer = h.engine.ask("What color is the sky?", |_| {}).await;
    assert!(!answer.failed);
    assert!(answer.sources.is_empty());
    let prompts = h.prompts.lock().unwrap();
    assert!(prompts[0].1.contains("no relevant context"));
}
