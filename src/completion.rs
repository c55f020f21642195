//! Streaming chat completions.
//!
//! [`CompletionStreamer`] opens one request to a chat model and hands back
//! a [`FragmentStream`]: a lazy, finite, non-restartable sequence of text
//! fragments. The caller decides where fragments go (terminal, buffer,
//! test assertion).
//!
//! [`OpenAiCompleter`] speaks the OpenAI `chat/completions` server-sent
//! events protocol. A spawned reader task decodes the response body and
//! feeds a bounded channel; dropping the [`FragmentStream`] aborts that
//! task, which drops the response and closes the connection.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use ragchat_core::error::{RagError, Result};

use crate::config::Config;

/// Fragments buffered between the reader task and the consumer.
const CHANNEL_CAPACITY: usize = 32;

#[async_trait]
pub trait CompletionStreamer: Send + Sync {
    /// Returns the chat model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Start a completion and return its fragments as they arrive.
    async fn stream_completion(&self, system_prompt: &str, user_message: &str)
        -> Result<FragmentStream>;
}

/// Incremental output of one completion request.
pub struct FragmentStream {
    rx: mpsc::Receiver<Result<String>>,
    task: Option<JoinHandle<()>>,
}

impl FragmentStream {
    fn spawned(rx: mpsc::Receiver<Result<String>>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            task: Some(task),
        }
    }

    /// A stream that yields `items` and then ends. Used by fakes.
    pub fn from_fragments<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Result<String>>,
    {
        let items: Vec<_> = items.into_iter().collect();
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            // Capacity equals the item count, so this never fails.
            let _ = tx.try_send(item);
        }
        Self { rx, task: None }
    }

    /// Next fragment, or `None` once the completion has finished.
    pub async fn next(&mut self) -> Option<Result<String>> {
        self.rx.recv().await
    }

    /// Drain the stream into one string, stopping at the first error.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

impl Drop for FragmentStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Chat completions via the OpenAI API.
pub struct OpenAiCompleter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OpenAiCompleter {
    /// Only the connect phase is bounded by `openai.timeout_secs`; a long
    /// answer may keep streaming past it.
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config.openai_api_key()?.to_string();
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.openai.timeout_secs))
            .build()
            .map_err(|e| RagError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.openai.base_url.trim_end_matches('/').to_string(),
            model: config.chat.model.clone(),
            temperature: config.chat.temperature,
        })
    }
}

#[async_trait]
impl CompletionStreamer for OpenAiCompleter {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream_completion(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<FragmentStream> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_message },
            ],
            "temperature": self.temperature,
            "stream": true,
        });

        debug!(model = %self.model, "opening completion stream");
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::connection("openai", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RagError::Completion(format!(
                "OpenAI API error {}: {}",
                status, text
            )));
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut body = response.bytes_stream();

        let task = tokio::spawn(async move {
            let mut decoder = SseDecoder::default();
            while let Some(item) = body.next().await {
                match item {
                    Ok(bytes) => {
                        if !forward(&tx, decoder.push(&bytes)).await {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(RagError::Completion(format!(
                                "stream interrupted: {}",
                                e
                            ))))
                            .await;
                        return;
                    }
                }
            }
            forward(&tx, decoder.finish()).await;
        });

        Ok(FragmentStream::spawned(rx, task))
    }
}

/// Send decoded events to the consumer. Returns `false` once the stream
/// is over or the consumer has gone away.
async fn forward(tx: &mpsc::Sender<Result<String>>, events: Vec<SseEvent>) -> bool {
    for event in events {
        match event {
            SseEvent::Fragment(text) => {
                if tx.send(Ok(text)).await.is_err() {
                    return false;
                }
            }
            SseEvent::Done => return false,
            SseEvent::Error(message) => {
                let _ = tx.send(Err(RagError::Completion(message))).await;
                return false;
            }
        }
    }
    true
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Fragment(String),
    Done,
    Error(String),
}

/// Incremental decoder for OpenAI chat-completion server-sent events.
///
/// Network chunks may split lines (and UTF-8 characters) anywhere, so
/// bytes are buffered until a full line is available.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    /// Feed raw bytes, returning the events completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.decode_line(&line, &mut events);
        }
        events
    }

    /// Flush a trailing line that arrived without a newline.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        let mut events = Vec::new();
        self.decode_line(&line, &mut events);
        events
    }

    fn decode_line(&mut self, raw: &[u8], events: &mut Vec<SseEvent>) {
        if self.done {
            return;
        }
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            // Blank separators, comments (`:`), and `event:`/`id:` fields.
            return;
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            events.push(SseEvent::Done);
            return;
        }

        let Ok(json) = serde_json::from_str::<serde_json::Value>(data) else {
            debug!(data, "ignoring undecodable stream line");
            return;
        };
        if let Some(error) = json.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            self.done = true;
            events.push(SseEvent::Error(message));
            return;
        }
        if let Some(content) = json["choices"][0]["delta"]["content"].as_str() {
            if !content.is_empty() {
                events.push(SseEvent::Fragment(content.to_string()));
            }
        }
    }
}
