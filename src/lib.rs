//! # ragchat
//!
//! A terminal chatbot that answers questions from a folder of plain-text
//! documents using retrieval-augmented generation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ knowledge    │──▶│ Chunk+Embed │──▶│ Vector store │
//! │ base folder  │   │  (batched)  │   │ mem/sqlite/  │
//! └──────────────┘   └─────────────┘   │ chroma/pc    │
//!                                      └──────┬───────┘
//!                      question ──▶ embed ──▶ query top_k
//!                                             │
//!                                 prompt + history ──▶ streamed answer
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML file plus environment overrides |
//! | [`ingest`] | Knowledge-base folder scan |
//! | [`embedding`] | OpenAI embeddings client |
//! | [`stores`] | Vector store backends |
//! | [`completion`] | Streaming chat completions |
//! | [`engine`] | Build and ask orchestration |
//! | [`repl`] | Interactive loop |
//! | [`progress`] | Build progress on stderr |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] | SQLite connection pool |
//!
//! Chunking, prompt assembly, history, the store trait, and the error
//! type live in the `ragchat-core` crate.

pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod ingest;
pub mod logging;
pub mod progress;
pub mod repl;
pub mod stores;
