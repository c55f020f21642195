//! # ragchat core
//!
//! Shared logic for ragchat: data models, chunking, conversation history,
//! prompt assembly, the embedder and vector store traits, and the
//! in-memory vector store.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or network
//! clients. Backends that talk to the outside world live in the `ragchat`
//! app crate and implement the traits defined here.

pub mod chunk;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod models;
pub mod store;
