//! # repo-memory core
//!
//! Pure logic for the repository memory engine: artifact models, the
//! validating decoder, deterministic chunking, vector utilities, decision
//! and execution history, and the composite-scored retriever.
//!
//! This crate does no filesystem or network I/O. Artifacts reach the
//! retriever through the [`store::MemorySource`] trait; embeddings come
//! from an injected [`embedding::EmbeddingProvider`].

pub mod chunk;
pub mod decision;
pub mod embedding;
pub mod execution;
pub mod models;
pub mod schema;
pub mod search;
pub mod store;
