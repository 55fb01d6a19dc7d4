//! # Repository Memory
//!
//! Persistent, queryable memory of a source repository for automation
//! agents.
//!
//! A memory root is a directory of JSON artifacts describing the
//! repository's structure, embeddings, decisions, and agent history. The
//! commands in this crate produce those artifacts, check them, and read
//! them back as context bundles.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Repository │──▶│ ingest/embed │──▶│ memory root  │
//! │ + trackers │   │ decisions    │   │ (JSON files) │
//! └────────────┘   └──────────────┘   └──────┬───────┘
//!                                            │
//!                        ┌───────────────────┤
//!                        ▼                   ▼
//!                  ┌───────────┐       ┌───────────┐
//!                  │ validate  │       │ retriever │
//!                  │  (gate)   │       │  (query)  │
//!                  └───────────┘       └───────────┘
//! ```
//!
//! Pure logic (artifact models, the validating decoder, chunking,
//! scoring, and the retriever) lives in `repo-memory-core`; this crate
//! adds the filesystem, the embedding providers, and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`scan`] | Repository walk and content hashing |
//! | [`artifacts`] | Validated reads and atomic writes under the memory root |
//! | [`infra`] | Terraform, Helm, and workflow scanners |
//! | [`ingest`] | Structural ingestor and CI failure recording |
//! | [`embedding`] | HTTP embedding providers |
//! | [`embed_cmd`] | Incremental embedding pipeline |
//! | [`progress`] | Embedding progress reporting |
//! | [`decisions`] | Decision extraction and lookup |
//! | [`exec_log`] | Execution logger |
//! | [`validate`] | Validation gate |
//! | [`query`] | Context bundle assembly |
//! | [`stats`] | Memory root summary |

pub mod artifacts;
pub mod config;
pub mod decisions;
pub mod embed_cmd;
pub mod embedding;
pub mod exec_log;
pub mod infra;
pub mod ingest;
pub mod progress;
pub mod query;
pub mod scan;
pub mod stats;
pub mod validate;
