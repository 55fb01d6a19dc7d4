//! Artifact access abstraction for the retriever.
//!
//! The [`MemorySource`] trait exposes each committed artifact of one memory
//! root. `Ok(None)` means the artifact does not exist, which callers treat
//! as empty. Implementations decode through [`crate::schema::decode`], so a
//! returned artifact has already passed validation.
//!
//! | Implementation | Backing |
//! |----------------|---------|
//! | [`memory::InMemorySource`] | values held in memory (tests, embedding hosts) |
//! | `FsMemory` (app crate) | JSON files under a memory directory |

pub mod memory;

use crate::models::{CiGraph, Corpus, DecisionLog, EmbeddingFile, ExecutionLog, ModuleMap, RepoGraph};
use crate::schema::ValidationError;

/// Failure to read an artifact.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("failed to read {artifact}: {source}")]
    Io {
        artifact: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

pub type MemoryResult<T> = Result<Option<T>, MemoryError>;

/// Read-only access to the artifacts of a single memory root.
///
/// Implementations must be `Send + Sync`; the retriever may be shared
/// between threads.
pub trait MemorySource: Send + Sync {
    fn repo_graph(&self) -> MemoryResult<RepoGraph>;
    fn module_map(&self) -> MemoryResult<ModuleMap>;
    fn ci_graph(&self) -> MemoryResult<CiGraph>;
    fn decision_log(&self) -> MemoryResult<DecisionLog>;
    fn execution_log(&self) -> MemoryResult<ExecutionLog>;
    fn embeddings(&self, corpus: Corpus) -> MemoryResult<EmbeddingFile>;
}
