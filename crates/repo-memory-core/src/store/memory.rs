//! In-memory [`MemorySource`] for tests and embedding hosts.
//!
//! Holds each artifact as a plain value. Reads clone; nothing is validated
//! because values are constructed in code.

use crate::models::{CiGraph, Corpus, DecisionLog, EmbeddingFile, ExecutionLog, ModuleMap, RepoGraph};

use super::{MemoryResult, MemorySource};

/// In-memory artifact set.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    pub repo_graph: Option<RepoGraph>,
    pub module_map: Option<ModuleMap>,
    pub ci_graph: Option<CiGraph>,
    pub decision_log: Option<DecisionLog>,
    pub execution_log: Option<ExecutionLog>,
    embeddings: [Option<EmbeddingFile>; 4],
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the embedding artifact for the file's own corpus.
    pub fn with_embeddings(mut self, file: EmbeddingFile) -> Self {
        let slot = file.corpus.slot();
        self.embeddings[slot] = Some(file);
        self
    }

    pub fn with_decisions(mut self, log: DecisionLog) -> Self {
        self.decision_log = Some(log);
        self
    }

    pub fn with_execution_log(mut self, log: ExecutionLog) -> Self {
        self.execution_log = Some(log);
        self
    }
}

impl MemorySource for InMemorySource {
    fn repo_graph(&self) -> MemoryResult<RepoGraph> {
        Ok(self.repo_graph.clone())
    }

    fn module_map(&self) -> MemoryResult<ModuleMap> {
        Ok(self.module_map.clone())
    }

    fn ci_graph(&self) -> MemoryResult<CiGraph> {
        Ok(self.ci_graph.clone())
    }

    fn decision_log(&self) -> MemoryResult<DecisionLog> {
        Ok(self.decision_log.clone())
    }

    fn execution_log(&self) -> MemoryResult<ExecutionLog> {
        Ok(self.execution_log.clone())
    }

    fn embeddings(&self, corpus: Corpus) -> MemoryResult<EmbeddingFile> {
        Ok(self.embeddings[corpus.slot()].clone())
    }
}
