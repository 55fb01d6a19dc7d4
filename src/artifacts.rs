//! Filesystem memory root.
//!
//! Artifacts live as pretty-printed JSON documents directly under the
//! memory root, with embeddings in an `embeddings/` subdirectory. Reads go
//! through the validating decoder; writes validate first and never leave a
//! half-written file behind (write to a temp file, then rename).

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

use repo_memory_core::models::{
    Artifact, CiGraph, Corpus, DecisionLog, EmbeddingFile, ExecutionLog, ModuleMap, RepoGraph,
};
use repo_memory_core::schema::{decode, Validate};
use repo_memory_core::store::{MemoryError, MemoryResult, MemorySource};

pub const EMBEDDINGS_DIR: &str = "embeddings";

/// A memory directory on disk.
#[derive(Debug, Clone)]
pub struct FsMemory {
    root: PathBuf,
}

impl FsMemory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_path<T: Artifact>(&self) -> PathBuf {
        self.root.join(T::FILE_NAME)
    }

    pub fn embeddings_path(&self, corpus: Corpus) -> PathBuf {
        self.root.join(EMBEDDINGS_DIR).join(corpus.file_name())
    }

    /// Read and decode a file; `Ok(None)` when it does not exist.
    pub fn read_file<T: DeserializeOwned + Validate>(&self, path: &Path) -> MemoryResult<T> {
        let name = path
            .strip_prefix(&self.root)
            .unwrap_or(path)
            .display()
            .to_string();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(MemoryError::Io {
                    artifact: name,
                    source: e,
                })
            }
        };
        Ok(Some(decode(&name, &bytes)?))
    }

    pub fn read<T: Artifact + Validate>(&self) -> MemoryResult<T> {
        self.read_file(&self.artifact_path::<T>())
    }

    /// Read an artifact for a producer: a missing file is `None`, anything
    /// unreadable or invalid is an error.
    pub fn load<T: Artifact + Validate>(&self) -> Result<Option<T>> {
        self.read::<T>()
            .with_context(|| format!("Failed to load {}", T::FILE_NAME))
    }

    pub fn load_embeddings(&self, corpus: Corpus) -> Result<Option<EmbeddingFile>> {
        self.read_file(&self.embeddings_path(corpus))
            .with_context(|| format!("Failed to load {}", corpus.file_name()))
    }

    pub fn write<T: Artifact + Validate>(&self, value: &T) -> Result<()> {
        write_validated(&self.artifact_path::<T>(), value)
    }

    pub fn write_embeddings(&self, file: &EmbeddingFile) -> Result<()> {
        write_validated(&self.embeddings_path(file.corpus), file)
    }
}

/// Render an artifact the way it is stored: pretty JSON with a trailing newline.
pub fn render<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Validate, then atomically replace `path` with the rendered value.
pub fn write_validated<T: Serialize + Validate>(path: &Path, value: &T) -> Result<()> {
    value
        .validate()
        .with_context(|| format!("Refusing to write invalid artifact {}", path.display()))?;
    let bytes = render(value)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

impl MemorySource for FsMemory {
    fn repo_graph(&self) -> MemoryResult<RepoGraph> {
        self.read()
    }

    fn module_map(&self) -> MemoryResult<ModuleMap> {
        self.read()
    }

    fn ci_graph(&self) -> MemoryResult<CiGraph> {
        self.read()
    }

    fn decision_log(&self) -> MemoryResult<DecisionLog> {
        self.read()
    }

    fn execution_log(&self) -> MemoryResult<ExecutionLog> {
        self.read()
    }

    fn embeddings(&self, corpus: Corpus) -> MemoryResult<EmbeddingFile> {
        self.read_file(&self.embeddings_path(corpus))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_artifact_is_none() {
        let tmp = TempDir::new().unwrap();
        let mem = FsMemory::new(tmp.path());
        assert!(mem.decision_log().unwrap().is_none());
        assert!(mem.embeddings(Corpus::Pr).unwrap().is_none());
    }

    #[test]
    fn test_write_then_read_execution_log() {
        let tmp = TempDir::new().unwrap();
        let mem = FsMemory::new(tmp.path().join("nested"));
        mem.write(&ExecutionLog::default()).unwrap();
        let bytes = std::fs::read(mem.artifact_path::<ExecutionLog>()).unwrap();
        assert!(bytes.ends_with(b"\n"));
        let log = mem.execution_log().unwrap().unwrap();
        assert!(log.runs.is_empty());
    }

    #[test]
    fn test_malformed_artifact_is_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("decision_log.json"), "{not json").unwrap();
        let mem = FsMemory::new(tmp.path());
        assert!(mem.decision_log().is_err());
        assert!(mem.load::<DecisionLog>().is_err());
    }
}
