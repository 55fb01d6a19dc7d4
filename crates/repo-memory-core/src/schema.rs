//! Validating decoder for memory artifacts.
//!
//! Artifacts are decoded in two steps: the `schema_version` field is read
//! from the raw JSON and compared to [`SCHEMA_VERSION`], then the document
//! is decoded into its typed record and checked with [`Validate`]. Unknown
//! enum values and missing required fields are decode errors.

use std::collections::HashSet;

use serde::de::DeserializeOwned;

use crate::execution::{MAX_CONTEXT_IDS, MAX_SUMMARY_CHARS};
use crate::models::{
    CiGraph, DecisionLog, DependencyGraph, EmbeddingFile, ExecutionLog, ExecutionRecord,
    InfraGraph, ModuleMap, RepoGraph, SCHEMA_VERSION,
};

/// A schema or invariant violation, located by a context path such as
/// `repo_graph.nodes[3].hash`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error(
        "{artifact}: schema_version {found:?} does not match supported version {expected:?}",
        expected = SCHEMA_VERSION
    )]
    SchemaVersion { artifact: String, found: String },

    #[error("{artifact}: {message}")]
    Decode { artifact: String, message: String },

    #[error("{path}: {message}")]
    Invalid { path: String, message: String },

    #[error("{path}: expected {expected} dimensions, found {found}")]
    Dimension {
        path: String,
        expected: usize,
        found: usize,
    },
}

impl ValidationError {
    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError::Invalid {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Invariant checks run after a record is decoded and before it is written.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Decode and validate an artifact from raw JSON bytes.
///
/// `artifact` names the document in error messages (usually the file name).
pub fn decode<T: DeserializeOwned + Validate>(
    artifact: &str,
    bytes: &[u8],
) -> Result<T, ValidationError> {
    let raw: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| ValidationError::Decode {
            artifact: artifact.to_string(),
            message: format!("invalid JSON: {}", e),
        })?;

    match raw.get("schema_version").and_then(|v| v.as_str()) {
        Some(SCHEMA_VERSION) => {}
        Some(other) => {
            return Err(ValidationError::SchemaVersion {
                artifact: artifact.to_string(),
                found: other.to_string(),
            })
        }
        None => {
            return Err(ValidationError::Decode {
                artifact: artifact.to_string(),
                message: "missing string field `schema_version`".to_string(),
            })
        }
    }

    let value: T = serde_json::from_value(raw).map_err(|e| ValidationError::Decode {
        artifact: artifact.to_string(),
        message: e.to_string(),
    })?;
    value.validate()?;
    Ok(value)
}

fn check_version(artifact: &str, found: &str) -> Result<(), ValidationError> {
    if found == SCHEMA_VERSION {
        Ok(())
    } else {
        Err(ValidationError::SchemaVersion {
            artifact: artifact.to_string(),
            found: found.to_string(),
        })
    }
}

/// `sha256:` followed by 64 lowercase hex digits.
pub fn is_content_hash(s: &str) -> bool {
    s.strip_prefix("sha256:")
        .map(|hex| hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)))
        .unwrap_or(false)
}

fn non_empty(path: String, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::invalid(path, "must not be empty"))
    } else {
        Ok(())
    }
}

impl Validate for RepoGraph {
    fn validate(&self) -> Result<(), ValidationError> {
        check_version("repo_graph", &self.schema_version)?;
        let mut paths = HashSet::new();
        for (i, node) in self.nodes.iter().enumerate() {
            non_empty(format!("repo_graph.nodes[{}].path", i), &node.path)?;
            if !paths.insert(node.path.as_str()) {
                return Err(ValidationError::invalid(
                    format!("repo_graph.nodes[{}].path", i),
                    format!("duplicate node '{}'", node.path),
                ));
            }
            if !is_content_hash(&node.hash) {
                return Err(ValidationError::invalid(
                    format!("repo_graph.nodes[{}].hash", i),
                    format!("'{}' is not a sha256 content hash", node.hash),
                ));
            }
        }
        for (i, edge) in self.edges.iter().enumerate() {
            for (field, end) in [("from", &edge.from), ("to", &edge.to)] {
                if !paths.contains(end.as_str()) {
                    return Err(ValidationError::invalid(
                        format!("repo_graph.edges[{}].{}", i, field),
                        format!("'{}' is not an indexed node", end),
                    ));
                }
            }
            if edge.from == edge.to {
                return Err(ValidationError::invalid(
                    format!("repo_graph.edges[{}]", i),
                    "self edge",
                ));
            }
        }
        if self.metrics.total_files != self.nodes.len() {
            return Err(ValidationError::invalid(
                "repo_graph.metrics.total_files",
                format!(
                    "{} does not match {} nodes",
                    self.metrics.total_files,
                    self.nodes.len()
                ),
            ));
        }
        if self.metrics.total_edges != self.edges.len() {
            return Err(ValidationError::invalid(
                "repo_graph.metrics.total_edges",
                format!(
                    "{} does not match {} edges",
                    self.metrics.total_edges,
                    self.edges.len()
                ),
            ));
        }
        Ok(())
    }
}

impl Validate for ModuleMap {
    fn validate(&self) -> Result<(), ValidationError> {
        check_version("module_map", &self.schema_version)?;
        let mut names = HashSet::new();
        for (i, module) in self.modules.iter().enumerate() {
            non_empty(format!("module_map.modules[{}].name", i), &module.name)?;
            if !names.insert(module.name.as_str()) {
                return Err(ValidationError::invalid(
                    format!("module_map.modules[{}].name", i),
                    format!("duplicate module '{}'", module.name),
                ));
            }
            if module.files.is_empty() {
                return Err(ValidationError::invalid(
                    format!("module_map.modules[{}].files", i),
                    "module has no files",
                ));
            }
        }
        Ok(())
    }
}

impl Validate for DependencyGraph {
    fn validate(&self) -> Result<(), ValidationError> {
        check_version("dependency_graph", &self.schema_version)?;
        for (i, dep) in self.dependencies.iter().enumerate() {
            non_empty(format!("dependency_graph.dependencies[{}].source", i), &dep.source)?;
            non_empty(format!("dependency_graph.dependencies[{}].target", i), &dep.target)?;
            if dep.depth == 0 {
                return Err(ValidationError::invalid(
                    format!("dependency_graph.dependencies[{}].depth", i),
                    "depth must be >= 1",
                ));
            }
        }
        Ok(())
    }
}

impl Validate for InfraGraph {
    fn validate(&self) -> Result<(), ValidationError> {
        check_version("infra_graph", &self.schema_version)?;
        for (i, r) in self.terraform.resources.iter().enumerate() {
            non_empty(format!("infra_graph.terraform.resources[{}].type", i), &r.resource_type)?;
            non_empty(format!("infra_graph.terraform.resources[{}].name", i), &r.name)?;
        }
        for (i, m) in self.terraform.modules.iter().enumerate() {
            non_empty(format!("infra_graph.terraform.modules[{}].source", i), &m.source)?;
        }
        for (i, c) in self.helm.charts.iter().enumerate() {
            non_empty(format!("infra_graph.helm.charts[{}].name", i), &c.name)?;
        }
        Ok(())
    }
}

impl Validate for CiGraph {
    fn validate(&self) -> Result<(), ValidationError> {
        check_version("ci_graph", &self.schema_version)?;
        for (i, wf) in self.workflows.iter().enumerate() {
            non_empty(format!("ci_graph.workflows[{}].path", i), &wf.path)?;
            non_empty(format!("ci_graph.workflows[{}].name", i), &wf.name)?;
            for (j, f) in wf.failure_history.iter().enumerate() {
                non_empty(
                    format!("ci_graph.workflows[{}].failure_history[{}].reason", i, j),
                    &f.reason,
                )?;
            }
        }
        Ok(())
    }
}

impl Validate for DecisionLog {
    fn validate(&self) -> Result<(), ValidationError> {
        check_version("decision_log", &self.schema_version)?;
        let mut ids = HashSet::new();
        for (i, d) in self.decisions.iter().enumerate() {
            let path = format!("decision_log.decisions[{}]", i);
            let expected_prefix = format!("{}-", d.decision_type.id_prefix());
            let well_formed = d
                .decision_id
                .strip_prefix(&expected_prefix)
                .map(|h| h.len() == 8 && h.bytes().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b)))
                .unwrap_or(false);
            if !well_formed {
                return Err(ValidationError::invalid(
                    format!("{}.decision_id", path),
                    format!(
                        "'{}' is not a {} decision id",
                        d.decision_id, d.decision_type
                    ),
                ));
            }
            if !ids.insert(d.decision_id.as_str()) {
                return Err(ValidationError::invalid(
                    format!("{}.decision_id", path),
                    format!("duplicate id '{}'", d.decision_id),
                ));
            }
            non_empty(format!("{}.context", path), &d.context)?;
            non_empty(format!("{}.source", path), &d.source)?;
        }
        Ok(())
    }
}

impl Validate for EmbeddingFile {
    fn validate(&self) -> Result<(), ValidationError> {
        let artifact = format!("{}_embeddings", self.corpus);
        check_version(&artifact, &self.schema_version)?;
        non_empty(format!("{}.model_name", artifact), &self.model_name)?;
        if !self.embeddings.is_empty() && self.dims == 0 {
            return Err(ValidationError::invalid(
                format!("{}.dims", artifact),
                "dims must be > 0 when records are present",
            ));
        }
        for (i, rec) in self.embeddings.iter().enumerate() {
            let path = format!("{}.embeddings[{}]", artifact, i);
            non_empty(format!("{}.key", path), &rec.key)?;
            if !is_content_hash(&rec.hash) {
                return Err(ValidationError::invalid(
                    format!("{}.hash", path),
                    format!("'{}' is not a sha256 content hash", rec.hash),
                ));
            }
            if rec.total_chunks == 0 || rec.chunk_index >= rec.total_chunks {
                return Err(ValidationError::invalid(
                    format!("{}.chunk_index", path),
                    format!("chunk {} of {} is out of range", rec.chunk_index, rec.total_chunks),
                ));
            }
            if rec.embedding.len() != self.dims {
                return Err(ValidationError::Dimension {
                    path: format!("{}.embedding", path),
                    expected: self.dims,
                    found: rec.embedding.len(),
                });
            }
            if rec.embedding.iter().any(|v| !v.is_finite()) {
                return Err(ValidationError::invalid(
                    format!("{}.embedding", path),
                    "vector contains a non-finite value",
                ));
            }
        }
        Ok(())
    }
}

impl Validate for ExecutionRecord {
    fn validate(&self) -> Result<(), ValidationError> {
        let path = format!("run {}", self.run_id);
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ValidationError::invalid(
                format!("{}.confidence", path),
                format!("{} is outside [0, 1]", self.confidence),
            ));
        }
        if !is_content_hash(&self.input_hash) {
            return Err(ValidationError::invalid(
                format!("{}.input_hash", path),
                "must be 'sha256:' followed by 64 hex digits",
            ));
        }
        if self.decision_summary.chars().count() > MAX_SUMMARY_CHARS {
            return Err(ValidationError::invalid(
                format!("{}.decision_summary", path),
                format!("longer than {} characters", MAX_SUMMARY_CHARS),
            ));
        }
        if self.retrieved_context_ids.len() > MAX_CONTEXT_IDS {
            return Err(ValidationError::invalid(
                format!("{}.retrieved_context_ids", path),
                format!("more than {} ids", MAX_CONTEXT_IDS),
            ));
        }
        non_empty(format!("{}.trigger.source_ref", path), &self.trigger.source_ref)?;
        Ok(())
    }
}

impl Validate for ExecutionLog {
    fn validate(&self) -> Result<(), ValidationError> {
        check_version("execution_log", &self.schema_version)?;
        for run in &self.runs {
            run.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash() -> String {
        format!("sha256:{}", "a".repeat(64))
    }

    #[test]
    fn test_decode_rejects_other_schema_version() {
        let doc = br#"{"schema_version":"0.9","generated_at":"2024-01-01T00:00:00Z","modules":[]}"#;
        let err = decode::<ModuleMap>("module_map.json", doc).unwrap_err();
        assert!(matches!(err, ValidationError::SchemaVersion { .. }));
    }

    #[test]
    fn test_decode_rejects_missing_version() {
        let doc = br#"{"generated_at":"2024-01-01T00:00:00Z","modules":[]}"#;
        let err = decode::<ModuleMap>("module_map.json", doc).unwrap_err();
        assert!(matches!(err, ValidationError::Decode { .. }));
    }

    #[test]
    fn test_decode_rejects_unknown_enum_value() {
        let doc = format!(
            r#"{{"schema_version":"1.0","generated_at":"2024-01-01T00:00:00Z",
                "nodes":[{{"path":"a.py","type":"binary","size_bytes":1,"hash":"{}"}}],
                "edges":[],"metrics":{{"total_files":1,"total_edges":0,"files_by_type":{{}}}}}}"#,
            hash()
        );
        let err = decode::<RepoGraph>("repo_graph.json", doc.as_bytes()).unwrap_err();
        assert!(matches!(err, ValidationError::Decode { .. }), "{}", err);
    }

    #[test]
    fn test_repo_graph_dangling_edge() {
        let doc = format!(
            r#"{{"schema_version":"1.0","generated_at":"2024-01-01T00:00:00Z",
                "nodes":[{{"path":"a.py","type":"source","size_bytes":1,"hash":"{}"}}],
                "edges":[{{"from":"a.py","to":"b.py","relation":"imports"}}],
                "metrics":{{"total_files":1,"total_edges":1,"files_by_type":{{}}}}}}"#,
            hash()
        );
        let err = decode::<RepoGraph>("repo_graph.json", doc.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("repo_graph.edges[0].to"), "{}", err);
    }

    #[test]
    fn test_embedding_dimension_mismatch() {
        let doc = format!(
            r#"{{"schema_version":"1.0","corpus":"file","model_name":"m","model_version":"1",
                "dims":3,"generated_at":"2024-01-01T00:00:00Z",
                "embeddings":[{{"key":"a.py","hash":"{}","chunk_index":0,"total_chunks":1,
                                "embedding":[0.1,0.2]}}]}}"#,
            hash()
        );
        let err = decode::<EmbeddingFile>("file_embeddings.json", doc.as_bytes()).unwrap_err();
        assert!(matches!(err, ValidationError::Dimension { expected: 3, found: 2, .. }));
    }

    #[test]
    fn test_content_hash_format() {
        assert!(is_content_hash(&hash()));
        assert!(!is_content_hash("sha256:abc"));
        assert!(!is_content_hash(&"a".repeat(71)));
        assert!(!is_content_hash(&format!("sha256:{}", "A".repeat(64))));
    }
}
