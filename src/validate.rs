//! Validation gate.
//!
//! Runs every consistency check over a memory root and reports each one.
//! Nothing is short-circuited: a failed check is recorded and the next
//! one still runs, so a single invocation lists every problem. Any error
//! makes `rmem validate` exit non-zero.

use anyhow::{bail, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use walkdir::WalkDir;

use repo_memory_core::models::{
    Artifact, CiGraph, Corpus, DecisionLog, DependencyGraph, EmbeddingFile, ExecutionLog,
    InfraGraph, ModuleMap, RepoGraph,
};
use repo_memory_core::schema::Validate;

use crate::artifacts::{FsMemory, EMBEDDINGS_DIR};
use crate::config::Config;
use crate::progress::format_number;
use crate::scan::{hash_file, relative_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Ok,
    Error,
}

/// Result of one named check.
#[derive(Debug, Clone)]
pub struct Check {
    pub name: String,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct GateReport {
    pub checks: Vec<Check>,
}

impl GateReport {
    fn ok(&mut self, name: &str, message: impl Into<String>) {
        self.checks.push(Check {
            name: name.to_string(),
            severity: Severity::Ok,
            message: message.into(),
        });
    }

    fn error(&mut self, name: &str, message: impl Into<String>) {
        self.checks.push(Check {
            name: name.to_string(),
            severity: Severity::Error,
            message: message.into(),
        });
    }

    pub fn errors(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| c.severity == Severity::Error)
    }

    pub fn passed(&self) -> bool {
        self.errors().next().is_none()
    }
}

fn check_artifact<T: Artifact + Validate>(
    memory: &FsMemory,
    required: bool,
    unparsable: &BTreeSet<String>,
    report: &mut GateReport,
) -> Option<T> {
    let name = T::FILE_NAME;
    if unparsable.contains(name) {
        return None;
    }
    match memory.read::<T>() {
        Ok(Some(value)) => {
            report.ok("schema", format!("{} conforms", name));
            Some(value)
        }
        Ok(None) if required => {
            report.error("schema", format!("{} is missing (run `rmem ingest`)", name));
            None
        }
        Ok(None) => None,
        Err(e) => {
            report.error("schema", e.to_string());
            None
        }
    }
}

/// Run every check against the configured memory root.
pub fn run_gate(config: &Config) -> GateReport {
    let mut report = GateReport::default();
    let memory = FsMemory::new(config.memory_root());
    let root = memory.root();

    if !root.is_dir() {
        report.error("memory", format!("memory root {} does not exist", root.display()));
        return report;
    }

    // 1. JSON parseability, and sizes along the way
    let mut unparsable = BTreeSet::new();
    let mut sizes: BTreeMap<String, u64> = BTreeMap::new();
    let mut parsed = 0usize;
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = relative_path(root, entry.path());
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        sizes.insert(rel.clone(), size);
        if !rel.ends_with(".json") {
            continue;
        }
        let bytes = match std::fs::read(entry.path()) {
            Ok(b) => b,
            Err(e) => {
                report.error("json", format!("{}: unreadable: {}", rel, e));
                unparsable.insert(rel);
                continue;
            }
        };
        match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(_) => parsed += 1,
            Err(e) => {
                report.error("json", format!("{}: invalid JSON: {}", rel, e));
                unparsable.insert(rel);
            }
        }
    }
    if unparsable.is_empty() {
        report.ok("json", format!("{} file(s) parse", parsed));
    }

    // 2. Schema conformance
    check_artifact::<RepoGraph>(&memory, true, &unparsable, &mut report);
    check_artifact::<ModuleMap>(&memory, true, &unparsable, &mut report);
    check_artifact::<DependencyGraph>(&memory, true, &unparsable, &mut report);
    check_artifact::<InfraGraph>(&memory, true, &unparsable, &mut report);
    check_artifact::<CiGraph>(&memory, true, &unparsable, &mut report);
    let decisions = check_artifact::<DecisionLog>(&memory, false, &unparsable, &mut report);
    check_artifact::<ExecutionLog>(&memory, false, &unparsable, &mut report);

    let mut embeddings: Vec<EmbeddingFile> = Vec::new();
    for corpus in Corpus::ALL {
        let rel = format!("{}/{}", EMBEDDINGS_DIR, corpus.file_name());
        if unparsable.contains(&rel) {
            continue;
        }
        match memory.read_file::<EmbeddingFile>(&memory.embeddings_path(corpus)) {
            Ok(Some(file)) => {
                report.ok("schema", format!("{} conforms", rel));
                embeddings.push(file);
            }
            Ok(None) => {}
            Err(e) => report.error("schema", e.to_string()),
        }
    }

    // 3. Size budgets
    let mut over = 0;
    for (rel, size) in &sizes {
        let file_name = rel.rsplit('/').next().unwrap_or(rel);
        if let Some(budget) = config.limits.budget_for(file_name) {
            if *size > budget {
                over += 1;
                report.error(
                    "size",
                    format!(
                        "{} is {} bytes, budget {}",
                        rel,
                        format_number(*size),
                        format_number(budget)
                    ),
                );
            }
        }
    }
    let total: u64 = sizes.values().sum();
    if total > config.limits.total_bytes {
        over += 1;
        report.error(
            "size",
            format!(
                "memory root totals {} bytes, budget {}",
                format_number(total),
                format_number(config.limits.total_bytes)
            ),
        );
    }
    if over == 0 {
        report.ok("size", format!("{} bytes within budgets", format_number(total)));
    }

    // 4. Model consistency
    check_models(config, &embeddings, &mut report);

    // 5. Embedding linkage
    let repo_root = config.repo_root();
    let mut hashes: HashMap<String, Option<String>> = HashMap::new();
    let mut current_hash = |key: &str| -> Option<String> {
        hashes
            .entry(key.to_string())
            .or_insert_with(|| hash_file(&repo_root.join(key)).ok().map(|(h, _)| h))
            .clone()
    };
    let mut linkage_errors = 0;
    let mut linked = 0;
    for file in embeddings.iter().filter(|f| f.corpus.is_path_keyed()) {
        let mut seen = BTreeSet::new();
        for rec in &file.embeddings {
            if !seen.insert(rec.key.as_str()) {
                continue;
            }
            linked += 1;
            match current_hash(&rec.key) {
                None => {
                    linkage_errors += 1;
                    report.error(
                        "linkage",
                        format!("stale key: {} embeds {}, which no longer exists", file.corpus.file_name(), rec.key),
                    );
                }
                Some(h) if h != rec.hash => {
                    linkage_errors += 1;
                    report.error(
                        "linkage",
                        format!("stale embedding: {} changed since it was embedded (run `rmem embed`)", rec.key),
                    );
                }
                Some(_) => {}
            }
        }
    }

    // 6. Decision linkage
    if let Some(log) = &decisions {
        for d in &log.decisions {
            for f in &d.related_files {
                linked += 1;
                if !is_existing_file(repo_root, f) {
                    linkage_errors += 1;
                    report.error(
                        "linkage",
                        format!("stale key: decision {} references {}, which no longer exists", d.decision_id, f),
                    );
                }
            }
        }
    }
    if linkage_errors == 0 {
        report.ok("linkage", format!("{} reference(s) resolve", linked));
    }

    report
}

fn is_existing_file(repo_root: &Path, rel: &str) -> bool {
    repo_root.join(rel).is_file()
}

fn check_models(config: &Config, embeddings: &[EmbeddingFile], report: &mut GateReport) {
    if embeddings.is_empty() {
        return;
    }
    let mut failed = false;

    if config.embedding.is_enabled() {
        let expected_model = config.embedding.model.as_deref().unwrap_or_default();
        for f in embeddings {
            let dims_ok = config.embedding.dims.map_or(true, |d| d == f.dims);
            if f.model_name != expected_model
                || f.model_version != config.embedding.model_version
                || !dims_ok
            {
                failed = true;
                report.error(
                    "model",
                    format!(
                        "{} was built with {}@{} ({} dims), expected {}@{}",
                        f.corpus.file_name(),
                        f.model_name,
                        f.model_version,
                        f.dims,
                        expected_model,
                        config.embedding.model_version
                    ),
                );
            }
        }
    }

    let tags: BTreeSet<(&str, &str, usize)> = embeddings
        .iter()
        .map(|f| (f.model_name.as_str(), f.model_version.as_str(), f.dims))
        .collect();
    if tags.len() > 1 {
        failed = true;
        let listed: Vec<String> = tags
            .iter()
            .map(|(m, v, d)| format!("{}@{}/{}", m, v, d))
            .collect();
        report.error(
            "model",
            format!("embedding artifacts disagree on model: {}", listed.join(", ")),
        );
    }

    if !failed {
        let (m, v, _) = tags.iter().next().copied().unwrap_or_default();
        report.ok("model", format!("all embeddings use {}@{}", m, v));
    }
}

pub fn run_validate(config: &Config) -> Result<()> {
    let report = run_gate(config);

    println!("validate {}", config.memory_root().display());
    for check in &report.checks {
        let tag = match check.severity {
            Severity::Ok => "ok  ",
            Severity::Error => "FAIL",
        };
        println!("  [{}] {:<8} {}", tag, check.name, check.message);
    }

    let errors = report.errors().count();
    if errors > 0 {
        bail!("validation failed with {} error(s)", errors);
    }
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::run_ingest;
    use chrono::Utc;
    use repo_memory_core::chunk::content_hash;
    use repo_memory_core::models::{EmbeddingRecord, SCHEMA_VERSION};
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Config) {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.py"), "import b\n").unwrap();
        fs::write(tmp.path().join("b.py"), "x = 1\n").unwrap();
        let mut cfg = Config::default();
        cfg.paths.repo_root = tmp.path().to_path_buf();
        cfg.paths.memory_dir = tmp.path().join(".memory");
        run_ingest(&cfg).unwrap();
        (tmp, cfg)
    }

    fn embedding_file(model: &str, key: &str, hash: String) -> EmbeddingFile {
        EmbeddingFile {
            schema_version: SCHEMA_VERSION.to_string(),
            corpus: Corpus::File,
            model_name: model.to_string(),
            model_version: "1".to_string(),
            dims: 2,
            generated_at: Utc::now(),
            embeddings: vec![EmbeddingRecord {
                key: key.to_string(),
                hash,
                chunk_index: 0,
                total_chunks: 1,
                embedding: vec![0.1, 0.2],
                updated_at: None,
            }],
        }
    }

    #[test]
    fn test_fresh_ingest_passes() {
        let (_tmp, cfg) = setup();
        let report = run_gate(&cfg);
        assert!(report.passed(), "{:?}", report.errors().collect::<Vec<_>>());
    }

    #[test]
    fn test_missing_required_artifact() {
        let (_tmp, cfg) = setup();
        fs::remove_file(cfg.memory_root().join("ci_graph.json")).unwrap();
        let report = run_gate(&cfg);
        assert!(report.errors().any(|c| c.message.contains("ci_graph.json is missing")));
    }

    #[test]
    fn test_invalid_json_reported_once() {
        let (_tmp, cfg) = setup();
        fs::write(cfg.memory_root().join("module_map.json"), "{oops").unwrap();
        let report = run_gate(&cfg);
        let errors: Vec<&Check> = report.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].name, "json");
    }

    #[test]
    fn test_stale_embedding_and_stale_key() {
        let (tmp, cfg) = setup();
        let memory = FsMemory::new(cfg.memory_root());
        memory
            .write_embeddings(&embedding_file("m", "b.py", content_hash(b"old contents\n")))
            .unwrap();
        let report = run_gate(&cfg);
        assert!(report.errors().any(|c| c.message.starts_with("stale embedding")));

        memory
            .write_embeddings(&embedding_file("m", "b.py", content_hash(b"x = 1\n")))
            .unwrap();
        assert!(run_gate(&cfg).passed());

        fs::remove_file(tmp.path().join("b.py")).unwrap();
        let report = run_gate(&cfg);
        assert!(report.errors().any(|c| c.message.starts_with("stale key")));
    }

    #[test]
    fn test_model_disagreement() {
        let (_tmp, cfg) = setup();
        let memory = FsMemory::new(cfg.memory_root());
        memory
            .write_embeddings(&embedding_file("m1", "b.py", content_hash(b"x = 1\n")))
            .unwrap();
        let mut doc = embedding_file("m2", "b.py", content_hash(b"x = 1\n"));
        doc.corpus = Corpus::Doc;
        memory.write_embeddings(&doc).unwrap();
        let report = run_gate(&cfg);
        assert!(report.errors().any(|c| c.name == "model"));
    }

    #[test]
    fn test_size_budget() {
        let (_tmp, mut cfg) = setup();
        cfg.limits
            .artifact_bytes
            .insert("repo_graph.json".to_string(), 10);
        let report = run_gate(&cfg);
        assert!(report.errors().any(|c| c.name == "size"));
    }
}
