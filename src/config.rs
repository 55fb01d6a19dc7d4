//! TOML configuration.
//!
//! Every section is optional; a missing file section takes its defaults.
//! When no config file is given, [`Config::default`] is used with the
//! repository root set to the current directory.
//!
//! ```toml
//! [paths]
//! repo_root = "."
//! memory_dir = ".memory"
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [retrieval]
//! semantic = 0.6
//! recency = 0.2
//! exec_success = 0.1
//! arch_relevance = 0.1
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use repo_memory_core::chunk::{DEFAULT_MAX_CHARS, DEFAULT_OVERLAP_RATIO};
use repo_memory_core::embedding::DEFAULT_PRECISION;
use repo_memory_core::execution::MAX_EXECUTION_RUNS;
use repo_memory_core::search::{RetrieverSettings, ScoreWeights};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_repo_root")]
    pub repo_root: PathBuf,
    #[serde(default = "default_memory_dir")]
    pub memory_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            repo_root: default_repo_root(),
            memory_dir: default_memory_dir(),
        }
    }
}

fn default_repo_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_memory_dir() -> PathBuf {
    PathBuf::from(".memory")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ScanConfig {
    /// Globs a file must match to be indexed. Empty means every file.
    #[serde(default)]
    pub include_globs: Vec<String>,
    /// Extra excludes on top of the built-in VCS/build/cache directories.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_ratio")]
    pub overlap_ratio: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            overlap_ratio: DEFAULT_OVERLAP_RATIO,
        }
    }
}

fn default_max_chars() -> usize {
    DEFAULT_MAX_CHARS
}
fn default_overlap_ratio() -> f64 {
    DEFAULT_OVERLAP_RATIO
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_model_version")]
    pub model_version: String,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_precision")]
    pub precision: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            model_version: default_model_version(),
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            precision: default_precision(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model_version() -> String {
    "1".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_precision() -> u32 {
    DEFAULT_PRECISION
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_semantic")]
    pub semantic: f64,
    #[serde(default = "default_recency")]
    pub recency: f64,
    #[serde(default = "default_tenth")]
    pub exec_success: f64,
    #[serde(default = "default_tenth")]
    pub arch_relevance: f64,
    #[serde(default = "default_half_life")]
    pub half_life_days: f64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_modules")]
    pub default_modules: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            semantic: default_semantic(),
            recency: default_recency(),
            exec_success: default_tenth(),
            arch_relevance: default_tenth(),
            half_life_days: default_half_life(),
            top_k: default_top_k(),
            default_modules: default_modules(),
        }
    }
}

fn default_semantic() -> f64 {
    0.6
}
fn default_recency() -> f64 {
    0.2
}
fn default_tenth() -> f64 {
    0.1
}
fn default_half_life() -> f64 {
    30.0
}
fn default_top_k() -> usize {
    10
}
fn default_modules() -> Vec<String> {
    RetrieverSettings::default().default_modules
}

impl RetrievalConfig {
    pub fn settings(&self) -> RetrieverSettings {
        RetrieverSettings {
            weights: ScoreWeights {
                semantic: self.semantic,
                recency: self.recency,
                exec_success: self.exec_success,
                arch_relevance: self.arch_relevance,
            },
            half_life_days: self.half_life_days,
            default_modules: self.default_modules.clone(),
            ..RetrieverSettings::default()
        }
    }
}

const MB: u64 = 1024 * 1024;

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_max_runs")]
    pub max_execution_runs: usize,
    #[serde(default = "default_max_failures")]
    pub max_failures_per_workflow: usize,
    #[serde(default = "default_total_bytes")]
    pub total_bytes: u64,
    /// Per-artifact byte budgets keyed by file name; merged over the defaults.
    #[serde(default)]
    pub artifact_bytes: BTreeMap<String, u64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_execution_runs: default_max_runs(),
            max_failures_per_workflow: default_max_failures(),
            total_bytes: default_total_bytes(),
            artifact_bytes: BTreeMap::new(),
        }
    }
}

fn default_max_runs() -> usize {
    MAX_EXECUTION_RUNS
}
fn default_max_failures() -> usize {
    20
}
fn default_total_bytes() -> u64 {
    50 * MB
}

impl LimitsConfig {
    /// Byte budget for an artifact file name, if it has one.
    pub fn budget_for(&self, file_name: &str) -> Option<u64> {
        if let Some(b) = self.artifact_bytes.get(file_name) {
            return Some(*b);
        }
        let default = match file_name {
            "file_embeddings.json" => 15 * MB,
            "doc_embeddings.json" | "issue_embeddings.json" | "pr_embeddings.json" => 5 * MB,
            "repo_graph.json" => 3 * MB,
            "module_map.json" | "dependency_graph.json" | "ci_graph.json" => MB,
            "infra_graph.json" | "decision_log.json" => 2 * MB,
            "execution_log.json" => 5 * MB,
            _ => return None,
        };
        Some(default)
    }
}

impl Config {
    pub fn memory_root(&self) -> &Path {
        &self.paths.memory_dir
    }

    pub fn repo_root(&self) -> &Path {
        &self.paths.repo_root
    }

    /// Validate values that serde cannot check.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_chars == 0 {
            anyhow::bail!("chunking.max_chars must be > 0");
        }
        if !(0.0..1.0).contains(&self.chunking.overlap_ratio) {
            anyhow::bail!("chunking.overlap_ratio must be in [0.0, 1.0)");
        }

        let weights = self.retrieval.settings().weights;
        for (name, w) in [
            ("semantic", weights.semantic),
            ("recency", weights.recency),
            ("exec_success", weights.exec_success),
            ("arch_relevance", weights.arch_relevance),
        ] {
            if !(0.0..=1.0).contains(&w) {
                anyhow::bail!("retrieval.{} must be in [0.0, 1.0]", name);
            }
        }
        if (weights.total() - 1.0).abs() > 1e-6 {
            anyhow::bail!(
                "retrieval weights must sum to 1.0 (got {:.4})",
                weights.total()
            );
        }
        if self.retrieval.half_life_days <= 0.0 {
            anyhow::bail!("retrieval.half_life_days must be > 0");
        }
        if self.retrieval.top_k == 0 {
            anyhow::bail!("retrieval.top_k must be >= 1");
        }
        if self.limits.max_execution_runs == 0 {
            anyhow::bail!("limits.max_execution_runs must be >= 1");
        }

        if self.embedding.is_enabled() {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Resolve the effective configuration for a CLI invocation.
///
/// An explicit `--config` must exist. Otherwise `./config/rmem.toml` is used
/// when present, else defaults. `--repo-root` and `--memory-dir` override the
/// file; a relative memory dir from any source is taken relative to the repo
/// root.
pub fn resolve(
    explicit: Option<&Path>,
    repo_root: Option<PathBuf>,
    memory_dir: Option<PathBuf>,
) -> Result<Config> {
    let mut config = match explicit {
        Some(path) => load_config(path)?,
        None => {
            let fallback = Path::new("./config/rmem.toml");
            if fallback.exists() {
                load_config(fallback)?
            } else {
                Config::default()
            }
        }
    };

    if let Some(root) = repo_root {
        config.paths.repo_root = root;
    }
    if let Some(dir) = memory_dir {
        config.paths.memory_dir = dir;
    }
    if config.paths.memory_dir.is_relative() {
        config.paths.memory_dir = config.paths.repo_root.join(&config.paths.memory_dir);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.chunking.max_chars, 2048);
        assert_eq!(config.retrieval.top_k, 10);
        assert_eq!(config.limits.max_execution_runs, 1000);
        assert_eq!(config.limits.budget_for("file_embeddings.json"), Some(15 * MB));
        assert_eq!(config.limits.budget_for("unknown.json"), None);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let config: Config = toml::from_str("[retrieval]\nsemantic = 0.9\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn test_enabled_provider_requires_model_and_dims() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"ollama\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_overrides_and_relative_memory_dir() {
        let tmp = TempDir::new().unwrap();
        let cfg_path = tmp.path().join("rmem.toml");
        std::fs::write(&cfg_path, "[paths]\nmemory_dir = \"mem\"\n").unwrap();

        let cfg = resolve(Some(&cfg_path), Some(tmp.path().to_path_buf()), None).unwrap();
        assert_eq!(cfg.memory_root(), tmp.path().join("mem"));
    }
}
