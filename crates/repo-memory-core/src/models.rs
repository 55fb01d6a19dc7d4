//! Artifact data model.
//!
//! One typed record per artifact concern. Every artifact envelope carries
//! a `schema_version` that must equal [`SCHEMA_VERSION`]; decoding goes
//! through [`crate::schema::decode`], which rejects anything else.
//!
//! | Artifact | File | Producer |
//! |----------|------|----------|
//! | [`RepoGraph`] | `repo_graph.json` | ingest |
//! | [`ModuleMap`] | `module_map.json` | ingest |
//! | [`DependencyGraph`] | `dependency_graph.json` | ingest |
//! | [`InfraGraph`] | `infra_graph.json` | ingest |
//! | [`CiGraph`] | `ci_graph.json` | ingest |
//! | [`DecisionLog`] | `decision_log.json` | extract-decisions |
//! | [`ExecutionLog`] | `execution_log.json` | execution logger |
//! | [`EmbeddingFile`] | `embeddings/<corpus>_embeddings.json` | embed |

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// The single supported artifact schema version.
pub const SCHEMA_VERSION: &str = "1.0";

/// Module name used for files at the repository root.
pub const ROOT_MODULE: &str = "root";

/// An artifact stored as one JSON document under the memory root.
pub trait Artifact: Serialize + DeserializeOwned {
    /// File name relative to the memory root.
    const FILE_NAME: &'static str;
}

/// Top-level directory of a repository-relative path, or [`ROOT_MODULE`].
pub fn module_of(path: &str) -> &str {
    match path.split_once('/') {
        Some((head, _)) if !head.is_empty() => head,
        _ => ROOT_MODULE,
    }
}

// ============ Files and edges ============

/// Coarse classification of an indexed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Source,
    Config,
    Doc,
    Infra,
    Ci,
    Other,
}

impl FileType {
    pub const ALL: [FileType; 6] = [
        FileType::Source,
        FileType::Config,
        FileType::Doc,
        FileType::Infra,
        FileType::Ci,
        FileType::Other,
    ];

    /// Classify a repository-relative path by location and extension.
    pub fn classify(path: &str) -> FileType {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, e)| e.to_ascii_lowercase())
            .unwrap_or_default();
        let is_yaml = ext == "yml" || ext == "yaml";

        if (path.starts_with(".github/workflows/") && is_yaml) || file_name == ".gitlab-ci.yml" {
            return FileType::Ci;
        }

        let in_chart_dir = path
            .split('/')
            .any(|seg| seg == "helm" || seg == "charts");
        if matches!(ext.as_str(), "tf" | "tfvars" | "hcl" | "rego")
            || file_name == "Chart.yaml"
            || file_name == "Dockerfile"
            || (in_chart_dir && (is_yaml || ext == "tpl"))
        {
            return FileType::Infra;
        }

        match ext.as_str() {
            "py" | "sh" | "bash" | "rs" | "go" | "js" | "ts" | "java" | "rb" => FileType::Source,
            "yml" | "yaml" | "json" | "toml" | "ini" | "cfg" | "conf" => FileType::Config,
            "md" | "rst" | "txt" | "adoc" => FileType::Doc,
            _ => FileType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Source => "source",
            FileType::Config => "config",
            FileType::Doc => "doc",
            FileType::Infra => "infra",
            FileType::Ci => "ci",
            FileType::Other => "other",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown file type '{}'", s))
    }
}

/// A hashed, typed file in the ingestion snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub path: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub size_bytes: u64,
    pub hash: String,
}

/// Relation carried by a [`DependencyEdge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Imports,
    Calls,
    References,
    Configures,
    Deploys,
    Tests,
    Documents,
}

/// A resolved edge between two indexed files.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub relation: Relation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphMetrics {
    pub total_files: usize,
    pub total_edges: usize,
    pub files_by_type: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoGraph {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub nodes: Vec<FileNode>,
    pub edges: Vec<DependencyEdge>,
    pub metrics: GraphMetrics,
}

impl Artifact for RepoGraph {
    const FILE_NAME: &'static str = "repo_graph.json";
}

// ============ Modules and dependencies ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    SourcePackage,
    TerraformModule,
    HelmChart,
    PolicySet,
    CiWorkflow,
    Docs,
    Config,
    Other,
}

/// Files grouped by top-level directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    pub files: Vec<String>,
    #[serde(default)]
    pub exports: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleMap {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub modules: Vec<ModuleRecord>,
}

impl Artifact for ModuleMap {
    const FILE_NAME: &'static str = "module_map.json";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    DirectImport,
    TransitiveImport,
    TerraformModuleRef,
    HelmDependency,
    CiUsesScript,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dependency {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub kind: DependencyKind,
    pub depth: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub dependencies: Vec<Dependency>,
}

impl Artifact for DependencyGraph {
    const FILE_NAME: &'static str = "dependency_graph.json";
}

// ============ Infrastructure and CI ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfraResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfraModule {
    pub name: String,
    pub source: String,
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmChart {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerraformInventory {
    pub resources: Vec<InfraResource>,
    pub modules: Vec<InfraModule>,
    pub providers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HelmInventory {
    pub charts: Vec<HelmChart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraGraph {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub terraform: TerraformInventory,
    pub helm: HelmInventory,
}

impl Artifact for InfraGraph {
    const FILE_NAME: &'static str = "infra_graph.json";
}

/// One recorded CI failure for a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub name: String,
    pub path: String,
    pub triggers: Vec<String>,
    pub jobs: Vec<String>,
    pub depends_on_scripts: Vec<String>,
    #[serde(default)]
    pub permissions: BTreeMap<String, String>,
    /// Newest first.
    #[serde(default)]
    pub failure_history: Vec<FailureRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiGraph {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub workflows: Vec<WorkflowRecord>,
}

impl Artifact for CiGraph {
    const FILE_NAME: &'static str = "ci_graph.json";
}

// ============ Decisions ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionType {
    ArchDecision,
    SecurityBoundary,
    PerformanceConstraint,
    PrDecision,
    Adr,
}

impl DecisionType {
    pub const ALL: [DecisionType; 5] = [
        DecisionType::ArchDecision,
        DecisionType::SecurityBoundary,
        DecisionType::PerformanceConstraint,
        DecisionType::PrDecision,
        DecisionType::Adr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionType::ArchDecision => "ARCH_DECISION",
            DecisionType::SecurityBoundary => "SECURITY_BOUNDARY",
            DecisionType::PerformanceConstraint => "PERFORMANCE_CONSTRAINT",
            DecisionType::PrDecision => "PR_DECISION",
            DecisionType::Adr => "ADR",
        }
    }

    /// Prefix used in decision ids.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            DecisionType::ArchDecision => "ARCH",
            DecisionType::SecurityBoundary => "SEC",
            DecisionType::PerformanceConstraint => "PERF",
            DecisionType::PrDecision => "PR",
            DecisionType::Adr => "ADR",
        }
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        DecisionType::ALL
            .into_iter()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| format!("unknown decision type '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision_id: String,
    #[serde(rename = "type")]
    pub decision_type: DecisionType,
    pub context: String,
    /// `path:line`, a document path, or `pr/<number>`.
    pub source: String,
    #[serde(default)]
    pub related_files: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionLog {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub decisions: Vec<DecisionRecord>,
}

impl Artifact for DecisionLog {
    const FILE_NAME: &'static str = "decision_log.json";
}

// ============ Embeddings ============

/// One embedding category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corpus {
    File = 0,
    Doc = 1,
    Issue = 2,
    Pr = 3,
}

impl Corpus {
    pub const ALL: [Corpus; 4] = [Corpus::File, Corpus::Doc, Corpus::Issue, Corpus::Pr];

    pub fn as_str(&self) -> &'static str {
        match self {
            Corpus::File => "file",
            Corpus::Doc => "doc",
            Corpus::Issue => "issue",
            Corpus::Pr => "pr",
        }
    }

    /// File name under the `embeddings/` directory.
    pub fn file_name(&self) -> String {
        format!("{}_embeddings.json", self.as_str())
    }

    /// Whether record keys are repository paths (as opposed to `issue/N`, `pr/N`).
    pub fn is_path_keyed(&self) -> bool {
        matches!(self, Corpus::File | Corpus::Doc)
    }

    /// Stable slot index for per-corpus caches.
    pub fn slot(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Corpus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Corpus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Corpus::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown corpus '{}' (expected file, doc, issue, or pr)", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// File path, or `issue/<n>` / `pr/<n>` for the virtual corpora.
    pub key: String,
    pub hash: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub embedding: Vec<f32>,
    /// Source timestamp, when the source has one (issues and PRs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingFile {
    pub schema_version: String,
    pub corpus: Corpus,
    pub model_name: String,
    pub model_version: String,
    pub dims: usize,
    pub generated_at: DateTime<Utc>,
    pub embeddings: Vec<EmbeddingRecord>,
}

// ============ Execution history ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Agent {
    Alpha,
    Beta,
    Delta,
    Gamma,
    #[serde(rename = "ai_issue_solver")]
    AiIssueSolver,
    #[serde(rename = "ai_test_engineer")]
    AiTestEngineer,
    #[serde(rename = "ai_duplicate_detector")]
    AiDuplicateDetector,
}

impl Agent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Agent::Alpha => "Alpha",
            Agent::Beta => "Beta",
            Agent::Delta => "Delta",
            Agent::Gamma => "Gamma",
            Agent::AiIssueSolver => "ai_issue_solver",
            Agent::AiTestEngineer => "ai_test_engineer",
            Agent::AiDuplicateDetector => "ai_duplicate_detector",
        }
    }
}

impl FromStr for Agent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown agent '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    IssueLabeled,
    PrOpened,
    PrMerged,
    Schedule,
    WorkflowDispatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    LabelAdded,
    LabelRemoved,
    LabelSwap,
    CommentPosted,
    PrOpened,
    PrMerged,
    BranchCreated,
    CodeCommitted,
    IssueClosed,
    IssueAssigned,
    DuplicateMarked,
    NoOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Partial,
    Skipped,
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown outcome '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    Green,
    Red,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub event_type: EventType,
    pub source_ref: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub run_id: String,
    pub agent: Agent,
    pub trigger: Trigger,
    pub input_hash: String,
    pub retrieved_context_ids: Vec<String>,
    pub decision_summary: String,
    pub actions_taken: Vec<Action>,
    pub outcome: Outcome,
    pub ci_status: Option<CiStatus>,
    pub duration_ms: u64,
    pub confidence: f64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub context_retrieval_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub schema_version: String,
    /// Newest first.
    pub runs: Vec<ExecutionRecord>,
}

impl Artifact for ExecutionLog {
    const FILE_NAME: &'static str = "execution_log.json";
}

impl Default for ExecutionLog {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            runs: Vec::new(),
        }
    }
}
