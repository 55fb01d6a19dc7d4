//! Memory retriever: composite-scored vector search plus structural,
//! decision, and failure lookups.
//!
//! A [`Retriever`] is bound to one [`MemorySource`] (one memory root) and
//! owns lazily-filled caches for every artifact it reads. Caches are never
//! shared between retrievers, so retrievers for different roots coexist
//! safely. All read paths take `&self`; a retriever can be shared between
//! threads.
//!
//! # Scoring
//!
//! ```text
//! composite = 0.6·semantic + 0.2·recency + 0.1·exec_success + 0.1·arch_relevance
//! ```
//!
//! 1. Pre-filter records by corpus, file type, path prefix, and date.
//! 2. Compute cosine similarity against the query vector.
//! 3. Add the history signals: recency decay (30-day half-life, 0.5 without
//!    a timestamp), execution success rate (0.5 without history), and
//!    architectural relevance (1.0 if a decision or run references the key).
//! 4. Sort by score descending. The sort is stable, so ties keep encounter
//!    order.
//! 5. Deduplicate by `(key, chunk_index)` and truncate to `k`.
//!
//! Missing or malformed artifacts never surface as errors here. They are
//! logged and treated as empty.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::decision::{filter_decisions, touches_module, DecisionQuery};
use crate::embedding::cosine_similarity;
use crate::execution::{context_id, context_key, SuccessWeights};
use crate::models::{
    module_of, CiGraph, Corpus, DecisionRecord, DecisionType, DependencyEdge, EmbeddingRecord,
    FileNode, FileType, ModuleMap, ModuleRecord, RepoGraph, SCHEMA_VERSION,
};
use crate::store::{MemoryResult, MemorySource};

/// Weights of the composite score. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub semantic: f64,
    pub recency: f64,
    pub exec_success: f64,
    pub arch_relevance: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            semantic: 0.6,
            recency: 0.2,
            exec_success: 0.1,
            arch_relevance: 0.1,
        }
    }
}

impl ScoreWeights {
    pub fn combine(&self, b: &ScoreBreakdown) -> f64 {
        self.semantic * b.semantic
            + self.recency * b.recency
            + self.exec_success * b.exec_success
            + self.arch_relevance * b.arch_relevance
    }

    pub fn total(&self) -> f64 {
        self.semantic + self.recency + self.exec_success + self.arch_relevance
    }
}

/// The individual signals behind a hit's score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub semantic: f64,
    pub recency: f64,
    pub exec_success: f64,
    pub arch_relevance: f64,
}

/// Exponential decay with the given half-life. Returns 0.5 without a
/// timestamp and 1.0 for timestamps in the future.
pub fn recency_weight(ts: Option<DateTime<Utc>>, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    let Some(ts) = ts else {
        return 0.5;
    };
    if half_life_days <= 0.0 {
        return 0.5;
    }
    let age_days = (now - ts).num_seconds() as f64 / 86_400.0;
    if age_days <= 0.0 {
        return 1.0;
    }
    (-std::f64::consts::LN_2 * age_days / half_life_days).exp()
}

/// Filters and shape of a single vector query.
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub k: usize,
    /// Corpora to search, in encounter order.
    pub corpora: Vec<Corpus>,
    /// Only path-keyed records whose path classifies as this type.
    pub file_type: Option<FileType>,
    pub path_prefix: Option<String>,
    /// Drops timestamped records older than this; undated records pass.
    pub since: Option<DateTime<Utc>>,
    /// Rank by composite score; otherwise by semantic similarity alone.
    pub composite: bool,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            k: 10,
            corpora: Corpus::ALL.to_vec(),
            file_type: None,
            path_prefix: None,
            since: None,
            composite: true,
        }
    }
}

/// One ranked chunk.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalHit {
    pub corpus: Corpus,
    pub key: String,
    /// Context id to report back in execution records.
    pub context_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Nodes, edges, and module records scoped to a set of modules.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StructuralContext {
    pub nodes: Vec<FileNode>,
    pub edges: Vec<DependencyEdge>,
    pub modules: Vec<ModuleRecord>,
}

/// A CI failure of a workflow touching the queried modules.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowFailure {
    pub workflow: String,
    pub path: String,
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BundleMeta {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    /// Task text the bundle was built for, when the caller supplied one.
    pub query: Option<String>,
    pub top_k_requested: usize,
    /// Whether a usable query vector drove the semantic section.
    pub query_vector: bool,
    pub touched_modules: Vec<String>,
    pub semantic_hits: usize,
}

/// Everything a caller needs to ground one task.
#[derive(Debug, Clone, Serialize)]
pub struct ContextBundle {
    pub semantic_context: Vec<RetrievalHit>,
    pub structural_context: StructuralContext,
    pub historical_decisions: Vec<DecisionRecord>,
    pub recent_failures: Vec<WorkflowFailure>,
    pub performance_signals: Vec<DecisionRecord>,
    #[serde(rename = "_meta")]
    pub meta: BundleMeta,
}

/// Retriever tuning, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RetrieverSettings {
    pub weights: ScoreWeights,
    pub half_life_days: f64,
    /// Modules used for structural and decision scoping without hits.
    pub default_modules: Vec<String>,
    pub max_touched_modules: usize,
    pub decision_limit: usize,
    pub failure_limit: usize,
    pub performance_limit: usize,
}

impl Default for RetrieverSettings {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            half_life_days: 30.0,
            default_modules: vec![
                "scripts".to_string(),
                "terraform".to_string(),
                "helm".to_string(),
            ],
            max_touched_modules: 5,
            decision_limit: 10,
            failure_limit: 5,
            performance_limit: 5,
        }
    }
}

struct Signals {
    success: SuccessWeights,
    arch_keys: HashSet<String>,
}

/// Read-only query engine over one memory root.
pub struct Retriever<S: MemorySource> {
    source: S,
    settings: RetrieverSettings,
    corpora: [OnceLock<Vec<EmbeddingRecord>>; 4],
    decisions: OnceLock<Vec<DecisionRecord>>,
    signals: OnceLock<Signals>,
    repo_graph: OnceLock<Option<RepoGraph>>,
    module_map: OnceLock<Option<ModuleMap>>,
    ci_graph: OnceLock<Option<CiGraph>>,
}

fn or_empty<T>(artifact: &str, result: MemoryResult<T>) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(artifact, error = %e, "memory artifact unavailable, treating as empty");
            None
        }
    }
}

impl<S: MemorySource> Retriever<S> {
    pub fn new(source: S, settings: RetrieverSettings) -> Self {
        Self {
            source,
            settings,
            corpora: Default::default(),
            decisions: OnceLock::new(),
            signals: OnceLock::new(),
            repo_graph: OnceLock::new(),
            module_map: OnceLock::new(),
            ci_graph: OnceLock::new(),
        }
    }

    pub fn settings(&self) -> &RetrieverSettings {
        &self.settings
    }

    fn corpus(&self, corpus: Corpus) -> &[EmbeddingRecord] {
        self.corpora[corpus.slot()].get_or_init(|| {
            or_empty(&corpus.file_name(), self.source.embeddings(corpus))
                .map(|f| f.embeddings)
                .unwrap_or_default()
        })
    }

    fn decisions(&self) -> &[DecisionRecord] {
        self.decisions.get_or_init(|| {
            or_empty("decision_log.json", self.source.decision_log())
                .map(|l| l.decisions)
                .unwrap_or_default()
        })
    }

    fn signals(&self) -> &Signals {
        self.signals.get_or_init(|| {
            let runs = or_empty("execution_log.json", self.source.execution_log())
                .map(|l| l.runs)
                .unwrap_or_default();
            let success = SuccessWeights::from_runs(&runs);

            let mut arch_keys: HashSet<String> = self
                .decisions()
                .iter()
                .flat_map(|d| d.related_files.iter().cloned())
                .collect();
            arch_keys.extend(
                runs.iter()
                    .flat_map(|r| r.retrieved_context_ids.iter())
                    .filter_map(|id| context_key(id)),
            );
            Signals { success, arch_keys }
        })
    }

    fn repo_graph(&self) -> Option<&RepoGraph> {
        self.repo_graph
            .get_or_init(|| or_empty("repo_graph.json", self.source.repo_graph()))
            .as_ref()
    }

    fn module_map(&self) -> Option<&ModuleMap> {
        self.module_map
            .get_or_init(|| or_empty("module_map.json", self.source.module_map()))
            .as_ref()
    }

    fn ci_graph(&self) -> Option<&CiGraph> {
        self.ci_graph
            .get_or_init(|| or_empty("ci_graph.json", self.source.ci_graph()))
            .as_ref()
    }

    /// Dimension of the first loaded corpus among `corpora` whose width
    /// differs from `dims`, if any.
    fn dims_mismatch(&self, corpora: &[Corpus], dims: usize) -> Option<(Corpus, usize)> {
        corpora.iter().find_map(|&c| {
            self.corpus(c)
                .first()
                .map(|r| r.embedding.len())
                .filter(|&d| d != dims)
                .map(|d| (c, d))
        })
    }

    /// Number of records loaded for `corpus`.
    pub fn corpus_len(&self, corpus: Corpus) -> usize {
        self.corpus(corpus).len()
    }

    fn score(&self, semantic: f64, rec: &EmbeddingRecord, now: DateTime<Utc>) -> ScoreBreakdown {
        let signals = self.signals();
        ScoreBreakdown {
            semantic,
            recency: recency_weight(rec.updated_at, now, self.settings.half_life_days),
            exec_success: signals.success.weight(&rec.key),
            arch_relevance: if signals.arch_keys.contains(&rec.key) {
                1.0
            } else {
                0.0
            },
        }
    }

    /// Rank chunks against `query` and return at most `opts.k` hits.
    pub fn top_k(
        &self,
        query: &[f32],
        opts: &RetrievalOptions,
        now: DateTime<Utc>,
    ) -> Vec<RetrievalHit> {
        if opts.k == 0 || query.is_empty() {
            return Vec::new();
        }

        let mut hits = Vec::new();
        let mut visited = HashSet::new();
        for &corpus in &opts.corpora {
            if !visited.insert(corpus) {
                continue;
            }
            for rec in self.corpus(corpus) {
                if rec.embedding.len() != query.len() || !passes_filters(corpus, rec, opts) {
                    continue;
                }
                let semantic = cosine_similarity(query, &rec.embedding);
                let breakdown = self.score(semantic, rec, now);
                let score = if opts.composite {
                    self.settings.weights.combine(&breakdown)
                } else {
                    semantic
                };
                hits.push(RetrievalHit {
                    corpus,
                    key: rec.key.clone(),
                    context_id: context_id(corpus, &rec.key),
                    chunk_index: rec.chunk_index,
                    total_chunks: rec.total_chunks,
                    score,
                    breakdown,
                });
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut seen = HashSet::new();
        hits.retain(|h| seen.insert((h.key.clone(), h.chunk_index)));
        hits.truncate(opts.k);
        hits
    }

    /// Keyword-style decision lookup. No vectors involved.
    pub fn search_decisions(&self, query: &DecisionQuery) -> Vec<DecisionRecord> {
        filter_decisions(self.decisions(), query)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Nodes inside `modules`, edges touching them, and their module records.
    pub fn structural_context(&self, modules: &[String]) -> StructuralContext {
        let wanted: HashSet<&str> = modules.iter().map(String::as_str).collect();
        let mut ctx = StructuralContext::default();

        if let Some(graph) = self.repo_graph() {
            ctx.nodes = graph
                .nodes
                .iter()
                .filter(|n| wanted.contains(module_of(&n.path)))
                .cloned()
                .collect();
            let paths: HashSet<&str> = ctx.nodes.iter().map(|n| n.path.as_str()).collect();
            ctx.edges = graph
                .edges
                .iter()
                .filter(|e| paths.contains(e.from.as_str()) || paths.contains(e.to.as_str()))
                .cloned()
                .collect();
        }
        if let Some(map) = self.module_map() {
            ctx.modules = map
                .modules
                .iter()
                .filter(|m| wanted.contains(m.name.as_str()))
                .cloned()
                .collect();
        }
        ctx
    }

    /// Newest failures of workflows whose scripts or own path fall inside
    /// `modules`.
    pub fn recent_failures(&self, modules: &[String], limit: usize) -> Vec<WorkflowFailure> {
        let Some(ci) = self.ci_graph() else {
            return Vec::new();
        };
        let wanted: HashSet<&str> = modules.iter().map(String::as_str).collect();

        let mut failures: Vec<WorkflowFailure> = ci
            .workflows
            .iter()
            .filter(|wf| {
                wanted.contains(module_of(&wf.path))
                    || wf
                        .depends_on_scripts
                        .iter()
                        .any(|s| wanted.contains(module_of(s)))
            })
            .flat_map(|wf| {
                wf.failure_history.iter().map(move |f| WorkflowFailure {
                    workflow: wf.name.clone(),
                    path: wf.path.clone(),
                    run_id: f.run_id.clone(),
                    job: f.job.clone(),
                    reason: f.reason.clone(),
                    timestamp: f.timestamp,
                })
            })
            .collect();

        failures.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        failures.truncate(limit);
        failures
    }

    /// Modules of the path-keyed hits, most frequent first.
    fn touched_modules(&self, hits: &[RetrievalHit]) -> Vec<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for h in hits.iter().filter(|h| h.corpus.is_path_keyed()) {
            *counts.entry(module_of(&h.key)).or_insert(0) += 1;
        }
        if counts.is_empty() {
            return self.settings.default_modules.clone();
        }
        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
            .into_iter()
            .take(self.settings.max_touched_modules)
            .map(|(m, _)| m.to_string())
            .collect()
    }

    /// Assemble the full context bundle for a query.
    ///
    /// Without a query vector the semantic section is empty and scoping
    /// falls back to the configured default modules. A vector whose width
    /// differs from the stored embeddings is treated as absent.
    pub fn build_context(
        &self,
        query_text: Option<&str>,
        query: Option<&[f32]>,
        opts: &RetrievalOptions,
        now: DateTime<Utc>,
    ) -> ContextBundle {
        let query = query.filter(|q| match self.dims_mismatch(&opts.corpora, q.len()) {
            Some((corpus, dims)) => {
                tracing::warn!(
                    %corpus,
                    expected = dims,
                    got = q.len(),
                    "query vector dimension mismatch, falling back to default modules"
                );
                false
            }
            None => true,
        });
        let semantic_context = query
            .map(|q| self.top_k(q, opts, now))
            .unwrap_or_default();
        let modules = self.touched_modules(&semantic_context);

        let limit = self.settings.decision_limit;
        let all = self.decisions();
        let mut historical_decisions: Vec<DecisionRecord> = all
            .iter()
            .filter(|d| modules.iter().any(|m| touches_module(d, m)))
            .take(limit)
            .cloned()
            .collect();
        if historical_decisions.is_empty() {
            historical_decisions = all.iter().take(limit).cloned().collect();
        }

        let performance_signals = self.search_decisions(&DecisionQuery {
            decision_type: Some(DecisionType::PerformanceConstraint),
            limit: Some(self.settings.performance_limit),
            ..Default::default()
        });

        ContextBundle {
            structural_context: self.structural_context(&modules),
            recent_failures: self.recent_failures(&modules, self.settings.failure_limit),
            historical_decisions,
            performance_signals,
            meta: BundleMeta {
                schema_version: SCHEMA_VERSION.to_string(),
                generated_at: now,
                query: query_text.map(str::to_string),
                top_k_requested: opts.k,
                query_vector: query.is_some(),
                touched_modules: modules,
                semantic_hits: semantic_context.len(),
            },
            semantic_context,
        }
    }
}

fn passes_filters(corpus: Corpus, rec: &EmbeddingRecord, opts: &RetrievalOptions) -> bool {
    if let Some(t) = opts.file_type {
        if !corpus.is_path_keyed() || FileType::classify(&rec.key) != t {
            return false;
        }
    }
    if let Some(prefix) = &opts.path_prefix {
        if !rec.key.starts_with(prefix.as_str()) {
            return false;
        }
    }
    if let (Some(since), Some(ts)) = (opts.since, rec.updated_at) {
        if ts < since {
            return false;
        }
    }
    true
}
