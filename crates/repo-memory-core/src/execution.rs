//! Execution history: bounded run log and success weighting.
//!
//! Runs are validated before they are appended, never coerced. The log is
//! a ring buffer held newest first; appending beyond the cap evicts the
//! oldest runs.
//!
//! Context ids referenced by runs have the form `<kind>:<ref>` with kind
//! one of `file`, `doc`, `issue`, `pr`, `decision`. [`context_key`] maps
//! them onto the keys used by embedding records so retrieval can look up
//! per-candidate history.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::chunk::content_hash;
use crate::models::{
    Action, Agent, CiStatus, Corpus, ExecutionLog, ExecutionRecord, Outcome, Trigger,
};
use crate::schema::{Validate, ValidationError};

/// Default ring buffer capacity.
pub const MAX_EXECUTION_RUNS: usize = 1000;
/// Context ids beyond this many are dropped on append.
pub const MAX_CONTEXT_IDS: usize = 50;
/// Longer summaries are rejected.
pub const MAX_SUMMARY_CHARS: usize = 500;
/// Longer failure reasons are truncated.
pub const MAX_FAILURE_REASON_CHARS: usize = 300;

/// Weight returned for a path with no recorded uses.
pub const NEUTRAL_PRIOR: f64 = 0.5;

/// A run as reported by an agent, before it receives an id and timestamp.
#[derive(Debug, Clone, Deserialize)]
pub struct RunReport {
    pub agent: Agent,
    pub trigger: Trigger,
    pub input_hash: String,
    #[serde(default)]
    pub retrieved_context_ids: Vec<String>,
    #[serde(default)]
    pub decision_summary: String,
    #[serde(default)]
    pub actions_taken: Vec<Action>,
    pub outcome: Outcome,
    #[serde(default)]
    pub ci_status: Option<CiStatus>,
    #[serde(default)]
    pub duration_ms: u64,
    pub confidence: f64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub context_retrieval_ms: u64,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl RunReport {
    /// Build the record that will be stored for this report.
    ///
    /// Context ids are capped, confidence is rounded to four places and
    /// failure reasons are truncated. Everything else is taken as-is and
    /// checked by [`Validate`].
    pub fn into_record(self, run_id: String, now: DateTime<Utc>) -> ExecutionRecord {
        let mut ids = self.retrieved_context_ids;
        ids.truncate(MAX_CONTEXT_IDS);
        let failure_reason = self
            .failure_reason
            .map(|r| r.chars().take(MAX_FAILURE_REASON_CHARS).collect());

        ExecutionRecord {
            run_id,
            agent: self.agent,
            trigger: self.trigger,
            input_hash: self.input_hash,
            retrieved_context_ids: ids,
            decision_summary: self.decision_summary,
            actions_taken: self.actions_taken,
            outcome: self.outcome,
            ci_status: self.ci_status,
            duration_ms: self.duration_ms,
            confidence: (self.confidence * 10_000.0).round() / 10_000.0,
            retry_count: self.retry_count,
            context_retrieval_ms: self.context_retrieval_ms,
            failure_reason,
            timestamp: now,
        }
    }
}

/// Hash an agent's input text into the `sha256:` form required by records.
pub fn make_input_hash(text: &str) -> String {
    content_hash(text.as_bytes())
}

/// Validate `record` and insert it at the head of `log`, evicting the
/// oldest runs beyond `cap`.
pub fn push_run(
    log: &mut ExecutionLog,
    record: ExecutionRecord,
    cap: usize,
) -> Result<(), ValidationError> {
    record.validate()?;
    if record.outcome == Outcome::Failure && record.failure_reason.is_none() {
        tracing::warn!(run_id = %record.run_id, "failure recorded without a failure_reason");
    }
    log.runs.insert(0, record);
    log.runs.truncate(cap.max(1));
    Ok(())
}

/// Map a context id onto an embedding key.
///
/// `file:a.py` → `a.py`, `doc:x.md` → `x.md`, `issue:12` → `issue/12`,
/// `pr:7` → `pr/7`. Decision ids and unknown kinds map to `None`.
pub fn context_key(id: &str) -> Option<String> {
    let (kind, reference) = id.split_once(':')?;
    if reference.is_empty() {
        return None;
    }
    match kind {
        "file" | "doc" => Some(reference.to_string()),
        "issue" | "pr" => Some(format!("{}/{}", kind, reference)),
        _ => None,
    }
}

/// Inverse of [`context_key`] for a record of `corpus`.
pub fn context_id(corpus: Corpus, key: &str) -> String {
    match corpus {
        Corpus::File | Corpus::Doc => format!("{}:{}", corpus, key),
        Corpus::Issue | Corpus::Pr => {
            let number = key.rsplit('/').next().unwrap_or(key);
            format!("{}:{}", corpus, number)
        }
    }
}

/// Per-key success rate over the execution history.
#[derive(Debug, Clone, Default)]
pub struct SuccessWeights {
    counts: HashMap<String, (u32, u32)>,
}

impl SuccessWeights {
    pub fn from_runs(runs: &[ExecutionRecord]) -> Self {
        let mut counts: HashMap<String, (u32, u32)> = HashMap::new();
        for run in runs {
            let success = run.outcome == Outcome::Success;
            let mut seen = std::collections::HashSet::new();
            for key in run.retrieved_context_ids.iter().filter_map(|id| context_key(id)) {
                if !seen.insert(key.clone()) {
                    continue;
                }
                let entry = counts.entry(key).or_insert((0, 0));
                entry.1 += 1;
                if success {
                    entry.0 += 1;
                }
            }
        }
        Self { counts }
    }

    /// successes / uses, or [`NEUTRAL_PRIOR`] with no recorded use.
    pub fn weight(&self, key: &str) -> f64 {
        match self.counts.get(key) {
            Some(&(successes, uses)) if uses > 0 => successes as f64 / uses as f64,
            _ => NEUTRAL_PRIOR,
        }
    }

    /// Keys referenced by at least one run.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.counts.keys().map(String::as_str)
    }
}
