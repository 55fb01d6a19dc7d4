//! Execution logger.
//!
//! Appends validated agent run records to `execution_log.json`, a bounded
//! newest-first ring buffer, and lists the recorded history.

use anyhow::{Context, Result};
use chrono::{SubsecRound, Utc};
use std::path::Path;
use uuid::Uuid;

use repo_memory_core::execution::{push_run, RunReport};
use repo_memory_core::models::{Agent, ExecutionLog, ExecutionRecord, Outcome};

use crate::artifacts::FsMemory;
use crate::config::Config;

/// Appends runs to one memory root's execution log.
pub struct ExecutionLogger {
    memory: FsMemory,
    cap: usize,
}

impl ExecutionLogger {
    pub fn new(memory: FsMemory, cap: usize) -> Self {
        Self { memory, cap }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            FsMemory::new(config.memory_root()),
            config.limits.max_execution_runs,
        )
    }

    /// Assign an id and timestamp to `report`, validate it, and append it.
    ///
    /// An invalid report is rejected and the log is left untouched.
    pub fn append(&self, report: RunReport) -> Result<ExecutionRecord> {
        let mut log = self.memory.load::<ExecutionLog>()?.unwrap_or_default();

        let run_id = format!("{}-{}", report.agent.as_str().to_lowercase(), Uuid::new_v4());
        let record = report.into_record(run_id, Utc::now().trunc_subsecs(0));
        push_run(&mut log, record.clone(), self.cap)
            .with_context(|| format!("Rejected run {}", record.run_id))?;

        self.memory.write(&log)?;
        tracing::info!(run_id = %record.run_id, outcome = ?record.outcome, runs = log.runs.len(), "run logged");
        Ok(record)
    }

    pub fn runs(&self) -> Result<Vec<ExecutionRecord>> {
        Ok(self
            .memory
            .load::<ExecutionLog>()?
            .map(|l| l.runs)
            .unwrap_or_default())
    }
}

/// Decode a run report; unknown enum values and missing fields are errors.
pub fn parse_report(bytes: &[u8]) -> Result<RunReport> {
    serde_json::from_slice(bytes).context("Invalid run record")
}

/// `rmem log-run --record FILE` (`-` reads stdin).
pub fn run_log_run(config: &Config, record: &Path) -> Result<()> {
    let bytes = if record == Path::new("-") {
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut std::io::stdin(), &mut buf)
            .context("Failed to read run record from stdin")?;
        buf
    } else {
        std::fs::read(record)
            .with_context(|| format!("Failed to read run record: {}", record.display()))?
    };
    let report = parse_report(&bytes)?;

    let logger = ExecutionLogger::from_config(config);
    let stored = logger.append(report)?;

    println!("log-run");
    println!("  run_id: {}", stored.run_id);
    println!("  outcome: {}", serde_json::to_string(&stored.outcome)?.trim_matches('"'));
    println!("ok");
    Ok(())
}

/// `rmem runs`: list recorded runs, newest first.
pub fn run_runs(
    config: &Config,
    agent: Option<Agent>,
    outcome: Option<Outcome>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let runs: Vec<ExecutionRecord> = ExecutionLogger::from_config(config)
        .runs()?
        .into_iter()
        .filter(|r| agent.map_or(true, |a| r.agent == a))
        .filter(|r| outcome.map_or(true, |o| r.outcome == o))
        .take(limit)
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    for r in &runs {
        println!(
            "{}  {}  {}  {:?}  confidence={:.2}  {}ms",
            r.timestamp.to_rfc3339(),
            r.run_id,
            r.agent.as_str(),
            r.outcome,
            r.confidence,
            r.duration_ms
        );
        if let Some(reason) = &r.failure_reason {
            println!("    failure: {}", reason);
        }
    }
    Ok(())
}
