//! Decision extraction and lookup commands.
//!
//! `rmem extract-decisions` rescans the repository for inline decision
//! tags and ADR documents, optionally folds in one PR body, and merges the
//! result into `decision_log.json`. `rmem decisions` is a keyword-style
//! lookup over the stored log.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use std::path::Path;

use repo_memory_core::decision::{
    build_records, is_adr_name, merge_decisions, parse_adr, scan_pr_body, scan_tags,
    DecisionCandidate, DecisionQuery,
};
use repo_memory_core::models::{DecisionLog, DecisionType, SCHEMA_VERSION};
use repo_memory_core::search::Retriever;

use crate::artifacts::FsMemory;
use crate::config::Config;
use crate::scan::scan_repository;

/// A PR body to fold into the decision log.
#[derive(Debug, Clone)]
pub struct PullRequestInput {
    pub number: u64,
    pub body: String,
    pub files: Vec<String>,
}

/// Scan every indexed text file for tags and ADRs.
pub fn scan_repository_decisions(config: &Config) -> Result<Vec<DecisionCandidate>> {
    let mut candidates = Vec::new();
    for file in scan_repository(config)? {
        let Ok(content) = std::fs::read_to_string(&file.abs_path) else {
            continue;
        };
        let path = file.node.path.as_str();
        let file_name = path.rsplit('/').next().unwrap_or(path);
        if is_adr_name(file_name) {
            if let Some(adr) = parse_adr(path, &content) {
                candidates.push(adr);
            }
        }
        candidates.extend(scan_tags(path, &content));
    }
    Ok(candidates)
}

/// Merge a fresh extraction into `existing`.
///
/// `generated_at` is kept when the merged decisions equal the stored ones.
pub fn extract_into(
    existing: Option<DecisionLog>,
    mut candidates: Vec<DecisionCandidate>,
    pr: Option<&PullRequestInput>,
    now: DateTime<Utc>,
) -> DecisionLog {
    let mut refreshed = Vec::new();
    if let Some(pr) = pr {
        candidates.extend(scan_pr_body(pr.number, &pr.body, &pr.files));
        refreshed.push(pr.number);
    }
    let fresh = build_records(candidates, now);

    let (previous, previous_at) = match existing {
        Some(log) => (log.decisions, Some(log.generated_at)),
        None => (Vec::new(), None),
    };
    let decisions = merge_decisions(&previous, fresh, &refreshed);
    let generated_at = match previous_at {
        Some(ts) if decisions == previous => ts,
        _ => now,
    };

    DecisionLog {
        schema_version: SCHEMA_VERSION.to_string(),
        generated_at,
        decisions,
    }
}

pub fn run_extract_decisions(config: &Config, pr: Option<PullRequestInput>) -> Result<()> {
    let memory = FsMemory::new(config.memory_root());
    let existing = memory.load::<DecisionLog>()?;
    let before = existing.as_ref().map(|l| l.decisions.len()).unwrap_or(0);

    let candidates = scan_repository_decisions(config)?;
    let scanned = candidates.len();
    let log = extract_into(existing, candidates, pr.as_ref(), Utc::now().trunc_subsecs(0));
    memory.write(&log)?;

    println!("extract-decisions");
    println!("  scanned decisions: {}", scanned);
    if let Some(pr) = &pr {
        let from_pr = log
            .decisions
            .iter()
            .filter(|d| d.pr_number == Some(pr.number))
            .count();
        println!("  pr/{} decisions: {}", pr.number, from_pr);
    }
    println!("  total: {} (was {})", log.decisions.len(), before);
    for t in DecisionType::ALL {
        let n = log.decisions.iter().filter(|d| d.decision_type == t).count();
        if n > 0 {
            println!("    {}: {}", t, n);
        }
    }
    println!("ok");
    Ok(())
}

/// Read a PR body from `--pr-body` or `--pr-body-file` (`-` for stdin).
pub fn read_pr_body(inline: Option<String>, file: Option<&Path>) -> Result<Option<String>> {
    match (inline, file) {
        (Some(_), Some(_)) => bail!("--pr-body and --pr-body-file are mutually exclusive"),
        (Some(body), None) => Ok(Some(body)),
        (None, Some(path)) if path == Path::new("-") => {
            let mut body = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut body)
                .context("Failed to read PR body from stdin")?;
            Ok(Some(body))
        }
        (None, Some(path)) => Ok(Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read PR body: {}", path.display()))?,
        )),
        (None, None) => Ok(None),
    }
}

/// Parse `YYYY-MM-DD` or an RFC 3339 timestamp.
pub fn parse_since(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}': expected YYYY-MM-DD or RFC 3339", s))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow::anyhow!("Invalid date '{}'", s))?;
    Ok(midnight.and_utc())
}

pub fn run_decisions(config: &Config, query: &DecisionQuery, json: bool) -> Result<()> {
    let retriever = Retriever::new(
        FsMemory::new(config.memory_root()),
        config.retrieval.settings(),
    );
    let found = retriever.search_decisions(query);

    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
        return Ok(());
    }

    if found.is_empty() {
        println!("No decisions found.");
        return Ok(());
    }
    for d in &found {
        println!(
            "{}  {}  {}  {}",
            d.decision_id,
            d.decision_type,
            d.timestamp.format("%Y-%m-%d"),
            d.source
        );
        println!("    {}", d.context);
    }
    println!();
    println!("{} decision(s)", found.len());
    Ok(())
}
