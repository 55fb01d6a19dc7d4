//! Memory root statistics.
//!
//! A quick summary of what the memory holds: per-artifact size, record
//! count, and age. Used by `rmem stats` to confirm that ingest and embed
//! runs are landing where expected.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::Path;

use repo_memory_core::models::{
    Artifact, CiGraph, Corpus, DecisionLog, DependencyGraph, EmbeddingFile, ExecutionLog,
    InfraGraph, ModuleMap, RepoGraph,
};
use repo_memory_core::schema::Validate;

use crate::artifacts::{FsMemory, EMBEDDINGS_DIR};
use crate::config::Config;

/// One row of the artifact table.
struct ArtifactStats {
    name: String,
    size: Option<u64>,
    records: Result<Option<(usize, Option<DateTime<Utc>>)>, String>,
}

fn stat_artifact<T, F>(memory: &FsMemory, count: F) -> ArtifactStats
where
    T: Artifact + Validate,
    F: Fn(&T) -> (usize, Option<DateTime<Utc>>),
{
    let path = memory.artifact_path::<T>();
    ArtifactStats {
        name: T::FILE_NAME.to_string(),
        size: file_size(&path),
        records: memory
            .read::<T>()
            .map(|v| v.as_ref().map(&count))
            .map_err(|e| e.to_string()),
    }
}

fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}

pub fn run_stats(config: &Config) -> Result<()> {
    let memory = FsMemory::new(config.memory_root());

    let mut rows = vec![
        stat_artifact::<RepoGraph, _>(&memory, |g| (g.nodes.len(), Some(g.generated_at))),
        stat_artifact::<ModuleMap, _>(&memory, |m| (m.modules.len(), Some(m.generated_at))),
        stat_artifact::<DependencyGraph, _>(&memory, |d| {
            (d.dependencies.len(), Some(d.generated_at))
        }),
        stat_artifact::<InfraGraph, _>(&memory, |i| {
            (
                i.terraform.resources.len() + i.terraform.modules.len() + i.helm.charts.len(),
                Some(i.generated_at),
            )
        }),
        stat_artifact::<CiGraph, _>(&memory, |c| (c.workflows.len(), Some(c.generated_at))),
        stat_artifact::<DecisionLog, _>(&memory, |d| (d.decisions.len(), Some(d.generated_at))),
        stat_artifact::<ExecutionLog, _>(&memory, |e| {
            (e.runs.len(), e.runs.first().map(|r| r.timestamp))
        }),
    ];

    let mut models = Vec::new();
    for corpus in Corpus::ALL {
        let path = memory.embeddings_path(corpus);
        let records = memory
            .read_file::<EmbeddingFile>(&path)
            .map_err(|e| e.to_string())
            .map(|f| {
                f.map(|f| {
                    let keys = f
                        .embeddings
                        .iter()
                        .map(|r| r.key.as_str())
                        .collect::<std::collections::BTreeSet<_>>()
                        .len();
                    models.push(format!("{}: {}@{} ({} dims, {} keys)", corpus, f.model_name, f.model_version, f.dims, keys));
                    (f.embeddings.len(), Some(f.generated_at))
                })
            });
        rows.push(ArtifactStats {
            name: format!("{}/{}", EMBEDDINGS_DIR, corpus.file_name()),
            size: file_size(&path),
            records,
        });
    }

    let total: u64 = rows.iter().filter_map(|r| r.size).sum();

    println!("Repository Memory Stats");
    println!("=======================");
    println!();
    println!("  Repository:  {}", config.repo_root().display());
    println!("  Memory:      {}", config.memory_root().display());
    println!(
        "  Size:        {} of {}",
        format_bytes(total),
        format_bytes(config.limits.total_bytes)
    );
    println!();
    println!(
        "  {:<34} {:>10} {:>8}   {}",
        "ARTIFACT", "SIZE", "RECORDS", "UPDATED"
    );
    println!("  {}", "-".repeat(72));
    for r in &rows {
        let size = r.size.map(format_bytes).unwrap_or_else(|| "-".to_string());
        let (records, updated) = match &r.records {
            Ok(Some((n, ts))) => (
                n.to_string(),
                ts.map(format_ts_relative).unwrap_or_else(|| "never".to_string()),
            ),
            Ok(None) => ("-".to_string(), "missing".to_string()),
            Err(_) => ("?".to_string(), "invalid".to_string()),
        };
        println!("  {:<34} {:>10} {:>8}   {}", r.name, size, records, updated);
    }

    if !models.is_empty() {
        println!();
        println!("  Embedding models:");
        for m in &models {
            println!("    {}", m);
        }
    }

    let invalid: Vec<&ArtifactStats> = rows.iter().filter(|r| r.records.is_err()).collect();
    if !invalid.is_empty() {
        println!();
        for r in invalid {
            if let Err(e) = &r.records {
                println!("  ! {}", e);
            }
        }
        println!("  Run `rmem validate` for the full report.");
    }
    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: DateTime<Utc>) -> String {
    let delta = (Utc::now() - ts).num_seconds();

    if delta < 0 {
        return ts.format("%Y-%m-%d %H:%M").to_string();
    }
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        assert_eq!(format_ts_relative(Utc::now()), "just now");
        assert_eq!(format_ts_relative(Utc::now() - Duration::hours(1)), "1 hour ago");
        assert_eq!(format_ts_relative(Utc::now() - Duration::days(3)), "3 days ago");
    }
}
