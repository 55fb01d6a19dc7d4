//! # Repository Memory CLI (`rmem`)
//!
//! The `rmem` binary maintains a repository's memory root: it ingests the
//! repository structure, embeds files and tracker items, extracts
//! architectural decisions, logs agent runs, gates the result, and
//! assembles context bundles for agents.
//!
//! ## Usage
//!
//! ```bash
//! rmem --repo-root . <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rmem ingest` | Rebuild the structural artifacts |
//! | `rmem embed` | Refresh stale embeddings |
//! | `rmem extract-decisions` | Scan decision tags, ADRs, and a PR body |
//! | `rmem decisions` | Look up recorded decisions |
//! | `rmem log-run --record run.json` | Append an agent run |
//! | `rmem runs` | List recorded agent runs |
//! | `rmem record-failure <workflow> <reason>` | Record a CI failure |
//! | `rmem query "<task>"` | Assemble a context bundle |
//! | `rmem validate` | Run the validation gate |
//! | `rmem stats` | Summarize the memory root |
//!
//! ## Examples
//!
//! ```bash
//! # Full refresh after a merge
//! rmem ingest && rmem extract-decisions && rmem embed && rmem validate
//!
//! # Incremental embed on a PR
//! rmem embed --changed-files scripts/deploy.py docs/runbook.md
//!
//! # Fold a PR description into the decision log
//! rmem extract-decisions --pr-number 42 --pr-body-file body.md --pr-files terraform/main.tf
//!
//! # Context for a task, embedding the text with the configured provider
//! rmem query "rotate the deploy credentials" --embed --pretty
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use repo_memory::config;
use repo_memory::decisions::{self, PullRequestInput};
use repo_memory::progress::ProgressMode;
use repo_memory::query::QueryArgs;
use repo_memory::{embed_cmd, exec_log, ingest, query, stats, validate};
use repo_memory_core::decision::DecisionQuery;
use repo_memory_core::models::{Agent, Corpus, DecisionType, FileType, Outcome};

/// Repository memory: structural, semantic, and historical context for
/// automation agents.
///
/// Settings come from `--config`, else `./config/rmem.toml` when present,
/// else built-in defaults.
#[derive(Parser)]
#[command(
    name = "rmem",
    about = "Repository memory: structural, semantic, and historical context for automation agents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Repository root; overrides `paths.repo_root`.
    #[arg(long, global = true)]
    repo_root: Option<PathBuf>,

    /// Memory root; overrides `paths.memory_dir`. Relative paths resolve
    /// against the repository root.
    #[arg(long, global = true)]
    memory_dir: Option<PathBuf>,

    /// Log filter when `RMEM_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild repo, module, dependency, infra, and CI graphs.
    ///
    /// Recorded CI failure history is carried over for workflows that
    /// still exist.
    Ingest,

    /// Embed stale files, docs, issues, and pull requests.
    ///
    /// Only sources whose content hash changed (or that were never
    /// embedded) are sent to the provider.
    Embed {
        /// Files to re-embed regardless of their stored hash.
        #[arg(long, num_args = 1..)]
        changed_files: Vec<String>,

        /// JSON array of issues to embed.
        #[arg(long)]
        issues: Option<PathBuf>,

        /// JSON array of pull requests to embed.
        #[arg(long)]
        prs: Option<PathBuf>,

        /// Discard stored embeddings and rebuild every corpus.
        #[arg(long)]
        full: bool,

        /// Progress output on stderr. Defaults to `human` on a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Extract decisions from tags, ADRs, and optionally one PR body.
    ExtractDecisions {
        /// Pull request number the body belongs to.
        #[arg(long, requires = "pr_source")]
        pr_number: Option<u64>,

        /// PR body text.
        #[arg(long, group = "pr_source")]
        pr_body: Option<String>,

        /// File holding the PR body (`-` for stdin).
        #[arg(long, group = "pr_source")]
        pr_body_file: Option<PathBuf>,

        /// Files changed by the PR; attached to its decisions.
        #[arg(long, num_args = 1..)]
        pr_files: Vec<String>,
    },

    /// Look up recorded decisions, newest first.
    Decisions {
        /// Decision type (e.g. `ARCH_DECISION`, `ADR`).
        #[arg(long = "type")]
        decision_type: Option<DecisionType>,

        /// Top-level module the decision must touch.
        #[arg(long)]
        module: Option<String>,

        /// Only decisions on or after this date (YYYY-MM-DD or RFC 3339).
        #[arg(long)]
        since: Option<String>,

        /// Case-insensitive substring of the decision text.
        #[arg(long)]
        text: Option<String>,

        #[arg(long, default_value = "20")]
        limit: usize,

        /// Print JSON instead of a listing.
        #[arg(long)]
        json: bool,
    },

    /// Append an agent run to the execution log.
    LogRun {
        /// Run record JSON (`-` for stdin).
        #[arg(long)]
        record: PathBuf,
    },

    /// List recorded agent runs, newest first.
    Runs {
        #[arg(long)]
        agent: Option<Agent>,

        #[arg(long)]
        outcome: Option<Outcome>,

        #[arg(long, default_value = "20")]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// Record a CI failure against a workflow in the CI graph.
    RecordFailure {
        /// Workflow name or path.
        workflow: String,

        /// Failure reason.
        reason: String,

        #[arg(long)]
        run_id: Option<String>,

        #[arg(long)]
        job: Option<String>,
    },

    /// Assemble a context bundle for a task.
    #[command(alias = "retrieve")]
    Query {
        /// Task description.
        text: Option<String>,

        /// Query vector as a JSON array.
        #[arg(long)]
        vector_json: Option<String>,

        /// Embed the task text with the configured provider.
        #[arg(long)]
        embed: bool,

        /// Number of semantic hits.
        #[arg(long)]
        k: Option<usize>,

        /// Restrict to corpora (repeatable): file, doc, issue, pr.
        #[arg(long = "corpus")]
        corpora: Vec<Corpus>,

        /// Restrict file hits to a file type.
        #[arg(long = "type")]
        file_type: Option<FileType>,

        /// Restrict file hits to a path prefix.
        #[arg(long)]
        prefix: Option<String>,

        /// Rank by cosine similarity alone.
        #[arg(long)]
        raw: bool,

        #[arg(long)]
        pretty: bool,
    },

    /// Check the memory root; exits non-zero on any error.
    Validate,

    /// Summarize artifact sizes and record counts.
    Stats,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_env("RMEM_LOG")
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let cfg = config::resolve(cli.config.as_deref(), cli.repo_root, cli.memory_dir)?;

    match cli.command {
        Commands::Ingest => {
            ingest::run_ingest(&cfg)?;
        }
        Commands::Embed {
            changed_files,
            issues,
            prs,
            full,
            progress,
        } => {
            embed_cmd::run_embed(
                &cfg,
                &changed_files,
                issues.as_deref(),
                prs.as_deref(),
                full,
                progress.unwrap_or_else(ProgressMode::default_for_tty),
            )
            .await?;
        }
        Commands::ExtractDecisions {
            pr_number,
            pr_body,
            pr_body_file,
            pr_files,
        } => {
            let body = decisions::read_pr_body(pr_body, pr_body_file.as_deref())?;
            let pr = match (pr_number, body) {
                (Some(number), Some(body)) => Some(PullRequestInput {
                    number,
                    body,
                    files: pr_files,
                }),
                (None, Some(_)) => anyhow::bail!("a PR body requires --pr-number"),
                _ => None,
            };
            decisions::run_extract_decisions(&cfg, pr)?;
        }
        Commands::Decisions {
            decision_type,
            module,
            since,
            text,
            limit,
            json,
        } => {
            let query = DecisionQuery {
                decision_type,
                module,
                since: since.as_deref().map(decisions::parse_since).transpose()?,
                text,
                limit: Some(limit),
            };
            decisions::run_decisions(&cfg, &query, json)?;
        }
        Commands::LogRun { record } => {
            exec_log::run_log_run(&cfg, &record)?;
        }
        Commands::Runs {
            agent,
            outcome,
            limit,
            json,
        } => {
            exec_log::run_runs(&cfg, agent, outcome, limit, json)?;
        }
        Commands::RecordFailure {
            workflow,
            reason,
            run_id,
            job,
        } => {
            ingest::run_record_failure(&cfg, &workflow, &reason, run_id, job)?;
        }
        Commands::Query {
            text,
            vector_json,
            embed,
            k,
            corpora,
            file_type,
            prefix,
            raw,
            pretty,
        } => {
            let args = QueryArgs {
                text,
                vector_json,
                embed,
                k,
                corpora,
                file_type,
                prefix,
                raw,
                pretty,
            };
            query::run_query(&cfg, &args).await?;
        }
        Commands::Validate => {
            validate::run_validate(&cfg)?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg)?;
        }
    }

    Ok(())
}
