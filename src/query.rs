//! `rmem query`: assemble a context bundle for a task.
//!
//! The query vector comes from `--vector-json`, from the configured
//! provider (`--embed`), or is absent, in which case the bundle carries
//! structural and historical context for the default modules only.

use anyhow::{bail, Context, Result};
use chrono::Utc;

use repo_memory_core::models::{Corpus, FileType};
use repo_memory_core::search::{RetrievalOptions, Retriever};

use crate::artifacts::FsMemory;
use crate::config::Config;
use crate::embedding::create_provider;

/// Command-line shape of a query.
#[derive(Debug, Clone, Default)]
pub struct QueryArgs {
    pub text: Option<String>,
    pub vector_json: Option<String>,
    pub embed: bool,
    pub k: Option<usize>,
    pub corpora: Vec<Corpus>,
    pub file_type: Option<FileType>,
    pub prefix: Option<String>,
    /// Rank by cosine similarity alone.
    pub raw: bool,
    pub pretty: bool,
}

/// Parse a JSON array of numbers into a query vector.
pub fn parse_vector(json: &str) -> Result<Vec<f32>> {
    let values: Vec<f64> =
        serde_json::from_str(json).context("--vector-json must be a JSON array of numbers")?;
    if values.is_empty() {
        bail!("--vector-json must not be empty");
    }
    Ok(values.into_iter().map(|v| v as f32).collect())
}

async fn query_vector(config: &Config, args: &QueryArgs) -> Result<Option<Vec<f32>>> {
    match (&args.vector_json, args.embed) {
        (Some(_), true) => bail!("--vector-json and --embed are mutually exclusive"),
        (Some(json), false) => Ok(Some(parse_vector(json)?)),
        (None, true) => {
            let Some(text) = args.text.as_deref().filter(|t| !t.trim().is_empty()) else {
                bail!("--embed requires query text");
            };
            if !config.embedding.is_enabled() {
                bail!("Embedding provider is disabled. Set [embedding] provider in config.");
            }
            let provider = create_provider(&config.embedding)?;
            let vector = provider.embed(text).await?;
            if vector.is_none() {
                tracing::warn!("provider returned no vector for the query; semantic context omitted");
            }
            Ok(vector)
        }
        (None, false) => Ok(None),
    }
}

pub async fn run_query(config: &Config, args: &QueryArgs) -> Result<()> {
    let vector = query_vector(config, args).await?;

    let opts = RetrievalOptions {
        k: args.k.unwrap_or(config.retrieval.top_k),
        corpora: if args.corpora.is_empty() {
            Corpus::ALL.to_vec()
        } else {
            args.corpora.clone()
        },
        file_type: args.file_type,
        path_prefix: args.prefix.clone(),
        since: None,
        composite: !args.raw,
    };

    let retriever = Retriever::new(
        FsMemory::new(config.memory_root()),
        config.retrieval.settings(),
    );
    let bundle = retriever.build_context(args.text.as_deref(), vector.as_deref(), &opts, Utc::now());
    tracing::debug!(
        hits = bundle.semantic_context.len(),
        decisions = bundle.historical_decisions.len(),
        failures = bundle.recent_failures.len(),
        "context assembled"
    );

    let out = if args.pretty {
        serde_json::to_string_pretty(&bundle)?
    } else {
        serde_json::to_string(&bundle)?
    };
    println!("{}", out);
    Ok(())
}
