//! Incremental embedding pipeline.
//!
//! Each corpus is reconciled against its existing embedding artifact:
//! sources whose content hash is unchanged and whose record set is
//! complete are kept as-is, everything else is re-chunked and re-embedded.
//! A run that changes nothing reproduces the previous artifact byte for
//! byte, including its `generated_at`.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SubsecRound, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use repo_memory_core::chunk::{chunk_lines, content_hash};
use repo_memory_core::embedding::{quantize, EmbeddingProvider};
use repo_memory_core::models::{Corpus, EmbeddingFile, EmbeddingRecord, FileType, SCHEMA_VERSION};

use crate::artifacts::FsMemory;
use crate::config::Config;
use crate::embedding::create_provider;
use crate::progress::{EmbedProgressEvent, ProgressMode, ProgressReporter};
use crate::scan::{relative_path, scan_repository};

/// One unit of text to embed: a file, an issue, or a pull request.
#[derive(Debug, Clone)]
pub struct EmbedSource {
    pub key: String,
    pub hash: String,
    pub text: String,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Per-run knobs for [`embed_corpus`].
#[derive(Debug, Clone)]
pub struct EmbedOptions {
    /// Keys re-embedded even when their hash is unchanged.
    pub force: BTreeSet<String>,
    /// Discard the existing artifact and regenerate everything.
    pub full: bool,
    /// Drop records whose key is absent from the sources.
    pub prune_missing: bool,
    pub max_chars: usize,
    pub overlap_ratio: f64,
    pub precision: u32,
}

impl EmbedOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            force: BTreeSet::new(),
            full: false,
            prune_missing: true,
            max_chars: config.chunking.max_chars,
            overlap_ratio: config.chunking.overlap_ratio,
            precision: config.embedding.precision,
        }
    }
}

/// What one corpus reconciliation did.
#[derive(Debug, Clone)]
pub struct CorpusOutcome {
    pub file: EmbeddingFile,
    pub embedded: usize,
    pub unchanged: usize,
    pub pruned: usize,
    pub failed_chunks: usize,
    /// The model of the previous artifact differed and it was discarded.
    pub regenerated: bool,
}

fn is_complete(records: &[EmbeddingRecord], hash: &str) -> bool {
    let Some(first) = records.first() else {
        return false;
    };
    records.len() == first.total_chunks
        && records
            .iter()
            .enumerate()
            .all(|(i, r)| r.hash == hash && r.chunk_index == i && r.total_chunks == first.total_chunks)
}

/// Reconcile one corpus against `existing`.
///
/// Per-chunk embedding failures, absent vectors, and vectors of the wrong
/// dimension are logged and skipped; the affected source is left
/// incomplete and retried on the next run.
pub async fn embed_corpus(
    corpus: Corpus,
    existing: Option<EmbeddingFile>,
    sources: &[EmbedSource],
    provider: &dyn EmbeddingProvider,
    opts: &EmbedOptions,
    progress: &dyn ProgressReporter,
    now: DateTime<Utc>,
) -> Result<CorpusOutcome> {
    let dims = provider.dims();
    if dims == 0 {
        bail!("Embedding provider '{}' reports zero dimensions", provider.model_name());
    }

    let mut regenerated = false;
    let existing = match existing {
        Some(_) if opts.full => {
            tracing::info!(%corpus, "full rebuild requested, discarding existing embeddings");
            None
        }
        Some(file)
            if file.model_name != provider.model_name()
                || file.model_version != provider.model_version()
                || file.dims != dims =>
        {
            tracing::warn!(
                %corpus,
                found = %format!("{}@{}/{}", file.model_name, file.model_version, file.dims),
                expected = %format!("{}@{}/{}", provider.model_name(), provider.model_version(), dims),
                "embedding model changed, regenerating corpus"
            );
            regenerated = true;
            None
        }
        other => other,
    };

    let previous_generated_at = existing.as_ref().map(|f| f.generated_at);
    let previous_records: Vec<EmbeddingRecord> =
        existing.map(|f| f.embeddings).unwrap_or_default();

    let mut by_key: BTreeMap<String, Vec<EmbeddingRecord>> = BTreeMap::new();
    for rec in &previous_records {
        by_key.entry(rec.key.clone()).or_default().push(rec.clone());
    }
    for recs in by_key.values_mut() {
        recs.sort_by_key(|r| r.chunk_index);
    }

    let source_keys: BTreeSet<&str> = sources.iter().map(|s| s.key.as_str()).collect();
    let mut pruned = 0;
    if opts.prune_missing {
        by_key.retain(|key, _| {
            let keep = source_keys.contains(key.as_str());
            if !keep {
                tracing::debug!(%corpus, key = %key, "pruning embeddings of removed source");
                pruned += 1;
            }
            keep
        });
    }

    let stale: Vec<&EmbedSource> = sources
        .iter()
        .filter(|s| {
            opts.force.contains(&s.key)
                || !by_key
                    .get(&s.key)
                    .map(|recs| is_complete(recs, &s.hash))
                    .unwrap_or(false)
        })
        .collect();
    let stale_keys: BTreeSet<&str> = stale.iter().map(|s| s.key.as_str()).collect();
    progress.report(EmbedProgressEvent::Planned {
        corpus,
        stale: stale.len() as u64,
        total: sources.len() as u64,
    });

    // Unchanged sources may still carry a newer source timestamp.
    for source in sources.iter().filter(|s| !stale_keys.contains(s.key.as_str())) {
        if let Some(recs) = by_key.get_mut(&source.key) {
            for r in recs.iter_mut() {
                r.updated_at = source.updated_at;
            }
        }
    }

    let mut failed_chunks = 0;
    let mut embedded = 0;
    for (n, source) in stale.iter().enumerate() {
        let chunks = chunk_lines(&source.text, opts.max_chars, opts.overlap_ratio);
        let total_chunks = chunks.len();
        let mut records = Vec::with_capacity(total_chunks);

        for chunk in chunks {
            match provider.embed(&chunk.text).await {
                Ok(Some(vector)) if vector.len() == dims && vector.iter().all(|v| v.is_finite()) => {
                    records.push(EmbeddingRecord {
                        key: source.key.clone(),
                        hash: source.hash.clone(),
                        chunk_index: chunk.index,
                        total_chunks,
                        embedding: quantize(&vector, opts.precision),
                        updated_at: source.updated_at,
                    });
                }
                Ok(Some(vector)) => {
                    tracing::warn!(
                        key = %source.key,
                        chunk = chunk.index,
                        expected = dims,
                        found = vector.len(),
                        "embedding has wrong dimension or non-finite values, chunk skipped"
                    );
                    failed_chunks += 1;
                }
                Ok(None) => {
                    tracing::warn!(key = %source.key, chunk = chunk.index, "no embedding returned, chunk skipped");
                    failed_chunks += 1;
                }
                Err(e) => {
                    tracing::warn!(key = %source.key, chunk = chunk.index, error = %e, "embedding failed, chunk skipped");
                    failed_chunks += 1;
                }
            }
        }

        if records.is_empty() {
            by_key.remove(&source.key);
        } else {
            by_key.insert(source.key.clone(), records);
        }
        embedded += 1;
        progress.report(EmbedProgressEvent::Embedding {
            corpus,
            n: (n + 1) as u64,
            stale: stale.len() as u64,
        });
    }

    let embeddings: Vec<EmbeddingRecord> = by_key.into_values().flatten().collect();
    let generated_at = match previous_generated_at {
        Some(ts) if embeddings == previous_records => ts,
        _ => now,
    };

    Ok(CorpusOutcome {
        file: EmbeddingFile {
            schema_version: SCHEMA_VERSION.to_string(),
            corpus,
            model_name: provider.model_name().to_string(),
            model_version: provider.model_version().to_string(),
            dims,
            generated_at,
            embeddings,
        },
        embedded,
        unchanged: sources.len() - stale.len(),
        pruned,
        failed_chunks,
        regenerated,
    })
}

/// Current file and doc sources of the repository.
pub fn repository_sources(config: &Config) -> Result<(Vec<EmbedSource>, Vec<EmbedSource>)> {
    let mut files = Vec::new();
    let mut docs = Vec::new();
    for scanned in scan_repository(config)? {
        let text = match std::fs::read_to_string(&scanned.abs_path) {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!(path = %scanned.node.path, error = %e, "not embeddable text");
                continue;
            }
        };
        let source = EmbedSource {
            key: scanned.node.path,
            hash: scanned.node.hash,
            text,
            updated_at: None,
        };
        if scanned.node.file_type == FileType::Doc {
            docs.push(source);
        } else {
            files.push(source);
        }
    }
    Ok((files, docs))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Label {
    Name(String),
    Object { name: String },
}

/// An issue or pull request as exported from the hosting platform.
#[derive(Debug, Deserialize)]
pub struct TrackerItem {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    labels: Vec<Label>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TrackerItem {
    pub fn label_names(&self) -> Vec<&str> {
        self.labels
            .iter()
            .map(|l| match l {
                Label::Name(n) => n.as_str(),
                Label::Object { name } => name.as_str(),
            })
            .collect()
    }

    /// Title, blank line, body, then a labels line when there are labels.
    pub fn text(&self) -> String {
        let mut text = format!("{}\n\n{}", self.title, self.body.as_deref().unwrap_or(""));
        let labels = self.label_names();
        if !labels.is_empty() {
            text.push_str("\n\nLabels: ");
            text.push_str(&labels.join(", "));
        }
        text
    }

    pub fn into_source(self, corpus: Corpus) -> EmbedSource {
        let text = self.text();
        EmbedSource {
            key: format!("{}/{}", corpus, self.number),
            hash: content_hash(text.as_bytes()),
            text,
            updated_at: self.updated_at.map(|t| t.trunc_subsecs(0)),
        }
    }
}

pub fn load_tracker_items(path: &Path, corpus: Corpus) -> Result<Vec<EmbedSource>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} export: {}", corpus, path.display()))?;
    let items: Vec<TrackerItem> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {} export: {}", corpus, path.display()))?;
    let mut sources: Vec<EmbedSource> = items.into_iter().map(|i| i.into_source(corpus)).collect();
    sources.sort_by(|a, b| a.key.cmp(&b.key));
    sources.dedup_by(|a, b| a.key == b.key);
    Ok(sources)
}

/// Normalise `--changed-files` entries to repository-relative paths.
fn normalize_changed(config: &Config, changed: &[String]) -> BTreeSet<String> {
    let root = config
        .repo_root()
        .canonicalize()
        .unwrap_or_else(|_| config.repo_root().to_path_buf());
    changed
        .iter()
        .flat_map(|entry| entry.split_whitespace())
        .map(|entry| {
            let p = PathBuf::from(entry);
            if p.is_absolute() {
                relative_path(&root, &p)
            } else {
                entry.trim_start_matches("./").to_string()
            }
        })
        .filter(|p| !p.is_empty())
        .collect()
}

fn load_existing(memory: &FsMemory, corpus: Corpus) -> Option<EmbeddingFile> {
    match memory.load_embeddings(corpus) {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!(%corpus, error = %format!("{:#}", e), "existing embeddings unreadable, regenerating");
            None
        }
    }
}

pub async fn run_embed(
    config: &Config,
    changed_files: &[String],
    issues: Option<&Path>,
    prs: Option<&Path>,
    full: bool,
    progress: ProgressMode,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    let provider = create_provider(&config.embedding)?;
    let reporter = progress.reporter();
    let memory = FsMemory::new(config.memory_root());
    let now = Utc::now().trunc_subsecs(0);

    let mut opts = EmbedOptions::from_config(config);
    opts.full = full;
    opts.force = normalize_changed(config, changed_files);

    let (files, docs) = repository_sources(config)?;
    let mut plan: Vec<(Corpus, Vec<EmbedSource>, bool)> =
        vec![(Corpus::File, files, true), (Corpus::Doc, docs, true)];
    if let Some(path) = issues {
        plan.push((Corpus::Issue, load_tracker_items(path, Corpus::Issue)?, false));
    }
    if let Some(path) = prs {
        plan.push((Corpus::Pr, load_tracker_items(path, Corpus::Pr)?, false));
    }

    let mut outcomes = Vec::new();
    for (corpus, sources, prune_missing) in plan {
        let existing = load_existing(&memory, corpus);
        let corpus_opts = EmbedOptions {
            prune_missing,
            ..opts.clone()
        };
        let outcome = embed_corpus(
            corpus,
            existing,
            &sources,
            provider.as_ref(),
            &corpus_opts,
            reporter.as_ref(),
            now,
        )
        .await?;
        outcomes.push(outcome);
    }

    // Validate everything before writing anything.
    for outcome in &outcomes {
        repo_memory_core::schema::Validate::validate(&outcome.file).with_context(|| {
            format!(
                "Embedding produced an invalid {} artifact; nothing was written",
                outcome.file.corpus
            )
        })?;
    }
    for outcome in &outcomes {
        memory.write_embeddings(&outcome.file)?;
    }

    println!("embed ({}@{})", provider.model_name(), provider.model_version());
    for o in &outcomes {
        println!("  {}:", o.file.corpus);
        println!("    sources embedded: {}", o.embedded);
        println!("    sources unchanged: {}", o.unchanged);
        println!("    sources pruned: {}", o.pruned);
        println!("    records: {}", o.file.embeddings.len());
        if o.failed_chunks > 0 {
            println!("    failed chunks: {}", o.failed_chunks);
        }
        if o.regenerated {
            println!("    regenerated: model changed");
        }
    }
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        fail_on: Option<&'static str>,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on: None,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn model_name(&self) -> &str {
            "stub"
        }
        fn model_version(&self) -> &str {
            "1"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, text: &str) -> anyhow::Result<Option<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(marker) = self.fail_on {
                if text.contains(marker) {
                    anyhow::bail!("boom");
                }
            }
            Ok(Some(vec![text.len() as f32, 1.0 / 3.0, 0.5]))
        }
    }

    fn source(key: &str, text: &str) -> EmbedSource {
        EmbedSource {
            key: key.to_string(),
            hash: content_hash(text.as_bytes()),
            text: text.to_string(),
            updated_at: None,
        }
    }

    fn opts() -> EmbedOptions {
        EmbedOptions::from_config(&Config::default())
    }

    async fn run(
        provider: &CountingProvider,
        existing: Option<EmbeddingFile>,
        sources: &[EmbedSource],
        opts: &EmbedOptions,
    ) -> CorpusOutcome {
        embed_corpus(Corpus::File, existing, sources, provider, opts, &NoProgress, Utc::now().trunc_subsecs(0))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_unchanged_sources_are_not_reembedded() {
        let provider = CountingProvider::new();
        let sources = vec![source("a.py", "x = 1\n"), source("b.py", "y = 2\n")];
        let first = run(&provider, None, &sources, &opts()).await;
        assert_eq!(first.embedded, 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert!((first.file.embeddings[0].embedding[1] - 0.333333).abs() < 1e-6);

        let second = run(&provider, Some(first.file.clone()), &sources, &opts()).await;
        assert_eq!(second.embedded, 0);
        assert_eq!(second.unchanged, 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(second.file.generated_at, first.file.generated_at);
        assert_eq!(second.file.embeddings, first.file.embeddings);
    }

    #[tokio::test]
    async fn test_changed_hash_replaces_records_and_prunes_removed() {
        let provider = CountingProvider::new();
        let first = run(
            &provider,
            None,
            &[source("a.py", "x = 1\n"), source("gone.py", "z\n")],
            &opts(),
        )
        .await;

        let second = run(&provider, Some(first.file), &[source("a.py", "x = 2\n")], &opts()).await;
        assert_eq!(second.embedded, 1);
        assert_eq!(second.pruned, 1);
        assert_eq!(second.file.embeddings.len(), 1);
        assert_eq!(second.file.embeddings[0].hash, content_hash(b"x = 2\n"));
    }

    #[tokio::test]
    async fn test_forced_keys_reembed_identically() {
        let provider = CountingProvider::new();
        let sources = vec![source("a.py", "x = 1\n")];
        let first = run(&provider, None, &sources, &opts()).await;

        let mut forced = opts();
        forced.force.insert("a.py".to_string());
        let second = run(&provider, Some(first.file.clone()), &sources, &forced).await;
        assert_eq!(second.embedded, 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(second.file.generated_at, first.file.generated_at);
        assert_eq!(second.file.embeddings, first.file.embeddings);
    }

    #[tokio::test]
    async fn test_model_mismatch_regenerates() {
        let provider = CountingProvider::new();
        let sources = vec![source("a.py", "x = 1\n")];
        let mut first = run(&provider, None, &sources, &opts()).await.file;
        first.model_name = "other-model".to_string();

        let second = run(&provider, Some(first), &sources, &opts()).await;
        assert!(second.regenerated);
        assert_eq!(second.embedded, 1);
        assert_eq!(second.file.model_name, "stub");
    }

    #[tokio::test]
    async fn test_failed_chunk_is_skipped_and_retried() {
        let mut provider = CountingProvider::new();
        provider.fail_on = Some("bad");
        let mut small = opts();
        small.max_chars = 8;
        small.overlap_ratio = 0.0;
        let sources = vec![source("a.py", "good line\nbad line\n"), source("b.py", "ok\n")];

        let first = run(&provider, None, &sources, &small).await;
        assert_eq!(first.failed_chunks, 1);
        let a: Vec<&EmbeddingRecord> = first.file.embeddings.iter().filter(|r| r.key == "a.py").collect();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].total_chunks, 2);

        provider.fail_on = None;
        let second = run(&provider, Some(first.file), &sources, &small).await;
        assert_eq!(second.embedded, 1, "only the incomplete source is retried");
        assert_eq!(second.file.embeddings.len(), 3);
    }

    #[tokio::test]
    async fn test_tracker_items_keep_absent_keys() {
        let provider = CountingProvider::new();
        let mut keep = opts();
        keep.prune_missing = false;
        let first = embed_corpus(
            Corpus::Issue,
            None,
            &[source("issue/1", "one"), source("issue/2", "two")],
            &provider,
            &keep,
            &NoProgress,
            Utc::now(),
        )
        .await
        .unwrap();
        let second = embed_corpus(
            Corpus::Issue,
            Some(first.file),
            &[source("issue/2", "two")],
            &provider,
            &keep,
            &NoProgress,
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(second.file.embeddings.len(), 2);
    }

    #[test]
    fn test_tracker_item_text() {
        let json = r#"[{"number": 7, "title": "Flaky deploy", "body": "Retries fail", "labels": ["bug", {"name": "ci"}]}]"#;
        let items: Vec<TrackerItem> = serde_json::from_str(json).unwrap();
        assert_eq!(items[0].text(), "Flaky deploy\n\nRetries fail\n\nLabels: bug, ci");
        let src = items.into_iter().next().unwrap().into_source(Corpus::Pr);
        assert_eq!(src.key, "pr/7");
        assert_eq!(src.hash, content_hash(src.text.as_bytes()));
    }
}
