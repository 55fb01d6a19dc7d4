//! Embedding progress reporting.
//!
//! Reports observable progress during `rmem embed` so users see which
//! corpus is being processed and how many sources are left. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use repo_memory_core::models::Corpus;

/// A single progress event for an embedding run.
#[derive(Clone, Debug)]
pub enum EmbedProgressEvent {
    /// Corpus plan computed: `stale` of `total` sources need embedding.
    Planned {
        corpus: Corpus,
        stale: u64,
        total: u64,
    },
    /// `n` of `stale` sources embedded so far.
    Embedding { corpus: Corpus, n: u64, stale: u64 },
}

/// Reports embed progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the embedding pipeline.
    fn report(&self, event: EmbedProgressEvent);
}

/// Human-friendly progress on stderr: "embed file  embedding  12 / 340 sources".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: EmbedProgressEvent) {
        let line = match &event {
            EmbedProgressEvent::Planned {
                corpus,
                stale,
                total,
            } => format!(
                "embed {}  {} of {} sources stale\n",
                corpus,
                format_number(*stale),
                format_number(*total)
            ),
            EmbedProgressEvent::Embedding { corpus, n, stale } => format!(
                "embed {}  embedding  {} / {} sources\n",
                corpus,
                format_number(*n),
                format_number(*stale)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: EmbedProgressEvent) {
        let obj = match &event {
            EmbedProgressEvent::Planned {
                corpus,
                stale,
                total,
            } => serde_json::json!({
                "event": "progress",
                "corpus": corpus,
                "phase": "planned",
                "stale": stale,
                "total": total
            }),
            EmbedProgressEvent::Embedding { corpus, n, stale } => serde_json::json!({
                "event": "progress",
                "corpus": corpus,
                "phase": "embedding",
                "n": n,
                "total": stale
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: EmbedProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
