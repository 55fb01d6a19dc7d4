//! Decision extraction and lookup.
//!
//! Decisions come from three places:
//!
//! - inline tags in comments: `# ARCH_DECISION: ...`, `// SECURITY_BOUNDARY: ...`,
//!   `<!-- PERFORMANCE_CONSTRAINT: ... -->`, located by `path:line`;
//! - ADR documents (`adr-001-*.md`, `ADR...`), located by path;
//! - PR bodies, located by `pr/<number>`. A bare `DECISION:` tag in a PR
//!   body is a `PR_DECISION`; the three inline tags keep their type.
//!
//! Every context string passes through [`redact`] before a record is built.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::models::{module_of, DecisionRecord, DecisionType};

/// Longest ADR context kept, in characters.
pub const MAX_ADR_CONTEXT_CHARS: usize = 500;

static SECRET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9+/=]{32,}").expect("valid secret pattern"));

static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:#|//|<!--|--|/\*)\s*(ARCH_DECISION|SECURITY_BOUNDARY|PERFORMANCE_CONSTRAINT)\s*:\s*(.+?)\s*(?:-->|\*/)?\s*$",
    )
    .expect("valid tag pattern")
});

static PR_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:[-*>]\s+)?(?:#+|//|<!--)?\s*(ARCH_DECISION|SECURITY_BOUNDARY|PERFORMANCE_CONSTRAINT|DECISION)\s*:\s*(.+?)\s*(?:-->)?\s*$",
    )
    .expect("valid PR tag pattern")
});

static ADR_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^adr[-_ ]?\d+").expect("valid ADR pattern"));

/// Replace every opaque token-like run of 32+ characters with `[REDACTED]`.
pub fn redact(text: &str) -> String {
    SECRET_RE.replace_all(text, "[REDACTED]").into_owned()
}

/// Deterministic id: `<PREFIX>-<first 8 hex of sha256("TYPE:locator:ordinal")>`.
pub fn decision_id(decision_type: DecisionType, locator: &str, ordinal: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", decision_type.as_str(), locator, ordinal).as_bytes());
    let digest = hex::encode_upper(hasher.finalize());
    format!("{}-{}", decision_type.id_prefix(), &digest[..8])
}

/// A decision found by a scan, before it receives an id.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionCandidate {
    pub decision_type: DecisionType,
    pub context: String,
    pub locator: String,
    pub related_files: Vec<String>,
    pub pr_number: Option<u64>,
}

fn parse_tag(raw: &str) -> Option<DecisionType> {
    match raw.to_ascii_uppercase().as_str() {
        "ARCH_DECISION" => Some(DecisionType::ArchDecision),
        "SECURITY_BOUNDARY" => Some(DecisionType::SecurityBoundary),
        "PERFORMANCE_CONSTRAINT" => Some(DecisionType::PerformanceConstraint),
        "DECISION" => Some(DecisionType::PrDecision),
        _ => None,
    }
}

/// Scan a file's lines for inline decision tags.
pub fn scan_tags(path: &str, content: &str) -> Vec<DecisionCandidate> {
    let mut found = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let Some(caps) = TAG_RE.captures(line) else {
            continue;
        };
        let Some(decision_type) = parse_tag(&caps[1]) else {
            continue;
        };
        let context = redact(caps[2].trim());
        if context.is_empty() {
            continue;
        }
        found.push(DecisionCandidate {
            decision_type,
            context,
            locator: format!("{}:{}", path, lineno + 1),
            related_files: vec![path.to_string()],
            pr_number: None,
        });
    }
    found
}

/// Whether `file_name` names an architecture decision record.
pub fn is_adr_name(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    if !lower.ends_with(".md") {
        return false;
    }
    ADR_NAME_RE.is_match(file_name) || file_name.starts_with("ADR")
}

/// Parse an ADR document into a single decision.
///
/// The context is the first prose paragraph after the title, collapsed to
/// one line and capped at [`MAX_ADR_CONTEXT_CHARS`]. Falls back to the
/// title when the document has no prose.
pub fn parse_adr(path: &str, content: &str) -> Option<DecisionCandidate> {
    let paragraphs: Vec<String> = content
        .split("\n\n")
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect();

    let title = paragraphs
        .iter()
        .find(|p| p.starts_with('#'))
        .map(|p| p.trim_start_matches('#').trim().to_string());

    let prose = paragraphs
        .iter()
        .skip(1)
        .find(|p| !p.starts_with('#'))
        .cloned()
        .or(title)?;

    let context: String = redact(&prose).chars().take(MAX_ADR_CONTEXT_CHARS).collect();
    if context.trim().is_empty() {
        return None;
    }

    Some(DecisionCandidate {
        decision_type: DecisionType::Adr,
        context,
        locator: path.to_string(),
        related_files: vec![path.to_string()],
        pr_number: None,
    })
}

/// Scan a PR body for decision tags.
pub fn scan_pr_body(number: u64, body: &str, related_files: &[String]) -> Vec<DecisionCandidate> {
    let locator = format!("pr/{}", number);
    body.lines()
        .filter_map(|line| {
            let caps = PR_TAG_RE.captures(line)?;
            let decision_type = parse_tag(&caps[1])?;
            let context = redact(caps[2].trim());
            if context.is_empty() {
                return None;
            }
            Some(DecisionCandidate {
                decision_type,
                context,
                locator: locator.clone(),
                related_files: related_files.to_vec(),
                pr_number: Some(number),
            })
        })
        .collect()
}

/// Assign ids and timestamps. The ordinal of a candidate is its position
/// among candidates sharing the same locator.
pub fn build_records(candidates: Vec<DecisionCandidate>, now: DateTime<Utc>) -> Vec<DecisionRecord> {
    let mut ordinals: HashMap<String, usize> = HashMap::new();
    candidates
        .into_iter()
        .map(|c| {
            let ordinal = ordinals.entry(c.locator.clone()).or_insert(0);
            let id = decision_id(c.decision_type, &c.locator, *ordinal);
            *ordinal += 1;
            DecisionRecord {
                decision_id: id,
                decision_type: c.decision_type,
                context: c.context,
                source: c.locator,
                related_files: c.related_files,
                timestamp: now,
                pr_number: c.pr_number,
            }
        })
        .collect()
}

fn is_pr_sourced(d: &DecisionRecord) -> bool {
    d.source.starts_with("pr/")
}

/// Merge a fresh extraction into the existing log.
///
/// Scanned (non-PR) decisions are fully replaced by `fresh`. Existing PR
/// decisions persist unless their PR appears in `refreshed_prs`. Ids that
/// survive keep their original timestamp. Exact-id duplicates collapse
/// with the fresh record winning. Output is sorted by timestamp
/// descending, then id.
pub fn merge_decisions(
    existing: &[DecisionRecord],
    fresh: Vec<DecisionRecord>,
    refreshed_prs: &[u64],
) -> Vec<DecisionRecord> {
    let prior: HashMap<&str, DateTime<Utc>> = existing
        .iter()
        .map(|d| (d.decision_id.as_str(), d.timestamp))
        .collect();

    let mut by_id: BTreeMap<String, DecisionRecord> = BTreeMap::new();
    for d in existing.iter().filter(|d| is_pr_sourced(d)) {
        let refreshed = d.pr_number.map(|n| refreshed_prs.contains(&n)).unwrap_or(false);
        if !refreshed {
            by_id.insert(d.decision_id.clone(), d.clone());
        }
    }
    for mut d in fresh {
        if let Some(ts) = prior.get(d.decision_id.as_str()) {
            d.timestamp = *ts;
        }
        by_id.insert(d.decision_id.clone(), d);
    }

    let mut merged: Vec<DecisionRecord> = by_id.into_values().collect();
    merged.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.decision_id.cmp(&b.decision_id))
    });
    merged
}

/// Filters for the keyword-style decision lookup.
#[derive(Debug, Clone, Default)]
pub struct DecisionQuery {
    pub decision_type: Option<DecisionType>,
    /// Top-level module the decision must touch.
    pub module: Option<String>,
    pub since: Option<DateTime<Utc>>,
    /// Case-insensitive substring of the context.
    pub text: Option<String>,
    pub limit: Option<usize>,
}

/// Whether a decision references a file inside `module`.
pub fn touches_module(d: &DecisionRecord, module: &str) -> bool {
    if d.related_files.iter().any(|f| module_of(f) == module) {
        return true;
    }
    if is_pr_sourced(d) {
        return false;
    }
    let path = d.source.split(':').next().unwrap_or(&d.source);
    module_of(path) == module
}

/// Apply `query` to `decisions`, preserving their order.
pub fn filter_decisions<'a>(
    decisions: &'a [DecisionRecord],
    query: &DecisionQuery,
) -> Vec<&'a DecisionRecord> {
    let needle = query.text.as_ref().map(|t| t.to_lowercase());
    let matches = decisions.iter().filter(|d| {
        query.decision_type.map_or(true, |t| d.decision_type == t)
            && query.module.as_deref().map_or(true, |m| touches_module(d, m))
            && query.since.map_or(true, |s| d.timestamp >= s)
            && needle
                .as_deref()
                .map_or(true, |n| d.context.to_lowercase().contains(n))
    });
    match query.limit {
        Some(limit) => matches.take(limit).collect(),
        None => matches.collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_scan_tags_comment_styles() {
        let content = "import os\n\
# ARCH_DECISION: Use Ray for distributed jobs\n\
x = 1  // security_boundary: no secrets in logs\n\
<!-- PERFORMANCE_CONSTRAINT: p99 under 200ms -->\n\
ARCH_DECISION: not in a comment\n";
        let found = scan_tags("scripts/a.py", content);
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].decision_type, DecisionType::ArchDecision);
        assert_eq!(found[0].context, "Use Ray for distributed jobs");
        assert_eq!(found[0].locator, "scripts/a.py:2");
        assert_eq!(found[1].decision_type, DecisionType::SecurityBoundary);
        assert_eq!(found[2].context, "p99 under 200ms");
    }

    #[test]
    fn test_redaction() {
        let secret = "ghp_".to_string() + &"A1b2C3d4".repeat(5);
        let line = format!("# SECURITY_BOUNDARY: token {} must rotate", secret);
        let found = scan_tags("a.sh", &line);
        assert_eq!(found.len(), 1);
        assert!(found[0].context.contains("[REDACTED]"));
        assert!(!found[0].context.contains("A1b2C3d4A1b2C3d4"));
    }

    #[test]
    fn test_decision_id_deterministic_and_distinct() {
        let a = decision_id(DecisionType::ArchDecision, "a.py:3", 0);
        let b = decision_id(DecisionType::ArchDecision, "a.py:3", 0);
        assert_eq!(a, b);
        assert!(a.starts_with("ARCH-"));
        assert_eq!(a.len(), "ARCH-".len() + 8);
        assert_ne!(a, decision_id(DecisionType::ArchDecision, "a.py:3", 1));
        assert_ne!(a, decision_id(DecisionType::ArchDecision, "a.py:4", 0));
        assert_ne!(
            &a[5..],
            &decision_id(DecisionType::SecurityBoundary, "a.py:3", 0)[4..]
        );
    }

    #[test]
    fn test_adr_detection_and_parse() {
        assert!(is_adr_name("adr-001-use-eks.md"));
        assert!(is_adr_name("ADR_12.md"));
        assert!(is_adr_name("ADR-logging.md"));
        assert!(!is_adr_name("adr-001.txt"));
        assert!(!is_adr_name("readme.md"));

        let doc = "# ADR 001: Use EKS\n\n## Status\n\nAccepted and\nreviewed.\n\nMore text.";
        let c = parse_adr("docs/adr/adr-001.md", doc).unwrap();
        assert_eq!(c.decision_type, DecisionType::Adr);
        assert_eq!(c.context, "Accepted and reviewed.");
        assert_eq!(c.locator, "docs/adr/adr-001.md");
    }

    #[test]
    fn test_pr_body_tags() {
        let body = "Summary\n\nDECISION: Pin provider versions\n- PERFORMANCE_CONSTRAINT: batch size 64\n";
        let found = scan_pr_body(42, body, &["terraform/main.tf".to_string()]);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].decision_type, DecisionType::PrDecision);
        assert_eq!(found[1].decision_type, DecisionType::PerformanceConstraint);
        assert_eq!(found[0].locator, "pr/42");
        assert_eq!(found[0].pr_number, Some(42));

        let records = build_records(found, Utc::now());
        assert_ne!(records[0].decision_id, records[1].decision_id);
        assert!(records[0].decision_id.starts_with("PR-"));
    }

    #[test]
    fn test_merge_keeps_pr_and_replaces_scanned() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        let old_scan = build_records(scan_tags("a.py", "# ARCH_DECISION: old"), t0);
        let pr = build_records(scan_pr_body(7, "DECISION: keep me", &[]), t0);
        let existing: Vec<DecisionRecord> = old_scan.iter().chain(pr.iter()).cloned().collect();

        let fresh = build_records(scan_tags("b.py", "# ARCH_DECISION: new"), t1);
        let merged = merge_decisions(&existing, fresh, &[]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].source, "b.py:1");
        assert_eq!(merged[1].source, "pr/7");

        // Re-extracting the same tag keeps its first-seen timestamp.
        let again = build_records(scan_tags("b.py", "# ARCH_DECISION: new"), t1 + chrono::Duration::days(3));
        let merged2 = merge_decisions(&merged, again, &[]);
        assert_eq!(merged2[0].timestamp, t1);
    }

    #[test]
    fn test_filter_decisions() {
        let now = Utc::now();
        let mut cands = scan_tags("terraform/main.tf", "# PERFORMANCE_CONSTRAINT: node pool max 10");
        cands.extend(scan_tags("scripts/x.py", "# ARCH_DECISION: queue via Redis"));
        let records = build_records(cands, now);

        let q = DecisionQuery {
            module: Some("terraform".into()),
            ..Default::default()
        };
        assert_eq!(filter_decisions(&records, &q).len(), 1);

        let q = DecisionQuery {
            text: Some("REDIS".into()),
            ..Default::default()
        };
        assert_eq!(filter_decisions(&records, &q)[0].source, "scripts/x.py:1");

        let q = DecisionQuery {
            decision_type: Some(DecisionType::Adr),
            ..Default::default()
        };
        assert!(filter_decisions(&records, &q).is_empty());
    }
}
