//! Infrastructure and CI metadata scanners.
//!
//! [`LineScanner`] extracts Terraform declarations, Helm chart metadata,
//! and GitHub Actions workflow structure with targeted regex and line
//! scanning rather than full HCL/YAML grammars.
//!
//! # Limitations
//!
//! The line scanner only recognises conventionally formatted files:
//! declarations must start at column 0 (`resource "type" "name" {`), a
//! module's `source` must appear inside its block, workflow jobs must be
//! indented by exactly two spaces, and flow-style YAML beyond a single-line
//! `on: [a, b]` list is not understood. Anything else is silently missed.
//! Callers depend only on [`InfraScanner`], so a grammar-based scanner can
//! replace this one without touching them.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

use repo_memory_core::models::{HelmChart, InfraModule, InfraResource, TerraformInventory, WorkflowRecord};

/// Extraction of infrastructure and CI declarations from file contents.
pub trait InfraScanner: Send + Sync {
    /// Append the Terraform resources, modules, and providers of one file.
    fn scan_terraform(&self, path: &str, content: &str, out: &mut TerraformInventory);
    /// Names of `output` blocks in a Terraform file.
    fn terraform_outputs(&self, content: &str) -> Vec<String>;
    /// Parse a `Chart.yaml`.
    fn scan_helm_chart(&self, path: &str, content: &str) -> Option<HelmChart>;
    /// Parse a workflow definition. The failure history is left empty.
    fn scan_workflow(&self, path: &str, content: &str) -> Option<WorkflowRecord>;
}

static TF_RESOURCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^resource\s+"([^"]+)"\s+"([^"]+)""#).expect("valid regex"));
static TF_MODULE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?ms)^module\s+"([^"]+)"\s*\{.*?^\s*source\s*=\s*"([^"]+)""#).expect("valid regex")
});
static TF_PROVIDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^provider\s+"([^"]+)""#).expect("valid regex"));
static TF_OUTPUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^output\s+"([^"]+)""#).expect("valid regex"));

static YAML_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9_-]+):\s*(.*)$").expect("valid regex"));
static JOB_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^  ([A-Za-z0-9_-]+):\s*$").expect("valid regex"));
static NESTED_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^  ([A-Za-z0-9_-]+):\s*(.*)$").expect("valid regex"));
static SCRIPT_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:^|[\s"'=])((?:\./)?[A-Za-z0-9_][A-Za-z0-9_./-]*\.(?:py|sh))\b"#)
        .expect("valid regex")
});
static CHART_DEP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*-\s*name:\s*(\S+)").expect("valid regex"));

/// Regex/line-scan implementation of [`InfraScanner`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LineScanner;

fn unquote(s: &str) -> String {
    s.trim().trim_matches(|c| c == '"' || c == '\'').trim().to_string()
}

fn is_top_level(line: &str) -> bool {
    !line.is_empty() && !line.starts_with([' ', '\t', '#'])
}

impl InfraScanner for LineScanner {
    fn scan_terraform(&self, path: &str, content: &str, out: &mut TerraformInventory) {
        for caps in TF_RESOURCE.captures_iter(content) {
            out.resources.push(InfraResource {
                resource_type: caps[1].to_string(),
                name: caps[2].to_string(),
                file: path.to_string(),
            });
        }
        for caps in TF_MODULE.captures_iter(content) {
            out.modules.push(InfraModule {
                name: caps[1].to_string(),
                source: caps[2].to_string(),
                file: path.to_string(),
            });
        }
        for caps in TF_PROVIDER.captures_iter(content) {
            let provider = caps[1].to_string();
            if !out.providers.contains(&provider) {
                out.providers.push(provider);
            }
        }
    }

    fn terraform_outputs(&self, content: &str) -> Vec<String> {
        TF_OUTPUT
            .captures_iter(content)
            .map(|c| c[1].to_string())
            .collect()
    }

    fn scan_helm_chart(&self, path: &str, content: &str) -> Option<HelmChart> {
        let mut name = None;
        let mut version = None;
        let mut dependencies = Vec::new();
        let mut in_deps = false;

        for line in content.lines() {
            if is_top_level(line) {
                in_deps = false;
                if let Some(caps) = YAML_KEY.captures(line) {
                    match &caps[1] {
                        "name" => name = Some(unquote(&caps[2])),
                        "version" => version = Some(unquote(&caps[2])),
                        "dependencies" => in_deps = true,
                        _ => {}
                    }
                }
            } else if in_deps {
                if let Some(caps) = CHART_DEP.captures(line) {
                    dependencies.push(unquote(&caps[1]));
                }
            }
        }

        let Some(name) = name.filter(|n| !n.trim().is_empty()) else {
            tracing::warn!(path, "Chart.yaml has no usable name, skipping chart");
            return None;
        };
        let chart_dir = path.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
        Some(HelmChart {
            name,
            path: chart_dir.to_string(),
            version: version.filter(|v| !v.is_empty()),
            dependencies,
        })
    }

    fn scan_workflow(&self, path: &str, content: &str) -> Option<WorkflowRecord> {
        #[derive(PartialEq)]
        enum Block {
            None,
            On,
            Jobs,
            Permissions,
        }

        let mut name = None;
        let mut triggers = Vec::new();
        let mut jobs = Vec::new();
        let mut permissions = BTreeMap::new();
        let mut scripts = BTreeSet::new();
        let mut block = Block::None;

        for line in content.lines() {
            for caps in SCRIPT_REF.captures_iter(line) {
                let script = caps[1].trim_start_matches("./").to_string();
                scripts.insert(script);
            }

            if is_top_level(line) {
                block = Block::None;
                let Some(caps) = YAML_KEY.captures(line) else {
                    continue;
                };
                let rest = caps[2].trim();
                match &caps[1] {
                    "name" => name = Some(unquote(rest)),
                    // YAML 1.1 parsers read a bare `on` key as boolean true.
                    "on" | "true" => {
                        if rest.is_empty() {
                            block = Block::On;
                        } else {
                            triggers.extend(
                                rest.trim_matches(|c| c == '[' || c == ']')
                                    .split(',')
                                    .map(unquote)
                                    .filter(|t| !t.is_empty()),
                            );
                        }
                    }
                    "jobs" => block = Block::Jobs,
                    "permissions" => {
                        if rest.is_empty() {
                            block = Block::Permissions;
                        } else {
                            permissions.insert("*".to_string(), unquote(rest));
                        }
                    }
                    _ => {}
                }
                continue;
            }

            match block {
                Block::On => {
                    if let Some(caps) = NESTED_KEY.captures(line) {
                        triggers.push(caps[1].to_string());
                    }
                }
                Block::Jobs => {
                    if let Some(caps) = JOB_KEY.captures(line) {
                        jobs.push(caps[1].to_string());
                    }
                }
                Block::Permissions => {
                    if let Some(caps) = NESTED_KEY.captures(line) {
                        permissions.insert(caps[1].to_string(), unquote(&caps[2]));
                    }
                }
                Block::None => {}
            }
        }

        if triggers.is_empty() && jobs.is_empty() {
            return None;
        }

        let stem = path
            .rsplit('/')
            .next()
            .and_then(|f| f.split('.').next())
            .unwrap_or(path)
            .trim();
        let name = match name.filter(|n| !n.trim().is_empty()) {
            Some(n) => n,
            None if !stem.is_empty() => stem.to_string(),
            None => {
                tracing::warn!(path, "workflow has no usable name, skipping file");
                return None;
            }
        };
        Some(WorkflowRecord {
            name,
            path: path.to_string(),
            triggers,
            jobs,
            depends_on_scripts: scripts.into_iter().collect(),
            permissions,
            failure_history: Vec::new(),
        })
    }
}
