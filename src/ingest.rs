//! Structural ingestion.
//!
//! Walks the repository and produces the five structural artifacts:
//! repo graph, module map, dependency graph, infra graph, and CI graph.
//! All five are built and validated in memory before any is written, so a
//! failed run never leaves a mixed snapshot behind.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SubsecRound, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use repo_memory_core::models::{
    module_of, CiGraph, Dependency, DependencyEdge, DependencyGraph, DependencyKind, FailureRecord,
    FileType, GraphMetrics, HelmInventory, InfraGraph, ModuleMap, ModuleRecord, ModuleType,
    Relation, RepoGraph, TerraformInventory, WorkflowRecord, ROOT_MODULE, SCHEMA_VERSION,
};
use repo_memory_core::schema::Validate;

use crate::artifacts::FsMemory;
use crate::config::Config;
use crate::infra::{InfraScanner, LineScanner};
use crate::scan::{scan_repository, ScannedFile};

/// Transitive imports are followed at most this many hops.
const MAX_IMPORT_DEPTH: u32 = 5;
/// Exported symbol names kept per module.
const MAX_EXPORTS: usize = 50;

static IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*import\s+([A-Za-z0-9_.,\s]+?)\s*(?:#.*)?$").expect("valid regex"));
static FROM_IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*from\s+(\.*[A-Za-z0-9_.]*)\s+import\s").expect("valid regex"));
static PY_EXPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(?:async\s+)?(?:def|class)\s+([A-Za-z][A-Za-z0-9_]*)").expect("valid regex"));

/// The five structural artifacts of one ingestion run.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub repo_graph: RepoGraph,
    pub module_map: ModuleMap,
    pub dependency_graph: DependencyGraph,
    pub infra_graph: InfraGraph,
    pub ci_graph: CiGraph,
}

impl Snapshot {
    pub fn validate(&self) -> Result<()> {
        self.repo_graph.validate()?;
        self.module_map.validate()?;
        self.dependency_graph.validate()?;
        self.infra_graph.validate()?;
        self.ci_graph.validate()?;
        Ok(())
    }

    /// Validate everything, then write everything.
    pub fn write(&self, memory: &FsMemory) -> Result<()> {
        self.validate()
            .context("Ingestion produced an invalid snapshot; nothing was written")?;
        memory.write(&self.repo_graph)?;
        memory.write(&self.module_map)?;
        memory.write(&self.dependency_graph)?;
        memory.write(&self.infra_graph)?;
        memory.write(&self.ci_graph)?;
        Ok(())
    }
}

pub fn run_ingest(config: &Config) -> Result<()> {
    let memory = FsMemory::new(config.memory_root());
    let files = scan_repository(config)?;
    tracing::info!(files = files.len(), "repository scanned");

    let previous_ci = match memory.load::<CiGraph>() {
        Ok(ci) => ci,
        Err(e) => {
            tracing::warn!(error = %e, "previous ci_graph unreadable, failure history reset");
            None
        }
    };

    let snapshot = build_snapshot(
        &files,
        &LineScanner,
        previous_ci.as_ref(),
        config.limits.max_failures_per_workflow,
        Utc::now().trunc_subsecs(0),
    );
    snapshot.write(&memory)?;

    let g = &snapshot.repo_graph;
    println!("ingest {}", config.repo_root().display());
    println!("  files: {}", g.metrics.total_files);
    for (file_type, count) in &g.metrics.files_by_type {
        println!("    {}: {}", file_type, count);
    }
    println!("  edges: {}", g.metrics.total_edges);
    println!("  modules: {}", snapshot.module_map.modules.len());
    println!("  dependencies: {}", snapshot.dependency_graph.dependencies.len());
    println!(
        "  terraform resources: {}",
        snapshot.infra_graph.terraform.resources.len()
    );
    println!("  helm charts: {}", snapshot.infra_graph.helm.charts.len());
    println!("  workflows: {}", snapshot.ci_graph.workflows.len());
    println!("ok");
    Ok(())
}

/// Build all structural artifacts from a scanned file list.
///
/// Files that are not valid UTF-8 still become nodes but are not parsed.
pub fn build_snapshot(
    files: &[ScannedFile],
    scanner: &dyn InfraScanner,
    previous_ci: Option<&CiGraph>,
    max_failures: usize,
    now: DateTime<Utc>,
) -> Snapshot {
    let texts: BTreeMap<&str, String> = files
        .iter()
        .filter(|f| needs_text(&f.node.path, f.node.file_type))
        .filter_map(|f| match std::fs::read_to_string(&f.abs_path) {
            Ok(text) => Some((f.node.path.as_str(), text)),
            Err(e) => {
                tracing::debug!(path = %f.node.path, error = %e, "not parsed");
                None
            }
        })
        .collect();

    let indexed: BTreeSet<&str> = files.iter().map(|f| f.node.path.as_str()).collect();

    // Python imports
    let resolver = PythonResolver::new(&indexed);
    let mut imports: BTreeSet<(String, String)> = BTreeSet::new();
    for (path, text) in texts.iter().filter(|(p, _)| p.ends_with(".py")) {
        for module in python_imports(text) {
            if let Some(target) = resolver.resolve(path, &module) {
                if target != *path {
                    imports.insert((path.to_string(), target.to_string()));
                }
            }
        }
    }

    // Infra and CI
    let mut terraform = TerraformInventory::default();
    let mut helm = HelmInventory::default();
    let mut workflows = Vec::new();
    let mut module_exports: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (path, text) in &texts {
        let exports = module_exports.entry(module_of(path).to_string()).or_default();
        if path.ends_with(".tf") {
            scanner.scan_terraform(path, text, &mut terraform);
            exports.extend(scanner.terraform_outputs(text));
        } else if path.ends_with(".py") {
            exports.extend(
                PY_EXPORT_RE
                    .captures_iter(text)
                    .map(|c| c[1].to_string()),
            );
        } else if path.rsplit('/').next() == Some("Chart.yaml") {
            if let Some(chart) = scanner.scan_helm_chart(path, text) {
                helm.charts.push(chart);
            }
        } else if FileType::classify(path) == FileType::Ci {
            if let Some(wf) = scanner.scan_workflow(path, text) {
                workflows.push(wf);
            }
        }
    }
    carry_failure_history(&mut workflows, previous_ci, max_failures);

    // Edges
    let mut edges: BTreeSet<DependencyEdge> = imports
        .iter()
        .map(|(from, to)| DependencyEdge {
            from: from.clone(),
            to: to.clone(),
            relation: Relation::Imports,
        })
        .collect();
    for wf in &workflows {
        for script in wf.depends_on_scripts.iter().filter(|s| indexed.contains(s.as_str())) {
            if *script != wf.path {
                edges.insert(DependencyEdge {
                    from: wf.path.clone(),
                    to: script.clone(),
                    relation: Relation::References,
                });
            }
        }
    }
    let edges: Vec<DependencyEdge> = edges.into_iter().collect();

    let mut files_by_type: BTreeMap<String, usize> = BTreeMap::new();
    for f in files {
        *files_by_type.entry(f.node.file_type.to_string()).or_insert(0) += 1;
    }
    let repo_graph = RepoGraph {
        schema_version: SCHEMA_VERSION.to_string(),
        generated_at: now,
        nodes: files.iter().map(|f| f.node.clone()).collect(),
        metrics: GraphMetrics {
            total_files: files.len(),
            total_edges: edges.len(),
            files_by_type,
        },
        edges,
    };

    let module_map = ModuleMap {
        schema_version: SCHEMA_VERSION.to_string(),
        generated_at: now,
        modules: build_modules(files, &imports, module_exports),
    };

    let dependency_graph = DependencyGraph {
        schema_version: SCHEMA_VERSION.to_string(),
        generated_at: now,
        dependencies: build_dependencies(&imports, &terraform, &helm, &workflows, &indexed),
    };

    Snapshot {
        repo_graph,
        module_map,
        dependency_graph,
        infra_graph: InfraGraph {
            schema_version: SCHEMA_VERSION.to_string(),
            generated_at: now,
            terraform,
            helm,
        },
        ci_graph: CiGraph {
            schema_version: SCHEMA_VERSION.to_string(),
            generated_at: now,
            workflows,
        },
    }
}

fn needs_text(path: &str, file_type: FileType) -> bool {
    path.ends_with(".py")
        || path.ends_with(".tf")
        || path.ends_with("Chart.yaml")
        || file_type == FileType::Ci
}

/// Module names referenced by `import` / `from … import` statements.
///
/// Relative imports keep their leading dots.
pub fn python_imports(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in text.lines() {
        if let Some(caps) = FROM_IMPORT_RE.captures(line) {
            out.push(caps[1].to_string());
        } else if let Some(caps) = IMPORT_RE.captures(line) {
            for part in caps[1].split(',') {
                let name = part.split_whitespace().next().unwrap_or("");
                if !name.is_empty() {
                    out.push(name.to_string());
                }
            }
        }
    }
    out
}

struct PythonResolver<'a> {
    indexed: &'a BTreeSet<&'a str>,
    /// File stem to the first indexed `.py` path with that stem.
    stems: HashMap<&'a str, &'a str>,
}

impl<'a> PythonResolver<'a> {
    fn new(indexed: &'a BTreeSet<&'a str>) -> Self {
        let mut stems = HashMap::new();
        for path in indexed.iter().filter(|p| p.ends_with(".py")) {
            let file = path.rsplit('/').next().unwrap_or(path);
            let stem = file.trim_end_matches(".py");
            stems.entry(stem).or_insert(*path);
        }
        Self { indexed, stems }
    }

    fn lookup(&self, base: &str) -> Option<&'a str> {
        for candidate in [format!("{}.py", base), format!("{}/__init__.py", base)] {
            if let Some(hit) = self.indexed.get(candidate.as_str()) {
                return Some(*hit);
            }
        }
        None
    }

    fn resolve(&self, importer: &str, module: &str) -> Option<&'a str> {
        let dir = importer.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
        let dots = module.chars().take_while(|c| *c == '.').count();
        let rest = &module[dots..];

        if dots > 0 {
            let mut base: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
            for _ in 1..dots {
                base.pop()?;
            }
            base.extend(rest.split('.').filter(|s| !s.is_empty()));
            if base.is_empty() {
                return None;
            }
            return self.lookup(&base.join("/"));
        }

        let dotted = rest.replace('.', "/");
        if let Some(hit) = self.lookup(&dotted) {
            return Some(hit);
        }
        if !dir.is_empty() {
            if let Some(hit) = self.lookup(&format!("{}/{}", dir, dotted)) {
                return Some(hit);
            }
        }
        let first = rest.split('.').next()?;
        self.stems.get(first).copied()
    }
}

fn module_type(files: &[&ScannedFile]) -> ModuleType {
    if files.iter().any(|f| f.node.path.ends_with("Chart.yaml")) {
        return ModuleType::HelmChart;
    }
    let mut counts: BTreeMap<FileType, usize> = BTreeMap::new();
    for f in files {
        *counts.entry(f.node.file_type).or_insert(0) += 1;
    }
    let mut dominant = FileType::Other;
    let mut best = 0;
    for t in FileType::ALL {
        let n = counts.get(&t).copied().unwrap_or(0);
        if n > best {
            best = n;
            dominant = t;
        }
    }
    match dominant {
        FileType::Source => ModuleType::SourcePackage,
        FileType::Infra => {
            let rego = files.iter().filter(|f| f.node.path.ends_with(".rego")).count();
            if rego * 2 > best {
                ModuleType::PolicySet
            } else {
                ModuleType::TerraformModule
            }
        }
        FileType::Ci => ModuleType::CiWorkflow,
        FileType::Doc => ModuleType::Docs,
        FileType::Config => ModuleType::Config,
        FileType::Other => ModuleType::Other,
    }
}

fn build_modules(
    files: &[ScannedFile],
    imports: &BTreeSet<(String, String)>,
    mut exports: BTreeMap<String, Vec<String>>,
) -> Vec<ModuleRecord> {
    let mut grouped: BTreeMap<&str, Vec<&ScannedFile>> = BTreeMap::new();
    for f in files {
        grouped.entry(module_of(&f.node.path)).or_default().push(f);
    }

    let mut module_deps: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (from, to) in imports {
        let (a, b) = (module_of(from), module_of(to));
        if a != b {
            module_deps.entry(a).or_default().insert(b);
        }
    }

    grouped
        .into_iter()
        .map(|(name, members)| {
            let mut names = exports.remove(name).unwrap_or_default();
            let mut seen = BTreeSet::new();
            names.retain(|n| !n.starts_with('_') && seen.insert(n.clone()));
            names.truncate(MAX_EXPORTS);
            ModuleRecord {
                name: name.to_string(),
                path: if name == ROOT_MODULE {
                    ".".to_string()
                } else {
                    name.to_string()
                },
                module_type: module_type(&members),
                files: members.iter().map(|f| f.node.path.clone()).collect(),
                exports: names,
                dependencies: module_deps
                    .get(name)
                    .map(|d| d.iter().map(|s| s.to_string()).collect())
                    .unwrap_or_default(),
            }
        })
        .collect()
}

/// Lexically normalise `dir/rel`, resolving `.` and `..`.
fn join_normalized(dir: &str, rel: &str) -> Option<String> {
    let mut parts: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
    for seg in rel.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            s => parts.push(s),
        }
    }
    Some(parts.join("/"))
}

fn build_dependencies(
    imports: &BTreeSet<(String, String)>,
    terraform: &TerraformInventory,
    helm: &HelmInventory,
    workflows: &[WorkflowRecord],
    indexed: &BTreeSet<&str>,
) -> Vec<Dependency> {
    let mut deps: BTreeSet<Dependency> = BTreeSet::new();

    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (from, to) in imports {
        adjacency.entry(from.as_str()).or_default().push(to.as_str());
        deps.insert(Dependency {
            source: from.clone(),
            target: to.clone(),
            kind: DependencyKind::DirectImport,
            depth: 1,
        });
    }

    for &start in adjacency.keys() {
        let mut visited: BTreeSet<&str> = BTreeSet::from([start]);
        let mut queue: VecDeque<(&str, u32)> = VecDeque::from([(start, 0)]);
        while let Some((node, depth)) = queue.pop_front() {
            if depth >= MAX_IMPORT_DEPTH {
                continue;
            }
            for &next in adjacency.get(node).into_iter().flatten() {
                if !visited.insert(next) {
                    continue;
                }
                if depth >= 1 {
                    deps.insert(Dependency {
                        source: start.to_string(),
                        target: next.to_string(),
                        kind: DependencyKind::TransitiveImport,
                        depth: depth + 1,
                    });
                }
                queue.push_back((next, depth + 1));
            }
        }
    }

    for m in &terraform.modules {
        if !(m.source.starts_with("./") || m.source.starts_with("../")) {
            continue;
        }
        let dir = m.file.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
        match join_normalized(dir, &m.source) {
            Some(target) if !target.is_empty() => {
                deps.insert(Dependency {
                    source: m.file.clone(),
                    target,
                    kind: DependencyKind::TerraformModuleRef,
                    depth: 1,
                });
            }
            _ => tracing::debug!(file = %m.file, source = %m.source, "module source escapes repository"),
        }
    }

    for chart in &helm.charts {
        for dep in &chart.dependencies {
            deps.insert(Dependency {
                source: chart.path.clone(),
                target: dep.clone(),
                kind: DependencyKind::HelmDependency,
                depth: 1,
            });
        }
    }

    for wf in workflows {
        for script in wf.depends_on_scripts.iter().filter(|s| indexed.contains(s.as_str())) {
            deps.insert(Dependency {
                source: wf.path.clone(),
                target: script.clone(),
                kind: DependencyKind::CiUsesScript,
                depth: 1,
            });
        }
    }

    deps.into_iter()
        .filter(|d| !d.source.is_empty())
        .collect()
}

fn carry_failure_history(
    workflows: &mut [WorkflowRecord],
    previous: Option<&CiGraph>,
    max_failures: usize,
) {
    let Some(previous) = previous else {
        return;
    };
    let history: HashMap<&str, &Vec<FailureRecord>> = previous
        .workflows
        .iter()
        .map(|w| (w.path.as_str(), &w.failure_history))
        .collect();
    for wf in workflows.iter_mut() {
        if let Some(h) = history.get(wf.path.as_str()) {
            wf.failure_history = h.iter().take(max_failures).cloned().collect();
        }
    }
}

/// Record a CI failure against a workflow, matched by name or path.
pub fn run_record_failure(
    config: &Config,
    workflow: &str,
    reason: &str,
    run_id: Option<String>,
    job: Option<String>,
) -> Result<()> {
    let memory = FsMemory::new(config.memory_root());
    let Some(mut ci) = memory.load::<CiGraph>()? else {
        bail!("No ci_graph.json under {}. Run `rmem ingest` first.", memory.root().display());
    };

    let reason = reason.trim();
    if reason.is_empty() {
        bail!("--reason must not be empty");
    }

    let now = Utc::now().trunc_subsecs(0);
    let Some(wf) = ci
        .workflows
        .iter_mut()
        .find(|w| w.name == workflow || w.path == workflow)
    else {
        bail!("Unknown workflow: '{}'", workflow);
    };

    let run_id = run_id.unwrap_or_else(|| format!("ci-{}", now.timestamp()));
    wf.failure_history.insert(
        0,
        FailureRecord {
            run_id: run_id.clone(),
            job,
            reason: reason.to_string(),
            timestamp: now,
        },
    );
    wf.failure_history
        .truncate(config.limits.max_failures_per_workflow.max(1));
    let path = wf.path.clone();
    let kept = wf.failure_history.len();

    memory.write(&ci)?;
    println!("record-failure {}", path);
    println!("  run: {}", run_id);
    println!("  history: {}", kept);
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn config_for(root: &Path) -> Config {
        let mut cfg = Config::default();
        cfg.paths.repo_root = root.to_path_buf();
        cfg.paths.memory_dir = root.join(".memory");
        cfg
    }

    fn snapshot_of(root: &Path) -> Snapshot {
        let files = scan_repository(&config_for(root)).unwrap();
        build_snapshot(&files, &LineScanner, None, 20, Utc::now().trunc_subsecs(0))
    }

    #[test]
    fn test_python_import_forms() {
        let text = "import os, scripts.util as u\nfrom scripts.common import helper\nfrom . import sibling\n# import nothing\n";
        assert_eq!(
            python_imports(text),
            vec!["os", "scripts.util", "scripts.common", "."]
        );
    }

    #[test]
    fn test_two_file_import_edge() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.py", "import b\n");
        write(tmp.path(), "b.py", "x = 1\n");

        let snap = snapshot_of(tmp.path());
        snap.validate().unwrap();
        assert_eq!(snap.repo_graph.nodes.len(), 2);
        assert_eq!(
            snap.repo_graph.edges,
            vec![DependencyEdge {
                from: "a.py".into(),
                to: "b.py".into(),
                relation: Relation::Imports,
            }]
        );
        assert_eq!(snap.repo_graph.metrics.total_edges, 1);
    }

    #[test]
    fn test_unresolved_and_self_imports_dropped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "scripts/a.py", "import requests\nimport a\nfrom scripts import a\n");
        let snap = snapshot_of(tmp.path());
        assert!(snap.repo_graph.edges.is_empty());
    }

    #[test]
    fn test_dotted_and_relative_resolution() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "pkg/__init__.py", "");
        write(tmp.path(), "pkg/core.py", "from .util import f\n");
        write(tmp.path(), "pkg/util.py", "def f(): pass\n");
        write(tmp.path(), "main.py", "import pkg.core\nimport pkg\n");

        let snap = snapshot_of(tmp.path());
        let edges: Vec<(&str, &str)> = snap
            .repo_graph
            .edges
            .iter()
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect();
        assert!(edges.contains(&("main.py", "pkg/core.py")));
        assert!(edges.contains(&("main.py", "pkg/__init__.py")));
        assert!(edges.contains(&("pkg/core.py", "pkg/util.py")));

        let transitive: Vec<&Dependency> = snap
            .dependency_graph
            .dependencies
            .iter()
            .filter(|d| d.kind == DependencyKind::TransitiveImport)
            .collect();
        assert_eq!(transitive.len(), 1);
        assert_eq!(transitive[0].source, "main.py");
        assert_eq!(transitive[0].target, "pkg/util.py");
        assert_eq!(transitive[0].depth, 2);
    }

    #[test]
    fn test_modules_infra_and_ci() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "scripts/deploy.py", "import scripts.common\ndef main(): pass\ndef _private(): pass\n");
        write(tmp.path(), "scripts/common.py", "class Client: pass\n");
        write(
            tmp.path(),
            "terraform/main.tf",
            "resource \"aws_s3_bucket\" \"logs\" {}\nmodule \"net\" {\n  source = \"./modules/net\"\n}\noutput \"bucket\" {}\n",
        );
        write(tmp.path(), "helm/app/Chart.yaml", "name: app\nversion: 0.1.0\n");
        write(
            tmp.path(),
            ".github/workflows/deploy.yml",
            "name: Deploy\non: [push]\njobs:\n  run:\n    steps:\n      - run: python scripts/deploy.py\n",
        );

        let snap = snapshot_of(tmp.path());
        snap.validate().unwrap();

        let modules: BTreeMap<&str, &ModuleRecord> = snap
            .module_map
            .modules
            .iter()
            .map(|m| (m.name.as_str(), m))
            .collect();
        assert_eq!(modules["scripts"].module_type, ModuleType::SourcePackage);
        assert_eq!(modules["scripts"].exports, vec!["Client", "main"]);
        assert_eq!(modules["terraform"].module_type, ModuleType::TerraformModule);
        assert_eq!(modules["terraform"].exports, vec!["bucket"]);
        assert_eq!(modules["helm"].module_type, ModuleType::HelmChart);
        assert_eq!(modules[".github"].module_type, ModuleType::CiWorkflow);

        assert_eq!(snap.infra_graph.terraform.resources.len(), 1);
        assert_eq!(snap.infra_graph.helm.charts[0].name, "app");

        let wf = &snap.ci_graph.workflows[0];
        assert_eq!(wf.depends_on_scripts, vec!["scripts/deploy.py"]);
        assert!(snap.repo_graph.edges.iter().any(|e| {
            e.from == ".github/workflows/deploy.yml"
                && e.to == "scripts/deploy.py"
                && e.relation == Relation::References
        }));

        let kinds: BTreeSet<DependencyKind> = snap
            .dependency_graph
            .dependencies
            .iter()
            .map(|d| d.kind)
            .collect();
        assert!(kinds.contains(&DependencyKind::TerraformModuleRef));
        assert!(kinds.contains(&DependencyKind::CiUsesScript));
        assert!(snap
            .dependency_graph
            .dependencies
            .iter()
            .any(|d| d.kind == DependencyKind::TerraformModuleRef && d.target == "terraform/modules/net"));
    }

    #[test]
    fn test_failure_history_survives_reingest() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            ".github/workflows/ci.yml",
            "on: push\njobs:\n  test:\n    steps: []\n",
        );
        let cfg = config_for(tmp.path());
        run_ingest(&cfg).unwrap();
        run_record_failure(&cfg, "ci", "pytest failed", Some("42".into()), Some("test".into()))
            .unwrap();
        run_ingest(&cfg).unwrap();

        let memory = FsMemory::new(cfg.memory_root());
        let ci = memory.load::<CiGraph>().unwrap().unwrap();
        assert_eq!(ci.workflows[0].failure_history.len(), 1);
        assert_eq!(ci.workflows[0].failure_history[0].run_id, "42");
    }

    #[test]
    fn test_blank_workflow_name_does_not_abort_ingest() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            ".github/workflows/odd.yml",
            "name: \"  \"\non: push\njobs:\n  build:\n    steps: []\n",
        );
        write(tmp.path(), "helm/app/Chart.yaml", "apiVersion: v2\nname: \"\"\n");
        let cfg = config_for(tmp.path());
        run_ingest(&cfg).unwrap();

        let memory = FsMemory::new(cfg.memory_root());
        let ci = memory.load::<CiGraph>().unwrap().unwrap();
        assert_eq!(ci.workflows.len(), 1);
        assert_eq!(ci.workflows[0].name, "odd");
        let infra = memory.load::<InfraGraph>().unwrap().unwrap();
        assert!(infra.helm.charts.is_empty());
    }

    #[test]
    fn test_record_failure_unknown_workflow() {
        let tmp = TempDir::new().unwrap();
        let cfg = config_for(tmp.path());
        write(tmp.path(), "a.py", "");
        run_ingest(&cfg).unwrap();
        assert!(run_record_failure(&cfg, "nope", "x", None, None).is_err());
    }
}
