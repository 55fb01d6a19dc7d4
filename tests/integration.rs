use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn rmem_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("rmem");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // A small repository: one import edge, a workflow, and a decision tag
    let repo = root.join("repo");
    fs::create_dir_all(repo.join("scripts")).unwrap();
    fs::create_dir_all(repo.join(".github/workflows")).unwrap();
    fs::write(
        repo.join("scripts/deploy.py"),
        "import helpers\n\n# ARCH_DECISION: deploys go through a single entry point\ndef main():\n    helpers.run()\n",
    )
    .unwrap();
    fs::write(
        repo.join("scripts/helpers.py"),
        "def run():\n    return 0\n",
    )
    .unwrap();
    fs::write(
        repo.join(".github/workflows/deploy.yml"),
        "name: Deploy\non:\n  push:\n    branches: [main]\njobs:\n  deploy:\n    runs-on: ubuntu-latest\n    steps:\n      - run: python ./scripts/deploy.py\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[paths]
repo_root = "{}/repo"
memory_dir = "{}/memory"

[limits]
max_execution_runs = 2
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("rmem.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_rmem(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rmem_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rmem binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn read_json(path: PathBuf) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(&path).unwrap())
        .unwrap_or_else(|e| panic!("{} is not JSON: {}", path.display(), e))
}

fn write_run_record(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(
        &path,
        r#"{
  "agent": "Alpha",
  "trigger": { "event_type": "issue_labeled", "source_ref": "issue/7" },
  "input_hash": "sha256:0000000000000000000000000000000000000000000000000000000000000000",
  "retrieved_context_ids": ["file:scripts/deploy.py"],
  "decision_summary": "Relabelled after triage",
  "actions_taken": ["label_swap"],
  "outcome": "success",
  "duration_ms": 900,
  "confidence": 0.9
}"#,
    )
    .unwrap();
    path
}

#[test]
fn test_ingest_writes_structural_artifacts() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_rmem(&config_path, &["ingest"]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.trim_end().ends_with("ok"));

    let memory = tmp.path().join("memory");
    for name in [
        "repo_graph.json",
        "module_map.json",
        "dependency_graph.json",
        "infra_graph.json",
        "ci_graph.json",
    ] {
        assert!(memory.join(name).exists(), "{} missing", name);
    }

    let graph = read_json(memory.join("repo_graph.json"));
    assert_eq!(graph["nodes"].as_array().unwrap().len(), 3);
    let edges = graph["edges"].as_array().unwrap();
    let imports: Vec<_> = edges
        .iter()
        .filter(|e| e["relation"] == "imports")
        .collect();
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0]["from"], "scripts/deploy.py");
    assert_eq!(imports[0]["to"], "scripts/helpers.py");
    // the workflow runs deploy.py
    assert!(edges
        .iter()
        .any(|e| e["from"] == ".github/workflows/deploy.yml" && e["relation"] == "references"));

    let ci = read_json(memory.join("ci_graph.json"));
    let workflows = ci["workflows"].as_array().unwrap();
    assert_eq!(workflows.len(), 1);
    assert_eq!(workflows[0]["name"], "Deploy");
}

#[test]
fn test_ingest_is_deterministic() {
    let (tmp, config_path) = setup_test_env();
    let memory = tmp.path().join("memory");

    assert!(run_rmem(&config_path, &["ingest"]).2);
    let first = read_json(memory.join("dependency_graph.json"));
    assert!(run_rmem(&config_path, &["ingest"]).2);
    let second = read_json(memory.join("dependency_graph.json"));

    assert_eq!(first["dependencies"], second["dependencies"]);
}

#[test]
fn test_validate_passes_after_ingest() {
    let (_tmp, config_path) = setup_test_env();
    assert!(run_rmem(&config_path, &["ingest"]).2);
    assert!(run_rmem(&config_path, &["extract-decisions"]).2);

    let (stdout, stderr, success) = run_rmem(&config_path, &["validate"]);
    assert!(success, "validate failed: {}\n{}", stdout, stderr);
    assert!(stdout.trim_end().ends_with("ok"));
}

#[test]
fn test_validate_fails_without_ingest() {
    let (_tmp, config_path) = setup_test_env();
    let (_stdout, _stderr, success) = run_rmem(&config_path, &["validate"]);
    assert!(!success);
}

#[test]
fn test_validate_reports_deleted_decision_file() {
    let (tmp, config_path) = setup_test_env();
    assert!(run_rmem(&config_path, &["ingest"]).2);
    assert!(run_rmem(&config_path, &["extract-decisions"]).2);

    fs::remove_file(tmp.path().join("repo/scripts/deploy.py")).unwrap();

    let (stdout, _stderr, success) = run_rmem(&config_path, &["validate"]);
    assert!(!success);
    assert!(stdout.contains("stale key"), "stdout: {}", stdout);
}

#[test]
fn test_extract_decisions_and_lookup() {
    let (_tmp, config_path) = setup_test_env();
    assert!(run_rmem(&config_path, &["extract-decisions"]).2);

    let (stdout, stderr, success) = run_rmem(
        &config_path,
        &["decisions", "--type", "ARCH_DECISION", "--json"],
    );
    assert!(success, "decisions failed: {}", stderr);
    let found: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let found = found.as_array().unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0]["context"]
        .as_str()
        .unwrap()
        .contains("single entry point"));
}

#[test]
fn test_log_run_respects_cap() {
    let (tmp, config_path) = setup_test_env();
    let record = write_run_record(tmp.path(), "run.json");

    for _ in 0..3 {
        let (stdout, stderr, success) =
            run_rmem(&config_path, &["log-run", "--record", record.to_str().unwrap()]);
        assert!(success, "log-run failed: {}", stderr);
        assert!(stdout.contains("run_id: alpha-"));
    }

    let log = read_json(tmp.path().join("memory/execution_log.json"));
    assert_eq!(log["runs"].as_array().unwrap().len(), 2);
}

#[test]
fn test_log_run_rejects_bad_record() {
    let (tmp, config_path) = setup_test_env();
    let record = tmp.path().join("bad.json");
    fs::write(&record, r#"{"agent": "Alpha", "outcome": "success"}"#).unwrap();

    let (_stdout, _stderr, success) =
        run_rmem(&config_path, &["log-run", "--record", record.to_str().unwrap()]);
    assert!(!success);
    assert!(!tmp.path().join("memory/execution_log.json").exists());
}

#[test]
fn test_query_without_vector() {
    let (_tmp, config_path) = setup_test_env();
    assert!(run_rmem(&config_path, &["ingest"]).2);

    let (stdout, stderr, success) = run_rmem(&config_path, &["query", "tidy the deploy script"]);
    assert!(success, "query failed: {}", stderr);

    let bundle: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(bundle["semantic_context"].as_array().unwrap().is_empty());
    assert_eq!(bundle["_meta"]["query_vector"], false);
    assert_eq!(bundle["_meta"]["query"], "tidy the deploy script");
    assert_eq!(bundle["_meta"]["top_k_requested"], 10);
    assert!(bundle["structural_context"]["modules"].is_array());
}

#[test]
fn test_record_failure_survives_reingest() {
    let (tmp, config_path) = setup_test_env();
    assert!(run_rmem(&config_path, &["ingest"]).2);

    let (_stdout, stderr, success) = run_rmem(
        &config_path,
        &["record-failure", "Deploy", "terraform plan timed out", "--run-id", "1234"],
    );
    assert!(success, "record-failure failed: {}", stderr);
    assert!(run_rmem(&config_path, &["ingest"]).2);

    let ci = read_json(tmp.path().join("memory/ci_graph.json"));
    let history = ci["workflows"][0]["failure_history"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["run_id"], "1234");
}

#[test]
fn test_embed_requires_provider() {
    let (_tmp, config_path) = setup_test_env();
    let (_stdout, _stderr, success) = run_rmem(&config_path, &["embed", "--progress", "off"]);
    assert!(!success);
}

#[test]
fn test_stats_runs_on_empty_memory() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_rmem(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("ARTIFACT"));
}
