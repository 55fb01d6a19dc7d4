//! Repository walker.
//!
//! Walks the repository root, applies include/exclude globs, then hashes,
//! sizes, and classifies the surviving files in parallel. Output is sorted
//! by path, so it does not depend on walk or thread order.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use repo_memory_core::models::{FileNode, FileType};

use crate::config::Config;

/// Directories never indexed.
const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/.venv/**",
    "**/venv/**",
    "**/__pycache__/**",
    "**/.pytest_cache/**",
    "**/.mypy_cache/**",
    "**/.terraform/**",
    "**/node_modules/**",
    "**/target/**",
    "**/dist/**",
    "**/build/**",
];

/// A walked file: its node plus where it lives on disk.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub node: FileNode,
    pub abs_path: PathBuf,
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Walk the configured repository and return every indexable file.
///
/// Files that cannot be read are logged and skipped.
pub fn scan_repository(config: &Config) -> Result<Vec<ScannedFile>> {
    let root = config.repo_root();
    if !root.is_dir() {
        bail!("Repository root does not exist: {}", root.display());
    }

    let include_set = if config.scan.include_globs.is_empty() {
        None
    } else {
        Some(build_globset(&config.scan.include_globs)?)
    };

    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(config.scan.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let memory_rel = match (root.canonicalize(), config.memory_root().canonicalize()) {
        (Ok(r), Ok(m)) => m
            .strip_prefix(&r)
            .ok()
            .map(|p| format!("{}/", relative_path(Path::new(""), p))),
        _ => None,
    };

    let mut candidates = Vec::new();
    let walker = WalkDir::new(root).follow_links(config.scan.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let rel_str = relative_path(root, path);
        if let Some(mem) = &memory_rel {
            if rel_str.starts_with(mem.as_str()) {
                continue;
            }
        }
        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if let Some(include) = &include_set {
            if !include.is_match(&rel_str) {
                continue;
            }
        }
        candidates.push((rel_str, path.to_path_buf()));
    }

    let mut files: Vec<ScannedFile> = candidates
        .into_par_iter()
        .filter_map(|(rel, abs)| match hash_file(&abs) {
            Ok((hash, size_bytes)) => Some(ScannedFile {
                node: FileNode {
                    file_type: FileType::classify(&rel),
                    path: rel,
                    size_bytes,
                    hash,
                },
                abs_path: abs,
            }),
            Err(e) => {
                tracing::warn!(path = %rel, error = %e, "skipping unreadable file");
                None
            }
        })
        .collect();

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.node.path.cmp(&b.node.path));

    Ok(files)
}

/// Repository-relative path with `/` separators.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Stream a file through SHA-256, returning `sha256:<hex>` and its size.
pub fn hash_file(path: &Path) -> std::io::Result<(String, u64)> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        size += n as u64;
        hasher.update(&buf[..n]);
    }
    Ok((format!("sha256:{}", hex::encode(hasher.finalize())), size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use repo_memory_core::chunk::content_hash;
    use std::fs;
    use tempfile::TempDir;

    fn config_for(root: &Path) -> Config {
        let mut cfg = Config::default();
        cfg.paths.repo_root = root.to_path_buf();
        cfg.paths.memory_dir = root.join(".memory");
        cfg
    }

    #[test]
    fn test_scan_excludes_and_sorts() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("scripts")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("__pycache__")).unwrap();
        fs::create_dir_all(root.join(".memory")).unwrap();
        fs::create_dir_all(root.join(".github/workflows")).unwrap();
        fs::write(root.join("scripts/b.py"), "import a\n").unwrap();
        fs::write(root.join("scripts/a.py"), "x = 1\n").unwrap();
        fs::write(root.join(".git/HEAD"), "ref").unwrap();
        fs::write(root.join("__pycache__/a.pyc"), "bin").unwrap();
        fs::write(root.join(".memory/repo_graph.json"), "{}").unwrap();
        fs::write(root.join(".github/workflows/ci.yml"), "name: ci\n").unwrap();

        let files = scan_repository(&config_for(root)).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.node.path.as_str()).collect();
        assert_eq!(paths, vec![".github/workflows/ci.yml", "scripts/a.py", "scripts/b.py"]);
        assert_eq!(files[0].node.file_type, FileType::Ci);
        assert_eq!(files[1].node.hash, content_hash(b"x = 1\n"));
        assert_eq!(files[1].node.size_bytes, 6);
    }

    #[test]
    fn test_include_globs() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.md"), "# a").unwrap();
        fs::write(tmp.path().join("b.py"), "pass").unwrap();
        let mut cfg = config_for(tmp.path());
        cfg.scan.include_globs = vec!["**/*.md".to_string(), "*.md".to_string()];
        let files = scan_repository(&cfg).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].node.path, "a.md");
    }

    #[test]
    fn test_missing_root_errors() {
        let cfg = config_for(Path::new("/nonexistent/repo/root"));
        assert!(scan_repository(&cfg).is_err());
    }
}
