/// Common test utilities for repovault integration tests.
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use repovault::config::{Config, FileConfig, MigrationConfig};
use repovault::repository::Repository;

/// Run a git command in `cwd`, panicking on failure.
pub fn git(args: &[&str], cwd: &Path) {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Create a local upstream repository with one commit, usable as a clone
/// source. Returns the temp dir keeping it alive and the repository path.
pub fn create_upstream(name: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().join(name);
    std::fs::create_dir_all(&path).expect("failed to create upstream dir");

    git(&["init"], &path);
    git(&["config", "user.email", "test@example.com"], &path);
    git(&["config", "user.name", "repovault tests"], &path);
    std::fs::write(path.join("README.md"), format!("# {name}\n"))
        .expect("failed to write README");
    git(&["add", "."], &path);
    git(&["commit", "-m", "initial commit"], &path);

    (dir, path)
}

/// A repository entry pointing at a local upstream path.
pub fn local_repository(namespace: &str, name: &str, upstream: &Path) -> Repository {
    Repository {
        clone_url: upstream.to_string_lossy().into_owned(),
        name: name.to_string(),
        namespace: namespace.to_string(),
        private: false,
    }
}

/// A resolved configuration rooted at a temp backup directory.
pub fn test_config(backup_root: &Path, bare: bool) -> Config {
    let file = FileConfig {
        backup_dir: backup_root.to_string_lossy().into_owned(),
        bare,
        ..FileConfig::default()
    };
    Config::resolve(file, MigrationConfig::default()).expect("failed to resolve test config")
}
