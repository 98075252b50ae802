//! End-to-end tests for the backup flow, driving the real git binary
//! against local upstream repositories.

mod common;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use common::{create_upstream, git, local_repository, test_config};
use repovault::config::Service;
use repovault::discovery::{self, RepoLister};
use repovault::repository::Repository;
use repovault::sync::SyncEngine;

/// A lister returning a fixed repository set, standing in for a provider.
struct StaticLister(Vec<Repository>);

#[async_trait]
impl RepoLister for StaticLister {
    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        Ok(self.0.clone())
    }

    fn service(&self) -> Service {
        Service::Github
    }
}

#[tokio::test]
async fn test_first_run_clones_second_run_fetches() {
    let (_upstream_dir, upstream) = create_upstream("api");
    let backup_root = TempDir::new().unwrap();

    let config = test_config(backup_root.path(), false);
    let engine = SyncEngine::new(&config);
    let repos = vec![local_repository("acme", "api", &upstream)];

    let first = engine.sync(repos.clone()).await;
    assert_eq!(first.cloned, 1);
    assert_eq!(first.updated, 0);
    assert!(first.all_succeeded());

    let target = config.backup_dir.join("acme").join("api");
    assert!(target.join(".git").exists());
    assert!(target.join("README.md").exists());

    // Push a new commit upstream so the fetch has something to pick up.
    std::fs::write(upstream.join("CHANGELOG.md"), "- fix\n").unwrap();
    git(&["add", "."], &upstream);
    git(&["commit", "-m", "add changelog"], &upstream);

    let second = engine.sync(repos).await;
    assert_eq!(second.cloned, 0);
    assert_eq!(second.updated, 1);
    assert!(second.all_succeeded());

    // The existing clone was updated in place, not replaced.
    assert!(target.join("README.md").exists());
}

#[tokio::test]
async fn test_bare_mode_clones_bare_stores() {
    let (_upstream_dir, upstream) = create_upstream("api");
    let backup_root = TempDir::new().unwrap();

    let config = test_config(backup_root.path(), true);
    let engine = SyncEngine::new(&config);
    let repos = vec![local_repository("acme", "api", &upstream)];

    let first = engine.sync(repos.clone()).await;
    assert_eq!(first.cloned, 1);

    let target = config.backup_dir.join("acme").join("api.git");
    assert!(target.join("HEAD").is_file());
    assert!(target.join("objects").is_dir());
    assert!(!target.join(".git").exists());

    let second = engine.sync(repos).await;
    assert_eq!(second.updated, 1);
    assert!(second.all_succeeded());
}

#[tokio::test]
async fn test_one_failing_repository_does_not_block_the_rest() {
    let (_upstream_dir, upstream) = create_upstream("api");
    let backup_root = TempDir::new().unwrap();

    let config = test_config(backup_root.path(), false);
    let engine = SyncEngine::new(&config);

    let unreachable = Repository {
        clone_url: backup_root
            .path()
            .join("no-such-upstream")
            .to_string_lossy()
            .into_owned(),
        name: "ghost".to_string(),
        namespace: "acme".to_string(),
        private: false,
    };
    let repos = vec![unreachable, local_repository("acme", "api", &upstream)];

    let summary = engine.sync(repos).await;
    assert_eq!(summary.total, 2);
    assert_eq!(summary.cloned, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].repository.name, "ghost");

    // The healthy repository still landed on disk.
    assert!(config.backup_dir.join("acme/api/.git").exists());
}

#[tokio::test]
async fn test_conflicting_target_fails_only_that_item() {
    let (_upstream_dir, upstream) = create_upstream("api");
    let backup_root = TempDir::new().unwrap();

    let config = test_config(backup_root.path(), false);

    // Occupy the target path with something that is not a git repository.
    let occupied = config.backup_dir.join("acme").join("api");
    std::fs::create_dir_all(&occupied).unwrap();
    std::fs::write(occupied.join("notes.txt"), "left here by hand").unwrap();

    let engine = SyncEngine::new(&config);
    let summary = engine
        .sync(vec![local_repository("acme", "api", &upstream)])
        .await;

    assert_eq!(summary.failures.len(), 1);
    assert!(summary.failures[0].error.contains("is not a git repository"));

    // The conflicting directory was left untouched.
    assert!(occupied.join("notes.txt").exists());
}

/// The example scenario: a public and a private repository discovered, with
/// ignore-private set, produce exactly one local mirror and a clean summary.
#[tokio::test]
async fn test_ignore_private_end_to_end() {
    let (_upstream_dir, upstream) = create_upstream("api");
    let backup_root = TempDir::new().unwrap();

    let mut config = test_config(backup_root.path(), false);
    config.ignore_private = true;

    let mut secrets = local_repository("acme", "secrets", &upstream);
    secrets.private = true;
    let lister = StaticLister(vec![local_repository("acme", "api", &upstream), secrets]);

    let discovered = discovery::discover(&lister, &config).await.unwrap();
    assert_eq!(discovered.len(), 1);

    let engine = SyncEngine::new(&config);
    let summary = engine.sync(discovered).await;

    assert_eq!(summary.total, 1);
    assert_eq!(summary.cloned, 1);
    assert!(summary.all_succeeded());
    assert!(config.backup_dir.join("acme/api/.git").exists());
    assert!(!config.backup_dir.join("acme/secrets").exists());
}
