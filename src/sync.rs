//! Bounded-concurrency synchronization engine.
//!
//! Turns the discovered repository set into parallel clone-or-update
//! operations under a fixed concurrency ceiling, with per-repository failure
//! isolation and an aggregate summary once the pool has drained.

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::config::Config;
use crate::git::{GitClient, SyncOutcome};
use crate::repository::Repository;

/// Aggregate result of one synchronization run.
#[derive(Debug)]
pub struct SyncSummary {
    pub total: usize,
    pub cloned: usize,
    pub updated: usize,
    pub failures: Vec<SyncFailure>,
    pub duration: Duration,
}

/// One isolated per-repository failure, with enough context to retry
/// manually.
#[derive(Debug)]
pub struct SyncFailure {
    pub repository: Repository,
    pub error: String,
}

impl SyncSummary {
    pub fn succeeded(&self) -> usize {
        self.cloned + self.updated
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The engine driving bounded-parallel clone/update operations.
pub struct SyncEngine {
    git: GitClient,
    max_concurrent: usize,
}

impl SyncEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            git: GitClient::new(config.backup_dir.clone(), config.bare),
            max_concurrent: config.max_concurrent_clones,
        }
    }

    /// Clone or update every repository. Item failures are captured in the
    /// summary; they never cancel or block other operations.
    pub async fn sync(&self, repositories: Vec<Repository>) -> SyncSummary {
        let start = Instant::now();
        let total = repositories.len();
        info!(
            "Syncing {} repositories ({} max concurrent)",
            total, self.max_concurrent
        );

        let git = self.git.clone();
        let results = for_each_bounded(repositories, self.max_concurrent, move |repo| {
            let git = git.clone();
            async move { git.sync_repository(&repo).await }
        })
        .await;

        summarize(results, start.elapsed())
    }
}

fn summarize(
    results: Vec<(Repository, anyhow::Result<SyncOutcome>)>,
    duration: Duration,
) -> SyncSummary {
    let total = results.len();
    let mut cloned = 0;
    let mut updated = 0;
    let mut failures = Vec::new();

    for (repository, outcome) in results {
        match outcome {
            Ok(SyncOutcome::Cloned { .. }) => cloned += 1,
            Ok(SyncOutcome::Updated { .. }) => updated += 1,
            Err(err) => {
                error!("Failed to sync {repository}: {err:#}");
                failures.push(SyncFailure {
                    repository,
                    error: format!("{err:#}"),
                });
            }
        }
    }

    SyncSummary {
        total,
        cloned,
        updated,
        failures,
        duration,
    }
}

/// Run `op` over every item with at most `limit` operations in flight.
/// Results arrive in completion order; the call returns only once every item
/// has finished (the summary's join barrier).
async fn for_each_bounded<T, R, F, Fut>(items: Vec<T>, limit: usize, op: F) -> Vec<(T, R)>
where
    T: Clone,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut tasks = FuturesUnordered::new();

    for item in items {
        let semaphore = Arc::clone(&semaphore);
        // Futures are lazy: work starts only once a permit is held.
        let operation = op(item.clone());
        tasks.push(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            let result = operation.await;
            (item, result)
        });
    }

    let mut results = Vec::with_capacity(tasks.len());
    while let Some(result) = tasks.next().await {
        results.push(result);
    }
    results
}
