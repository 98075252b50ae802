use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info};

use crate::repository::Repository;

/// What already sits at a repository's target path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// Nothing on disk yet; a fresh clone is needed.
    Missing,
    /// A git store of the expected kind; fetch to update.
    Existing,
    /// Something else occupies the path; the item fails, the run continues.
    Conflict,
}

/// Outcome of one successful clone-or-update operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Cloned { path: PathBuf },
    Updated { path: PathBuf },
}

/// Runs git subprocesses against the backup root. The git binary's exit code
/// is the sole success/failure signal.
#[derive(Debug, Clone)]
pub struct GitClient {
    backup_root: PathBuf,
    bare: bool,
}

impl GitClient {
    pub fn new(backup_root: PathBuf, bare: bool) -> Self {
        Self { backup_root, bare }
    }

    /// Target directory for a repository: `<root>/<namespace>/<name>`, with
    /// a `.git` suffix in bare mode.
    pub fn repo_path(&self, repo: &Repository) -> PathBuf {
        let dir_name = if self.bare {
            format!("{}.git", repo.name)
        } else {
            repo.name.clone()
        };
        self.backup_root.join(&repo.namespace).join(dir_name)
    }

    /// Inspect what currently occupies the target path.
    pub fn target_state(&self, path: &Path) -> TargetState {
        if !path.exists() {
            return TargetState::Missing;
        }
        let is_expected_store = if self.bare {
            path.join("HEAD").is_file() && path.join("objects").is_dir()
        } else {
            path.join(".git").exists()
        };
        if is_expected_store {
            TargetState::Existing
        } else {
            TargetState::Conflict
        }
    }

    /// Clone or fetch one repository. Errors are scoped to this item; the
    /// caller decides whether the run continues.
    pub async fn sync_repository(&self, repo: &Repository) -> Result<SyncOutcome> {
        let path = self.repo_path(repo);
        match self.target_state(&path) {
            TargetState::Missing => self.clone_repository(repo, &path).await,
            TargetState::Existing => self.update_repository(repo, &path).await,
            TargetState::Conflict => Err(anyhow!(
                "{} exists but is not a {} repository",
                path.display(),
                if self.bare { "bare git" } else { "git" }
            )),
        }
    }

    async fn clone_repository(&self, repo: &Repository, path: &Path) -> Result<SyncOutcome> {
        info!("Cloning {} -> {}", repo, path.display());

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut cmd = AsyncCommand::new("git");
        cmd.arg("clone");
        if self.bare {
            cmd.arg("--bare");
        }
        cmd.arg(&repo.clone_url).arg(path);

        run_git(cmd)
            .await
            .with_context(|| format!("failed to clone {repo}"))?;
        Ok(SyncOutcome::Cloned {
            path: path.to_path_buf(),
        })
    }

    async fn update_repository(&self, repo: &Repository, path: &Path) -> Result<SyncOutcome> {
        debug!("Fetching {} in {}", repo, path.display());

        let mut cmd = AsyncCommand::new("git");
        cmd.args(["fetch", "--all"]).current_dir(path);

        run_git(cmd)
            .await
            .with_context(|| format!("failed to fetch {repo}"))?;
        Ok(SyncOutcome::Updated {
            path: path.to_path_buf(),
        })
    }
}

async fn run_git(mut cmd: AsyncCommand) -> Result<()> {
    let output = cmd.output().await.context("failed to execute git")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("git exited with {}: {}", output.status, stderr.trim()));
    }
    Ok(())
}
