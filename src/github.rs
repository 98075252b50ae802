use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use octocrab::Octocrab;
use tracing::{debug, warn};

use crate::config::{required_env, Config, Service};
use crate::discovery::{RepoLister, MAX_PAGES};
use crate::repository::{resolve_clone_url, Repository};

/// GitHub adapter. Lists the authenticated user's repositories (or stars)
/// and exposes the underlying client for the user-migration workflow.
pub struct GithubClient {
    client: Octocrab,
    repo_type: String,
    ignore_fork: bool,
    prefer_https: bool,
}

impl GithubClient {
    pub fn new(config: &Config, token: String) -> Result<Self> {
        let mut builder = Octocrab::builder().personal_token(token);
        if let Some(url) = config.git_host_url.as_deref() {
            builder = builder
                .base_uri(url)
                .with_context(|| format!("invalid GitHub host URL {url:?}"))?;
        }
        let client = builder.build().context("failed to create GitHub client")?;

        Ok(Self {
            client,
            repo_type: config.github_repo_type.clone(),
            ignore_fork: config.ignore_fork,
            prefer_https: config.use_https_clone,
        })
    }

    /// Build a client authenticated with `GITHUB_TOKEN`.
    pub fn from_env(config: &Config) -> Result<Self> {
        Self::new(config, required_env("GITHUB_TOKEN")?)
    }

    /// Raw API access for the migration workflow.
    pub(crate) fn inner(&self) -> &Octocrab {
        &self.client
    }

    async fn owned_repositories(&self) -> Result<Vec<Repository>> {
        let mut repositories = Vec::new();
        let mut page: u32 = 1;

        loop {
            let resp = self
                .client
                .current()
                .list_repos_for_authenticated_user()
                .type_(self.repo_type.as_str())
                .per_page(100)
                .page(page as u8)
                .send()
                .await
                .with_context(|| format!("failed to fetch GitHub repositories (page {page})"))?;

            let has_next = resp.next.is_some();
            for repo in resp.items {
                if let Some(repo) = self.convert(repo) {
                    repositories.push(repo);
                }
            }
            if !has_next {
                break;
            }
            page += 1;
            if page > MAX_PAGES {
                bail!("GitHub repository listing did not terminate after {MAX_PAGES} pages");
            }
        }

        Ok(repositories)
    }

    /// Stars are a structurally different listing (the user's interest
    /// relationships, not their owned/joined repositories).
    async fn starred_repositories(&self) -> Result<Vec<Repository>> {
        let mut repositories = Vec::new();
        let mut page: u32 = 1;

        loop {
            let resp = self
                .client
                .current()
                .list_repos_starred_by_authenticated_user()
                .per_page(100)
                .page(page as u8)
                .send()
                .await
                .with_context(|| {
                    format!("failed to fetch starred GitHub repositories (page {page})")
                })?;

            let has_next = resp.next.is_some();
            for repo in resp.items {
                if let Some(repo) = self.convert(repo) {
                    repositories.push(repo);
                }
            }
            if !has_next {
                break;
            }
            page += 1;
            if page > MAX_PAGES {
                bail!("GitHub star listing did not terminate after {MAX_PAGES} pages");
            }
        }

        Ok(repositories)
    }

    fn convert(&self, repo: octocrab::models::Repository) -> Option<Repository> {
        if self.ignore_fork && repo.fork == Some(true) {
            debug!("Skipping fork: {}", repo.name);
            return None;
        }

        let namespace = repo
            .full_name
            .as_deref()
            .and_then(|full| full.split('/').next())
            .map(str::to_owned)
            .or_else(|| repo.owner.as_ref().map(|owner| owner.login.clone()));
        let namespace = match namespace {
            Some(ns) if !ns.is_empty() => ns,
            _ => {
                warn!("Skipping {}: provider reported no owner", repo.name);
                return None;
            }
        };

        let https_url = repo
            .clone_url
            .as_ref()
            .map(|url| url.to_string())
            .unwrap_or_default();
        let ssh_url = repo.ssh_url.clone().unwrap_or_default();

        match resolve_clone_url(&https_url, &ssh_url, self.prefer_https) {
            Some(clone_url) => Some(Repository {
                clone_url,
                name: repo.name.clone(),
                namespace,
                private: repo.private.unwrap_or(false),
            }),
            None => {
                warn!("Skipping {}/{}: no usable clone URL", namespace, repo.name);
                None
            }
        }
    }
}

#[async_trait]
impl RepoLister for GithubClient {
    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        if self.repo_type == "starred" {
            self.starred_repositories().await
        } else {
            self.owned_repositories().await
        }
    }

    fn service(&self) -> Service {
        Service::Github
    }
}
