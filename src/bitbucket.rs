use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;

use crate::config::{required_env, Config, Service};
use crate::discovery::{RepoLister, MAX_PAGES};
use crate::repository::{resolve_clone_url, Repository};

const PUBLIC_BITBUCKET_API: &str = "https://api.bitbucket.org";

/// Bitbucket adapter. Lists the user's workspaces, then the repositories of
/// each workspace; both listings are paginated by the `next` URL embedded in
/// the response body.
pub struct BitbucketClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    token: String,
    ignore_fork: bool,
    prefer_https: bool,
}

/// Bitbucket's uniform page envelope.
#[derive(Debug, Deserialize)]
struct Paginated<T> {
    #[serde(default)]
    values: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Workspace {
    slug: String,
}

#[derive(Debug, Default, Deserialize)]
struct BitbucketRepo {
    slug: String,
    full_name: String,
    #[serde(default)]
    is_private: bool,
    #[serde(default)]
    links: RepoLinks,
}

#[derive(Debug, Default, Deserialize)]
struct RepoLinks {
    #[serde(default)]
    clone: Vec<CloneLink>,
}

#[derive(Debug, Deserialize)]
struct CloneLink {
    name: String,
    href: String,
}

impl BitbucketClient {
    pub fn new(config: &Config, username: String, token: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to create Bitbucket HTTP client")?;

        let base_url = config
            .git_host_url
            .as_deref()
            .unwrap_or(PUBLIC_BITBUCKET_API)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http,
            base_url,
            username,
            token,
            ignore_fork: config.ignore_fork,
            prefer_https: config.use_https_clone,
        })
    }

    /// Build a client authenticated with `BITBUCKET_USERNAME` and
    /// `BITBUCKET_TOKEN` (falling back to `BITBUCKET_PASSWORD`).
    pub fn from_env(config: &Config) -> Result<Self> {
        let username = required_env("BITBUCKET_USERNAME")?;
        let token =
            required_env("BITBUCKET_TOKEN").or_else(|_| required_env("BITBUCKET_PASSWORD"))?;
        Self::new(config, username, token)
    }

    /// Drain a paginated listing by following `next` URLs.
    async fn fetch_all<T: DeserializeOwned + Default>(&self, first_url: String) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut url = Some(first_url);
        let mut pages: u32 = 0;

        while let Some(current) = url {
            pages += 1;
            if pages > MAX_PAGES {
                bail!("Bitbucket listing did not terminate after {MAX_PAGES} pages");
            }

            let page: Paginated<T> = self
                .http
                .get(&current)
                .basic_auth(&self.username, Some(&self.token))
                .send()
                .await
                .with_context(|| format!("Bitbucket request failed: {current}"))?
                .error_for_status()
                .with_context(|| format!("Bitbucket rejected the request: {current}"))?
                .json()
                .await
                .with_context(|| format!("failed to decode Bitbucket response from {current}"))?;

            items.extend(page.values);
            url = page.next;
        }

        Ok(items)
    }

    fn convert(&self, repo: BitbucketRepo) -> Option<Repository> {
        let namespace = repo.full_name.split('/').next().unwrap_or("").to_string();
        if namespace.is_empty() {
            warn!("Skipping {}: repository has no workspace", repo.slug);
            return None;
        }

        let mut https_url = String::new();
        let mut ssh_url = String::new();
        for link in &repo.links.clone {
            match link.name.as_str() {
                "https" => https_url = link.href.clone(),
                "ssh" => ssh_url = link.href.clone(),
                _ => {}
            }
        }

        match resolve_clone_url(&https_url, &ssh_url, self.prefer_https) {
            Some(clone_url) => Some(Repository {
                clone_url,
                name: repo.slug,
                namespace,
                private: repo.is_private,
            }),
            None => {
                warn!("Skipping {}: no usable clone URL", repo.full_name);
                None
            }
        }
    }
}

#[async_trait]
impl RepoLister for BitbucketClient {
    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        if self.ignore_fork {
            // Bitbucket's listing payload carries no fork indicator.
            warn!("Bitbucket listings do not report fork status; ignore-fork has no effect");
        }

        let mut repositories = Vec::new();

        let workspaces: Vec<Workspace> = self
            .fetch_all(format!("{}/2.0/workspaces", self.base_url))
            .await
            .context("failed to list Bitbucket workspaces")?;

        for workspace in workspaces {
            let repos: Vec<BitbucketRepo> = self
                .fetch_all(format!("{}/2.0/repositories/{}", self.base_url, workspace.slug))
                .await
                .with_context(|| {
                    format!("failed to list repositories in workspace {}", workspace.slug)
                })?;

            for repo in repos {
                if let Some(repo) = self.convert(repo) {
                    repositories.push(repo);
                }
            }
        }

        Ok(repositories)
    }

    fn service(&self) -> Service {
        Service::Bitbucket
    }
}
