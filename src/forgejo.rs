use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::{required_env, Config, Service};
use crate::discovery::{RepoLister, MAX_PAGES};
use crate::repository::{resolve_clone_url, Repository};

const PUBLIC_CODEBERG: &str = "https://codeberg.org";
const PAGE_LIMIT: u32 = 50;

/// Forgejo adapter. The `user` repo type lists the authenticated user's own
/// repositories; `starred` resolves the user's id first and then searches
/// repositories starred by that id.
pub struct ForgejoClient {
    http: reqwest::Client,
    base_url: String,
    repo_type: String,
    ignore_fork: bool,
    prefer_https: bool,
}

#[derive(Debug, Deserialize)]
struct ForgejoRepo {
    name: String,
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    clone_url: String,
    #[serde(default)]
    ssh_url: String,
    owner: Option<ForgejoOwner>,
}

#[derive(Debug, Deserialize)]
struct ForgejoOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ForgejoUser {
    id: i64,
    login: String,
}

/// Envelope of `/repos/search` responses.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<ForgejoRepo>,
}

impl ForgejoClient {
    pub fn new(config: &Config, token: String) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut value = HeaderValue::from_str(&format!("token {token}"))
            .context("Forgejo token is not a valid header value")?;
        value.set_sensitive(true);
        headers.insert("Authorization", value);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to create Forgejo HTTP client")?;

        let base_url = config
            .git_host_url
            .as_deref()
            .unwrap_or(PUBLIC_CODEBERG)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http,
            base_url,
            repo_type: config.forgejo_repo_type.clone(),
            ignore_fork: config.ignore_fork,
            prefer_https: config.use_https_clone,
        })
    }

    /// Build a client authenticated with `FORGEJO_TOKEN`.
    pub fn from_env(config: &Config) -> Result<Self> {
        Self::new(config, required_env("FORGEJO_TOKEN")?)
    }

    async fn user_repositories(&self) -> Result<Vec<Repository>> {
        let url = format!("{}/api/v1/user/repos", self.base_url);
        let mut repositories = Vec::new();
        let mut page: u32 = 1;

        loop {
            let repos: Vec<ForgejoRepo> = self
                .http
                .get(&url)
                .query(&[("page", page.to_string()), ("limit", PAGE_LIMIT.to_string())])
                .send()
                .await
                .with_context(|| format!("Forgejo repository listing failed (page {page})"))?
                .error_for_status()
                .with_context(|| format!("Forgejo rejected the repository listing (page {page})"))?
                .json()
                .await
                .with_context(|| {
                    format!("failed to decode Forgejo repository listing (page {page})")
                })?;

            // An empty page is the end of the listing.
            if repos.is_empty() {
                break;
            }
            for repo in repos {
                if let Some(repo) = self.convert(repo) {
                    repositories.push(repo);
                }
            }

            page += 1;
            if page > MAX_PAGES {
                bail!("Forgejo repository listing did not terminate after {MAX_PAGES} pages");
            }
        }

        Ok(repositories)
    }

    async fn starred_repositories(&self) -> Result<Vec<Repository>> {
        let user: ForgejoUser = self
            .http
            .get(format!("{}/api/v1/user", self.base_url))
            .send()
            .await
            .context("failed to fetch the authenticated Forgejo user")?
            .error_for_status()
            .context("Forgejo rejected the user lookup")?
            .json()
            .await
            .context("failed to decode the Forgejo user")?;

        info!("Listing stars of Forgejo user {} (id {})", user.login, user.id);

        let url = format!("{}/api/v1/repos/search", self.base_url);
        let mut repositories = Vec::new();
        let mut page: u32 = 1;

        loop {
            let resp: SearchResponse = self
                .http
                .get(&url)
                .query(&[
                    ("starredBy", user.id.to_string()),
                    ("page", page.to_string()),
                    ("limit", PAGE_LIMIT.to_string()),
                ])
                .send()
                .await
                .with_context(|| format!("Forgejo star search failed (page {page})"))?
                .error_for_status()
                .with_context(|| format!("Forgejo rejected the star search (page {page})"))?
                .json()
                .await
                .with_context(|| format!("failed to decode Forgejo star search (page {page})"))?;

            if resp.data.is_empty() {
                break;
            }
            for repo in resp.data {
                if let Some(repo) = self.convert(repo) {
                    repositories.push(repo);
                }
            }

            page += 1;
            if page > MAX_PAGES {
                bail!("Forgejo star search did not terminate after {MAX_PAGES} pages");
            }
        }

        Ok(repositories)
    }

    fn convert(&self, repo: ForgejoRepo) -> Option<Repository> {
        // The owner field is more reliable than splitting full_name.
        let namespace = repo
            .owner
            .as_ref()
            .map(|owner| owner.login.clone())
            .filter(|login| !login.is_empty())
            .or_else(|| {
                repo.full_name
                    .split('/')
                    .next()
                    .filter(|ns| !ns.is_empty())
                    .map(str::to_owned)
            });
        let namespace = match namespace {
            Some(ns) => ns,
            None => {
                warn!("Skipping {}: repository has no owner", repo.name);
                return None;
            }
        };

        match resolve_clone_url(&repo.clone_url, &repo.ssh_url, self.prefer_https) {
            Some(clone_url) => Some(Repository {
                clone_url,
                name: repo.name,
                namespace,
                private: repo.private,
            }),
            None => {
                warn!("Skipping {}/{}: no usable clone URL", namespace, repo.name);
                None
            }
        }
    }
}

#[async_trait]
impl RepoLister for ForgejoClient {
    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        if self.ignore_fork {
            // The listing payload carries no reliable fork indicator.
            warn!("Forgejo listings do not report fork status; ignore-fork has no effect");
        }

        match self.repo_type.as_str() {
            "user" | "" => self.user_repositories().await,
            "starred" => self.starred_repositories().await,
            other => bail!("unknown Forgejo repo type: {other}"),
        }
    }

    fn service(&self) -> Service {
        Service::Forgejo
    }
}
