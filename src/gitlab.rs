use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{required_env, Config, Service};
use crate::discovery::{RepoLister, MAX_PAGES};
use crate::repository::{resolve_clone_url, Repository};

const PUBLIC_GITLAB: &str = "https://gitlab.com";

/// GitLab adapter. Projects are listed through `/api/v4/projects` with the
/// membership selector mapped onto the `owned`/`membership`/`starred`
/// booleans; stars are not a separate listing here.
pub struct GitlabClient {
    http: reqwest::Client,
    base_url: String,
    visibility: String,
    membership: String,
    ignore_fork: bool,
    prefer_https: bool,
}

#[derive(Debug, Deserialize)]
struct GitlabProject {
    name: String,
    path_with_namespace: String,
    #[serde(default)]
    visibility: String,
    #[serde(default)]
    http_url_to_repo: String,
    #[serde(default)]
    ssh_url_to_repo: String,
    /// Present only for forks.
    #[serde(default)]
    forked_from_project: Option<serde_json::Value>,
}

impl GitlabClient {
    pub fn new(config: &Config, token: String) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut value = HeaderValue::from_str(&token)
            .context("GitLab token is not a valid header value")?;
        value.set_sensitive(true);
        headers.insert("PRIVATE-TOKEN", value);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to create GitLab HTTP client")?;

        let base_url = config
            .git_host_url
            .as_deref()
            .unwrap_or(PUBLIC_GITLAB)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http,
            base_url,
            visibility: config.gitlab_project_visibility.clone(),
            membership: config.gitlab_project_membership_type.clone(),
            ignore_fork: config.ignore_fork,
            prefer_https: config.use_https_clone,
        })
    }

    /// Build a client authenticated with `GITLAB_TOKEN`.
    pub fn from_env(config: &Config) -> Result<Self> {
        Self::new(config, required_env("GITLAB_TOKEN")?)
    }

    fn listing_params(&self, page: u32) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("per_page", "100".to_string()),
            ("page", page.to_string()),
        ];

        match self.membership.as_str() {
            "owner" => params.push(("owned", "true".to_string())),
            "member" => params.push(("membership", "true".to_string())),
            "starred" => params.push(("starred", "true".to_string())),
            // "all" requests every project the user owns, joined or starred.
            _ => {
                params.push(("owned", "true".to_string()));
                params.push(("membership", "true".to_string()));
                params.push(("starred", "true".to_string()));
            }
        }

        if self.visibility != "all" {
            let visibility = match self.visibility.as_str() {
                "public" => "public",
                "private" => "private",
                _ => "internal",
            };
            params.push(("visibility", visibility.to_string()));
        }

        params
    }

    fn convert(&self, project: GitlabProject) -> Option<Repository> {
        if self.ignore_fork && project.forked_from_project.is_some() {
            debug!("Skipping fork: {}", project.path_with_namespace);
            return None;
        }

        let namespace = project
            .path_with_namespace
            .split('/')
            .next()
            .unwrap_or("")
            .to_string();
        if namespace.is_empty() {
            warn!("Skipping {}: project has no namespace", project.name);
            return None;
        }

        match resolve_clone_url(
            &project.http_url_to_repo,
            &project.ssh_url_to_repo,
            self.prefer_https,
        ) {
            Some(clone_url) => Some(Repository {
                clone_url,
                name: project.name,
                namespace,
                private: project.visibility == "private",
            }),
            None => {
                warn!(
                    "Skipping {}: no usable clone URL",
                    project.path_with_namespace
                );
                None
            }
        }
    }
}

#[async_trait]
impl RepoLister for GitlabClient {
    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let mut repositories = Vec::new();
        let url = format!("{}/api/v4/projects", self.base_url);
        let mut page: u32 = 1;

        loop {
            let resp = self
                .http
                .get(&url)
                .query(&self.listing_params(page))
                .send()
                .await
                .with_context(|| format!("GitLab project listing failed (page {page})"))?
                .error_for_status()
                .with_context(|| format!("GitLab rejected the project listing (page {page})"))?;

            // The sentinel: an empty or absent x-next-page header ends the
            // listing.
            let next_page = resp
                .headers()
                .get("x-next-page")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("")
                .trim()
                .parse::<u32>()
                .unwrap_or(0);

            let projects: Vec<GitlabProject> = resp
                .json()
                .await
                .with_context(|| format!("failed to decode GitLab project listing (page {page})"))?;

            for project in projects {
                if let Some(repo) = self.convert(project) {
                    repositories.push(repo);
                }
            }

            if next_page == 0 {
                break;
            }
            page = next_page;
            if page > MAX_PAGES {
                bail!("GitLab project listing did not terminate after {MAX_PAGES} pages");
            }
        }

        Ok(repositories)
    }

    fn service(&self) -> Service {
        Service::Gitlab
    }
}
