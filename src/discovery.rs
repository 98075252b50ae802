//! Provider-uniform repository discovery.
//!
//! Each hosting service exposes a different paginated listing API and filter
//! vocabulary; the adapters normalize them into [`Repository`] values and
//! this module applies the filters that are not expressible as provider
//! query parameters.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::bitbucket::BitbucketClient;
use crate::config::{Config, Service};
use crate::forgejo::ForgejoClient;
use crate::github::GithubClient;
use crate::gitlab::GitlabClient;
use crate::repository::Repository;

/// Cap on listing pages per call chain. A provider that never reports a
/// final page becomes a reported error instead of an unbounded loop.
pub(crate) const MAX_PAGES: u32 = 1_000;

/// A hosting service that can enumerate the repositories visible to the
/// authenticated user.
#[async_trait]
pub trait RepoLister: Send + Sync {
    /// List every repository matching the configured selector, in provider
    /// page order. Any transport or HTTP error aborts the whole listing.
    async fn list_repositories(&self) -> Result<Vec<Repository>>;

    /// The service this lister talks to.
    fn service(&self) -> Service;
}

/// Build the lister for the configured service, reading the service's token
/// from the environment.
pub fn lister_from_env(config: &Config) -> Result<Box<dyn RepoLister>> {
    let lister: Box<dyn RepoLister> = match config.service {
        Service::Github => Box::new(GithubClient::from_env(config)?),
        Service::Gitlab => Box::new(GitlabClient::from_env(config)?),
        Service::Bitbucket => Box::new(BitbucketClient::from_env(config)?),
        Service::Forgejo => Box::new(ForgejoClient::from_env(config)?),
    };
    Ok(lister)
}

/// Discover the repositories to mirror: the provider listing plus the
/// cross-provider filters (namespace whitelist, ignore-private). Output
/// order is the adapter's page order; no sorting happens here or downstream.
pub async fn discover(lister: &dyn RepoLister, config: &Config) -> Result<Vec<Repository>> {
    let repositories = lister.list_repositories().await?;
    info!(
        "Found {} repositories on {}",
        repositories.len(),
        lister.service()
    );

    let filtered = apply_filters(repositories, config);
    info!("{} repositories after filtering", filtered.len());
    Ok(filtered)
}

fn apply_filters(repositories: Vec<Repository>, config: &Config) -> Vec<Repository> {
    repositories
        .into_iter()
        .filter(|repo| {
            if !config.namespace_whitelist.is_empty()
                && !config
                    .namespace_whitelist
                    .iter()
                    .any(|ns| ns == &repo.namespace)
            {
                debug!("Excluding {repo}: namespace not whitelisted");
                return false;
            }
            if config.ignore_private && repo.private {
                debug!("Excluding {repo}: private");
                return false;
            }
            true
        })
        .collect()
}
