//! GitHub user-migration workflow.
//!
//! A migration is an asynchronous, provider-managed export of account data.
//! The client only creates jobs and observes their state; all transitions
//! happen on the provider side and are picked up by polling.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::github::GithubClient;
use crate::repository::Repository;

/// How often the wait loop polls a migration's state.
const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Lifecycle state of a user migration, as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    Pending,
    Exporting,
    Exported,
    Failed,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            MigrationState::Pending => "pending",
            MigrationState::Exporting => "exporting",
            MigrationState::Exported => "exported",
            MigrationState::Failed => "failed",
        };
        f.write_str(state)
    }
}

/// A user migration as reported by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct Migration {
    pub id: u64,
    pub state: MigrationState,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Create a user migration covering the given repositories, retrying per
/// the configured policy. The job starts out `pending`; export progress is
/// observed through [`wait_for_completion`].
pub async fn create_user_migration(
    client: &GithubClient,
    repositories: &[Repository],
    config: &Config,
) -> Result<Migration> {
    if repositories.is_empty() {
        bail!("no repositories to include in the migration");
    }
    let names: Vec<String> = repositories.iter().map(|repo| repo.to_string()).collect();

    let attempts = if config.migration.retry {
        config.migration.retry_max.max(1)
    } else {
        1
    };

    let mut last_error = None;
    for attempt in 1..=attempts {
        match try_create(client, &names).await {
            Ok(migration) => {
                info!(
                    "Created migration {} covering {} repositories (state: {})",
                    migration.id,
                    names.len(),
                    migration.state
                );
                return Ok(migration);
            }
            Err(err) => {
                warn!("Migration create attempt {attempt}/{attempts} failed: {err:#}");
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("migration creation failed")))
}

async fn try_create(client: &GithubClient, repository_names: &[String]) -> Result<Migration> {
    let body = serde_json::json!({
        "repositories": repository_names,
        "lock_repositories": false,
    });
    let migration: Migration = client
        .inner()
        .post("/user/migrations", Some(&body))
        .await
        .context("GitHub migration create request failed")?;
    Ok(migration)
}

/// List every migration the provider knows for the account. A simple read;
/// no polling.
pub async fn list_user_migrations(client: &GithubClient) -> Result<Vec<Migration>> {
    let migrations: Vec<Migration> = client
        .inner()
        .get("/user/migrations", None::<&()>)
        .await
        .context("failed to list GitHub user migrations")?;
    Ok(migrations)
}

/// Fetch the current state of one migration.
pub async fn migration_status(client: &GithubClient, id: u64) -> Result<Migration> {
    let migration: Migration = client
        .inner()
        .get(format!("/user/migrations/{id}"), None::<&()>)
        .await
        .with_context(|| format!("failed to fetch status of migration {id}"))?;
    Ok(migration)
}

/// Poll until the migration reaches `exported` (success) or `failed`
/// (error). Blocks the calling flow for the entire wait; a poll failure
/// terminates the wait with an error.
pub async fn wait_for_completion(client: &GithubClient, id: u64) -> Result<Migration> {
    wait_with_interval(client, id, POLL_INTERVAL).await
}

async fn wait_with_interval(
    client: &GithubClient,
    id: u64,
    interval: Duration,
) -> Result<Migration> {
    loop {
        let migration = migration_status(client, id).await?;
        match migration.state {
            MigrationState::Exported => {
                info!("Migration {id} export completed");
                return Ok(migration);
            }
            MigrationState::Failed => bail!("migration {id} failed on the provider side"),
            state => {
                info!(
                    "Migration {id} is {state}; polling again in {}s",
                    interval.as_secs()
                );
                tokio::time::sleep(interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileConfig, MigrationConfig};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn github_client(server: &MockServer, migration: MigrationConfig) -> (Config, GithubClient) {
        let file = FileConfig {
            githost_url: server.uri(),
            backup_dir: "/tmp/repovault-test".to_string(),
            ..FileConfig::default()
        };
        let config = Config::resolve(file, migration).unwrap();
        let client = GithubClient::new(&config, "token".to_string()).unwrap();
        (config, client)
    }

    fn repo(namespace: &str, name: &str) -> Repository {
        Repository {
            clone_url: format!("git@github.com:{namespace}/{name}.git"),
            name: name.to_string(),
            namespace: namespace.to_string(),
            private: false,
        }
    }

    fn migration_json(id: u64, state: &str) -> serde_json::Value {
        json!({
            "id": id,
            "state": state,
            "created_at": "2024-03-11T09:00:00Z",
        })
    }

    #[tokio::test]
    async fn test_create_names_the_discovered_repositories() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/user/migrations"))
            .and(body_partial_json(json!({
                "repositories": ["acme/api", "acme/web"],
                "lock_repositories": false,
            })))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(migration_json(79, "pending")),
            )
            .mount(&server)
            .await;

        let (config, client) = github_client(&server, MigrationConfig::default());
        let repos = vec![repo("acme", "api"), repo("acme", "web")];
        let migration = create_user_migration(&client, &repos, &config)
            .await
            .unwrap();

        assert_eq!(migration.id, 79);
        assert_eq!(migration.state, MigrationState::Pending);
        assert!(migration.created_at.is_some());
    }

    #[tokio::test]
    async fn test_create_retries_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/user/migrations"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/user/migrations"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(migration_json(80, "pending")),
            )
            .mount(&server)
            .await;

        let (config, client) = github_client(&server, MigrationConfig::default());
        let migration = create_user_migration(&client, &[repo("acme", "api")], &config)
            .await
            .unwrap();
        assert_eq!(migration.id, 80);
    }

    #[tokio::test]
    async fn test_create_surfaces_error_after_exhausting_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/user/migrations"))
            .respond_with(ResponseTemplate::new(502))
            .expect(2)
            .mount(&server)
            .await;

        let migration_config = MigrationConfig {
            retry_max: 2,
            ..MigrationConfig::default()
        };
        let (config, client) = github_client(&server, migration_config);
        let result = create_user_migration(&client, &[repo("acme", "api")], &config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_create_without_retry_attempts_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/user/migrations"))
            .respond_with(ResponseTemplate::new(502))
            .expect(1)
            .mount(&server)
            .await;

        let migration_config = MigrationConfig {
            retry: false,
            ..MigrationConfig::default()
        };
        let (config, client) = github_client(&server, migration_config);
        let result = create_user_migration(&client, &[repo("acme", "api")], &config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_list_reports_current_states() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/migrations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                migration_json(79, "exported"),
                migration_json(80, "exporting"),
            ])))
            .mount(&server)
            .await;

        let (_config, client) = github_client(&server, MigrationConfig::default());
        let migrations = list_user_migrations(&client).await.unwrap();

        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].state, MigrationState::Exported);
        assert_eq!(migrations[1].state, MigrationState::Exporting);
    }

    #[tokio::test]
    async fn test_wait_polls_until_exported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/migrations/79"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(migration_json(79, "exporting")),
            )
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user/migrations/79"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(migration_json(79, "exported")),
            )
            .mount(&server)
            .await;

        let (_config, client) = github_client(&server, MigrationConfig::default());
        let migration = wait_with_interval(&client, 79, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(migration.state, MigrationState::Exported);
    }

    #[tokio::test]
    async fn test_wait_errors_when_the_export_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/migrations/79"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(migration_json(79, "failed")),
            )
            .mount(&server)
            .await;

        let (_config, client) = github_client(&server, MigrationConfig::default());
        let err = wait_with_interval(&client, 79, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed"));
    }

    #[tokio::test]
    async fn test_create_requires_repositories() {
        let server = MockServer::start().await;
        let (config, client) = github_client(&server, MigrationConfig::default());
        let result = create_user_migration(&client, &[], &config).await;
        assert!(result.is_err());
    }
}
