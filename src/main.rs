use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repovault::config::{self, Config, FileConfig, MigrationConfig, Service};
use repovault::discovery;
use repovault::github::GithubClient;
use repovault::migration;
use repovault::sync::{SyncEngine, SyncSummary};

#[derive(Parser)]
#[command(name = "repovault")]
#[command(about = "Mirror your repositories from GitHub, GitLab, Bitbucket and Forgejo")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (defaults to the OS config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Git hosting service (github, gitlab, bitbucket, forgejo)
    #[arg(long)]
    service: Option<String>,

    /// DNS of a custom git host
    #[arg(long)]
    githost_url: Option<String>,

    /// Backup directory
    #[arg(long)]
    backupdir: Option<String>,

    /// Ignore private repositories/projects
    #[arg(long)]
    ignore_private: bool,

    /// Ignore repositories which are forks
    #[arg(long)]
    ignore_fork: bool,

    /// Use HTTPS for cloning instead of SSH
    #[arg(long)]
    use_https_clone: bool,

    /// Clone bare repositories
    #[arg(long)]
    bare: bool,

    /// Users/organizations/workspaces to mirror from (comma-separated)
    #[arg(long, value_delimiter = ',')]
    namespace_whitelist: Vec<String>,

    /// Maximum simultaneous clone/fetch operations
    #[arg(long)]
    max_concurrent_clones: Option<usize>,

    /// GitHub repo types to back up (all, owner, member, starred)
    #[arg(long)]
    github_repo_type: Option<String>,

    /// Download user data via a GitHub user migration
    #[arg(long)]
    github_create_user_migration: bool,

    /// Retry creating the GitHub user migration on error
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    github_create_user_migration_retry: bool,

    /// Number of attempts for creating the GitHub user migration
    #[arg(long, default_value_t = config::DEFAULT_MIGRATION_RETRY_MAX)]
    github_create_user_migration_retry_max: u32,

    /// List available GitHub user migrations
    #[arg(long)]
    github_list_user_migrations: bool,

    /// Wait for the migration to complete
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    github_wait_for_user_migration: bool,

    /// Visibility of GitLab projects to clone (internal, public, private)
    #[arg(long)]
    gitlab_project_visibility: Option<String>,

    /// GitLab project membership to clone (all, owner, member, starred)
    #[arg(long)]
    gitlab_project_membership_type: Option<String>,

    /// Forgejo repo types to back up (user, starred)
    #[arg(long)]
    forgejo_repo_type: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a default repovault.yml configuration file
    Init,

    /// Validate the repovault.yml configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Some(Commands::Init) => return cmd_init(cli.config.as_deref()),
        Some(Commands::Validate) => return cmd_validate(cli.config.as_deref()),
        None => {}
    }

    let config = resolve_config(&cli)?;
    config.validate()?;

    if config.migration.list {
        cmd_list_migrations(&config).await
    } else if config.migration.create {
        cmd_create_migration(&config).await
    } else {
        cmd_backup(&config).await
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

/// Merge the config file with explicitly-set CLI flags into the resolved
/// run configuration. Flags win over file values; migration flags are
/// CLI-only.
fn resolve_config(cli: &Cli) -> Result<Config> {
    let path = config::resolve_config_path(cli.config.as_deref())?;
    let mut file = if path.exists() {
        info!("Using configuration from {}", path.display());
        FileConfig::load(&path)?
    } else {
        FileConfig::default()
    };

    if let Some(service) = &cli.service {
        file.service = service.clone();
    }
    if let Some(url) = &cli.githost_url {
        file.githost_url = url.clone();
    }
    if let Some(dir) = &cli.backupdir {
        file.backup_dir = dir.clone();
    }
    if cli.ignore_private {
        file.ignore_private = true;
    }
    if cli.ignore_fork {
        file.ignore_fork = true;
    }
    if cli.use_https_clone {
        file.use_https_clone = true;
    }
    if cli.bare {
        file.bare = true;
    }
    if !cli.namespace_whitelist.is_empty() {
        file.namespace_whitelist = cli.namespace_whitelist.clone();
    }
    if let Some(limit) = cli.max_concurrent_clones {
        file.max_concurrent_clones = limit;
    }
    if let Some(repo_type) = &cli.github_repo_type {
        file.github.repo_type = repo_type.clone();
    }
    if let Some(visibility) = &cli.gitlab_project_visibility {
        file.gitlab.project_visibility = visibility.clone();
    }
    if let Some(membership) = &cli.gitlab_project_membership_type {
        file.gitlab.project_membership_type = membership.clone();
    }
    if let Some(repo_type) = &cli.forgejo_repo_type {
        file.forgejo.repo_type = repo_type.clone();
    }

    let migration = MigrationConfig {
        create: cli.github_create_user_migration,
        retry: cli.github_create_user_migration_retry,
        retry_max: cli.github_create_user_migration_retry_max,
        list: cli.github_list_user_migrations,
        wait: cli.github_wait_for_user_migration,
    };

    Config::resolve(file, migration)
}

fn cmd_init(explicit: Option<&Path>) -> Result<()> {
    let path = config::init_config_file(explicit)?;
    println!("Created {}", path.display());
    Ok(())
}

fn cmd_validate(explicit: Option<&Path>) -> Result<()> {
    let path = config::resolve_config_path(explicit)?;
    let file = FileConfig::load(&path)?;

    let errors = file.validation_errors();
    if errors.is_empty() {
        println!("{} is valid", path.display());
        return Ok(());
    }

    println!("Validation errors:");
    for error in &errors {
        println!("  - {error}");
    }
    bail!("config validation failed");
}

/// Discover and mirror every visible repository.
async fn cmd_backup(config: &Config) -> Result<()> {
    let lister = discovery::lister_from_env(config)?;
    let repositories = discovery::discover(lister.as_ref(), config)
        .await
        .context("repository discovery failed")?;

    let engine = SyncEngine::new(config);
    let summary = engine.sync(repositories).await;
    print_summary(&summary);

    if !summary.all_succeeded() {
        bail!(
            "{} of {} repositories failed to sync",
            summary.failures.len(),
            summary.total
        );
    }
    Ok(())
}

fn print_summary(summary: &SyncSummary) {
    println!();
    println!("Backup finished in {:.1}s", summary.duration.as_secs_f64());
    println!("   Repositories: {}", summary.total);
    println!("   Cloned:       {}", summary.cloned);
    println!("   Updated:      {}", summary.updated);
    println!("   Failed:       {}", summary.failures.len());
    for failure in &summary.failures {
        println!("   ❌ {}: {}", failure.repository, failure.error);
    }
}

fn github_only(config: &Config) -> Result<()> {
    if config.service != Service::Github {
        bail!("user migrations are only available for the github service");
    }
    Ok(())
}

async fn cmd_list_migrations(config: &Config) -> Result<()> {
    github_only(config)?;
    let client = GithubClient::from_env(config)?;

    let migrations = migration::list_user_migrations(&client).await?;
    if migrations.is_empty() {
        println!("No user migrations found");
        return Ok(());
    }

    println!("{:<12} {:<10} created", "id", "state");
    for m in &migrations {
        let created = m
            .created_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<12} {:<10} {}", m.id, m.state, created);
    }
    Ok(())
}

async fn cmd_create_migration(config: &Config) -> Result<()> {
    github_only(config)?;
    let client = GithubClient::from_env(config)?;

    // The migration names the repositories discovery would mirror.
    let repositories = discovery::discover(&client, config)
        .await
        .context("repository discovery failed")?;

    let job = migration::create_user_migration(&client, &repositories, config).await?;
    println!("Created migration {} (state: {})", job.id, job.state);

    if config.migration.wait {
        info!("Waiting for migration {} to complete", job.id);
        let done = migration::wait_for_completion(&client, job.id).await?;
        println!("Migration {} completed (state: {})", done.id, done.state);
    }
    Ok(())
}
