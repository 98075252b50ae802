use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Upper limit on simultaneous clone/fetch operations unless configured
/// otherwise.
pub const DEFAULT_MAX_CONCURRENT_CLONES: usize = 20;

/// Default number of attempts when creating a GitHub user migration.
pub const DEFAULT_MIGRATION_RETRY_MAX: u32 = 5;

const CONFIG_FILE_NAME: &str = "repovault.yml";

pub const GITHUB_REPO_TYPES: &[&str] = &["all", "owner", "member", "starred"];
pub const GITLAB_PROJECT_VISIBILITIES: &[&str] = &["internal", "public", "private"];
pub const GITLAB_MEMBERSHIP_TYPES: &[&str] = &["all", "owner", "member", "starred"];
pub const FORGEJO_REPO_TYPES: &[&str] = &["user", "starred"];

/// The hosting services we know how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Github,
    Gitlab,
    Bitbucket,
    Forgejo,
}

impl Service {
    pub fn as_str(self) -> &'static str {
        match self {
            Service::Github => "github",
            Service::Gitlab => "gitlab",
            Service::Bitbucket => "bitbucket",
            Service::Forgejo => "forgejo",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "github" => Ok(Service::Github),
            "gitlab" => Ok(Service::Gitlab),
            "bitbucket" => Ok(Service::Bitbucket),
            "forgejo" => Ok(Service::Forgejo),
            other => Err(anyhow!(
                "unknown service {other:?}: expected github, gitlab, bitbucket or forgejo"
            )),
        }
    }
}

/// Fully resolved run configuration, threaded immutably through every
/// component. Produced once, up front, from the config file merged with
/// explicitly-set CLI flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub service: Service,
    pub git_host_url: Option<String>,

    /// Backup root with the service (or custom host) segment already
    /// appended and shell expansion applied.
    pub backup_dir: PathBuf,

    pub ignore_private: bool,
    pub ignore_fork: bool,
    pub use_https_clone: bool,
    pub bare: bool,

    /// Namespaces to mirror from; empty means no restriction.
    pub namespace_whitelist: Vec<String>,

    pub max_concurrent_clones: usize,

    pub github_repo_type: String,
    pub gitlab_project_visibility: String,
    pub gitlab_project_membership_type: String,
    pub forgejo_repo_type: String,

    pub migration: MigrationConfig,
}

/// GitHub user-migration flags. CLI-only: one-off operations that don't
/// belong in the config file.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub create: bool,
    pub retry: bool,
    pub retry_max: u32,
    pub list: bool,
    pub wait: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            create: false,
            retry: true,
            retry_max: DEFAULT_MIGRATION_RETRY_MAX,
            list: false,
            wait: true,
        }
    }
}

impl Config {
    /// Resolve a merged file configuration into the final run configuration.
    pub fn resolve(file: FileConfig, migration: MigrationConfig) -> Result<Self> {
        let service: Service = file.service.parse()?;
        let git_host_url = if file.githost_url.is_empty() {
            None
        } else {
            Some(file.githost_url.clone())
        };
        let backup_dir =
            resolve_backup_dir(&file.backup_dir, service, git_host_url.as_deref())?;

        Ok(Self {
            service,
            git_host_url,
            backup_dir,
            ignore_private: file.ignore_private,
            ignore_fork: file.ignore_fork,
            use_https_clone: file.use_https_clone,
            bare: file.bare,
            namespace_whitelist: file.namespace_whitelist,
            max_concurrent_clones: file.max_concurrent_clones.max(1),
            github_repo_type: file.github.repo_type,
            gitlab_project_visibility: file.gitlab.project_visibility,
            gitlab_project_membership_type: file.gitlab.project_membership_type,
            forgejo_repo_type: file.forgejo.repo_type,
            migration,
        })
    }

    /// Reject selector values outside the service's vocabulary before any
    /// network traffic happens.
    pub fn validate(&self) -> Result<()> {
        match self.service {
            Service::Github => {
                if !GITHUB_REPO_TYPES.contains(&self.github_repo_type.as_str()) {
                    bail!(
                        "invalid github repo type {:?}: must be all, owner, member or starred",
                        self.github_repo_type
                    );
                }
            }
            Service::Gitlab => {
                if !GITLAB_MEMBERSHIP_TYPES
                    .contains(&self.gitlab_project_membership_type.as_str())
                {
                    bail!(
                        "invalid gitlab project membership {:?}: must be all, owner, member or starred",
                        self.gitlab_project_membership_type
                    );
                }
            }
            Service::Forgejo => {
                if !FORGEJO_REPO_TYPES.contains(&self.forgejo_repo_type.as_str()) {
                    bail!(
                        "invalid forgejo repo type {:?}: must be user or starred",
                        self.forgejo_repo_type
                    );
                }
            }
            Service::Bitbucket => {}
        }
        Ok(())
    }
}

/// The YAML configuration file structure. Migration flags are intentionally
/// excluded: they are one-off operations better suited to CLI flags.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    pub service: String,
    pub githost_url: String,
    pub backup_dir: String,
    pub ignore_private: bool,
    pub ignore_fork: bool,
    pub use_https_clone: bool,
    pub bare: bool,
    pub namespace_whitelist: Vec<String>,
    pub max_concurrent_clones: usize,
    pub github: GithubFileConfig,
    pub gitlab: GitlabFileConfig,
    pub forgejo: ForgejoFileConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GithubFileConfig {
    pub repo_type: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitlabFileConfig {
    pub project_visibility: String,
    pub project_membership_type: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForgejoFileConfig {
    pub repo_type: String,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            service: "github".to_string(),
            githost_url: String::new(),
            backup_dir: String::new(),
            ignore_private: false,
            ignore_fork: false,
            use_https_clone: false,
            bare: false,
            namespace_whitelist: Vec::new(),
            max_concurrent_clones: DEFAULT_MAX_CONCURRENT_CLONES,
            github: GithubFileConfig::default(),
            gitlab: GitlabFileConfig::default(),
            forgejo: ForgejoFileConfig::default(),
        }
    }
}

impl Default for GithubFileConfig {
    fn default() -> Self {
        Self {
            repo_type: "all".to_string(),
        }
    }
}

impl Default for GitlabFileConfig {
    fn default() -> Self {
        Self {
            project_visibility: "internal".to_string(),
            project_membership_type: "all".to_string(),
        }
    }
}

impl Default for ForgejoFileConfig {
    fn default() -> Self {
        Self {
            repo_type: "user".to_string(),
        }
    }
}

impl FileConfig {
    /// Load and parse the config file at the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Write this configuration to a file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let content =
            serde_yaml::to_string(self).context("failed to serialize configuration")?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write config file {}", path.display()))
    }

    /// Collect every problem with this file configuration, including missing
    /// token environment variables for the selected service.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let service = match self.service.parse::<Service>() {
            Ok(service) => Some(service),
            Err(_) => {
                errors.push(format!(
                    "invalid service: {:?} (must be github, gitlab, bitbucket or forgejo)",
                    self.service
                ));
                None
            }
        };

        match service {
            Some(Service::Github) => {
                if !GITHUB_REPO_TYPES.contains(&self.github.repo_type.as_str()) {
                    errors.push(format!(
                        "invalid github.repo_type: {:?} (must be all, owner, member or starred)",
                        self.github.repo_type
                    ));
                }
                if env_missing("GITHUB_TOKEN") {
                    errors.push("GITHUB_TOKEN environment variable not set".to_string());
                }
            }
            Some(Service::Gitlab) => {
                if !GITLAB_PROJECT_VISIBILITIES
                    .contains(&self.gitlab.project_visibility.as_str())
                {
                    errors.push(format!(
                        "invalid gitlab.project_visibility: {:?} (must be internal, public or private)",
                        self.gitlab.project_visibility
                    ));
                }
                if !GITLAB_MEMBERSHIP_TYPES
                    .contains(&self.gitlab.project_membership_type.as_str())
                {
                    errors.push(format!(
                        "invalid gitlab.project_membership_type: {:?} (must be all, owner, member or starred)",
                        self.gitlab.project_membership_type
                    ));
                }
                if env_missing("GITLAB_TOKEN") {
                    errors.push("GITLAB_TOKEN environment variable not set".to_string());
                }
            }
            Some(Service::Bitbucket) => {
                if env_missing("BITBUCKET_USERNAME") {
                    errors.push("BITBUCKET_USERNAME environment variable not set".to_string());
                }
                if env_missing("BITBUCKET_TOKEN") && env_missing("BITBUCKET_PASSWORD") {
                    errors.push(
                        "BITBUCKET_TOKEN or BITBUCKET_PASSWORD environment variable must be set"
                            .to_string(),
                    );
                }
            }
            Some(Service::Forgejo) => {
                if !FORGEJO_REPO_TYPES.contains(&self.forgejo.repo_type.as_str()) {
                    errors.push(format!(
                        "invalid forgejo.repo_type: {:?} (must be user or starred)",
                        self.forgejo.repo_type
                    ));
                }
                if env_missing("FORGEJO_TOKEN") {
                    errors.push("FORGEJO_TOKEN environment variable not set".to_string());
                }
            }
            None => {}
        }

        errors
    }
}

/// The OS-specific default config file path.
pub fn default_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().context("unable to determine config directory")?;
    Ok(config_dir.join("repovault").join(CONFIG_FILE_NAME))
}

/// The config path to use: an explicit path as-is, otherwise the OS default.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => default_config_path(),
    }
}

/// Create a default config file, refusing to overwrite an existing one.
/// Returns the path written.
pub fn init_config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    let path = resolve_config_path(explicit)?;
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    FileConfig::default().save(&path)?;
    Ok(path)
}

/// Resolve the backup root: default to `~/.repovault` when unset, append the
/// service name (or the custom host's DNS name), and shell-expand.
fn resolve_backup_dir(
    backup_dir: &str,
    service: Service,
    git_host_url: Option<&str>,
) -> Result<PathBuf> {
    let base = if backup_dir.is_empty() {
        "~/.repovault".to_string()
    } else {
        backup_dir.to_string()
    };
    let expanded = shellexpand::full(&base)
        .with_context(|| format!("failed to expand backup directory {base:?}"))?;

    let segment = match git_host_url {
        Some(url) => reqwest::Url::parse(url)
            .with_context(|| format!("invalid git host URL {url:?}"))?
            .host_str()
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("git host URL {url:?} has no host name"))?,
        None => service.as_str().to_string(),
    };

    Ok(PathBuf::from(expanded.as_ref()).join(segment))
}

/// Read a required, non-empty environment variable.
pub(crate) fn required_env(var: &str) -> Result<String> {
    let value =
        env::var(var).map_err(|_| anyhow!("{var} environment variable not set"))?;
    if value.is_empty() {
        bail!("{var} environment variable is empty");
    }
    Ok(value)
}

fn env_missing(var: &str) -> bool {
    env::var(var).map(|v| v.is_empty()).unwrap_or(true)
}
