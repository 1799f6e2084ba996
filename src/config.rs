use crate::error::{ReleaseError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "release-tools.toml";

const DEFAULT_REPOSITORIES: [&str; 5] = [
    "core",
    "administration",
    "storefront",
    "elasticsearch",
    "recovery",
];

const DEFAULT_REPO_BASE_URL: &str = "git@gitlab.shopware.com:shopware/6/product/many-repositories";

/// Represents the complete configuration for release-tools.
///
/// Built once at startup and passed into every service; nothing below
/// `main` reads the environment.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Checkout of the consuming project holding the dependency manifest
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,

    /// Minimum stability of the release (`stable`, `rc`, `beta`, `alpha`)
    #[serde(default = "default_stability")]
    pub stability: String,

    /// Oldest version allowed to update to a release
    #[serde(default = "default_minimum_version")]
    pub minimum_version: String,

    /// Sign commits and tags
    #[serde(default)]
    pub sign: bool,

    #[serde(default = "default_development_branch")]
    pub development_branch: String,

    /// Remote receiving the release branch
    #[serde(default)]
    pub release_remote_url: Option<String>,

    /// Vendor prefix of the managed packages in the lock file
    #[serde(default = "default_package_vendor")]
    pub package_vendor: String,

    /// Repository whose commit pin file is copied into the project root
    #[serde(default = "default_pin_repository")]
    pub pin_repository: String,

    #[serde(default = "default_pin_file")]
    pub pin_file: String,

    #[serde(default = "default_installer_version_file")]
    pub installer_version_file: PathBuf,

    #[serde(default = "default_repos")]
    pub repos: Vec<RepositoryRef>,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub git: GitConfig,

    #[serde(default)]
    pub deploy: DeployConfig,

    #[serde(default)]
    pub update_api: UpdateApiConfig,

    #[serde(default)]
    pub version_tracker: VersionTrackerConfig,

    /// JSON file with per-locale changelog lines
    #[serde(default)]
    pub changelog_file: Option<PathBuf>,
}

/// One managed component repository
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct RepositoryRef {
    pub name: String,
    pub path: PathBuf,
    pub remote_url: String,
    /// Remote used to fetch a commit without a full checkout
    #[serde(default)]
    pub read_url: Option<String>,
}

impl RepositoryRef {
    /// Package name in the lock file, e.g. `shopware/core`
    pub fn package_name(&self, vendor: &str) -> String {
        format!("{}/{}", vendor, self.name)
    }
}

/// Lock file regeneration and its retry loop
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct LockConfig {
    #[serde(default = "default_lock_command")]
    pub command: Vec<String>,
    #[serde(default = "default_lock_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_initial_wait")]
    pub initial_wait_secs: u64,
    #[serde(default = "default_retry_wait")]
    pub retry_wait_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn initial_wait(&self) -> Duration {
        Duration::from_secs(self.initial_wait_secs)
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_secs(self.retry_wait_secs)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            command: default_lock_command(),
            timeout_secs: default_lock_timeout(),
            initial_wait_secs: default_initial_wait(),
            retry_wait_secs: default_retry_wait(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct GitConfig {
    #[serde(default = "default_git_timeout")]
    pub timeout_secs: u64,
    /// Committer identity for release commits and tags; git's own
    /// configuration applies when unset
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
    /// Private key tried first when listing remote branches
    #[serde(default)]
    pub ssh_key: Option<PathBuf>,
}

impl GitConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        GitConfig {
            timeout_secs: default_git_timeout(),
            user_name: None,
            user_email: None,
            ssh_key: None,
        }
    }
}

/// Artifact and public download locations
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct DeployConfig {
    /// Build outputs (`install.zip`, `update.zip`, `install.tar.xz`)
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    /// Root of the public download area
    #[serde(default = "default_deploy_dir")]
    pub deploy_dir: PathBuf,
    #[serde(default = "default_public_domain")]
    pub public_domain: String,
    /// Release manifest path inside the deploy area
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,
    /// Browsable source repository used for release links
    #[serde(default = "default_source_browse_url")]
    pub source_browse_url: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        DeployConfig {
            artifacts_dir: default_artifacts_dir(),
            deploy_dir: default_deploy_dir(),
            public_domain: default_public_domain(),
            manifest_path: default_manifest_path(),
            source_browse_url: default_source_browse_url(),
        }
    }
}

/// Update-notification service reached through a remote console
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct UpdateApiConfig {
    #[serde(default)]
    pub host: Option<String>,
    /// Full command prefix; derived from `host` when empty
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_update_api_timeout")]
    pub timeout_secs: u64,
}

impl UpdateApiConfig {
    /// Command prefix the operation and its parameters are appended to
    pub fn command_prefix(&self) -> Result<Vec<String>> {
        if !self.command.is_empty() {
            return Ok(self.command.clone());
        }
        let host = self
            .host
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ReleaseError::config("update_api.host or update_api.command is required"))?;
        Ok(vec![
            "ssh".to_string(),
            format!("shopware@{}", host),
            "php".to_string(),
            "/var/www/shopware-update-api/bin/console".to_string(),
        ])
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for UpdateApiConfig {
    fn default() -> Self {
        UpdateApiConfig {
            host: None,
            command: Vec::new(),
            timeout_secs: default_update_api_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Default)]
pub struct VersionTrackerConfig {
    #[serde(default)]
    pub base_uri: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_stability() -> String {
    "stable".to_string()
}

fn default_minimum_version() -> String {
    "6.2.2".to_string()
}

fn default_development_branch() -> String {
    "trunk".to_string()
}

fn default_package_vendor() -> String {
    "shopware".to_string()
}

fn default_pin_repository() -> String {
    "core".to_string()
}

fn default_pin_file() -> String {
    "PLATFORM_COMMIT_SHA".to_string()
}

fn default_installer_version_file() -> PathBuf {
    PathBuf::from("public/recovery/install/data/version")
}

/// The five component repositories under `repos/<name>`
pub fn default_repos() -> Vec<RepositoryRef> {
    repos_for(&default_project_root(), DEFAULT_REPO_BASE_URL)
}

fn repos_for(project_root: &Path, base_url: &str) -> Vec<RepositoryRef> {
    let base_url = base_url.trim_end_matches('/');
    DEFAULT_REPOSITORIES
        .iter()
        .map(|name| RepositoryRef {
            name: name.to_string(),
            path: project_root.join("repos").join(name),
            remote_url: format!("{}/{}", base_url, name),
            read_url: None,
        })
        .collect()
}

fn default_lock_command() -> Vec<String> {
    [
        "composer",
        "update",
        "-vvv",
        "shopware/*",
        "--no-interaction",
        "--no-scripts",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_lock_timeout() -> u64 {
    600
}

fn default_initial_wait() -> u64 {
    45
}

fn default_retry_wait() -> u64 {
    15
}

fn default_max_attempts() -> u32 {
    10
}

fn default_git_timeout() -> u64 {
    300
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_deploy_dir() -> PathBuf {
    PathBuf::from("deploy")
}

fn default_public_domain() -> String {
    "https://releases.shopware.com".to_string()
}

fn default_manifest_path() -> String {
    "_meta/shopware6.xml".to_string()
}

fn default_source_browse_url() -> String {
    "https://github.com/shopware/platform".to_string()
}

fn default_update_api_timeout() -> u64 {
    120
}

impl Default for Config {
    fn default() -> Self {
        Config {
            project_root: default_project_root(),
            stability: default_stability(),
            minimum_version: default_minimum_version(),
            sign: false,
            development_branch: default_development_branch(),
            release_remote_url: None,
            package_vendor: default_package_vendor(),
            pin_repository: default_pin_repository(),
            pin_file: default_pin_file(),
            installer_version_file: default_installer_version_file(),
            repos: default_repos(),
            lock: LockConfig::default(),
            git: GitConfig::default(),
            deploy: DeployConfig::default(),
            update_api: UpdateApiConfig::default(),
            version_tracker: VersionTrackerConfig::default(),
            changelog_file: None,
        }
    }
}

impl Config {
    /// Override values from CI-provided variables.
    ///
    /// `lookup` is the environment in production and a map in tests.
    /// A new `PROJECT_ROOT` or `MANY_REPO_BASE_URL` regenerates the
    /// repository list only when it still holds the defaults.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let repos_are_default = self.repos == repos_for(&self.project_root, DEFAULT_REPO_BASE_URL);

        if let Some(root) = get("PROJECT_ROOT") {
            self.project_root = PathBuf::from(root);
        }
        if let Some(stability) = get("STABILITY").or_else(|| get("MINIMUM_STABILITY")) {
            self.stability = stability;
        }
        if let Some(min) = get("MINIMUM_VERSION") {
            self.minimum_version = min;
        }
        if let Some(url) = get("CI_REPOSITORY_URL") {
            self.release_remote_url = Some(url);
        }
        if let Some(sign) = get("SIGN_RELEASE") {
            self.sign = matches!(sign.as_str(), "1" | "true" | "yes");
        }
        if repos_are_default {
            let base = get("MANY_REPO_BASE_URL").unwrap_or_else(|| DEFAULT_REPO_BASE_URL.to_string());
            self.repos = repos_for(&self.project_root, &base);
        }
        if let Some(host) = get("UPDATE_API_HOST") {
            self.update_api.host = Some(host);
        }
        if let Some(uri) = get("SBP_API_BASE_URI") {
            self.version_tracker.base_uri = Some(uri);
        }
        if let Some(user) = get("SBP_API_USER") {
            self.version_tracker.user = Some(user);
        }
        if let Some(password) = get("SBP_API_PASSWORD") {
            self.version_tracker.password = Some(password);
        }
        if let Some(key) = get("SSH_PRIVATE_KEY_FILE") {
            self.git.ssh_key = Some(PathBuf::from(key));
        }
        if let Some(domain) = get("RELEASE_PUBLIC_DOMAIN") {
            self.deploy.public_domain = domain;
        }
    }

    /// Look up a managed repository by name
    pub fn repository(&self, name: &str) -> Result<&RepositoryRef> {
        self.repos
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| ReleaseError::config(format!("Unknown repository '{}'", name)))
    }

    /// Sanity checks that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.repos.is_empty() {
            return Err(ReleaseError::config("at least one repository is required"));
        }
        if self.lock.command.is_empty() {
            return Err(ReleaseError::config("lock.command must not be empty"));
        }
        if self.lock.max_attempts == 0 {
            return Err(ReleaseError::config("lock.max_attempts must be at least 1"));
        }
        let mut names: Vec<&str> = self.repos.iter().map(|r| r.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.repos.len() {
            return Err(ReleaseError::config("repository names must be unique"));
        }
        Ok(())
    }
}

/// Loads configuration from file or returns defaults.
///
/// Attempts to load configuration in the following order:
/// 1. Custom path provided as parameter
/// 2. `release-tools.toml` in current directory
/// 3. `release-tools.toml` in the user config directory
/// 4. Default configuration if no file found
///
/// # Arguments
/// * `config_path` - Optional path to custom configuration file
///
/// # Returns
/// * `Ok(Config)` - Loaded or default configuration
/// * `Err` - If file exists but cannot be read or parsed
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config_str = if let Some(path) = config_path {
        fs::read_to_string(path)?
    } else if Path::new(CONFIG_FILE_NAME).exists() {
        fs::read_to_string(CONFIG_FILE_NAME)?
    } else if let Some(config_dir) = dirs::config_dir() {
        let config_path = config_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            fs::read_to_string(config_path)?
        } else {
            return Ok(Config::default());
        }
    } else {
        return Ok(Config::default());
    };

    parse_config(&config_str)
}

/// Parse configuration text
pub fn parse_config(text: &str) -> Result<Config> {
    let config: Config = toml::from_str(text).map_err(|e| ReleaseError::config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
