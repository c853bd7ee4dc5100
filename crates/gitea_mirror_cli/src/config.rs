//! Configuration file support for gitea-mirror.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `GITEA_MIRROR_`, sections split by `__`,
//!    e.g. `GITEA_MIRROR_GITEA__TOKEN`)
//! 3. Config file (~/.config/gitea-mirror/config.toml or ./gitea-mirror.toml)
//! 4. Built-in defaults
//!
//! The database URL defaults to `sqlite://~/.local/state/gitea-mirror/gitea-mirror.db`
//! on Linux (using the XDG state directory) if not explicitly configured.
//!
//! Example config file:
//! ```toml
//! [database]
//! url = "sqlite://~/.local/state/gitea-mirror/gitea-mirror.db"  # optional
//!
//! [gitea]
//! host = "https://gitea.example.com"
//! token = "..."    # or GITEA_MIRROR_GITEA__TOKEN
//! owner = "mirrors"
//!
//! [github]
//! token = "ghp_..." # only needed for private sources
//!
//! [mirror]
//! user = "alice"
//! concurrency = 3
//! max_retries = 2
//! retry_delay_ms = 2000
//! backoff = "linear"
//! checkpoint_interval = 3
//! requests_per_second = 5
//! ```

use std::path::PathBuf;

use config::{Config as ConfigBuilder, ConfigError, Environment, File, FileFormat};
use directories::ProjectDirs;
use gitea_mirror::batch::{DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_CONCURRENCY_LIMIT};
use gitea_mirror::retry::{Backoff, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS};
use serde::Deserialize;

const APP_NAME: &str = "gitea-mirror";
const ENV_PREFIX: &str = "GITEA_MIRROR";
const DEFAULT_REQUESTS_PER_SECOND: u32 = 5;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    /// Destination Gitea (or Forgejo) instance.
    pub gitea: GiteaConfig,
    /// Source GitHub credentials.
    pub github: GitHubConfig,
    /// Default batch options.
    pub mirror: MirrorConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Supports sqlite:// and postgres:// schemes.
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GiteaConfig {
    /// Base URL, e.g. "https://gitea.example.com".
    pub host: Option<String>,
    pub token: Option<String>,
    /// User or organization that receives the mirrors.
    pub owner: Option<String>,
    /// Pull interval for created mirrors, e.g. "8h0m0s".
    pub mirror_interval: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub token: Option<String>,
}

/// Default batch options.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Owner recorded on every job. Falls back to `$USER`.
    pub user: Option<String>,
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff: Backoff,
    pub checkpoint_interval: usize,
    pub requests_per_second: u32,
    /// Whether to disable proactive rate limiting.
    pub no_rate_limit: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            user: None,
            concurrency: DEFAULT_CONCURRENCY_LIMIT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            backoff: Backoff::default(),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            no_rate_limit: false,
        }
    }
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/gitea-mirror/config.toml)
    /// 3. Local config file (./gitea-mirror.toml)
    /// 4. Environment variables with the GITEA_MIRROR_ prefix
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(xdg_config) = Self::default_config_path()
            && xdg_config.exists()
        {
            tracing::debug!("Loading config from {:?}", xdg_config);
            builder = builder.add_source(
                File::from(xdg_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        let local_config = PathBuf::from(format!("{APP_NAME}.toml"));
        if local_config.exists() {
            tracing::debug!("Loading config from ./{APP_NAME}.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        builder = builder.add_source(environment());

        match builder.build().and_then(|settings| settings.try_deserialize::<Config>()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}", e);
                Config::default()
            }
        }
    }

    /// Get the database URL, falling back to the default state directory path.
    ///
    /// `mode=rwc` creates the SQLite file if it doesn't exist.
    pub fn database_url(&self) -> Option<String> {
        self.database.url.clone().or_else(|| {
            Self::default_state_dir().map(|state_dir| {
                let db_path = state_dir.join(format!("{APP_NAME}.db"));
                format!("sqlite://{}?mode=rwc", db_path.display())
            })
        })
    }

    /// Owner id recorded on jobs when no `--user` is given.
    pub fn default_user(&self) -> String {
        self.mirror
            .user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| "local".to_string())
    }

    pub fn gitea_host(&self) -> Result<String, ConfigError> {
        self.gitea.host.clone().ok_or_else(|| missing("gitea.host"))
    }

    pub fn gitea_token(&self) -> Result<String, ConfigError> {
        self.gitea.token.clone().ok_or_else(|| missing("gitea.token"))
    }

    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the default state directory path.
    ///
    /// On Linux, this is `$XDG_STATE_HOME/gitea-mirror` or `~/.local/state/gitea-mirror`.
    /// On macOS/Windows, falls back to the data directory.
    pub fn default_state_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", APP_NAME).map(|dirs| {
            dirs.state_dir()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| dirs.data_dir().to_path_buf())
        })
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn missing(key: &str) -> ConfigError {
    ConfigError::NotFound(format!(
        "{key} (set it in {APP_NAME}.toml or via {ENV_PREFIX}_{})",
        key.to_ascii_uppercase().replace('.', "__")
    ))
}
