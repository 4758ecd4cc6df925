//! Configuration file support for listsync.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `LISTSYNC_`, nested keys joined
//!    with `__`, e.g. `LISTSYNC_DATABASE__URL`, `LISTSYNC_SYNC__BATCH_SIZE`)
//! 3. Config file (./listsync.toml, then ~/.config/listsync/config.toml)
//! 4. Built-in defaults
//!
//! The database URL defaults to `sqlite://~/.local/state/listsync/listsync.db`
//! on Linux (using the XDG state directory) if not explicitly configured.
//!
//! Secrets in provider credentials may be written as `env:NAME`, in which
//! case the value is read from the environment variable `NAME` (a `.env`
//! file in the working directory is loaded first).
//!
//! Example config file:
//! ```toml
//! [database]
//! url = "sqlite://~/.local/state/listsync/listsync.db"  # optional, this is the default
//!
//! [sync]
//! concurrency = 16
//! batch_size = 1000
//! lookback_hours = 720      # first sync only; omit to walk everything
//! requests_per_second = 2
//!
//! [[providers]]
//! name = "bridge"
//! base_url = "https://api.bridgedataoutput.com/api/v2/OData/actris/Property"
//! key_field = "ListingKeyNumeric"
//! offset_limit = 10000
//! follow_next_link = false
//! credential = { kind = "query", param = "access_token", token = "env:BRIDGE_TOKEN" }
//!
//! [[providers]]
//! name = "mlsgrid"
//! base_url = "https://api.mlsgrid.com/v2/Property"
//! filter = "OriginatingSystemName eq 'mred'"
//! params = { "$expand" = "Media" }
//! credential = { kind = "bearer", token = "env:MLSGRID_TOKEN" }
//! ```

use std::collections::HashSet;
use std::path::PathBuf;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use listsync::provider::{CredentialConfig, DEFAULT_RPS};
use listsync::sync::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_FETCH_ATTEMPTS};
use listsync::{ProviderConfig, ProviderKey};
use serde::Deserialize;

/// Prefix marking a credential value that names an environment variable.
const ENV_SECRET_PREFIX: &str = "env:";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("provider #{index} has no name")]
    UnnamedProvider { index: usize },

    #[error("provider '{name}' has an invalid base_url '{url}': {reason}")]
    InvalidBaseUrl {
        name: String,
        url: String,
        reason: String,
    },

    #[error("provider '{0}' is configured more than once")]
    DuplicateProvider(ProviderKey),

    #[error("provider '{name}' reads its credential from ${var}, which is not set")]
    MissingSecret { name: String, var: String },

    #[error("no provider named '{0}' is configured")]
    UnknownProvider(String),
}

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Default sync options.
    pub sync: SyncConfig,
    /// Provider collections to replicate.
    pub providers: Vec<ProviderConfig>,
}

/// Database configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL.
    /// Supports sqlite:// and postgres:// schemes.
    /// Defaults to `sqlite://~/.local/state/listsync/listsync.db` if not specified.
    pub url: Option<String>,
}

/// Default sync options.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Concurrent upsert batches per page.
    pub concurrency: usize,
    /// Records per upsert batch.
    pub batch_size: usize,
    /// Seed never-synced collections this many hours back.
    pub lookback_hours: Option<u64>,
    /// Pace for providers without their own `requests_per_second`.
    pub requests_per_second: u32,
    /// Whether to disable proactive rate limiting.
    pub no_rate_limit: bool,
    /// Skip offset pages the provider refuses instead of failing the run.
    pub skip_rejected_pages: bool,
    pub max_fetch_attempts: u32,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_MAX_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            lookback_hours: None,
            requests_per_second: DEFAULT_RPS,
            no_rate_limit: false,
            skip_rejected_pages: false,
            max_fetch_attempts: DEFAULT_MAX_FETCH_ATTEMPTS,
            request_timeout_secs: 120,
        }
    }
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/listsync/config.toml)
    /// 3. Local config file (./listsync.toml)
    /// 4. Environment variables with LISTSYNC_ prefix
    pub fn load() -> Result<Self, ConfigError> {
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

        let local_config = PathBuf::from("listsync.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./listsync.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // LISTSYNC_DATABASE__URL -> database.url
        builder = builder.add_source(
            Environment::with_prefix("LISTSYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        config.resolve_secrets(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Check provider entries for problems that would only surface mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for (index, provider) in self.providers.iter().enumerate() {
            if provider.name.trim().is_empty() {
                return Err(ConfigError::UnnamedProvider { index });
            }
            if let Err(e) = url::Url::parse(&provider.base_url) {
                return Err(ConfigError::InvalidBaseUrl {
                    name: provider.name.clone(),
                    url: provider.base_url.clone(),
                    reason: e.to_string(),
                });
            }
            let key = ProviderKey::new(&provider.name, &provider.collection);
            if !seen.insert(key.clone()) {
                return Err(ConfigError::DuplicateProvider(key));
            }
        }
        Ok(())
    }

    /// Replace `env:NAME` credential values with the named variable.
    pub fn resolve_secrets(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        for provider in &mut self.providers {
            let name = provider.name.clone();
            let resolve = |value: &mut String| -> Result<(), ConfigError> {
                if let Some(var) = value.strip_prefix(ENV_SECRET_PREFIX) {
                    let var = var.trim().to_string();
                    *value = lookup(&var).ok_or(ConfigError::MissingSecret {
                        name: name.clone(),
                        var,
                    })?;
                }
                Ok(())
            };

            match &mut provider.credential {
                CredentialConfig::Bearer { token } | CredentialConfig::Query { token, .. } => {
                    resolve(token)?;
                }
                CredentialConfig::Basic { username, password } => {
                    resolve(username)?;
                    resolve(password)?;
                }
                CredentialConfig::None => {}
            }
        }
        Ok(())
    }

    /// Providers selected by name, or every enabled provider when `names`
    /// is empty. A name selects every collection configured under it.
    pub fn select_providers(&self, names: &[String]) -> Result<Vec<ProviderConfig>, ConfigError> {
        if names.is_empty() {
            return Ok(self
                .providers
                .iter()
                .filter(|p| p.enabled)
                .cloned()
                .collect());
        }

        let mut selected = Vec::new();
        for name in names {
            let matching: Vec<_> = self
                .providers
                .iter()
                .filter(|p| &p.name == name)
                .cloned()
                .collect();
            if matching.is_empty() {
                return Err(ConfigError::UnknownProvider(name.clone()));
            }
            selected.extend(matching);
        }
        Ok(selected)
    }

    /// Get the database URL, falling back to the default state directory path.
    ///
    /// If no database URL is configured, defaults to `sqlite://~/.local/state/listsync/listsync.db?mode=rwc`
    /// on Linux (using XDG state directory) or the platform-appropriate equivalent.
    /// The `mode=rwc` parameter creates the file if it doesn't exist.
    pub fn database_url(&self) -> Option<String> {
        self.database.url.clone().or_else(|| {
            Self::default_state_dir().map(|state_dir| {
                let db_path = state_dir.join("listsync.db");
                format!("sqlite://{}?mode=rwc", db_path.display())
            })
        })
    }

    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "listsync").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the default state directory path.
    ///
    /// On Linux, this is `$XDG_STATE_HOME/listsync` or `~/.local/state/listsync`.
    /// On macOS/Windows, falls back to the data directory.
    pub fn default_state_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "listsync").map(|dirs| {
            // state_dir() returns None on macOS/Windows
            dirs.state_dir()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| dirs.data_dir().to_path_buf())
        })
    }
}
