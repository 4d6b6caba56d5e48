//! Configuration management using the prefer crate for discovery.
//!
//! A config file (`prospector.toml`, `.yaml` or `.json`) is discovered by
//! prefer in the standard locations, or named explicitly with `--config`.
//! Environment variables override the file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmConfig;
use crate::mail::MailConfig;
use crate::repository::util::is_postgres_url;
use crate::repository::{DbContext, DieselError};
use crate::search::SearchConfig;
use crate::services::controller::DEFAULT_HISTORY_WINDOW;
use crate::services::digest::{DEFAULT_FIRST_LOOKBACK_HOURS, DEFAULT_SEND_WINDOW_MINUTES};

/// Default database filename inside the data directory.
pub const DEFAULT_DATABASE_FILENAME: &str = "prospector.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {format} config: {message}")]
    Parse { format: &'static str, message: String },
}

/// Scheduler tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Seconds between due-selection ticks.
    pub tick_interval_secs: u64,
    /// Runs executing at once within one tick.
    pub max_concurrent_runs: usize,
    /// Configs claimed per tick at most.
    pub claim_batch_size: i64,
    pub search_timeout_secs: u64,
    /// Deadline for suggestion and digest LLM calls.
    pub llm_timeout_secs: u64,
    /// Recent done runs the controller analyses.
    pub history_window: i64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            max_concurrent_runs: 4,
            claim_batch_size: 16,
            search_timeout_secs: 120,
            llm_timeout_secs: 60,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

/// Digest tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestSettings {
    /// Seconds between digest passes.
    pub poll_interval_secs: u64,
    /// Tolerance around each config's send time, in minutes.
    pub send_window_minutes: i64,
    /// How far back a config's first digest looks, in hours.
    pub first_lookback_hours: i64,
}

impl Default for DigestSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 900,
            send_window_minutes: DEFAULT_SEND_WINDOW_MINUTES,
            first_lookback_hours: DEFAULT_FIRST_LOOKBACK_HOURS,
        }
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename inside the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Full database URL; wins over `data_dir`/`database`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub digest: DigestSettings,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub mail: MailConfig,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover and load the config file, falling back to defaults.
    pub async fn load() -> Self {
        match prefer::load("prospector").await {
            Ok(found) => match found.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("{}; using defaults", e);
                        Self::default()
                    }
                },
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Load from a specific file. Format follows the extension (TOML, YAML,
    /// anything else is read as JSON).
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let mut config = Self::parse(&contents, path)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        match ext {
            "toml" => toml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "TOML",
                message: e.to_string(),
            }),
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "YAML",
                message: e.to_string(),
            }),
            _ => serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "JSON",
                message: e.to_string(),
            }),
        }
    }

    /// Directory relative paths in the file are resolved against.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Expand `~` and resolve relative paths against `base_dir`.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Resolve into runtime settings, applying environment overrides.
    pub fn into_settings(self) -> Settings {
        let base_dir = self
            .base_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let mut settings = Settings::default();

        if let Some(data_dir) = &self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, &base_dir);
        }
        if let Some(database) = &self.database {
            settings.database_filename = database.clone();
        }
        settings.database_url = self.database_url.clone();

        // DATABASE_URL takes highest precedence.
        if let Some(url) = std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()) {
            tracing::debug!("Using DATABASE_URL from environment");
            settings.database_url = Some(url);
        }

        settings.scheduler = self.scheduler;
        settings.digest = self.digest;
        settings.llm = self.llm.with_env_overrides();
        settings.search = self.search;
        settings.mail = self.mail.with_env_overrides();
        settings
    }
}

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub database_filename: String,
    /// Explicit database URL. Unset means SQLite in `data_dir`.
    pub database_url: Option<String>,
    pub scheduler: SchedulerSettings,
    pub digest: DigestSettings,
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub mail: MailConfig,
}

impl Default for Settings {
    fn default() -> Self {
        // ~/.local/share/prospector, falling back to the home or current dir.
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("prospector");

        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
            scheduler: SchedulerSettings::default(),
            digest: DigestSettings::default(),
            llm: LlmConfig::default(),
            search: SearchConfig::default(),
            mail: MailConfig::default().with_env_overrides(),
        }
    }
}

impl Settings {
    /// Load from `config_path`, or discover a config file when `None`.
    pub async fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match config_path {
            Some(path) => Config::load_from_path(path).await?,
            None => Config::load().await,
        };
        Ok(config.into_settings())
    }

    /// The database URL, built from the data directory when not set.
    pub fn database_url(&self) -> String {
        match &self.database_url {
            Some(url) => url.clone(),
            None => format!("sqlite:{}", self.database_path().display()),
        }
    }

    pub fn is_postgres(&self) -> bool {
        self.database_url.as_deref().is_some_and(is_postgres_url)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Open a database context for the configured backend.
    pub fn create_db_context(&self) -> Result<DbContext, DieselError> {
        DbContext::from_url(&self.database_url())
    }

    /// Create the data directory for SQLite databases.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        if self.database_url.is_some() {
            return Ok(());
        }
        fs::create_dir_all(&self.data_dir).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create data directory '{}': {}",
                    self.data_dir.display(),
                    e
                ),
            )
        })
    }
}
