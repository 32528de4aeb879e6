//! Configuration loading for sync-engine.
//!
//! Configuration is loaded from a TOML file (default: `filing-sync.toml`),
//! then overridden from the environment once at process start. The engine
//! itself only ever sees the resulting [`Config`].

use filing_sync_client::{AirtableConfig, DEFAULT_API_URL, MAX_PAGE_SIZE};
use filing_sync_core::{RetryPolicy, DEFAULT_WATERMARK_SKEW_SECS};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `source.api_key`.
pub const ENV_API_KEY: &str = "AIRTABLE_API_KEY";
/// Environment variable overriding `source.base_id`.
pub const ENV_BASE_ID: &str = "AIRTABLE_BASE_ID";
/// Environment variable overriding `source.table_name`.
pub const ENV_TABLE_NAME: &str = "AIRTABLE_TABLE_NAME";
/// Environment variable overriding `storage.database`.
pub const ENV_DATABASE_PATH: &str = "DATABASE_PATH";

/// Root configuration for sync-engine.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Remote source configuration.
    #[serde(default)]
    pub source: SourceConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Watermark and audit configuration.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Retry configuration for remote calls.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Remote source configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// API root URL (default: https://api.airtable.com/v0).
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Base identifier.
    pub base_id: Option<String>,
    /// Table name.
    pub table_name: Option<String>,
    /// Access token. Usually supplied through the environment.
    pub api_key: Option<String>,
    /// Records per page (default: 100, at most 100).
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

/// Watermark and audit configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Backward shift of incremental watermarks in seconds (default: 300).
    #[serde(default = "default_watermark_skew_secs")]
    pub watermark_skew_secs: u64,
    /// Age after which a `running` audit row is reported as stale
    /// (default: 21600 = 6 hours).
    #[serde(default = "default_stale_run_after_secs")]
    pub stale_run_after_secs: u64,
}

/// Retry configuration for remote calls.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per page, including the first (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds (default: 1000).
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Backoff growth factor (default: 2).
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    /// Cap on a single delay in milliseconds (default: 10000).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

// Default value functions
fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/insurance_filings.db")
}

fn default_watermark_skew_secs() -> u64 {
    DEFAULT_WATERMARK_SKEW_SECS
}

fn default_stale_run_after_secs() -> u64 {
    6 * 60 * 60 // 6 hours
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_multiplier() -> u32 {
    2
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            base_id: None,
            table_name: None,
            api_key: None,
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            watermark_skew_secs: default_watermark_skew_secs(),
            stale_run_after_secs: default_stale_run_after_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            multiplier: default_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get(ENV_API_KEY) {
            self.source.api_key = Some(key);
        }
        if let Some(base) = get(ENV_BASE_ID) {
            self.source.base_id = Some(base);
        }
        if let Some(table) = get(ENV_TABLE_NAME) {
            self.source.table_name = Some(table);
        }
        if let Some(path) = get(ENV_DATABASE_PATH) {
            self.storage.database = PathBuf::from(path);
        }
    }

    /// Check the configuration before any I/O happens.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());

        if !present(&self.source.base_id) {
            return Err(ConfigError::Missing("source.base_id"));
        }
        if !present(&self.source.table_name) {
            return Err(ConfigError::Missing("source.table_name"));
        }
        if !present(&self.source.api_key) {
            return Err(ConfigError::Missing("source.api_key"));
        }
        if self.source.page_size == 0 || self.source.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::Invalid {
                field: "source.page_size",
                reason: format!("must be between 1 and {MAX_PAGE_SIZE}"),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retry.multiplier == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.multiplier",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl SourceConfig {
    /// Connection settings for the HTTP source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] for absent credentials.
    pub fn to_airtable(&self) -> Result<AirtableConfig, ConfigError> {
        let require = |v: &Option<String>, field: &'static str| {
            v.clone()
                .filter(|s| !s.trim().is_empty())
                .ok_or(ConfigError::Missing(field))
        };

        Ok(AirtableConfig {
            api_url: self.api_url.clone(),
            base_id: require(&self.base_id, "source.base_id")?,
            table_name: require(&self.table_name, "source.table_name")?,
            api_key: require(&self.api_key, "source.api_key")?,
            timeout: Duration::from_secs(self.timeout_secs),
        })
    }
}

impl RetryConfig {
    /// The retry policy these settings describe.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            multiplier: self.multiplier,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Required setting is absent.
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    /// Setting is out of range.
    #[error("invalid setting {field}: {reason}")]
    Invalid {
        /// Dotted setting name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}
