//! Configuration management for newsdesk workers
//!
//! A worker is configured either from environment variables
//! ([`Config::from_env`]) or from a TOML file ([`Config::from_file`]).
//! Either way the result must pass [`Config::validate`] before use.
//! Missing required values and unparseable values are startup errors,
//! never runtime ones.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source identity and polling
    pub source: SourceConfig,

    /// Outbound request admission
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// HTTP fetch behavior
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Record store and media locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Shutdown time budgets
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Source-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source identifier, also the prefix of every idempotency key
    pub name: String,

    /// Seconds between cycle starts
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// URLs polled by the built-in URL-list source
    #[serde(default)]
    pub urls: Vec<String>,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Admissions allowed in any trailing 60 second window
    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: u32,

    /// Minimum seconds between two admissions
    #[serde(default = "default_delay_between_requests")]
    pub delay_between_requests_secs: f64,
}

/// HTTP fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Total request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Attempts per fetch, including the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed User-Agent; browser agents rotate when unset
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite record store path
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Root directory of the filesystem object store
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,

    /// Key prefix for media assets
    #[serde(default = "default_media_prefix")]
    pub media_prefix: String,

    /// Attempts allowed when opening a store at startup
    #[serde(default = "default_startup_retries")]
    pub startup_retries: u32,
}

/// Shutdown budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Upper bound for the source cleanup hook
    #[serde(default = "default_cleanup_timeout")]
    pub cleanup_timeout_secs: u64,

    /// Upper bound for closing each owned resource
    #[serde(default = "default_close_timeout")]
    pub close_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Prometheus textfile written when the worker stops
    #[serde(default)]
    pub metrics_path: Option<PathBuf>,
}

fn default_poll_interval() -> u64 {
    300
}
fn default_max_requests_per_minute() -> u32 {
    60
}
fn default_delay_between_requests() -> f64 {
    1.0
}
fn default_request_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_database_path() -> PathBuf {
    PathBuf::from("data/newsdesk.db")
}
fn default_media_dir() -> PathBuf {
    PathBuf::from("data/media")
}
fn default_media_prefix() -> String {
    String::from("news-images")
}
fn default_startup_retries() -> u32 {
    3
}
fn default_cleanup_timeout() -> u64 {
    10
}
fn default_close_timeout() -> u64 {
    5
}
fn default_log_level() -> String {
    String::from("info")
}
fn default_log_format() -> String {
    String::from("text")
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests_per_minute: default_max_requests_per_minute(),
            delay_between_requests_secs: default_delay_between_requests(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_retries: default_max_retries(),
            user_agent: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            media_dir: default_media_dir(),
            media_prefix: default_media_prefix(),
            startup_retries: default_startup_retries(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            cleanup_timeout_secs: default_cleanup_timeout(),
            close_timeout_secs: default_close_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            metrics_path: None,
        }
    }
}

impl LoggingConfig {
    /// Level and format tracing should use
    ///
    /// `LOG_LEVEL` overrides the configured level. An explicit
    /// `--log-format` wins over `LOG_FORMAT`, which wins over the file.
    pub fn effective(
        &self,
        cli_format: Option<&str>,
        env_level: Option<String>,
        env_format: Option<String>,
    ) -> (String, String) {
        let level = env_level.unwrap_or_else(|| self.level.clone());
        let format = cli_format
            .map(str::to_string)
            .or(env_format)
            .unwrap_or_else(|| self.format.clone());
        (level, format)
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["text", "json"];

impl Config {
    /// Configuration for `source` with every other value defaulted
    pub fn for_source(source: impl Into<String>) -> Self {
        Self {
            source: SourceConfig {
                name: source.into(),
                poll_interval_secs: default_poll_interval(),
                urls: Vec::new(),
            },
            rate_limit: RateLimitSettings::default(),
            fetch: FetchConfig::default(),
            storage: StorageConfig::default(),
            shutdown: ShutdownConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `WORKER_SOURCE` (or `SOURCE_NAME`): source identifier [required]
    /// - `POLL_INTERVAL`: seconds between cycle starts [default: 300]
    /// - `MAX_REQUESTS_PER_MINUTE`: window capacity [default: 60]
    /// - `DELAY_BETWEEN_REQUESTS`: seconds between admissions [default: 1.0]
    /// - `SOURCE_URLS`: comma-separated URLs [default: none]
    /// - `REQUEST_TIMEOUT` / `CONNECT_TIMEOUT`: seconds [default: 30 / 10]
    /// - `MAX_RETRIES`: attempts per fetch [default: 3]
    /// - `USER_AGENT`: fixed User-Agent [optional]
    /// - `DATABASE_PATH`: SQLite path [default: data/newsdesk.db]
    /// - `MEDIA_DIR` / `MEDIA_PREFIX`: media location [default: data/media, news-images]
    /// - `STARTUP_RETRIES`: store open attempts [default: 3]
    /// - `CLEANUP_TIMEOUT` / `CLOSE_TIMEOUT`: seconds [default: 10 / 5]
    /// - `LOG_LEVEL` / `LOG_FORMAT`: [default: info / text]
    /// - `METRICS_PATH`: Prometheus textfile [optional]
    pub fn from_env() -> Result<Self, ConfigError> {
        let name = env::var("WORKER_SOURCE")
            .or_else(|_| env::var("SOURCE_NAME"))
            .map_err(|_| ConfigError::MissingEnvVar("WORKER_SOURCE".to_string()))?;

        let urls = env::var("SOURCE_URLS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            source: SourceConfig {
                name,
                poll_interval_secs: env_or("POLL_INTERVAL", default_poll_interval())?,
                urls,
            },
            rate_limit: RateLimitSettings {
                max_requests_per_minute: env_or(
                    "MAX_REQUESTS_PER_MINUTE",
                    default_max_requests_per_minute(),
                )?,
                delay_between_requests_secs: env_or(
                    "DELAY_BETWEEN_REQUESTS",
                    default_delay_between_requests(),
                )?,
            },
            fetch: FetchConfig {
                request_timeout_secs: env_or("REQUEST_TIMEOUT", default_request_timeout())?,
                connect_timeout_secs: env_or("CONNECT_TIMEOUT", default_connect_timeout())?,
                max_retries: env_or("MAX_RETRIES", default_max_retries())?,
                user_agent: env::var("USER_AGENT").ok(),
            },
            storage: StorageConfig {
                database_path: env::var("DATABASE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| default_database_path()),
                media_dir: env::var("MEDIA_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| default_media_dir()),
                media_prefix: env::var("MEDIA_PREFIX").unwrap_or_else(|_| default_media_prefix()),
                startup_retries: env_or("STARTUP_RETRIES", default_startup_retries())?,
            },
            shutdown: ShutdownConfig {
                cleanup_timeout_secs: env_or("CLEANUP_TIMEOUT", default_cleanup_timeout())?,
                close_timeout_secs: env_or("CLOSE_TIMEOUT", default_close_timeout())?,
            },
            logging: LoggingConfig {
                level: env::var("LOG_LEVEL").unwrap_or_else(|_| default_log_level()),
                format: env::var("LOG_FORMAT").unwrap_or_else(|_| default_log_format()),
                metrics_path: env::var("METRICS_PATH").ok().map(PathBuf::from),
            },
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.name.trim().is_empty() {
            return Err(ConfigError::invalid("source.name", "cannot be empty"));
        }

        if self.source.name.contains(':') {
            return Err(ConfigError::invalid(
                "source.name",
                "cannot contain ':' (used as the idempotency key separator)",
            ));
        }

        if self.source.poll_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "source.poll_interval_secs",
                "must be greater than 0",
            ));
        }

        for url in &self.source.urls {
            if url::Url::parse(url).is_err() {
                return Err(ConfigError::invalid(
                    "source.urls",
                    format!("'{url}' is not an absolute URL"),
                ));
            }
        }

        if self.rate_limit.max_requests_per_minute == 0 {
            return Err(ConfigError::invalid(
                "rate_limit.max_requests_per_minute",
                "must be greater than 0",
            ));
        }

        let delay = self.rate_limit.delay_between_requests_secs;
        if !delay.is_finite() || delay < 0.0 {
            return Err(ConfigError::invalid(
                "rate_limit.delay_between_requests_secs",
                "must be a non-negative number",
            ));
        }
        if Duration::try_from_secs_f64(delay).is_err() {
            return Err(ConfigError::invalid(
                "rate_limit.delay_between_requests_secs",
                format!("{delay} seconds is out of range"),
            ));
        }

        if self.fetch.max_retries == 0 {
            return Err(ConfigError::invalid(
                "fetch.max_retries",
                "must be at least 1",
            ));
        }

        if self.fetch.request_timeout_secs == 0 || self.fetch.connect_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "fetch.request_timeout_secs",
                "timeouts must be greater than 0",
            ));
        }

        if self.shutdown.cleanup_timeout_secs == 0 || self.shutdown.close_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "shutdown",
                "timeouts must be greater than 0",
            ));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::invalid(
                "logging.level",
                format!("'{}' is not one of {}", self.logging.level, LOG_LEVELS.join(", ")),
            ));
        }

        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::invalid(
                "logging.format",
                format!("'{}' is not one of {}", self.logging.format, LOG_FORMATS.join(", ")),
            ));
        }

        if self.storage.media_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::invalid(
                "storage.media_prefix",
                "cannot be empty",
            ));
        }

        Ok(())
    }

    /// Get poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.source.poll_interval_secs)
    }

    /// Get minimum spacing between requests as Duration
    pub fn delay_between_requests(&self) -> Duration {
        // Values rejected by `validate` fall back to no spacing
        Duration::try_from_secs_f64(self.rate_limit.delay_between_requests_secs)
            .unwrap_or_default()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.request_timeout_secs)
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.connect_timeout_secs)
    }

    /// Get cleanup hook timeout as Duration
    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown.cleanup_timeout_secs)
    }

    /// Get per-resource close timeout as Duration
    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown.close_timeout_secs)
    }

    /// Human-readable summary
    pub fn display(&self) -> String {
        format!(
            "Worker Configuration\n\
             {:-<50}\n\
             Source: {}\n\
             Poll Interval: {}s\n\
             Source URLs: {}\n\
             Rate Limit: {} req/min, {}s spacing\n\
             Max Retries: {}\n\
             Timeouts: request {}s, connect {}s\n\
             Database: {}\n\
             Media: {} (prefix '{}')\n\
             Shutdown: cleanup {}s, close {}s\n\
             Logging: {} ({})\n\
             {:-<50}",
            "",
            self.source.name,
            self.source.poll_interval_secs,
            self.source.urls.len(),
            self.rate_limit.max_requests_per_minute,
            self.rate_limit.delay_between_requests_secs,
            self.fetch.max_retries,
            self.fetch.request_timeout_secs,
            self.fetch.connect_timeout_secs,
            self.storage.database_path.display(),
            self.storage.media_dir.display(),
            self.storage.media_prefix,
            self.shutdown.cleanup_timeout_secs,
            self.shutdown.close_timeout_secs,
            self.logging.level,
            self.logging.format,
            "",
        )
    }
}

/// Read an optional variable, failing on values that do not parse
fn env_or<T: FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            field: var.to_string(),
            reason: format!("cannot parse '{raw}'"),
        }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Missing environment variable
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// Invalid value
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Config file could not be read
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
