//! Configuration management for Parley
//!
//! Defaults, overridable from a TOML file or from `PARLEY_*` environment
//! variables, validated before use.

use crate::logging::{LogConfig, LogLevel};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,

    pub journal: JournalConfig,

    pub logging: LoggingConfig,
}

/// Engine behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Characters kept in last-message previews
    pub preview_chars: usize,

    /// Page size used when a caller does not ask for one
    pub default_page_size: usize,

    /// Offline users idle this long are forgotten by presence GC
    #[serde(with = "humantime_serde")]
    pub presence_idle_timeout: Duration,
}

/// Journal configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Record committed changes to `path`
    pub enabled: bool,

    pub path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preview_chars: 80,
            default_page_size: 50,
            presence_idle_timeout: Duration::from_secs(15 * 60),
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self { enabled: false, path: PathBuf::from("./data/parley.journal") }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json_format: false, with_timestamp: true, with_target: true }
    }
}

impl LoggingConfig {
    /// Logging subsystem settings
    pub fn to_log_config(&self) -> Result<LogConfig, ConfigError> {
        let level = LogLevel::from_str(&self.level)?;
        Ok(LogConfig::new(level)
            .with_timestamp(self.with_timestamp)
            .with_target(self.with_target)
            .json_format(self.json_format))
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ConfigError::InvalidValue(format!("{}={}: {}", name, raw, e)))
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: PARLEY_<SECTION>_<KEY>
    /// Example: PARLEY_JOURNAL_PATH=/var/lib/parley/journal
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_env(|name| env::var(name).ok())
    }

    /// Apply overrides from `lookup` on top of `self`, then validate
    pub fn merge_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Engine config
        if let Some(raw) = lookup("PARLEY_ENGINE_PREVIEW_CHARS") {
            self.engine.preview_chars = parse_var("PARLEY_ENGINE_PREVIEW_CHARS", &raw)?;
        }
        if let Some(raw) = lookup("PARLEY_ENGINE_PAGE_SIZE") {
            self.engine.default_page_size = parse_var("PARLEY_ENGINE_PAGE_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("PARLEY_PRESENCE_IDLE_TIMEOUT_SECS") {
            let secs: u64 = parse_var("PARLEY_PRESENCE_IDLE_TIMEOUT_SECS", &raw)?;
            self.engine.presence_idle_timeout = Duration::from_secs(secs);
        }

        // Journal config
        if let Some(raw) = lookup("PARLEY_JOURNAL_ENABLED") {
            self.journal.enabled = parse_var("PARLEY_JOURNAL_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("PARLEY_JOURNAL_PATH") {
            self.journal.path = PathBuf::from(raw);
        }

        // Logging config
        if let Some(raw) = lookup("PARLEY_LOG_LEVEL") {
            self.logging.level = raw;
        }
        if let Some(raw) = lookup("PARLEY_LOG_JSON") {
            self.logging.json_format = parse_var("PARLEY_LOG_JSON", &raw)?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.preview_chars == 0 {
            return Err(ConfigError::ValidationFailed(
                "preview_chars must be greater than 0".to_string(),
            ));
        }

        if self.engine.default_page_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "default_page_size must be greater than 0".to_string(),
            ));
        }

        if self.journal.enabled && self.journal.path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "journal enabled but no path provided".to_string(),
            ));
        }

        if LogLevel::from_str(&self.logging.level).is_err() {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;
        Ok(())
    }
}
