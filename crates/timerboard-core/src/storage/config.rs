//! TOML-based application configuration.
//!
//! Holds the bot's immutable runtime settings:
//! - Board and command channel ids
//! - Reconciliation cadence, command polling, notification window and expiry retention
//! - Universe table and database locations
//! - Discord API endpoint and token variable
//! - Log level and optional log file
//!
//! Configuration is stored at `~/.config/timerboard/config.toml` unless an
//! explicit path is given.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::ConfigError;

/// Upper bound for every `*_minutes` setting: one year.
pub const MAX_WINDOW_MINUTES: u64 = 525_600;

/// Chat channels the bot posts to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Channel holding the live board message.
    #[serde(default)]
    pub timerboard: u64,
    /// Channel receiving commands, replies and notifications.
    #[serde(default)]
    pub commands: u64,
}

/// Discord REST settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Environment variable holding the bot token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Application configuration.
///
/// Serialized to/from TOML. Built once at startup and shared read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,
    /// How often the command channel is polled for new commands.
    #[serde(default = "default_command_poll")]
    pub command_poll_seconds: u64,
    #[serde(default = "default_notification_window")]
    pub notification_window_minutes: u64,
    #[serde(default = "default_expiry_retention")]
    pub expiry_retention_minutes: u64,
    /// How late a tick may observe a deadline and still send the start alert.
    #[serde(default = "default_start_alert_grace")]
    pub start_alert_grace_minutes: u64,
    /// JSON universe table. Distances are unknown without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universe_path: Option<PathBuf>,
    /// SQLite snapshot file. Defaults to `timerboard.db` in the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Directory relative paths are resolved against.
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

// Default functions
fn default_check_interval() -> u64 {
    60
}
fn default_command_poll() -> u64 {
    5
}
fn default_notification_window() -> u64 {
    60
}
fn default_expiry_retention() -> u64 {
    60
}
fn default_start_alert_grace() -> u64 {
    1
}
fn default_api_base() -> String {
    "https://discord.com/api/v10".into()
}
fn default_token_env() -> String {
    "DISCORD_TOKEN".into()
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token_env: default_token_env(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            check_interval_seconds: default_check_interval(),
            command_poll_seconds: default_command_poll(),
            notification_window_minutes: default_notification_window(),
            expiry_retention_minutes: default_expiry_retention(),
            start_alert_grace_minutes: default_start_alert_grace(),
            universe_path: None,
            database_path: None,
            channels: ChannelsConfig::default(),
            discord: DiscordConfig::default(),
            logging: LoggingConfig::default(),
            base_dir: None,
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::MissingKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().map_or(true, |p| p.is_empty()) {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let new_value = match obj.get(part) {
                    Some(serde_json::Value::Number(_)) => value
                        .parse::<u64>()
                        .map(|n| serde_json::Value::Number(n.into()))
                        .map_err(|_| invalid(format!("cannot parse '{value}' as a number")))?,
                    Some(serde_json::Value::Bool(_)) => value
                        .parse::<bool>()
                        .map(serde_json::Value::Bool)
                        .map_err(|e| invalid(e.to_string()))?,
                    Some(serde_json::Value::Object(_)) => {
                        return Err(invalid("cannot replace a whole section".into()))
                    }
                    Some(_) => serde_json::Value::String(value.into()),
                    // Optional paths are absent from the JSON form until set.
                    None if Self::OPTIONAL_KEYS.iter().any(|k| *k == key) => {
                        serde_json::Value::String(value.into())
                    }
                    None => return Err(unknown()),
                };
                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    const OPTIONAL_KEYS: [&'static str; 3] = ["universe_path", "database_path", "logging.file"];

    /// Default location: `<data dir>/config.toml`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        data_dir()
            .map(|dir| dir.join("config.toml"))
            .map_err(|e| ConfigError::LoadFailed {
                path: PathBuf::from("config.toml"),
                message: e.to_string(),
            })
    }

    /// Load from the default location, writing defaults if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load from `path`, writing defaults there if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed, or if the
    /// default config cannot be written.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut cfg = match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                tracing::info!(path = %path.display(), "configuration loaded");
                cfg
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                tracing::warn!(path = %path.display(), "no configuration found, wrote defaults");
                cfg
            }
            Err(err) => {
                return Err(ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                })
            }
        };
        cfg.base_dir = path.parent().map(Path::to_path_buf);
        Ok(cfg)
    }

    /// Persist to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| save_failed(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Parse TOML text without touching the filesystem.
    ///
    /// # Errors
    /// Returns [`ConfigError::ParseFailed`] if the text is not a valid config.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by dot-separated key, in memory only.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value has the wrong type.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let base_dir = self.base_dir.take();
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.base_dir = base_dir;
        Ok(())
    }

    /// Reject settings the long-running bot cannot work with.
    ///
    /// # Errors
    /// Returns the first invalid or missing value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, seconds) in [
            ("check_interval_seconds", self.check_interval_seconds),
            ("command_poll_seconds", self.command_poll_seconds),
        ] {
            if seconds == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: "must be at least 1".into(),
                });
            }
        }
        for (key, minutes) in [
            ("notification_window_minutes", self.notification_window_minutes),
            ("expiry_retention_minutes", self.expiry_retention_minutes),
            ("start_alert_grace_minutes", self.start_alert_grace_minutes),
        ] {
            if minutes > MAX_WINDOW_MINUTES {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: format!("must be at most {MAX_WINDOW_MINUTES} (one year)"),
                });
            }
        }
        if self.channels.timerboard == 0 {
            return Err(ConfigError::MissingKey("channels.timerboard".into()));
        }
        if self.channels.commands == 0 {
            return Err(ConfigError::MissingKey("channels.commands".into()));
        }
        if url::Url::parse(&self.discord.api_base).is_err() {
            return Err(ConfigError::InvalidValue {
                key: "discord.api_base".into(),
                message: format!("'{}' is not a URL", self.discord.api_base),
            });
        }
        Ok(())
    }

    pub fn check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.check_interval_seconds.max(1))
    }

    pub fn command_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.command_poll_seconds.max(1))
    }

    pub fn notification_window(&self) -> chrono::Duration {
        bounded_minutes(self.notification_window_minutes)
    }

    pub fn expiry_retention(&self) -> chrono::Duration {
        bounded_minutes(self.expiry_retention_minutes)
    }

    pub fn start_alert_grace(&self) -> chrono::Duration {
        bounded_minutes(self.start_alert_grace_minutes)
    }

    /// Universe table location, resolved against the config directory.
    pub fn universe_path(&self) -> Option<PathBuf> {
        self.universe_path.as_deref().map(|p| self.resolve(p))
    }

    /// Snapshot database location, resolved against the config directory.
    pub fn database_path(&self) -> PathBuf {
        match self.database_path.as_deref() {
            Some(p) => self.resolve(p),
            None => self.resolve(Path::new("timerboard.db")),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match self.base_dir.as_deref() {
            Some(base) => base.join(path),
            None => path.to_path_buf(),
        }
    }
}

/// Unvalidated configs still yield a usable duration.
fn bounded_minutes(minutes: u64) -> chrono::Duration {
    chrono::Duration::minutes(minutes.min(MAX_WINDOW_MINUTES) as i64)
}
