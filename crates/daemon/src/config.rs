//! Configuration management for the Cadence daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/cadence/config.toml`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ipc::get_socket_path;
use crate::ipc::pidfile::PID_FILE_NAME;
use crate::session::{ConfigRegistry, SessionConfig};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("tick_interval_ms must be greater than 0")]
    ZeroTickInterval,

    #[error("max_restart_attempts must be greater than 0")]
    ZeroRestartAttempts,

    #[error("at least one [[sessions.configs]] entry is required")]
    NoSessionConfigs,

    #[error("duplicate session config id: {0}")]
    DuplicateSessionConfig(String),

    #[error("default_config names an undefined session config: {0}")]
    UnknownDefaultConfig(String),

    #[error("session config {0} must have non-zero focus and break durations")]
    ZeroPhaseDuration(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the Cadence daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Local socket transport.
    pub ipc: IpcConfig,

    /// Session clock settings.
    pub timer: TimerConfig,

    /// Session templates and retention.
    pub sessions: SessionsConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory for the PID file and logs.
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Also write logs to daily files under `<data_dir>/logs`.
    pub log_to_file: bool,
}

/// Local socket transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IpcConfig {
    /// Socket path; the per-user runtime directory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,

    /// Consecutive transport failures tolerated before the daemon exits.
    pub max_restart_attempts: u32,
}

/// Session clock configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimerConfig {
    /// Period of every session clock, in milliseconds.
    pub tick_interval_ms: u64,
}

/// Session templates and retention of ended sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionsConfig {
    /// Template used when a start names none.
    pub default_config: String,

    /// How long cancelled and finished sessions are kept (0 = forever).
    pub retention_secs: u64,

    /// How often ended sessions are reaped.
    pub reap_interval_secs: u64,

    /// Available templates.
    pub configs: Vec<SessionConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            log_to_file: false,
        }
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            max_restart_attempts: 5,
        }
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            default_config: "pomodoro".to_string(),
            retention_secs: 3600,
            reap_interval_secs: 60,
            configs: default_session_configs(),
        }
    }
}

/// Built-in session templates.
fn default_session_configs() -> Vec<SessionConfig> {
    vec![
        SessionConfig::new("pomodoro", Duration::from_secs(25 * 60), Duration::from_secs(5 * 60))
            .with_target_cycles(4),
        SessionConfig::new("short", Duration::from_secs(15 * 60), Duration::from_secs(3 * 60)),
    ]
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cadence")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cadence")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - CADENCE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - CADENCE_SOCKET_PATH: Override the IPC socket path
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("CADENCE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(path) = std::env::var("CADENCE_SOCKET_PATH") {
            if !path.is_empty() {
                tracing::info!("Overriding socket_path from environment: {}", path);
                self.ipc.socket_path = Some(PathBuf::from(path));
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        if self.timer.tick_interval_ms == 0 {
            return Err(ConfigError::ZeroTickInterval);
        }

        if self.ipc.max_restart_attempts == 0 {
            return Err(ConfigError::ZeroRestartAttempts);
        }

        if self.sessions.configs.is_empty() {
            return Err(ConfigError::NoSessionConfigs);
        }

        let mut seen = HashSet::new();
        for config in &self.sessions.configs {
            if !seen.insert(config.id.as_str()) {
                return Err(ConfigError::DuplicateSessionConfig(config.id.clone()));
            }
            if config.focus_duration.is_zero() || config.break_duration.is_zero() {
                return Err(ConfigError::ZeroPhaseDuration(config.id.clone()));
            }
        }

        if !seen.contains(self.sessions.default_config.as_str()) {
            return Err(ConfigError::UnknownDefaultConfig(
                self.sessions.default_config.clone(),
            ));
        }

        Ok(())
    }

    /// The socket the daemon listens on.
    pub fn socket_path(&self) -> PathBuf {
        self.ipc.socket_path.clone().unwrap_or_else(get_socket_path)
    }

    /// The PID file inside the data directory.
    pub fn pid_file_path(&self) -> PathBuf {
        self.daemon.data_dir.join(PID_FILE_NAME)
    }

    /// Directory for rolling log files.
    pub fn log_dir(&self) -> PathBuf {
        self.daemon.data_dir.join("logs")
    }

    /// Period of every session clock.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.timer.tick_interval_ms)
    }

    /// Retention of ended sessions.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.sessions.retention_secs)
    }

    /// Period of the ended-session reaper.
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.reap_interval_secs)
    }

    /// Build the template registry from `[[sessions.configs]]`.
    pub fn session_registry(&self) -> Result<ConfigRegistry> {
        ConfigRegistry::new(
            self.sessions.configs.iter().cloned(),
            &self.sessions.default_config,
        )
        .context("Invalid session templates")
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
