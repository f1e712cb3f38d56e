//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config: `<config dir>/weave/config.toml`
//! 3. Project config: `.weave/config.toml`
//! 4. An explicit file passed by the caller (`--config`)
//! 5. Environment variables: `WEAVE_*`
//!
//! # Example Config
//!
//! ```toml
//! [tasks]
//! thread_name_prefix = "render-worker"
//!
//! [host_loop]
//! tick_interval_ms = 16
//!
//! [logging]
//! level = "debug"
//! ```

mod load;
mod validate;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use load::{global_config_path, load_config, load_from_paths, project_config_path};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(Error::invalid_config(format!(
                "Invalid log level: {s}. Must be one of: trace, debug, info, warn, error"
            ))),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub tasks: TaskConfig,
    pub host_loop: HostLoopConfig,
    pub dispatcher: DispatcherConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TaskConfig {
    /// Prefix for dedicated-thread names; the task name is appended.
    pub thread_name_prefix: String,
    /// Default for the builder's "execute immediately" flag.
    pub execute_immediately: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HostLoopConfig {
    pub tick_interval_ms: u64,
    /// Upper bound used by `HostLoop::settle`.
    pub max_idle_ticks: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Actions run per drain (one drain per host tick).
    pub max_batch: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "weave-worker".to_string(),
            execute_immediately: false,
        }
    }
}

impl Default for HostLoopConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
            max_idle_ticks: 10_000,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { max_batch: 256 }
    }
}

impl Config {
    /// Render as TOML (used by `weave config`).
    ///
    /// # Errors
    ///
    /// Returns a parse error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::parse_error(format!("Failed to serialize config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.tasks.thread_name_prefix, "weave-worker");
        assert!(!config.tasks.execute_immediately);
        assert_eq!(config.host_loop.tick_interval_ms, 16);
        assert_eq!(config.host_loop.max_idle_ticks, 10_000);
        assert_eq!(config.dispatcher.max_batch, 256);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!("DEBUG".parse::<LogLevel>().ok(), Some(LogLevel::Debug));
        assert_eq!("warning".parse::<LogLevel>().ok(), Some(LogLevel::Warn));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_level_round_trips_through_display() {
        for level in [
            LogLevel::Trace,
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
        ] {
            assert_eq!(level.to_string().parse::<LogLevel>().ok(), Some(level));
        }
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() -> Result<()> {
        let config: Config = toml::from_str("[host_loop]\ntick_interval_ms = 5\n")?;
        assert_eq!(config.host_loop.tick_interval_ms, 5);
        assert_eq!(config.host_loop.max_idle_ticks, 10_000);
        assert_eq!(config.tasks, TaskConfig::default());
        Ok(())
    }

    #[test]
    fn test_unknown_log_level_rejected_by_deserializer() {
        let parsed: std::result::Result<Config, _> = toml::from_str("[logging]\nlevel = \"loud\"\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_to_toml_contains_sections() -> Result<()> {
        let rendered = Config::default().to_toml()?;
        assert!(rendered.contains("[tasks]"));
        assert!(rendered.contains("[host_loop]"));
        assert!(rendered.contains("level = \"info\""));
        Ok(())
    }
}
