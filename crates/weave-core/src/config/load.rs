//! Configuration loading from files and environment
//!
//! Files are parsed as TOML tables and deep-merged over the serialized
//! defaults, so a file only needs the keys it overrides. Environment
//! variables are applied last.

use std::path::{Path, PathBuf};

use super::Config;
use crate::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════════
// PUBLIC API
// ═══════════════════════════════════════════════════════════════════════════

/// Load configuration from all sources with hierarchy.
///
/// `extra` is layered after the project file; unlike the discovered files
/// it must exist.
///
/// # Errors
///
/// Returns error if:
/// - a config file is malformed TOML
/// - `extra` does not exist
/// - an environment override cannot be parsed
/// - the merged values fail validation
pub fn load_config(extra: Option<&Path>) -> Result<Config> {
    let mut paths: Vec<PathBuf> = global_config_path().into_iter().collect();
    paths.push(project_config_path()?);

    if let Some(path) = extra {
        if !path.exists() {
            return Err(Error::io_error(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        paths.push(path.to_path_buf());
    }

    load_from_paths(&paths)
}

/// Merge the given files (missing ones are skipped) over the defaults, then
/// apply environment overrides and validate.
///
/// # Errors
///
/// Returns error on malformed TOML, bad environment values or failed validation.
pub fn load_from_paths(paths: &[PathBuf]) -> Result<Config> {
    let defaults = toml::Value::try_from(Config::default())
        .map_err(|e| Error::parse_error(format!("Failed to serialize defaults: {e}")))?;

    let merged = paths
        .iter()
        .filter(|path| path.exists())
        .try_fold(defaults, |acc, path| {
            tracing::debug!("Loading config layer: {}", path.display());
            load_toml_file(path).map(|layer| merge_values(acc, layer))
        })?;

    let config: Config = merged.try_into()?;
    let config = config.apply_env_vars()?;
    config.validate()?;
    Ok(config)
}

// ═══════════════════════════════════════════════════════════════════════════
// PATH HELPERS
// ═══════════════════════════════════════════════════════════════════════════

/// Get path to global config file
pub fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "weave")
        .map(|proj_dirs| proj_dirs.config_dir().join("config.toml"))
}

/// Get path to project config file
///
/// # Errors
///
/// Returns error if current directory cannot be determined
pub fn project_config_path() -> Result<PathBuf> {
    std::env::current_dir()
        .map(|dir| dir.join(".weave/config.toml"))
        .map_err(|e| Error::io_error(format!("Failed to get current directory: {e}")))
}

// ═══════════════════════════════════════════════════════════════════════════
// FILE + MERGE HELPERS
// ═══════════════════════════════════════════════════════════════════════════

fn load_toml_file(path: &Path) -> Result<toml::Value> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::io_error(format!("Failed to read {}: {e}", path.display())))?;
    toml::from_str(&content).map_err(|e| {
        Error::parse_error(format!("Failed to parse config {}: {e}", path.display()))
    })
}

/// Deep merge: tables merge key by key, everything else is replaced.
fn merge_values(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            toml::Value::Table(base)
        }
        (_, overlay) => overlay,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ENVIRONMENT OVERRIDES
// ═══════════════════════════════════════════════════════════════════════════

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(name).ok().map_or(Ok(None), |value| {
        value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::invalid_config(format!("Invalid {name} value: {e}")))
    })
}

impl Config {
    /// Apply `WEAVE_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an unparsable value.
    pub fn apply_env_vars(mut self) -> Result<Self> {
        // WEAVE_THREAD_NAME_PREFIX
        if let Ok(value) = std::env::var("WEAVE_THREAD_NAME_PREFIX") {
            self.tasks.thread_name_prefix = value;
        }

        // WEAVE_EXECUTE_IMMEDIATELY
        if let Some(value) = env_parse("WEAVE_EXECUTE_IMMEDIATELY")? {
            self.tasks.execute_immediately = value;
        }

        // WEAVE_TICK_INTERVAL_MS
        if let Some(value) = env_parse("WEAVE_TICK_INTERVAL_MS")? {
            self.host_loop.tick_interval_ms = value;
        }

        // WEAVE_MAX_IDLE_TICKS
        if let Some(value) = env_parse("WEAVE_MAX_IDLE_TICKS")? {
            self.host_loop.max_idle_ticks = value;
        }

        // WEAVE_DISPATCH_MAX_BATCH
        if let Some(value) = env_parse("WEAVE_DISPATCH_MAX_BATCH")? {
            self.dispatcher.max_batch = value;
        }

        // WEAVE_LOG_LEVEL
        if let Some(value) = env_parse("WEAVE_LOG_LEVEL")? {
            self.logging.level = value;
        }

        Ok(self)
    }
}
