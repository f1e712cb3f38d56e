//! Command-line definition

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use weave_core::config::{load_config, Config, LogLevel};

#[derive(Debug, Parser)]
#[command(name = "weave", version, about = "Unified task handles and named locks")]
pub struct Cli {
    /// Extra config file, layered after the project config
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run end-to-end scenarios against the library
    Scenario {
        #[arg(value_enum, default_value_t = ScenarioSelection::All)]
        which: ScenarioSelection,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScenarioSelection {
    /// Dedicated-thread task lifecycle
    A,
    /// Blocking lock serializes two callers
    B,
    /// Skip lock never runs a contended body
    C,
    All,
}

impl Cli {
    /// Merge every config layer, then apply command-line overrides.
    pub fn effective_config(&self) -> weave_core::Result<Config> {
        let mut config = load_config(self.config.as_deref())?;
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        Ok(config)
    }
}
