//! weave CLI - scenario runner and config inspector
//!
//! Binary name: `weave`

use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use weave_core::config::LogLevel;

mod cli;
mod scenarios;

use cli::{Cli, Command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("Error: {err:#}");
        }

        let code = err
            .downcast_ref::<weave_core::Error>()
            .map_or(1, weave_core::Error::exit_code);

        #[allow(clippy::exit)]
        process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.effective_config()?;
    init_tracing(config.logging.level)?;
    tracing::debug!(level = %config.logging.level, "configuration loaded");

    match cli.command {
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Command::Scenario { which } => scenarios::run(which, &config).await,
    }
}

/// Initialize tracing subscriber for logging
///
/// Configures the tracing subscriber with:
/// - Environment filter (`RUST_LOG`, falling back to the configured level)
/// - Stderr output (to avoid mixing with stdout)
///
/// # Errors
/// Returns an error if the subscriber initialization fails
fn init_tracing(level: LogLevel) -> anyhow::Result<()> {
    let default_level: tracing::Level = level.into();
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {e}"))
}
