//! voxkit CLI: inspect service contracts, print the effective config and
//! drive a loopback agent through its lifecycle on an in-process kernel.

mod cli;
mod cmd;
mod loopback;

use crate::cli::{Cli, Commands};
use clap::Parser;
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use voxkit_kernel::config::{default_config_path, try_load_config};
use voxkit_types::config::RuntimeConfig;
use voxkit_types::error::ConfigError;

fn init_tracing_stderr(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Read the config before tracing is up, so the configured log level can be
/// applied. A failure is reported once logging is installed.
fn read_config(path: Option<PathBuf>) -> (RuntimeConfig, Option<(PathBuf, ConfigError)>) {
    let explicit = path.is_some();
    let path = path.unwrap_or_else(default_config_path);
    if !explicit && !path.exists() {
        return (RuntimeConfig::default(), None);
    }
    match try_load_config(&path) {
        Ok(config) => (config, None),
        Err(e) => (RuntimeConfig::default(), Some((path, e))),
    }
}

fn main() {
    let cli = Cli::parse();

    let (config, load_error) = read_config(cli.config.clone());
    init_tracing_stderr(&config.log_level, cli.json_logs);
    if let Some((path, e)) = load_error {
        warn!(path = %path.display(), error = %e, "Failed to load config, using defaults");
    }

    let result = match cli.command {
        Commands::Config => cmd::cmd_config(&config),
        Commands::Schemas { json } => run_async(cmd::cmd_schemas(config, json)),
        Commands::Demo { manual } => run_async(cmd::cmd_demo(config, manual)),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run_async<F>(fut: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = anyhow::Result<()>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(fut)
}
