//! Clap CLI definitions for voxkit.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  voxkit schemas                List the functions and events of every service
  voxkit schemas --json         Same, as JSON
  voxkit config                 Print the effective configuration
  voxkit demo                   Run a lifecycle cycle against a loopback agent
  voxkit demo --manual          Same, exercising manual listening";

/// voxkit: on-device agent orchestration runtime.
#[derive(Parser)]
#[command(name = "voxkit", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the function and event schemas of every registered service.
    Schemas {
        /// Output JSON for scripting.
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as TOML.
    Config,
    /// Drive a loopback agent through activate, start, sleep, wake and stop.
    Demo {
        /// Switch to Manual chat mode and exercise manual listening.
        #[arg(long)]
        manual: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_demo_manual() {
        let cli = Cli::try_parse_from(["voxkit", "demo", "--manual"]).unwrap();
        assert!(matches!(cli.command, Commands::Demo { manual: true }));
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["voxkit", "schemas", "--json", "--config", "/tmp/v.toml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/v.toml")));
        assert!(matches!(cli.command, Commands::Schemas { json: true }));
    }
}
