//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::parse_override;

/// ipfs-deploy - declarative reconciler for an IPFS node stack.
#[derive(Parser, Debug)]
#[command(name = "ipfs-deploy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the manifest file.
    #[arg(short, long, global = true, env = "IPFS_DEPLOY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Set a config option, e.g. `--set instanceType=t3.small`.
    #[arg(long = "set", global = true, value_name = "NAME=VALUE", value_parser = parse_override)]
    pub set: Vec<(String, String)>,

    /// Maximum operations in flight.
    #[arg(long, global = true)]
    pub parallelism: Option<usize>,

    /// Stop scheduling new operations after this many seconds.
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter manifest and .env example.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the manifest.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Compute and display the plan without applying it.
    #[command(alias = "plan")]
    Preview {
        /// Show changed fields for every operation.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Plan and apply the manifest.
    #[command(alias = "apply")]
    Up {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Delete every resource recorded in state.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Sync recorded state with the provider.
    Refresh,

    /// Show stack outputs.
    Outputs {
        /// Print secret values in clear text.
        #[arg(long)]
        show_secrets: bool,
    },

    /// Inspect and manage state.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show the state header and history.
    Show,

    /// List recorded resources.
    List,

    /// Lock the state.
    Lock {
        /// Lock holder identifier.
        #[arg(long)]
        holder: Option<String>,
    },

    /// Unlock the state.
    Unlock {
        /// Lock ID to unlock.
        #[arg(long)]
        lock_id: Option<String>,

        /// Force unlock (dangerous).
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_is_an_alias_for_up() {
        let cli = Cli::try_parse_from(["ipfs-deploy", "apply", "--yes"]).unwrap();
        assert!(matches!(cli.command, Commands::Up { yes: true }));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ipfs-deploy",
            "preview",
            "--set",
            "instanceType=t3.small",
            "--set",
            "myPublicIp=203.0.113.7/32",
            "--parallelism",
            "4",
            "--output",
            "json",
        ])
        .unwrap();

        assert_eq!(
            cli.set,
            vec![
                (String::from("instanceType"), String::from("t3.small")),
                (String::from("myPublicIp"), String::from("203.0.113.7/32")),
            ]
        );
        assert_eq!(cli.parallelism, Some(4));
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Preview { detailed: false }));
    }

    #[test]
    fn test_malformed_set_rejected() {
        assert!(Cli::try_parse_from(["ipfs-deploy", "up", "--set", "novalue"]).is_err());
    }

    #[test]
    fn test_state_unlock_force() {
        let cli = Cli::try_parse_from(["ipfs-deploy", "state", "unlock", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::State {
                command: StateCommands::Unlock { force: true, lock_id: None }
            }
        ));
    }

    #[test]
    fn test_clap_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
