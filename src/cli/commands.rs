//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// rangeforge - Incremental builder for training range topologies.
#[derive(Parser, Debug)]
#[command(name = "rangeforge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the topology file.
    #[arg(short, long, global = true, env = "RANGEFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the topology file.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show what the next build would do.
    Plan {
        /// Include nodes that need no change.
        #[arg(short, long)]
        all: bool,

        /// Node ids to plan as rebuilds.
        #[arg(long, value_name = "ID")]
        rebuild: Vec<String>,
    },

    /// Bring the build root in line with the topology.
    Build {
        /// Node ids to rebuild regardless of their state.
        #[arg(long, value_name = "ID")]
        rebuild: Vec<String>,

        /// Maximum number of nodes applied at once.
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Show the recorded state of the build root.
    Status {
        /// Show the full record of one node.
        id: Option<String>,
    },

    /// Force a node to be re-applied on the next build.
    Taint {
        /// Node id to taint.
        id: String,
    },

    /// Print the topology tree.
    Show {
        /// Maximum depth to render.
        #[arg(short, long)]
        depth: Option<usize>,

        /// Print node ids.
        #[arg(long)]
        ids: bool,

        /// Print node fingerprints.
        #[arg(long)]
        checksums: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_arguments() {
        let cli = Cli::parse_from([
            "rangeforge",
            "build",
            "--rebuild",
            "teams/0",
            "--rebuild",
            "users/ops",
            "-w",
            "8",
        ]);
        match cli.command {
            Commands::Build { rebuild, workers } => {
                assert_eq!(rebuild, vec!["teams/0", "users/ops"]);
                assert_eq!(workers, Some(8));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["rangeforge", "show", "--depth", "2", "--output", "json", "-v"]);
        assert!(cli.verbose);
        assert!(matches!(cli.output, OutputFormat::Json));
        assert!(matches!(cli.command, Commands::Show { depth: Some(2), .. }));
    }

    #[test]
    fn test_command_definitions() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
