//! CLI module for the rangeforge build tool.
//!
//! This module provides the command-line interface for planning, building
//! and inspecting range topologies.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
