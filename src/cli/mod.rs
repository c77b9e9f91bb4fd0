//! CLI module for the `ipfs-deploy` tool.
//!
//! This module provides the command-line interface for previewing,
//! applying, and inspecting a stack.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat, StateCommands};
pub use output::OutputFormatter;
