//! CLI module for the appdeploy tool.
//!
//! This module provides the command-line interface for running
//! deployment sessions and inspecting their recorded state.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, RequestArgs};
pub use output::OutputFormatter;
