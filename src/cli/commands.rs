//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::error::Result;
use crate::planner::{DeployMode, DeploymentRequest, DeploymentType};

/// appdeploy - Declarative software deployment sessions.
#[derive(Parser, Debug)]
#[command(name = "appdeploy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the catalog file.
    #[arg(short, long, global = true, env = "APPDEPLOY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: OutputFormat,

    /// Disable logging entirely.
    #[arg(long, global = true)]
    pub disable_logging: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a deployment session.
    Deploy {
        /// Session request.
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Build and display the session plan without executing it.
    Plan {
        /// Session request.
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Validate the catalog.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show recorded sessions.
    History {
        /// Number of sessions to show.
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Remove a stale session lock.
    Unlock {
        /// Remove the lock even if it has not expired.
        #[arg(long)]
        force: bool,
    },
}

/// Flags describing a deployment request.
#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
    /// Install or Uninstall.
    #[arg(long, default_value = "Install", env = "APPDEPLOY_DEPLOYMENT_TYPE")]
    pub deployment_type: String,

    /// Interactive, Silent or NonInteractive.
    #[arg(long, default_value = "Interactive", env = "APPDEPLOY_DEPLOY_MODE")]
    pub deploy_mode: String,

    /// Pass exit code 3010 through when a reboot is required.
    #[arg(long)]
    pub allow_reboot_passthru: bool,

    /// Wrap the session in terminal server install mode.
    #[arg(long)]
    pub terminal_server_mode: bool,
}

impl RequestArgs {
    /// Converts the flags into a deployment request.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unrecognized deployment types or modes.
    pub fn to_request(&self, blocking_processes: &[String]) -> Result<DeploymentRequest> {
        let deployment_type: DeploymentType = self.deployment_type.parse()?;
        let deploy_mode: DeployMode = self.deploy_mode.parse()?;

        let mut request = DeploymentRequest::new(deployment_type, deploy_mode)
            .with_blocking_processes(blocking_processes.iter().cloned());
        request.allow_reboot_passthru = self.allow_reboot_passthru;
        request.terminal_server_mode = self.terminal_server_mode;
        Ok(request)
    }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_flags() {
        let cli = Cli::try_parse_from([
            "appdeploy",
            "deploy",
            "--deployment-type",
            "Uninstall",
            "--deploy-mode",
            "NonInteractive",
            "--allow-reboot-passthru",
        ])
        .unwrap();

        let Commands::Deploy { request } = cli.command else {
            panic!("expected deploy command");
        };
        let request = request.to_request(&[String::from("acme.exe")]).unwrap();
        assert_eq!(request.deployment_type, DeploymentType::Uninstall);
        assert_eq!(request.deploy_mode, DeployMode::NonInteractive);
        assert!(request.allow_reboot_passthru);
        assert!(!request.terminal_server_mode);
        assert!(request.blocking_process_names.contains("acme.exe"));
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["appdeploy", "plan"]).unwrap();
        let Commands::Plan { request } = cli.command else {
            panic!("expected plan command");
        };
        let request = request.to_request(&[]).unwrap();
        assert_eq!(request.deployment_type, DeploymentType::Install);
        assert_eq!(request.deploy_mode, DeployMode::Interactive);
        assert_eq!(cli.output, OutputFormat::Text);
    }

    #[test]
    fn test_unknown_deployment_type_is_configuration_error() {
        let cli = Cli::try_parse_from(["appdeploy", "deploy", "--deployment-type", "Repair"])
            .unwrap();
        let Commands::Deploy { request } = cli.command else {
            panic!("expected deploy command");
        };
        let err = request.to_request(&[]).unwrap_err();
        assert_eq!(err.exit_code(), crate::exit_code::CONFIGURATION_ERROR);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "appdeploy",
            "history",
            "--limit",
            "3",
            "--output",
            "json",
            "--disable-logging",
        ])
        .unwrap();
        assert!(cli.disable_logging);
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::History { limit: 3 }));
    }
}
