//! appdeploy CLI entrypoint.
//!
//! The process exit code is the session's final exit code, so an invoking
//! management system can act on it directly.

use std::path::{Path, PathBuf};

use appdeploy::cli::{Cli, Commands, OutputFormat, OutputFormatter, RequestArgs};
use appdeploy::config::{ConfigParser, ConfigValidator, DeployConfig, find_config_file};
use appdeploy::error::{DeployError, Result, StateError};
use appdeploy::exit_code;
use appdeploy::host::{CommandInvoker, ConsoleGatekeeper, SystemProbe};
use appdeploy::session::DeploymentSession;
use appdeploy::state::{LocalStateStore, StateStore};

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format, cli.disable_logging);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            std::process::exit(exit_code::ENGINE_FAULT);
        }
    };

    let code = match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            e.exit_code()
        }
    };

    std::process::exit(code);
}

/// Initializes the logging system.
fn init_logging(verbose: bool, format: OutputFormat, disabled: bool) {
    let filter = if disabled {
        EnvFilter::new("off")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        OutputFormat::Json => builder.json().init(),
        OutputFormat::Text => builder.init(),
    }
}

/// Main async entry point. Returns the process exit code.
async fn run(cli: Cli) -> Result<i32> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Deploy { request } => {
            cmd_deploy(cli.config.as_ref(), &request, &formatter).await
        }
        Commands::Plan { request } => cmd_plan(cli.config.as_ref(), &request, &formatter),
        Commands::Validate { warnings } => cmd_validate(cli.config.as_ref(), warnings, &formatter),
        Commands::History { limit } => cmd_history(cli.config.as_ref(), limit, &formatter).await,
        Commands::Unlock { force } => cmd_unlock(cli.config.as_ref(), force, &formatter).await,
    }
}

/// Run a deployment session.
async fn cmd_deploy(
    config_path: Option<&PathBuf>,
    args: &RequestArgs,
    formatter: &OutputFormatter,
) -> Result<i32> {
    let (config, config_file) = load_config(config_path)?;
    let request = args.to_request(&config.session.blocking_processes)?;
    let state_store = state_store_for(&config, &config_file);

    let invoker = CommandInvoker::new(config.installer.clone());
    let gatekeeper = ConsoleGatekeeper::new();
    let probe = SystemProbe::new();

    let session = DeploymentSession::new(&config, &state_store, &invoker, &gatekeeper, &probe);
    let report = session.run(&request).await?;

    eprintln!("{}", formatter.format_result(&report.result));
    info!("Exiting with code {}", report.exit_code());
    Ok(report.exit_code())
}

/// Show the session plan.
fn cmd_plan(
    config_path: Option<&PathBuf>,
    args: &RequestArgs,
    formatter: &OutputFormatter,
) -> Result<i32> {
    let (config, config_file) = load_config(config_path)?;
    let request = args.to_request(&config.session.blocking_processes)?;
    let state_store = state_store_for(&config, &config_file);

    let invoker = CommandInvoker::new(config.installer.clone());
    let gatekeeper = ConsoleGatekeeper::new();
    let probe = SystemProbe::new();

    let session = DeploymentSession::new(&config, &state_store, &invoker, &gatekeeper, &probe);
    let plan = session.plan(&request)?;

    eprintln!("{}", formatter.format_plan(&plan));
    Ok(exit_code::SUCCESS)
}

/// Validate the catalog.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<i32> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating catalog: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().check(&config);
    eprintln!("{}", formatter.format_validation(&result, show_warnings));

    if result.is_valid() {
        eprintln!("\nCatalog summary:");
        eprintln!("  App: {}", config.app.name);
        eprintln!("  Entries: {} ({} enabled)", config.catalog.len(), config.enabled_entries().count());
        eprintln!("  Blocking processes: {}", config.session.blocking_processes.len());
        Ok(exit_code::SUCCESS)
    } else {
        Ok(exit_code::CONFIGURATION_ERROR)
    }
}

/// Show recorded sessions.
async fn cmd_history(
    config_path: Option<&PathBuf>,
    limit: usize,
    formatter: &OutputFormatter,
) -> Result<i32> {
    let (config, config_file) = load_config(config_path)?;
    let state_store = state_store_for(&config, &config_file);

    match state_store.load().await? {
        Some(state) => eprintln!("{}", formatter.format_history(&state, limit)),
        None => eprintln!(
            "{}",
            formatter.format_message("warning", "No sessions recorded yet.")
        ),
    }

    Ok(exit_code::SUCCESS)
}

/// Remove a stale session lock.
async fn cmd_unlock(
    config_path: Option<&PathBuf>,
    force: bool,
    formatter: &OutputFormatter,
) -> Result<i32> {
    let (config, config_file) = load_config(config_path)?;
    let state_store = state_store_for(&config, &config_file);

    let Some(lock) = state_store.get_lock_info().await? else {
        eprintln!("{}", formatter.format_message("success", "No session lock present."));
        return Ok(exit_code::SUCCESS);
    };

    if !force && !lock.is_expired() {
        eprintln!("{}", formatter.format_lock(&lock));
        return Err(DeployError::State(StateError::LockedByOther {
            holder: lock.holder,
            since: lock.acquired_at.to_rfc3339(),
        }));
    }

    state_store.force_unlock().await?;
    eprintln!("{}", formatter.format_message("success", "Session lock removed."));
    Ok(exit_code::SUCCESS)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the catalog file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

fn config_dir(config_file: &Path) -> &Path {
    config_file.parent().unwrap_or_else(|| Path::new("."))
}

/// Loads and validates the catalog.
fn load_config(config_path: Option<&PathBuf>) -> Result<(DeployConfig, PathBuf)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading catalog from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(&config_file));
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;
    ConfigValidator::new().validate(&config)?;

    Ok((config, config_file))
}

/// Creates the state store for the catalog's application.
fn state_store_for(config: &DeployConfig, config_file: &Path) -> LocalStateStore {
    let base = config_dir(config_file);
    config.state.path.as_ref().map_or_else(
        || LocalStateStore::in_default_dir(base, &config.app.name),
        |path| LocalStateStore::for_app(base.join(path), &config.app.name),
    )
}
