// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![cfg_attr(not(test), deny(missing_docs))] // All public items must be documented
#![warn(dead_code)]                   // Unused code is flagged
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are flagged
#![warn(unused_variables)]            // Unused variables are flagged
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # appdeploy
//!
//! A declarative software deployment session engine.
//!
//! ## Overview
//!
//! appdeploy runs an install or uninstall of a packaged application as one
//! session with three phases:
//!
//! - **Pre-install**: welcome prompt, closing blocking applications, disk checks
//! - **Main**: package operations against the system installer
//! - **Post-install**: completion and reboot prompts, follow-up executables
//!
//! Every step outcome is classified from its raw exit code, and the session
//! collapses those classifications into a single process exit code that an
//! invoking management system can act on.
//!
//! ## Architecture
//!
//! 1. **Catalog**: Defined in `appdeploy.yaml`
//! 2. **Plan**: Built from the catalog and the session request
//! 3. **Engine**: Runs the plan phase by phase under a machine-wide lock
//! 4. **State**: Deferral count and session history persisted per application
//!
//! ## Modules
//!
//! - [`config`]: Catalog parsing and validation
//! - [`planner`]: Steps, plans and the session engine
//! - [`host`]: Installer, process and disk collaborators
//! - [`session`]: Locked session orchestration
//! - [`state`]: Persisted deployment state
//! - [`exit_code`]: Exit code registry and classification
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! app:
//!   name: acme-reader
//!   version: "2.0"
//!
//! session:
//!   blocking_processes: [acmereader.exe]
//!   allow_defer: true
//!
//! catalog:
//!   - product_key: "{AAAA-0001}"
//!     action: install
//!     installer: AcmeReader.msi
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod exit_code;
pub mod host;
pub mod planner;
pub mod session;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, DeployConfig};
pub use error::{DeployError, Result};
pub use exit_code::compute_exit_code;
pub use host::{CommandInvoker, ConsoleGatekeeper, SystemProbe};
pub use planner::{DeploymentPlan, DeploymentRequest, SessionEngine, SessionResult, build_plan};
pub use session::{DeploymentSession, SessionReport};
pub use state::{DeploymentState, LocalStateStore, StateStore};
