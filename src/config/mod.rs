//! Configuration module for the appdeploy orchestrator.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `appdeploy.yaml`
//! - Validation of catalog values
//! - Computing catalog hashes for session records

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{
    AppConfig, ClosureConfig, ClosureModeKind, CommandTemplate, DeployConfig, ExecutableConfig,
    InstallerConfig, PackageAction, PackageEntry, SessionConfig, StateConfig,
};
pub use parser::{ConfigParser, find_config_file};
pub use validator::{ConfigValidator, ValidationResult};
pub use hash::ConfigHasher;
