//! Error types for the appdeploy orchestrator.
//!
//! This module provides the error hierarchy for every stage of a deployment
//! session: configuration, plan construction, state management and the
//! external collaborators that perform the actual work on the machine.

use std::path::PathBuf;
use thiserror::Error;

use crate::exit_code;

/// The main error type for the appdeploy orchestrator.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// External collaborator errors.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration errors. Raised before any step executes.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// The same product key appears twice in one phase.
    #[error("Duplicate product key '{product_key}' in {phase} phase")]
    DuplicateProductKey {
        /// Phase holding the duplicate.
        phase: String,
        /// The duplicated key.
        product_key: String,
    },

    /// The requested deployment type is not recognized.
    #[error("Unknown deployment type: {value} (expected Install or Uninstall)")]
    UnknownDeploymentType {
        /// The rejected value.
        value: String,
    },

    /// A field holds a value outside its accepted set.
    #[error("Invalid value '{value}' for {field}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// The rejected value.
        value: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// Another session holds the machine lock.
    #[error("Another deployment session is running (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Errors reported by external collaborators while executing a step.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The collaborator itself could not be reached or crashed.
    #[error("{collaborator} is unavailable: {message}")]
    Unreachable {
        /// Which collaborator failed.
        collaborator: String,
        /// Description of the failure.
        message: String,
    },

    /// The step's external call failed.
    #[error("Step failed: {message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },
}

/// Result type alias for appdeploy operations.
pub type Result<T> = std::result::Result<T, DeployError>;

impl DeployError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error means the collaborator layer is broken.
    #[must_use]
    pub const fn is_engine_fault(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::Unreachable { .. }))
    }

    /// Maps an error that escaped the session to a built-in exit code.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => exit_code::CONFIGURATION_ERROR,
            _ => exit_code::ENGINE_FAULT,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }

    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid_value(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
        }
    }
}

impl StateError {
    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ExecutionError {
    /// Creates an unreachable-collaborator error.
    #[must_use]
    pub fn unreachable(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreachable {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }

    /// Creates a step failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_map_to_configuration_code() {
        let err = DeployError::from(ConfigError::UnknownDeploymentType {
            value: String::from("Repair"),
        });
        assert_eq!(err.exit_code(), 60008);
        assert!(!err.is_engine_fault());
    }

    #[test]
    fn test_unreachable_is_engine_fault() {
        let err = DeployError::from(ExecutionError::unreachable("installer", "msiexec missing"));
        assert!(err.is_engine_fault());
        assert_eq!(err.exit_code(), 60001);
    }
}
