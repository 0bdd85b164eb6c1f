//! Catalog validation.
//!
//! This module validates a deployment catalog before any plan is built,
//! collecting every error and warning so the operator sees them all at once.

use crate::error::{ConfigError, DeployError, Result};
use crate::exit_code;
use std::collections::HashSet;
use tracing::debug;

use super::spec::{
    ClosureModeKind, DeployConfig, ExecutableConfig, PackageAction, PackageEntry, SessionConfig,
};

/// Validator for deployment catalogs.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug, serde::Serialize)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, config: &DeployConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_app(config, &mut result);
        Self::validate_session(&config.session, &mut result);
        Self::validate_catalog(&config.catalog, &mut result);

        result
    }

    /// Validates a deployment catalog.
    ///
    /// # Errors
    ///
    /// Returns the first error found if validation fails.
    pub fn validate(&self, config: &DeployConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        match result.errors.first() {
            None => {
                debug!("Catalog validation passed");
                Ok(result)
            }
            Some(first_error) => Err(DeployError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            })),
        }
    }

    fn validate_app(config: &DeployConfig, result: &mut ValidationResult) {
        if config.app.name.trim().is_empty() {
            result.errors.push(ValidationError {
                field: String::from("app.name"),
                message: String::from("Application name cannot be empty"),
            });
        } else if config
            .app
            .name
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        {
            result.errors.push(ValidationError {
                field: String::from("app.name"),
                message: format!(
                    "Application name '{}' contains characters not allowed in file names",
                    config.app.name
                ),
            });
        }
    }

    fn validate_session(session: &SessionConfig, result: &mut ValidationResult) {
        if session.closure.mode == ClosureModeKind::Countdown && session.closure.countdown_secs == 0
        {
            result.errors.push(ValidationError {
                field: String::from("session.closure.countdown_secs"),
                message: String::from("Countdown closure requires a positive countdown"),
            });
        }

        if session.allow_defer && session.max_deferrals == 0 {
            result.warnings.push(String::from(
                "session.max_deferrals: deferral is allowed but no deferrals are granted",
            ));
        }

        for (i, code) in session.benign_codes.iter().enumerate() {
            if *code == 0 || *code == exit_code::REBOOT_REQUIRED {
                result.errors.push(ValidationError {
                    field: format!("session.benign_codes[{i}]"),
                    message: format!("Code {code} is already classified and cannot be benign"),
                });
            }
        }

        if session.required_disk_space_mb == Some(0) {
            result
                .warnings
                .push(String::from("session.required_disk_space_mb: a zero threshold always passes"));
        }

        let mut seen = HashSet::new();
        for (i, name) in session.blocking_processes.iter().enumerate() {
            if name.trim().is_empty() {
                result.errors.push(ValidationError {
                    field: format!("session.blocking_processes[{i}]"),
                    message: String::from("Blocking process name cannot be empty"),
                });
            } else if !seen.insert(name.to_lowercase()) {
                result.warnings.push(format!(
                    "session.blocking_processes[{i}]: '{name}' is listed more than once"
                ));
            }
        }

        for (i, exe) in session.post_executables.iter().enumerate() {
            Self::validate_executable(exe, &format!("session.post_executables[{i}]"), result);
        }
    }

    fn validate_executable(exe: &ExecutableConfig, prefix: &str, result: &mut ValidationResult) {
        if exe.path.as_os_str().is_empty() {
            result.errors.push(ValidationError {
                field: format!("{prefix}.path"),
                message: String::from("Executable path cannot be empty"),
            });
        }
        Self::validate_failure_code(exe.failure_code, prefix, result);
        if !exe.wait && exe.failure_code.is_some() {
            result.warnings.push(format!(
                "{prefix}.failure_code: ignored because the executable is not awaited"
            ));
        }
    }

    fn validate_catalog(catalog: &[PackageEntry], result: &mut ValidationResult) {
        if catalog.is_empty() {
            result.warnings.push(String::from("No packages defined in catalog"));
            return;
        }

        let mut seen: HashSet<(PackageAction, &str)> = HashSet::new();

        for (i, entry) in catalog.iter().enumerate() {
            let prefix = format!("catalog[{i}]");

            if entry.product_key.trim().is_empty() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.product_key"),
                    message: String::from("Product key cannot be empty"),
                });
            }

            if !entry.enabled {
                result
                    .warnings
                    .push(format!("{prefix}: '{}' is disabled and will be skipped", entry.label()));
                continue;
            }

            if !seen.insert((entry.action, entry.product_key.as_str())) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.product_key"),
                    message: format!(
                        "Duplicate {} entry for product key {}",
                        entry.action, entry.product_key
                    ),
                });
            }

            if entry.action == PackageAction::Patch && entry.patches.is_empty() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.patches"),
                    message: String::from("Patch entries require at least one patch file"),
                });
            }

            if entry.action != PackageAction::Install && entry.transform.is_some() {
                result.warnings.push(format!(
                    "{prefix}.transform: transforms only apply to install entries"
                ));
            }

            if entry.action != PackageAction::Uninstall && entry.detect_path.is_some() {
                result.warnings.push(format!(
                    "{prefix}.detect_path: prior-version detection only applies to uninstall entries"
                ));
            }

            Self::validate_failure_code(entry.failure_code, &prefix, result);
        }
    }

    fn validate_failure_code(code: Option<i32>, prefix: &str, result: &mut ValidationResult) {
        if let Some(code) = code {
            if !exit_code::is_custom(code) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.failure_code"),
                    message: format!(
                        "Failure code {code} is outside the custom range {}-{}",
                        exit_code::CUSTOM_RANGE.start(),
                        exit_code::CUSTOM_RANGE.end()
                    ),
                });
            }
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl ValidationResult {
    /// Returns true if the catalog is valid (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> DeployConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    #[test]
    fn test_valid_catalog() {
        let config = parse(
            r#"
app:
  name: acme-suite
catalog:
  - product_key: "{AAAA-0001}"
    action: uninstall
  - product_key: "{BBBB-0001}"
    action: install
    failure_code: 69001
"#,
        );
        let result = ConfigValidator::new().validate(&config).unwrap();
        assert!(result.is_valid());
    }

    #[test]
    fn test_duplicate_entry_is_error() {
        let config = parse(
            r#"
app:
  name: acme-suite
catalog:
  - product_key: "{AAAA-0001}"
    action: uninstall
  - product_key: "{AAAA-0001}"
    action: uninstall
"#,
        );
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert!(err.to_string().contains("Duplicate uninstall entry"));
    }

    #[test]
    fn test_disabled_duplicate_is_only_warned() {
        let config = parse(
            r#"
app:
  name: acme-suite
catalog:
  - product_key: "{AAAA-0001}"
    action: uninstall
  - product_key: "{AAAA-0001}"
    action: uninstall
    enabled: false
"#,
        );
        let result = ConfigValidator::new().validate(&config).unwrap();
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_failure_code_outside_custom_range() {
        let config = parse(
            r#"
app:
  name: acme-suite
catalog:
  - product_key: "{BBBB-0001}"
    action: install
    failure_code: 60002
"#,
        );
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert!(matches!(
            err,
            DeployError::Config(ConfigError::ValidationError { field: Some(ref f), .. })
                if f == "catalog[0].failure_code"
        ));
    }

    #[test]
    fn test_benign_reboot_code_rejected() {
        let config = parse(
            r"
app:
  name: acme-suite
session:
  benign_codes: [3010]
catalog: []
",
        );
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_patch_without_files() {
        let config = parse(
            r#"
app:
  name: acme-suite
catalog:
  - product_key: "{BBBB-0001}"
    action: patch
"#,
        );
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_check_collects_every_error() {
        let config = parse(
            r#"
app:
  name: "acme/suite"
session:
  benign_codes: [0]
catalog:
  - product_key: ""
    action: install
"#,
        );
        let result = ConfigValidator::new().check(&config);
        assert!(!result.is_valid());
        assert_eq!(result.errors.len(), 3);
        assert_eq!(result.errors[0].field, "app.name");
    }
}
