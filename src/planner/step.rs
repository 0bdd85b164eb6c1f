//! Step variants and their outcomes.
//!
//! A step is pure data: it names one unit of work and carries only the
//! fields that work needs. Ordering comes solely from its position in a plan.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Session phases, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Pre-flight checks and process closure.
    Pre,
    /// Catalog-derived package operations.
    Main,
    /// Reboot prompts, completion and cleanup.
    Post,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Self; 3] = [Self::Pre, Self::Main, Self::Post];
}

/// How blocking processes are closed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClosureMode {
    /// Close without asking.
    CloseImmediate,
    /// Ask, then close when the countdown (seconds) expires.
    CountdownSeconds(u64),
    /// Ask until the user closes the processes.
    PersistUntilManual,
}

/// When a prompt is shown.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PromptCondition {
    /// Always.
    #[default]
    Always,
    /// Only when an earlier step requested a reboot.
    RebootRequired,
}

/// A prompt shown to the interactive user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prompt {
    /// Message text.
    pub message: String,
    /// Seconds to wait before the prompt times out.
    pub timeout_secs: u64,
    /// Whether the user may defer the deployment from this prompt.
    pub allow_defer: bool,
    /// When the prompt applies.
    pub condition: PromptCondition,
}

/// The atomic unit of a deployment plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    /// Install a package.
    InstallPackage {
        /// Product key.
        product_key: String,
        /// Installer artifact used instead of the key.
        installer: Option<PathBuf>,
        /// Transform file.
        transform: Option<PathBuf>,
        /// Patch files applied with the install.
        patches: Vec<PathBuf>,
    },
    /// Uninstall a package.
    UninstallPackage {
        /// Product key.
        product_key: String,
    },
    /// Patch an installed package.
    PatchPackage {
        /// Product key.
        product_key: String,
        /// Patch files.
        patches: Vec<PathBuf>,
    },
    /// Run an executable.
    RunExecutable {
        /// Executable path.
        path: PathBuf,
        /// Arguments.
        args: Vec<String>,
        /// Wait for exit; otherwise the process is left running.
        wait: bool,
    },
    /// Require free disk space.
    CheckDiskSpace {
        /// Volume to check.
        path: PathBuf,
        /// Required free space in megabytes.
        required_mb: u64,
    },
    /// Detect an installed prior version by file presence.
    CheckPriorVersionPresent {
        /// Product key the detection applies to.
        product_key: String,
        /// File whose presence signals the version.
        path: PathBuf,
        /// Absence is a failure rather than a no-op signal.
        required: bool,
    },
    /// Negotiate closure of blocking processes.
    CloseProcesses {
        /// Process names.
        process_names: Vec<String>,
        /// Closure mode.
        mode: ClosureMode,
        /// Whether the user may defer.
        allow_defer: bool,
    },
    /// Show a prompt.
    ShowPrompt(Prompt),
}

impl Step {
    /// Returns the product key for package-related steps.
    #[must_use]
    pub fn product_key(&self) -> Option<&str> {
        match self {
            Self::InstallPackage { product_key, .. }
            | Self::UninstallPackage { product_key }
            | Self::PatchPackage { product_key, .. }
            | Self::CheckPriorVersionPresent { product_key, .. } => Some(product_key),
            _ => None,
        }
    }

    /// Returns true if the step mutates the machine through the installer.
    #[must_use]
    pub const fn is_installer_step(&self) -> bool {
        matches!(
            self,
            Self::InstallPackage { .. } | Self::UninstallPackage { .. } | Self::PatchPackage { .. }
        )
    }

    /// Returns the step kind as a short string.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InstallPackage { .. } => "install",
            Self::UninstallPackage { .. } => "uninstall",
            Self::PatchPackage { .. } => "patch",
            Self::RunExecutable { .. } => "run",
            Self::CheckDiskSpace { .. } => "check-disk",
            Self::CheckPriorVersionPresent { .. } => "detect",
            Self::CloseProcesses { .. } => "close-processes",
            Self::ShowPrompt(_) => "prompt",
        }
    }

    /// Returns the step target as a short string.
    #[must_use]
    pub fn target(&self) -> String {
        match self {
            Self::InstallPackage { product_key, .. }
            | Self::UninstallPackage { product_key }
            | Self::PatchPackage { product_key, .. } => product_key.clone(),
            Self::RunExecutable { path, args, .. } => {
                let mut target = path.display().to_string();
                for arg in args {
                    target.push(' ');
                    target.push_str(arg);
                }
                target
            }
            Self::CheckDiskSpace { path, required_mb } => {
                format!("{} >= {required_mb} MB", path.display())
            }
            Self::CheckPriorVersionPresent { path, .. } => path.display().to_string(),
            Self::CloseProcesses { process_names, .. } => process_names.join(", "),
            Self::ShowPrompt(prompt) => prompt.message.clone(),
        }
    }
}

/// What happens when a step fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the session.
    #[default]
    Abort,
    /// Record a soft failure and continue.
    Continue,
}

/// A step positioned in a plan, with its failure handling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannedStep {
    /// Human label.
    pub label: String,
    /// The step.
    pub step: Step,
    /// Failure handling.
    pub on_failure: FailurePolicy,
    /// Custom code reported on failure.
    pub failure_code: Option<i32>,
}

impl PlannedStep {
    /// Creates a step that aborts the session on failure.
    #[must_use]
    pub fn new(label: impl Into<String>, step: Step) -> Self {
        Self {
            label: label.into(),
            step,
            on_failure: FailurePolicy::Abort,
            failure_code: None,
        }
    }

    /// Sets the failure policy.
    #[must_use]
    pub const fn with_policy(mut self, on_failure: FailurePolicy) -> Self {
        self.on_failure = on_failure;
        self
    }

    /// Sets the custom failure code.
    #[must_use]
    pub const fn with_failure_code(mut self, failure_code: Option<i32>) -> Self {
        self.failure_code = failure_code;
        self
    }
}

/// Outcome classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// The step succeeded.
    Success,
    /// The step succeeded and a reboot is pending.
    SuccessRebootRequired,
    /// The step failed but the session continues.
    SoftFailure,
    /// The step failed and the session aborts.
    HardFailure,
}

impl Classification {
    /// Returns true for either success classification.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::SuccessRebootRequired)
    }
}

/// Result of executing one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepOutcome {
    /// Label of the step.
    pub label: String,
    /// Raw completion code.
    pub code: i32,
    /// Classification of the code.
    pub classification: Classification,
    /// Elapsed time.
    pub duration_ms: u64,
    /// Custom code reported if this outcome fails the session.
    #[serde(default)]
    pub custom_code: Option<i32>,
    /// Detail message.
    #[serde(default)]
    pub message: Option<String>,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pre => "pre",
            Self::Main => "main",
            Self::Post => "post",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::SuccessRebootRequired => "success (reboot required)",
            Self::SoftFailure => "soft failure",
            Self::HardFailure => "hard failure",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.step.kind(), self.label)?;
        if self.on_failure == FailurePolicy::Continue {
            write!(f, " (best effort)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_key_accessor() {
        let step = Step::UninstallPackage {
            product_key: String::from("P1"),
        };
        assert_eq!(step.product_key(), Some("P1"));
        assert!(step.is_installer_step());

        let step = Step::CheckDiskSpace {
            path: PathBuf::from("/"),
            required_mb: 10,
        };
        assert_eq!(step.product_key(), None);
        assert!(!step.is_installer_step());
    }

    #[test]
    fn test_run_target_includes_args() {
        let step = Step::RunExecutable {
            path: PathBuf::from("change.exe"),
            args: vec![String::from("user"), String::from("/install")],
            wait: true,
        };
        assert_eq!(step.target(), "change.exe user /install");
    }

    #[test]
    fn test_phase_order() {
        assert!(Phase::Pre < Phase::Main);
        assert!(Phase::Main < Phase::Post);
    }
}
