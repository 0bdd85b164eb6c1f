//! Catalog types for the deployment configuration.
//!
//! This module defines all the structs that map to the `appdeploy.yaml` file.
//! The catalog is pure data: which packages exist, how their installers are
//! invoked and which session-level gates surround them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::planner::ClosureMode;

/// The root configuration structure for an appdeploy catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployConfig {
    /// Application metadata.
    pub app: AppConfig,
    /// Session-level gates and prompts.
    #[serde(default)]
    pub session: SessionConfig,
    /// Installer command templates.
    #[serde(default)]
    pub installer: InstallerConfig,
    /// Package catalog, in execution order.
    #[serde(default)]
    pub catalog: Vec<PackageEntry>,
    /// State storage configuration.
    #[serde(default)]
    pub state: StateConfig,
}

/// Application metadata, informational apart from `name`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Unique application name; keys the persisted state.
    pub name: String,
    /// Vendor label.
    #[serde(default)]
    pub vendor: Option<String>,
    /// Version being deployed.
    #[serde(default)]
    pub version: Option<String>,
    /// Directory holding installer artifacts, relative to the config file.
    #[serde(default)]
    pub files_dir: Option<PathBuf>,
}

/// Session-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    /// Process names that block installation while running.
    #[serde(default)]
    pub blocking_processes: Vec<String>,
    /// How blocking processes are closed.
    #[serde(default)]
    pub closure: ClosureConfig,
    /// Whether the interactive user may defer the deployment.
    #[serde(default)]
    pub allow_defer: bool,
    /// Number of deferrals granted before deferring becomes a failure.
    #[serde(default = "default_max_deferrals")]
    pub max_deferrals: u32,
    /// Installer codes treated as success besides 0.
    #[serde(default)]
    pub benign_codes: Vec<i32>,
    /// Free space required before installing, in megabytes.
    #[serde(default)]
    pub required_disk_space_mb: Option<u64>,
    /// Volume checked for free space.
    #[serde(default)]
    pub disk_check_path: Option<PathBuf>,
    /// Message shown before the main phase.
    #[serde(default)]
    pub welcome_message: Option<String>,
    /// Message shown after a completed session.
    #[serde(default)]
    pub completion_message: Option<String>,
    /// Message shown when a reboot is pending.
    #[serde(default)]
    pub reboot_message: Option<String>,
    /// How long prompts wait for the user, in seconds.
    #[serde(default = "default_prompt_timeout")]
    pub prompt_timeout_secs: u64,
    /// Executables run in the post phase.
    #[serde(default)]
    pub post_executables: Vec<ExecutableConfig>,
}

/// Closure negotiation configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClosureConfig {
    /// Closure mode.
    #[serde(default)]
    pub mode: ClosureModeKind,
    /// Countdown length for `countdown` mode.
    #[serde(default = "default_countdown")]
    pub countdown_secs: u64,
}

/// Closure mode as written in the catalog.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClosureModeKind {
    /// Close without asking.
    CloseImmediate,
    /// Ask, then close when the countdown expires.
    #[default]
    Countdown,
    /// Ask until the user closes the processes.
    PersistUntilManual,
}

/// An executable invoked by the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutableConfig {
    /// Executable path.
    pub path: PathBuf,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Wait for the process to exit.
    #[serde(default = "default_true")]
    pub wait: bool,
    /// Treat a failure as a soft failure.
    #[serde(default)]
    pub continue_on_error: bool,
    /// Custom exit code reported when this step fails.
    #[serde(default)]
    pub failure_code: Option<i32>,
}

/// Installer command templates.
///
/// Placeholders expand per argument: `{ref}` is the product key or installer
/// path, `{transform}` becomes `TRANSFORMS=<path>` (dropped when absent),
/// `{patches}` becomes `PATCH=<a;b>` and `{patches_list}` the bare `<a;b>`
/// (both dropped when empty), and `{ui}` becomes the silent or basic UI switch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallerConfig {
    /// Template for install actions.
    #[serde(default = "default_install_template")]
    pub install: CommandTemplate,
    /// Template for uninstall actions.
    #[serde(default = "default_uninstall_template")]
    pub uninstall: CommandTemplate,
    /// Template for patch actions.
    #[serde(default = "default_patch_template")]
    pub patch: CommandTemplate,
    /// Switch substituted for `{ui}` in silent sessions.
    #[serde(default = "default_silent_switch")]
    pub silent_switch: String,
    /// Switch substituted for `{ui}` in interactive sessions.
    #[serde(default = "default_interactive_switch")]
    pub interactive_switch: String,
}

/// A program plus argument templates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandTemplate {
    /// Program to run.
    pub program: String,
    /// Argument templates.
    #[serde(default)]
    pub args: Vec<String>,
}

/// One row in the package catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageEntry {
    /// Stable product identifier passed to the installer.
    pub product_key: String,
    /// What to do with the package.
    pub action: PackageAction,
    /// Human label.
    #[serde(default)]
    pub display_name: String,
    /// Disabled rows are kept for auditability but never executed.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Installer artifact used instead of the product key.
    #[serde(default)]
    pub installer: Option<PathBuf>,
    /// Transform applied during install.
    #[serde(default)]
    pub transform: Option<PathBuf>,
    /// Patch files.
    #[serde(default)]
    pub patches: Vec<PathBuf>,
    /// File whose presence signals an installed prior version.
    #[serde(default)]
    pub detect_path: Option<PathBuf>,
    /// Custom exit code reported when this package fails.
    #[serde(default)]
    pub failure_code: Option<i32>,
    /// Treat a failure as a soft failure.
    #[serde(default)]
    pub continue_on_error: bool,
}

/// Package actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PackageAction {
    /// Install the package.
    #[serde(alias = "Install")]
    Install,
    /// Uninstall the package.
    #[serde(alias = "Uninstall")]
    Uninstall,
    /// Apply patches to the package.
    #[serde(alias = "Patch")]
    Patch,
}

/// State storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// State directory (defaults to `.appdeploy` next to the config file).
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// Default value functions

const fn default_max_deferrals() -> u32 {
    3
}

const fn default_prompt_timeout() -> u64 {
    120
}

const fn default_countdown() -> u64 {
    60
}

const fn default_true() -> bool {
    true
}

fn default_install_template() -> CommandTemplate {
    CommandTemplate::msiexec(&["/i", "{ref}", "{transform}", "{patches}", "{ui}", "/norestart"])
}

fn default_uninstall_template() -> CommandTemplate {
    CommandTemplate::msiexec(&["/x", "{ref}", "{ui}", "/norestart"])
}

fn default_patch_template() -> CommandTemplate {
    CommandTemplate::msiexec(&["/update", "{patches_list}", "{ui}", "/norestart"])
}

fn default_silent_switch() -> String {
    String::from("/qn")
}

fn default_interactive_switch() -> String {
    String::from("/qb-!")
}

impl CommandTemplate {
    fn msiexec(args: &[&str]) -> Self {
        Self {
            program: String::from("msiexec.exe"),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            blocking_processes: Vec::new(),
            closure: ClosureConfig::default(),
            allow_defer: false,
            max_deferrals: default_max_deferrals(),
            benign_codes: Vec::new(),
            required_disk_space_mb: None,
            disk_check_path: None,
            welcome_message: None,
            completion_message: None,
            reboot_message: None,
            prompt_timeout_secs: default_prompt_timeout(),
            post_executables: Vec::new(),
        }
    }
}

impl Default for ClosureConfig {
    fn default() -> Self {
        Self {
            mode: ClosureModeKind::default(),
            countdown_secs: default_countdown(),
        }
    }
}

impl ClosureConfig {
    /// Converts the catalog closure settings to the gatekeeper mode.
    #[must_use]
    pub const fn to_mode(&self) -> ClosureMode {
        match self.mode {
            ClosureModeKind::CloseImmediate => ClosureMode::CloseImmediate,
            ClosureModeKind::Countdown => ClosureMode::CountdownSeconds(self.countdown_secs),
            ClosureModeKind::PersistUntilManual => ClosureMode::PersistUntilManual,
        }
    }
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            install: default_install_template(),
            uninstall: default_uninstall_template(),
            patch: default_patch_template(),
            silent_switch: default_silent_switch(),
            interactive_switch: default_interactive_switch(),
        }
    }
}

impl InstallerConfig {
    /// Returns the template for an action.
    #[must_use]
    pub const fn template(&self, action: PackageAction) -> &CommandTemplate {
        match action {
            PackageAction::Install => &self.install,
            PackageAction::Uninstall => &self.uninstall,
            PackageAction::Patch => &self.patch,
        }
    }
}

impl PackageEntry {
    /// Returns the label used in logs and output.
    #[must_use]
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.product_key
        } else {
            &self.display_name
        }
    }
}

impl DeployConfig {
    /// Returns the enabled catalog entries.
    pub fn enabled_entries(&self) -> impl Iterator<Item = &PackageEntry> {
        self.catalog.iter().filter(|e| e.enabled)
    }

    /// Returns the number of entries for an action, enabled or not.
    #[must_use]
    pub fn count_action(&self, action: PackageAction) -> usize {
        self.catalog.iter().filter(|e| e.action == action).count()
    }
}

impl std::fmt::Display for PackageAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Install => "install",
            Self::Uninstall => "uninstall",
            Self::Patch => "patch",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_mode_conversion() {
        let closure = ClosureConfig {
            mode: ClosureModeKind::Countdown,
            countdown_secs: 90,
        };
        assert_eq!(closure.to_mode(), ClosureMode::CountdownSeconds(90));

        let closure = ClosureConfig {
            mode: ClosureModeKind::PersistUntilManual,
            countdown_secs: 90,
        };
        assert_eq!(closure.to_mode(), ClosureMode::PersistUntilManual);
    }

    #[test]
    fn test_entry_defaults_from_yaml() {
        let entry: PackageEntry = serde_yaml::from_str(
            r#"
product_key: "{1111-2222}"
action: Uninstall
"#,
        )
        .unwrap();
        assert!(entry.enabled);
        assert_eq!(entry.action, PackageAction::Uninstall);
        assert_eq!(entry.label(), "{1111-2222}");
        assert!(!entry.continue_on_error);
    }

    #[test]
    fn test_default_templates_use_msiexec() {
        let installer = InstallerConfig::default();
        assert_eq!(installer.template(PackageAction::Install).program, "msiexec.exe");
        assert_eq!(installer.template(PackageAction::Uninstall).args[0], "/x");
    }
}
