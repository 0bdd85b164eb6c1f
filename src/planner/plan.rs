//! Deployment plan types and construction.
//!
//! This module turns a catalog plus a deployment request into an ordered,
//! three-phase plan. Plan building has no side effects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

use crate::config::{DeployConfig, ExecutableConfig, PackageAction, PackageEntry, SessionConfig};
use crate::error::{ConfigError, DeployError, Result};

use super::step::{FailurePolicy, Phase, PlannedStep, Prompt, PromptCondition, Step};

/// Requested deployment type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeploymentType {
    /// Install the product (removing prior versions first).
    #[default]
    Install,
    /// Uninstall the product.
    Uninstall,
}

/// How much user interaction the session may have.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeployMode {
    /// Prompts and countdowns are shown.
    #[default]
    Interactive,
    /// No installer UI; prompts are suppressed.
    Silent,
    /// No blocking UI under any circumstance.
    NonInteractive,
}

impl DeployMode {
    /// Returns true if the user may be prompted.
    #[must_use]
    pub const fn is_interactive(self) -> bool {
        matches!(self, Self::Interactive)
    }
}

/// Immutable input to plan building.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DeploymentRequest {
    /// Install or uninstall.
    pub deployment_type: DeploymentType,
    /// Interaction level.
    pub deploy_mode: DeployMode,
    /// Report 3010 to the caller when a reboot is pending.
    pub allow_reboot_passthru: bool,
    /// Wrap the session in terminal-server install mode.
    pub terminal_server_mode: bool,
    /// Processes that block installation.
    pub blocking_process_names: BTreeSet<String>,
}

/// Engine policy carried by the plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SessionPolicy {
    /// Installer codes treated as success besides 0.
    pub benign_codes: Vec<i32>,
    /// Deferrals granted before deferring becomes a failure.
    pub max_deferrals: u32,
}

/// The steps of one phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhasePlan {
    /// The phase.
    pub phase: Phase,
    /// Steps in execution order.
    pub steps: Vec<PlannedStep>,
}

/// A complete deployment plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Catalog hash this plan is based on.
    pub catalog_hash: String,
    /// The request this plan serves.
    pub request: DeploymentRequest,
    /// Engine policy.
    pub policy: SessionPolicy,
    /// Phases in execution order: pre, main, post.
    pub phases: Vec<PhasePlan>,
}

/// Builds a plan from a catalog, session settings and a request.
///
/// # Errors
///
/// Returns a configuration error if a product key repeats within a phase.
pub fn build_plan(
    catalog: &[PackageEntry],
    session: &SessionConfig,
    request: &DeploymentRequest,
) -> Result<DeploymentPlan> {
    let main = main_steps(catalog, request.deployment_type);
    let pre = pre_steps(catalog, session, request);
    let post = post_steps(session, request);

    let phases = vec![
        PhasePlan { phase: Phase::Pre, steps: pre },
        PhasePlan { phase: Phase::Main, steps: main },
        PhasePlan { phase: Phase::Post, steps: post },
    ];

    for phase in &phases {
        check_unique_keys(phase)?;
    }

    debug!(
        "Built {:?} plan: {} pre, {} main, {} post steps",
        request.deployment_type,
        phases[0].steps.len(),
        phases[1].steps.len(),
        phases[2].steps.len()
    );

    Ok(DeploymentPlan {
        created_at: Utc::now(),
        catalog_hash: String::new(),
        request: request.clone(),
        policy: SessionPolicy {
            benign_codes: session.benign_codes.clone(),
            max_deferrals: session.max_deferrals,
        },
        phases,
    })
}

/// Catalog-derived steps, in catalog order.
///
/// Install requests stage every uninstall entry (prior-version cleanup) ahead
/// of the install and patch entries; uninstall requests run only uninstall
/// entries.
fn main_steps(catalog: &[PackageEntry], deployment_type: DeploymentType) -> Vec<PlannedStep> {
    let enabled = || catalog.iter().filter(|e| e.enabled);

    let uninstalls = enabled()
        .filter(|e| e.action == PackageAction::Uninstall)
        .map(package_step);

    match deployment_type {
        DeploymentType::Uninstall => uninstalls.collect(),
        DeploymentType::Install => uninstalls
            .chain(
                enabled()
                    .filter(|e| matches!(e.action, PackageAction::Install | PackageAction::Patch))
                    .map(package_step),
            )
            .collect(),
    }
}

fn package_step(entry: &PackageEntry) -> PlannedStep {
    let product_key = entry.product_key.clone();
    let step = match entry.action {
        PackageAction::Install => Step::InstallPackage {
            product_key,
            installer: entry.installer.clone(),
            transform: entry.transform.clone(),
            patches: entry.patches.clone(),
        },
        PackageAction::Uninstall => Step::UninstallPackage { product_key },
        PackageAction::Patch => Step::PatchPackage {
            product_key,
            patches: entry.patches.clone(),
        },
    };

    PlannedStep::new(entry.label(), step)
        .with_policy(policy_for(entry.continue_on_error))
        .with_failure_code(entry.failure_code)
}

fn pre_steps(
    catalog: &[PackageEntry],
    session: &SessionConfig,
    request: &DeploymentRequest,
) -> Vec<PlannedStep> {
    let mut steps = Vec::new();

    if request.terminal_server_mode {
        steps.push(terminal_server_step("/install"));
    }

    if request.deployment_type == DeploymentType::Install {
        if let Some(required_mb) = session.required_disk_space_mb {
            let path = session
                .disk_check_path
                .clone()
                .unwrap_or_else(default_system_volume);
            steps.push(PlannedStep::new(
                "Check free disk space",
                Step::CheckDiskSpace { path, required_mb },
            ));
        }
    }

    if let Some(message) = &session.welcome_message {
        steps.push(PlannedStep::new(
            "Welcome",
            Step::ShowPrompt(Prompt {
                message: message.clone(),
                timeout_secs: session.prompt_timeout_secs,
                allow_defer: session.allow_defer,
                condition: PromptCondition::Always,
            }),
        ));
    }

    if !request.blocking_process_names.is_empty() {
        steps.push(PlannedStep::new(
            "Close blocking applications",
            Step::CloseProcesses {
                process_names: request.blocking_process_names.iter().cloned().collect(),
                mode: session.closure.to_mode(),
                allow_defer: session.allow_defer,
            },
        ));
    }

    for entry in catalog
        .iter()
        .filter(|e| e.enabled && e.action == PackageAction::Uninstall)
    {
        if let Some(path) = &entry.detect_path {
            steps.push(PlannedStep::new(
                format!("Detect {}", entry.label()),
                Step::CheckPriorVersionPresent {
                    product_key: entry.product_key.clone(),
                    path: path.clone(),
                    required: false,
                },
            ));
        }
    }

    let verb = match request.deployment_type {
        DeploymentType::Install => "Installation",
        DeploymentType::Uninstall => "Uninstallation",
    };
    steps.push(PlannedStep::new(
        "Progress",
        Step::ShowPrompt(Prompt {
            message: format!("{verb} in progress. Please wait..."),
            timeout_secs: 0,
            allow_defer: false,
            condition: PromptCondition::Always,
        }),
    ));

    steps
}

fn post_steps(session: &SessionConfig, request: &DeploymentRequest) -> Vec<PlannedStep> {
    let mut steps: Vec<PlannedStep> = session.post_executables.iter().map(executable_step).collect();

    if let Some(message) = &session.completion_message {
        steps.push(PlannedStep::new(
            "Completion",
            Step::ShowPrompt(Prompt {
                message: message.clone(),
                timeout_secs: session.prompt_timeout_secs,
                allow_defer: false,
                condition: PromptCondition::Always,
            }),
        ));
    }

    if let Some(message) = &session.reboot_message {
        steps.push(PlannedStep::new(
            "Reboot required",
            Step::ShowPrompt(Prompt {
                message: message.clone(),
                timeout_secs: session.prompt_timeout_secs,
                allow_defer: false,
                condition: PromptCondition::RebootRequired,
            }),
        ));
    }

    if request.terminal_server_mode {
        steps.push(terminal_server_step("/execute"));
    }

    steps
}

fn executable_step(exe: &ExecutableConfig) -> PlannedStep {
    PlannedStep::new(
        exe.path.display().to_string(),
        Step::RunExecutable {
            path: exe.path.clone(),
            args: exe.args.clone(),
            wait: exe.wait,
        },
    )
    .with_policy(policy_for(exe.continue_on_error))
    .with_failure_code(exe.failure_code)
}

fn terminal_server_step(switch: &str) -> PlannedStep {
    PlannedStep::new(
        format!("Terminal server {}", switch.trim_start_matches('/')),
        Step::RunExecutable {
            path: PathBuf::from("change.exe"),
            args: vec![String::from("user"), switch.to_string()],
            wait: true,
        },
    )
    .with_policy(FailurePolicy::Continue)
}

const fn policy_for(continue_on_error: bool) -> FailurePolicy {
    if continue_on_error {
        FailurePolicy::Continue
    } else {
        FailurePolicy::Abort
    }
}

fn default_system_volume() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("C:\\")
    } else {
        PathBuf::from("/")
    }
}

fn check_unique_keys(phase: &PhasePlan) -> Result<()> {
    let mut seen = HashSet::new();
    for planned in &phase.steps {
        let Some(key) = planned.step.product_key() else {
            continue;
        };
        if !seen.insert(key) {
            return Err(DeployError::Config(ConfigError::DuplicateProductKey {
                phase: phase.phase.to_string(),
                product_key: key.to_string(),
            }));
        }
    }
    Ok(())
}

impl DeploymentRequest {
    /// Creates a request for the given deployment type and mode.
    #[must_use]
    pub const fn new(deployment_type: DeploymentType, deploy_mode: DeployMode) -> Self {
        Self {
            deployment_type,
            deploy_mode,
            allow_reboot_passthru: false,
            terminal_server_mode: false,
            blocking_process_names: BTreeSet::new(),
        }
    }

    /// Sets the blocking process names.
    #[must_use]
    pub fn with_blocking_processes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocking_process_names = names.into_iter().map(Into::into).collect();
        self
    }
}

impl DeploymentPlan {
    /// Builds a plan from a full deployment configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a product key repeats within a phase.
    pub fn from_config(
        config: &DeployConfig,
        request: &DeploymentRequest,
        catalog_hash: &str,
    ) -> Result<Self> {
        let mut plan = build_plan(&config.catalog, &config.session, request)?;
        plan.catalog_hash = catalog_hash.to_string();
        Ok(plan)
    }

    /// Returns the steps of a phase.
    #[must_use]
    pub fn phase(&self, phase: Phase) -> &[PlannedStep] {
        self.phases
            .iter()
            .find(|p| p.phase == phase)
            .map(|p| p.steps.as_slice())
            .unwrap_or_default()
    }

    /// Returns the total number of steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.phases.iter().map(|p| p.steps.len()).sum()
    }

    /// Returns true if the main phase has nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phase(Phase::Main).is_empty()
    }
}

impl FromStr for DeploymentType {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "install" => Ok(Self::Install),
            "uninstall" => Ok(Self::Uninstall),
            _ => Err(ConfigError::UnknownDeploymentType {
                value: s.to_string(),
            }),
        }
    }
}

impl FromStr for DeployMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "interactive" => Ok(Self::Interactive),
            "silent" => Ok(Self::Silent),
            "noninteractive" => Ok(Self::NonInteractive),
            _ => Err(ConfigError::invalid_value("deploy mode", s)),
        }
    }
}

impl std::fmt::Display for DeploymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Install => "Install",
            Self::Uninstall => "Uninstall",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for DeployMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Interactive => "Interactive",
            Self::Silent => "Silent",
            Self::NonInteractive => "NonInteractive",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for DeploymentPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} plan ({} steps, {} mode):",
            self.request.deployment_type,
            self.step_count(),
            self.request.deploy_mode
        )?;
        for phase in &self.phases {
            writeln!(f, "  [{}]", phase.phase)?;
            for (i, step) in phase.steps.iter().enumerate() {
                writeln!(f, "    {i}. {step}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, action: PackageAction) -> PackageEntry {
        PackageEntry {
            product_key: key.to_string(),
            action,
            display_name: String::new(),
            enabled: true,
            installer: None,
            transform: None,
            patches: vec![],
            detect_path: None,
            failure_code: None,
            continue_on_error: false,
        }
    }

    fn install_request() -> DeploymentRequest {
        DeploymentRequest::default()
    }

    fn main_keys(plan: &DeploymentPlan) -> Vec<String> {
        plan.phase(Phase::Main)
            .iter()
            .filter_map(|s| s.step.product_key().map(str::to_string))
            .collect()
    }

    #[test]
    fn test_install_stages_uninstalls_first() {
        let mut catalog = vec![
            entry("NEW", PackageAction::Install),
            entry("OLD1", PackageAction::Uninstall),
            entry("HOTFIX", PackageAction::Patch),
            entry("OLD2", PackageAction::Uninstall),
        ];
        catalog[2].patches = vec![PathBuf::from("fix.msp")];

        let plan = build_plan(&catalog, &SessionConfig::default(), &install_request()).unwrap();
        assert_eq!(main_keys(&plan), vec!["OLD1", "OLD2", "NEW", "HOTFIX"]);
    }

    #[test]
    fn test_uninstall_runs_only_uninstalls() {
        let catalog = vec![
            entry("P1", PackageAction::Uninstall),
            entry("NEW", PackageAction::Install),
            entry("P2", PackageAction::Uninstall),
        ];
        let request = DeploymentRequest {
            deployment_type: DeploymentType::Uninstall,
            ..DeploymentRequest::default()
        };
        let plan = build_plan(&catalog, &SessionConfig::default(), &request).unwrap();
        assert_eq!(main_keys(&plan), vec!["P1", "P2"]);
    }

    #[test]
    fn test_disabled_entries_skipped() {
        let mut catalog = vec![
            entry("P1", PackageAction::Uninstall),
            entry("P2", PackageAction::Uninstall),
            entry("P3", PackageAction::Install),
        ];
        catalog[1].enabled = false;

        let plan = build_plan(&catalog, &SessionConfig::default(), &install_request()).unwrap();
        let enabled_matching = catalog.iter().filter(|e| e.enabled).count();
        assert_eq!(plan.phase(Phase::Main).len(), enabled_matching);
    }

    #[test]
    fn test_duplicate_key_in_phase_is_configuration_error() {
        let catalog = vec![
            entry("P1", PackageAction::Uninstall),
            entry("P1", PackageAction::Install),
        ];
        let err = build_plan(&catalog, &SessionConfig::default(), &install_request()).unwrap_err();
        assert!(matches!(
            err,
            DeployError::Config(ConfigError::DuplicateProductKey { ref product_key, .. })
                if product_key == "P1"
        ));
    }

    #[test]
    fn test_duplicate_outside_requested_action_is_ignored() {
        let catalog = vec![
            entry("P1", PackageAction::Uninstall),
            entry("P1", PackageAction::Install),
        ];
        let request = DeploymentRequest {
            deployment_type: DeploymentType::Uninstall,
            ..DeploymentRequest::default()
        };
        assert!(build_plan(&catalog, &SessionConfig::default(), &request).is_ok());
    }

    #[test]
    fn test_pre_phase_gates() {
        let mut catalog = vec![entry("OLD", PackageAction::Uninstall), entry("NEW", PackageAction::Install)];
        catalog[0].detect_path = Some(PathBuf::from("/opt/acme/old/acme"));

        let session = SessionConfig {
            required_disk_space_mb: Some(500),
            ..SessionConfig::default()
        };
        let request = DeploymentRequest {
            blocking_process_names: BTreeSet::from([String::from("acme")]),
            ..DeploymentRequest::default()
        };

        let plan = build_plan(&catalog, &session, &request).unwrap();
        let kinds: Vec<&str> = plan.phase(Phase::Pre).iter().map(|s| s.step.kind()).collect();
        assert_eq!(kinds, vec!["check-disk", "close-processes", "detect", "prompt"]);
    }

    #[test]
    fn test_uninstall_skips_disk_check() {
        let session = SessionConfig {
            required_disk_space_mb: Some(500),
            ..SessionConfig::default()
        };
        let request = DeploymentRequest {
            deployment_type: DeploymentType::Uninstall,
            ..DeploymentRequest::default()
        };
        let plan = build_plan(&[], &session, &request).unwrap();
        assert!(
            plan.phase(Phase::Pre)
                .iter()
                .all(|s| !matches!(s.step, Step::CheckDiskSpace { .. }))
        );
    }

    #[test]
    fn test_terminal_server_mode_wraps_session() {
        let request = DeploymentRequest {
            terminal_server_mode: true,
            ..DeploymentRequest::default()
        };
        let plan = build_plan(&[], &SessionConfig::default(), &request).unwrap();

        let first = &plan.phase(Phase::Pre)[0];
        let last = plan.phase(Phase::Post).last().unwrap();
        assert_eq!(first.step.target(), "change.exe user /install");
        assert_eq!(last.step.target(), "change.exe user /execute");
        assert_eq!(first.on_failure, FailurePolicy::Continue);
    }

    #[test]
    fn test_post_reboot_prompt_is_conditional() {
        let session = SessionConfig {
            reboot_message: Some(String::from("Please restart")),
            ..SessionConfig::default()
        };
        let plan = build_plan(&[], &session, &install_request()).unwrap();
        let post = plan.phase(Phase::Post);
        assert!(matches!(
            &post[0].step,
            Step::ShowPrompt(Prompt { condition: PromptCondition::RebootRequired, .. })
        ));
    }

    #[test]
    fn test_phase_order_is_fixed() {
        let plan = build_plan(&[], &SessionConfig::default(), &install_request()).unwrap();
        let phases: Vec<Phase> = plan.phases.iter().map(|p| p.phase).collect();
        assert_eq!(phases, Phase::ALL.to_vec());
        assert!(plan.is_empty());
    }

    #[test]
    fn test_parse_request_values() {
        assert_eq!("install".parse::<DeploymentType>().unwrap(), DeploymentType::Install);
        assert_eq!("Uninstall".parse::<DeploymentType>().unwrap(), DeploymentType::Uninstall);
        assert!(matches!(
            "Repair".parse::<DeploymentType>(),
            Err(ConfigError::UnknownDeploymentType { .. })
        ));
        assert_eq!("NonInteractive".parse::<DeployMode>().unwrap(), DeployMode::NonInteractive);
        assert_eq!("non-interactive".parse::<DeployMode>().unwrap(), DeployMode::NonInteractive);
        assert!("loud".parse::<DeployMode>().is_err());
    }
}
