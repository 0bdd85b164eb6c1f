//! Session engine for executing deployment plans.
//!
//! The engine walks the phases of a plan strictly in order and the steps of
//! each phase strictly in plan order. Every step yields exactly one
//! [`StepOutcome`]; collaborator errors are captured at the step boundary and
//! never escape [`SessionEngine::run`].
//!
//! A hard failure stops the session. Main-phase changes that were already
//! applied stay applied: native installers are not transactional and the
//! engine performs no rollback.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::PackageAction;
use crate::error::ExecutionError;
use crate::exit_code::{self, classify, compute_exit_code};
use crate::host::{
    ClosureOutcome, HostProbe, InstallTarget, InstallerInvoker, InvocationRequest,
    ProcessGatekeeper, PromptResponse,
};

use super::plan::DeploymentPlan;
use super::step::{
    Classification, FailurePolicy, Phase, PlannedStep, Prompt, PromptCondition, Step, StepOutcome,
};

/// Seconds the final error dialog waits for acknowledgement.
const ERROR_PROMPT_TIMEOUT_SECS: u64 = 120;

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Not started.
    #[default]
    Idle,
    /// Running the pre phase.
    PreInstall,
    /// Running the main phase.
    Main,
    /// Running the post phase.
    PostInstall,
    /// Every phase ran.
    Completed,
    /// A hard failure stopped the session.
    Aborted,
    /// The user postponed the deployment.
    Deferred,
}

impl SessionState {
    const fn entering(phase: Phase) -> Self {
        match phase {
            Phase::Pre => Self::PreInstall,
            Phase::Main => Self::Main,
            Phase::Post => Self::PostInstall,
        }
    }
}

/// Aggregate result of one session.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionResult {
    /// Final state.
    pub state: SessionState,
    /// Outcomes per executed phase, in execution order.
    pub phase_outcomes: Vec<(Phase, Vec<StepOutcome>)>,
    /// True if any step reported a pending reboot.
    pub reboot_required: bool,
    /// Process exit code for the session.
    pub final_exit_code: i32,
    /// Set when a collaborator was unreachable.
    pub engine_fault: Option<String>,
    /// Label of the step that stopped the session.
    pub failed_step: Option<String>,
}

impl SessionResult {
    /// Creates an empty result.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SessionState::Idle,
            phase_outcomes: Vec::new(),
            reboot_required: false,
            final_exit_code: exit_code::SUCCESS,
            engine_fault: None,
            failed_step: None,
        }
    }

    /// Returns all outcomes in execution order.
    pub fn outcomes(&self) -> impl Iterator<Item = &StepOutcome> {
        self.phase_outcomes.iter().flat_map(|(_, outcomes)| outcomes.iter())
    }

    /// Returns the outcomes of one phase, empty if it never ran.
    #[must_use]
    pub fn phase(&self, phase: Phase) -> &[StepOutcome] {
        self.phase_outcomes
            .iter()
            .find(|(p, _)| *p == phase)
            .map(|(_, outcomes)| outcomes.as_slice())
            .unwrap_or_default()
    }

    /// Returns the first hard failure.
    #[must_use]
    pub fn first_hard_failure(&self) -> Option<&StepOutcome> {
        self.outcomes()
            .find(|o| o.classification == Classification::HardFailure)
    }

    /// Returns true if the session completed without a hard failure.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == SessionState::Completed && self.first_hard_failure().is_none()
    }
}

impl Default for SessionResult {
    fn default() -> Self {
        Self::new()
    }
}

/// What a step's collaborator call produced, before classification.
enum Completion {
    /// A raw completion code to classify.
    Code(i32),
    /// Nothing to do.
    Skipped(&'static str),
    /// A pre-flight check failed with a built-in code.
    Rejected(i32, String),
    /// The user asked to postpone.
    Deferred,
}

/// How the session continues after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Abort,
    Defer,
}

/// Per-session facts learned while running.
#[derive(Debug, Default)]
struct RunContext {
    /// Products whose prior version was detected absent.
    absent: HashSet<String>,
    /// A step reported a pending reboot.
    reboot_required: bool,
}

/// Executes deployment plans against the external collaborators.
#[derive(Debug)]
pub struct SessionEngine<'a, I, G, P> {
    /// Installer invoker.
    invoker: &'a I,
    /// Process gatekeeper.
    gatekeeper: &'a G,
    /// Host probe.
    probe: &'a P,
    /// Deferrals already spent by earlier sessions.
    deferrals_used: u32,
}

impl<'a, I, G, P> SessionEngine<'a, I, G, P>
where
    I: InstallerInvoker,
    G: ProcessGatekeeper,
    P: HostProbe,
{
    /// Creates a new session engine.
    #[must_use]
    pub const fn new(invoker: &'a I, gatekeeper: &'a G, probe: &'a P) -> Self {
        Self {
            invoker,
            gatekeeper,
            probe,
            deferrals_used: 0,
        }
    }

    /// Sets how many deferrals earlier sessions have used.
    #[must_use]
    pub const fn with_deferrals_used(mut self, deferrals_used: u32) -> Self {
        self.deferrals_used = deferrals_used;
        self
    }

    /// Runs a plan to completion, abort or deferral.
    pub async fn run(&self, plan: &DeploymentPlan) -> SessionResult {
        info!(
            "Starting {} session ({} mode, {} steps)",
            plan.request.deployment_type,
            plan.request.deploy_mode,
            plan.step_count()
        );

        let mut result = SessionResult::new();
        let mut ctx = RunContext::default();
        let mut flow = Flow::Continue;

        for phase in Phase::ALL {
            result.state = SessionState::entering(phase);
            let steps = plan.phase(phase);
            debug!("Entering {phase} phase with {} steps", steps.len());

            let mut outcomes = Vec::with_capacity(steps.len());
            for planned in steps {
                let (outcome, step_flow, fault) = self.execute_step(planned, plan, &mut ctx).await;
                if let Some(fault) = fault {
                    result.engine_fault = Some(fault);
                }
                if step_flow == Flow::Abort {
                    result.failed_step = Some(outcome.label.clone());
                }
                outcomes.push(outcome);
                flow = step_flow;
                if flow != Flow::Continue {
                    break;
                }
            }
            result.phase_outcomes.push((phase, outcomes));

            if flow != Flow::Continue {
                break;
            }
        }

        result.reboot_required = ctx.reboot_required;
        result.state = match flow {
            Flow::Continue => SessionState::Completed,
            Flow::Abort => SessionState::Aborted,
            Flow::Defer => SessionState::Deferred,
        };
        result.final_exit_code = compute_exit_code(&result, plan.request.allow_reboot_passthru);

        match result.state {
            SessionState::Aborted => {
                error!(
                    "Session aborted at '{}' with exit code {}",
                    result.failed_step.as_deref().unwrap_or("unknown step"),
                    result.final_exit_code
                );
                if plan.request.deploy_mode.is_interactive() {
                    self.show_error_dialog(&result, plan).await;
                }
            }
            SessionState::Deferred => {
                info!("Session deferred by the user");
            }
            _ => {
                info!(
                    "Session completed with exit code {}{}",
                    result.final_exit_code,
                    if result.reboot_required { " (reboot required)" } else { "" }
                );
            }
        }

        result
    }

    /// Executes one step and classifies its outcome.
    async fn execute_step(
        &self,
        planned: &PlannedStep,
        plan: &DeploymentPlan,
        ctx: &mut RunContext,
    ) -> (StepOutcome, Flow, Option<String>) {
        info!("Executing step: {planned}");
        let started = Instant::now();
        let completion = self.dispatch(&planned.step, plan, ctx).await;
        let deferred = matches!(completion, Ok(Completion::Deferred));
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut fault = None;
        let (code, mut classification, message) = match completion {
            Ok(Completion::Code(code)) => {
                let classification = classify(code, &plan.policy.benign_codes);
                let message = (classification == Classification::HardFailure)
                    .then(|| format!("exited with code {code}"));
                (code, classification, message)
            }
            Ok(Completion::Skipped(reason)) => {
                debug!("Skipping {}: {reason}", planned.label);
                (exit_code::SUCCESS, Classification::Success, Some(reason.to_string()))
            }
            Ok(Completion::Rejected(code, message)) => {
                (code, Classification::HardFailure, Some(message))
            }
            Ok(Completion::Deferred) => self.deferral(plan),
            Err(ExecutionError::Unreachable {
                collaborator,
                message,
            }) => {
                let message = format!("{collaborator} is unavailable: {message}");
                fault = Some(message.clone());
                (exit_code::ENGINE_FAULT, Classification::HardFailure, Some(message))
            }
            Err(ExecutionError::Failed { message }) => {
                let code = if matches!(planned.step, Step::CloseProcesses { .. }) {
                    exit_code::CLOSURE_FAILED
                } else {
                    exit_code::STEP_FAILED
                };
                (code, Classification::HardFailure, Some(message))
            }
        };

        if classification == Classification::HardFailure
            && fault.is_none()
            && planned.on_failure == FailurePolicy::Continue
        {
            warn!(
                "Best-effort step '{}' failed ({}), continuing",
                planned.label,
                message.as_deref().unwrap_or("no detail")
            );
            classification = Classification::SoftFailure;
        }

        if classification == Classification::SuccessRebootRequired {
            ctx.reboot_required = true;
        }

        let flow = match classification {
            Classification::HardFailure => Flow::Abort,
            Classification::SoftFailure if deferred => Flow::Defer,
            _ => Flow::Continue,
        };

        match classification {
            Classification::HardFailure => {
                error!("Step '{}' failed with code {code}", planned.label);
            }
            Classification::SuccessRebootRequired => {
                info!("Step '{}' succeeded, reboot required", planned.label);
            }
            _ => debug!("Step '{}' finished: {classification}", planned.label),
        }

        let outcome = StepOutcome {
            label: planned.label.clone(),
            code,
            classification,
            duration_ms,
            custom_code: planned.failure_code,
            message,
        };
        (outcome, flow, fault)
    }

    /// Routes a step to its collaborator.
    async fn dispatch(
        &self,
        step: &Step,
        plan: &DeploymentPlan,
        ctx: &mut RunContext,
    ) -> std::result::Result<Completion, ExecutionError> {
        let deploy_mode = plan.request.deploy_mode;
        let silent = !deploy_mode.is_interactive();

        match step {
            Step::InstallPackage {
                product_key,
                installer,
                transform,
                patches,
            } => {
                let target = installer.clone().map_or_else(
                    || InstallTarget::ProductKey(product_key.clone()),
                    InstallTarget::Artifact,
                );
                let request = InvocationRequest {
                    action: PackageAction::Install,
                    target,
                    transform: transform.clone(),
                    patches: patches.clone(),
                    silent,
                };
                Ok(Completion::Code(self.invoker.invoke(&request).await?.code))
            }
            Step::UninstallPackage { product_key } => {
                if ctx.absent.contains(product_key) {
                    return Ok(Completion::Skipped("prior version not installed"));
                }
                let request = InvocationRequest {
                    action: PackageAction::Uninstall,
                    target: InstallTarget::ProductKey(product_key.clone()),
                    transform: None,
                    patches: Vec::new(),
                    silent,
                };
                Ok(Completion::Code(self.invoker.invoke(&request).await?.code))
            }
            Step::PatchPackage {
                product_key,
                patches,
            } => {
                let request = InvocationRequest {
                    action: PackageAction::Patch,
                    target: InstallTarget::ProductKey(product_key.clone()),
                    transform: None,
                    patches: patches.clone(),
                    silent,
                };
                Ok(Completion::Code(self.invoker.invoke(&request).await?.code))
            }
            Step::RunExecutable { path, args, wait } => {
                let invocation = self.invoker.run_executable(path, args, *wait).await?;
                Ok(Completion::Code(invocation.code))
            }
            Step::CheckDiskSpace { path, required_mb } => {
                let free_mb = self.probe.free_space_mb(path).await?;
                debug!("{} MB free on {}", free_mb, path.display());
                if free_mb < *required_mb {
                    return Ok(Completion::Rejected(
                        exit_code::INSUFFICIENT_DISK_SPACE,
                        format!(
                            "{free_mb} MB free on {}, {required_mb} MB required",
                            path.display()
                        ),
                    ));
                }
                Ok(Completion::Code(exit_code::SUCCESS))
            }
            Step::CheckPriorVersionPresent {
                product_key,
                path,
                required,
            } => {
                if self.probe.path_exists(path).await {
                    debug!("Prior version of {product_key} detected at {}", path.display());
                    return Ok(Completion::Code(exit_code::SUCCESS));
                }
                if *required {
                    return Ok(Completion::Rejected(
                        exit_code::PRIOR_VERSION_MISSING,
                        format!("{} not found", path.display()),
                    ));
                }
                ctx.absent.insert(product_key.clone());
                Ok(Completion::Skipped("prior version not present"))
            }
            Step::CloseProcesses {
                process_names,
                mode,
                allow_defer,
            } => {
                let outcome = self
                    .gatekeeper
                    .negotiate_closure(process_names, *mode, deploy_mode, *allow_defer)
                    .await?;
                match outcome {
                    ClosureOutcome::Deferred => Ok(Completion::Deferred),
                    ClosureOutcome::Proceed | ClosureOutcome::TimedOutClosed => {
                        Ok(Completion::Code(exit_code::SUCCESS))
                    }
                }
            }
            Step::ShowPrompt(prompt) => {
                if prompt.condition == PromptCondition::RebootRequired && !ctx.reboot_required {
                    return Ok(Completion::Skipped("no reboot pending"));
                }
                let response = self.gatekeeper.show_prompt(prompt, deploy_mode).await?;
                if response == PromptResponse::Deferred && prompt.allow_defer {
                    return Ok(Completion::Deferred);
                }
                Ok(Completion::Code(exit_code::SUCCESS))
            }
        }
    }

    /// Classifies a user deferral against the deferral allowance.
    fn deferral(&self, plan: &DeploymentPlan) -> (i32, Classification, Option<String>) {
        let deploy_mode = plan.request.deploy_mode;
        if !deploy_mode.is_interactive() {
            return (
                exit_code::STEP_FAILED,
                Classification::HardFailure,
                Some(format!("deferral is not accepted in {deploy_mode} mode")),
            );
        }

        let max = plan.policy.max_deferrals;
        if self.deferrals_used < max {
            let remaining = max - self.deferrals_used - 1;
            info!("Deployment deferred ({remaining} deferrals remaining)");
            (
                exit_code::DEFERRED,
                Classification::SoftFailure,
                Some(format!("deferred by user, {remaining} deferrals remaining")),
            )
        } else {
            warn!("Deferral limit of {max} reached");
            (
                exit_code::DEFERRAL_LIMIT_EXCEEDED,
                Classification::HardFailure,
                Some(format!("deferral limit of {max} exceeded")),
            )
        }
    }

    /// Shows the final error summary. Errors are logged and ignored.
    async fn show_error_dialog(&self, result: &SessionResult, plan: &DeploymentPlan) {
        let detail = result
            .first_hard_failure()
            .map(|o| {
                format!(
                    "{}: {}",
                    o.label,
                    o.message.as_deref().unwrap_or("failed")
                )
            })
            .unwrap_or_default();
        let prompt = Prompt {
            message: format!(
                "The deployment failed (code {}). {detail}",
                result.final_exit_code
            ),
            timeout_secs: ERROR_PROMPT_TIMEOUT_SECS,
            allow_defer: false,
            condition: PromptCondition::Always,
        };
        if let Err(e) = self
            .gatekeeper
            .show_prompt(&prompt, plan.request.deploy_mode)
            .await
        {
            warn!("Could not show error dialog: {e}");
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::PreInstall => "pre-install",
            Self::Main => "main",
            Self::PostInstall => "post-install",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Deferred => "deferred",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for SessionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total = self.outcomes().count();
        let failed = self
            .outcomes()
            .filter(|o| !o.classification.is_success())
            .count();
        write!(
            f,
            "Session {}: {total} steps, {failed} failed, exit code {}",
            self.state, self.final_exit_code
        )
    }
}
