//! Planning and execution of deployment sessions.
//!
//! This module builds three-phase plans from the catalog and runs them
//! through the session engine.

mod step;
mod plan;
mod executor;

pub use step::{
    Classification, ClosureMode, FailurePolicy, Phase, PlannedStep, Prompt, PromptCondition, Step,
    StepOutcome,
};
pub use plan::{
    DeployMode, DeploymentPlan, DeploymentRequest, DeploymentType, PhasePlan, SessionPolicy,
    build_plan,
};
pub use executor::{SessionEngine, SessionResult, SessionState};
