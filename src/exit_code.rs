//! Exit code policy.
//!
//! Maps a finished session to the single process exit code consumed by the
//! invoking management system. The numeric ranges are a fixed contract:
//!
//! | Range | Meaning |
//! |---|---|
//! | 0 | Success |
//! | 3010 | Success, reboot required (only when pass-through is allowed) |
//! | 60000-68999 | Built-in engine failure codes |
//! | 69000-69999 | Deployment-specific custom codes |
//! | 70000-79999 | Extension-layer custom codes |

use std::ops::RangeInclusive;

use crate::planner::{Classification, SessionResult, SessionState, StepOutcome};

/// Success.
pub const SUCCESS: i32 = 0;

/// Success with a pending reboot.
pub const REBOOT_REQUIRED: i32 = 3010;

/// The installer/collaborator layer is unreachable or crashed.
pub const ENGINE_FAULT: i32 = 60001;

/// A step failed with a code outside the reserved ranges.
pub const STEP_FAILED: i32 = 60002;

/// Not enough free disk space.
pub const INSUFFICIENT_DISK_SPACE: i32 = 60005;

/// A required prior version was not found.
pub const PRIOR_VERSION_MISSING: i32 = 60006;

/// The catalog or request is invalid.
pub const CONFIGURATION_ERROR: i32 = 60008;

/// Blocking processes could not be closed.
pub const CLOSURE_FAILED: i32 = 60010;

/// The user deferred the deployment.
pub const DEFERRED: i32 = 60012;

/// The user deferred more often than allowed.
pub const DEFERRAL_LIMIT_EXCEEDED: i32 = 60015;

/// Built-in engine failure codes.
pub const BUILTIN_RANGE: RangeInclusive<i32> = 60000..=68999;

/// Deployment-specific custom codes.
pub const DEPLOYMENT_RANGE: RangeInclusive<i32> = 69000..=69999;

/// Extension-layer custom codes.
pub const EXTENSION_RANGE: RangeInclusive<i32> = 70000..=79999;

/// All user-customizable codes.
pub const CUSTOM_RANGE: RangeInclusive<i32> = 69000..=79999;

/// Returns true if `code` is a user-customizable code.
#[must_use]
pub fn is_custom(code: i32) -> bool {
    CUSTOM_RANGE.contains(&code)
}

/// Returns true if `code` is a built-in engine code.
#[must_use]
pub fn is_builtin(code: i32) -> bool {
    BUILTIN_RANGE.contains(&code)
}

/// Classifies a raw completion code.
///
/// 0 is success, 3010 is success with reboot, codes on the benign allow-list
/// are success, everything else is a hard failure.
#[must_use]
pub fn classify(code: i32, benign_codes: &[i32]) -> Classification {
    match code {
        SUCCESS => Classification::Success,
        REBOOT_REQUIRED => Classification::SuccessRebootRequired,
        c if benign_codes.contains(&c) => Classification::Success,
        _ => Classification::HardFailure,
    }
}

/// Computes the process exit code for a finished session.
///
/// This is a pure function of its inputs.
#[must_use]
pub fn compute_exit_code(result: &SessionResult, allow_reboot_passthru: bool) -> i32 {
    if result.engine_fault.is_some() {
        return ENGINE_FAULT;
    }

    if let Some(outcome) = result.first_hard_failure() {
        return failure_code(outcome);
    }

    if result.state == SessionState::Deferred {
        return DEFERRED;
    }

    if result.reboot_required && allow_reboot_passthru {
        return REBOOT_REQUIRED;
    }

    SUCCESS
}

/// Picks the code reported for a failed step.
fn failure_code(outcome: &StepOutcome) -> i32 {
    if let Some(custom) = outcome.custom_code {
        return custom;
    }
    if is_custom(outcome.code) || is_builtin(outcome.code) {
        return outcome.code;
    }
    STEP_FAILED
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::Phase;

    fn outcome(code: i32, classification: Classification) -> StepOutcome {
        StepOutcome {
            label: String::from("install P1"),
            code,
            classification,
            duration_ms: 5,
            custom_code: None,
            message: None,
        }
    }

    fn result_with(outcomes: Vec<StepOutcome>, state: SessionState) -> SessionResult {
        let mut result = SessionResult::new();
        let reboot = outcomes
            .iter()
            .any(|o| o.classification == Classification::SuccessRebootRequired);
        result.phase_outcomes.push((Phase::Main, outcomes));
        result.reboot_required = reboot;
        result.state = state;
        result
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(0, &[]), Classification::Success);
        assert_eq!(classify(3010, &[]), Classification::SuccessRebootRequired);
        assert_eq!(classify(1641, &[1641]), Classification::Success);
        assert_eq!(classify(1603, &[1641]), Classification::HardFailure);
        assert_eq!(classify(-1, &[]), Classification::HardFailure);
    }

    #[test]
    fn test_success() {
        let result = result_with(vec![outcome(0, Classification::Success)], SessionState::Completed);
        assert_eq!(compute_exit_code(&result, true), 0);
    }

    #[test]
    fn test_reboot_passthru() {
        let result = result_with(
            vec![outcome(3010, Classification::SuccessRebootRequired)],
            SessionState::Completed,
        );
        assert_eq!(compute_exit_code(&result, true), 3010);
        assert_eq!(compute_exit_code(&result, false), 0);
    }

    #[test]
    fn test_unmapped_failure_uses_builtin_code() {
        let result = result_with(
            vec![outcome(1603, Classification::HardFailure)],
            SessionState::Aborted,
        );
        let code = compute_exit_code(&result, true);
        assert_eq!(code, STEP_FAILED);
        assert!(is_builtin(code));
    }

    #[test]
    fn test_custom_codes_pass_through() {
        let result = result_with(
            vec![outcome(69123, Classification::HardFailure)],
            SessionState::Aborted,
        );
        assert_eq!(compute_exit_code(&result, false), 69123);

        let mut failed = outcome(1603, Classification::HardFailure);
        failed.custom_code = Some(70001);
        let result = result_with(vec![failed], SessionState::Aborted);
        assert_eq!(compute_exit_code(&result, false), 70001);
    }

    #[test]
    fn test_engine_fault_wins() {
        let mut result = result_with(
            vec![outcome(69123, Classification::HardFailure)],
            SessionState::Aborted,
        );
        result.engine_fault = Some(String::from("installer missing"));
        assert_eq!(compute_exit_code(&result, true), ENGINE_FAULT);
    }

    #[test]
    fn test_failure_beats_reboot() {
        let result = result_with(
            vec![
                outcome(3010, Classification::SuccessRebootRequired),
                outcome(1605, Classification::HardFailure),
            ],
            SessionState::Aborted,
        );
        assert_eq!(compute_exit_code(&result, true), STEP_FAILED);
    }

    #[test]
    fn test_soft_failures_do_not_fail() {
        let result = result_with(
            vec![
                outcome(1, Classification::SoftFailure),
                outcome(0, Classification::Success),
            ],
            SessionState::Completed,
        );
        assert_eq!(compute_exit_code(&result, true), 0);
    }

    #[test]
    fn test_deferred_session() {
        let result = result_with(vec![], SessionState::Deferred);
        assert_eq!(compute_exit_code(&result, true), DEFERRED);
    }

    #[test]
    fn test_ranges_are_disjoint() {
        assert!(!is_custom(68999));
        assert!(is_custom(69000));
        assert!(is_custom(79999));
        assert!(!is_custom(80000));
        assert!(DEPLOYMENT_RANGE.contains(&69999));
        assert!(EXTENSION_RANGE.contains(&70000));
        assert!(is_builtin(ENGINE_FAULT));
        assert!(is_builtin(DEFERRAL_LIMIT_EXCEEDED));
    }
}
