//! State types persisted between deployment sessions.
//!
//! The engine itself is stateless; what survives a session is the deferral
//! counter and a bounded session history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::planner::{DeployMode, DeploymentPlan, DeploymentType, SessionResult, SessionState};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of session records kept.
pub const MAX_HISTORY: usize = 100;

/// The persisted deployment record of one application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentState {
    /// State format version.
    pub version: String,
    /// Application name.
    pub app: String,
    /// Deferrals used since the last completed session.
    #[serde(default)]
    pub deferrals_used: u32,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Session history, oldest first.
    #[serde(default)]
    pub history: Vec<SessionRecord>,
}

/// Summary of one finished session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    /// When the session finished.
    pub timestamp: DateTime<Utc>,
    /// Requested deployment type.
    pub deployment_type: DeploymentType,
    /// Deploy mode.
    pub deploy_mode: DeployMode,
    /// Application version deployed.
    #[serde(default)]
    pub app_version: String,
    /// Catalog hash at the time of the session.
    pub catalog_hash: String,
    /// Terminal state.
    pub final_state: SessionState,
    /// Process exit code.
    pub exit_code: i32,
    /// Whether a reboot was pending.
    pub reboot_required: bool,
    /// Step that aborted the session.
    #[serde(default)]
    pub failed_step: Option<String>,
}

impl DeploymentState {
    /// Creates a new empty deployment state.
    #[must_use]
    pub fn new(app: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            app: app.to_string(),
            deferrals_used: 0,
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Records a finished session and updates the deferral counter.
    ///
    /// A deferred session spends one deferral, a completed session resets
    /// the counter and an aborted session leaves it unchanged.
    pub fn record_session(&mut self, record: SessionRecord) {
        match record.final_state {
            SessionState::Deferred => self.deferrals_used = self.deferrals_used.saturating_add(1),
            SessionState::Completed => self.deferrals_used = 0,
            _ => {}
        }

        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(record);
        self.last_updated = Utc::now();
    }

    /// Returns up to `limit` records, newest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<&SessionRecord> {
        self.history.iter().rev().take(limit).collect()
    }

    /// Returns the most recent record.
    #[must_use]
    pub fn last_session(&self) -> Option<&SessionRecord> {
        self.history.last()
    }
}

impl SessionRecord {
    /// Builds a record from a plan and its result.
    #[must_use]
    pub fn from_result(plan: &DeploymentPlan, result: &SessionResult, app_version: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            deployment_type: plan.request.deployment_type,
            deploy_mode: plan.request.deploy_mode,
            app_version: app_version.to_string(),
            catalog_hash: plan.catalog_hash.clone(),
            final_state: result.state,
            exit_code: result.final_exit_code,
            reboot_required: result.reboot_required,
            failed_step: result.failed_step.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(final_state: SessionState) -> SessionRecord {
        SessionRecord {
            timestamp: Utc::now(),
            deployment_type: DeploymentType::Install,
            deploy_mode: DeployMode::Interactive,
            app_version: String::from("2.0"),
            catalog_hash: String::from("abc"),
            final_state,
            exit_code: 0,
            reboot_required: false,
            failed_step: None,
        }
    }

    #[test]
    fn test_deferral_counter() {
        let mut state = DeploymentState::new("acme");
        state.record_session(record(SessionState::Deferred));
        state.record_session(record(SessionState::Deferred));
        assert_eq!(state.deferrals_used, 2);

        state.record_session(record(SessionState::Aborted));
        assert_eq!(state.deferrals_used, 2);

        state.record_session(record(SessionState::Completed));
        assert_eq!(state.deferrals_used, 0);
        assert_eq!(state.history.len(), 4);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = DeploymentState::new("acme");
        for _ in 0..MAX_HISTORY + 5 {
            state.record_session(record(SessionState::Completed));
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
    }

    #[test]
    fn test_recent_is_newest_first() {
        let mut state = DeploymentState::new("acme");
        state.record_session(record(SessionState::Deferred));
        state.record_session(record(SessionState::Completed));

        let recent = state.recent(1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].final_state, SessionState::Completed);
        assert_eq!(
            state.last_session().map(|r| r.final_state),
            Some(SessionState::Completed)
        );
    }
}
