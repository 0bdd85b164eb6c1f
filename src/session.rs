//! Top-level deployment session orchestration.
//!
//! A session takes the machine lock, loads the persisted state, builds the
//! plan, runs it through the engine, records the outcome and releases the
//! lock. Configuration errors stop the session before any step executes.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::{ConfigHasher, DeployConfig};
use crate::error::Result;
use crate::host::{HostProbe, InstallerInvoker, ProcessGatekeeper};
use crate::planner::{DeploymentPlan, DeploymentRequest, SessionEngine, SessionResult};
use crate::state::{
    DeploymentState, LOCK_REFRESH_SECS, SessionRecord, StateStore, generate_holder_id,
};

/// Everything a finished session produced.
#[derive(Debug, serde::Serialize)]
pub struct SessionReport {
    /// Plan that was executed.
    pub plan: DeploymentPlan,
    /// Engine result.
    pub result: SessionResult,
    /// State after the session was recorded.
    #[serde(skip)]
    pub state: DeploymentState,
}

impl SessionReport {
    /// Returns the process exit code of the session.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.result.final_exit_code
    }
}

/// Runs deployment sessions for one catalog.
pub struct DeploymentSession<'a, S, I, G, P> {
    /// Catalog configuration.
    config: &'a DeployConfig,
    /// State store.
    state_store: &'a S,
    /// Installer invoker.
    invoker: &'a I,
    /// Process gatekeeper.
    gatekeeper: &'a G,
    /// Host probe.
    probe: &'a P,
    /// Catalog hasher.
    hasher: ConfigHasher,
    /// Interval between lock refreshes while the engine runs.
    lock_refresh: Duration,
}

impl<'a, S, I, G, P> DeploymentSession<'a, S, I, G, P>
where
    S: StateStore,
    I: InstallerInvoker,
    G: ProcessGatekeeper,
    P: HostProbe,
{
    /// Creates a new deployment session.
    #[must_use]
    pub const fn new(
        config: &'a DeployConfig,
        state_store: &'a S,
        invoker: &'a I,
        gatekeeper: &'a G,
        probe: &'a P,
    ) -> Self {
        Self {
            config,
            state_store,
            invoker,
            gatekeeper,
            probe,
            hasher: ConfigHasher::new(),
            lock_refresh: Duration::from_secs(LOCK_REFRESH_SECS),
        }
    }

    /// Sets how often the session lock is refreshed while steps run.
    #[must_use]
    pub const fn with_lock_refresh(mut self, interval: Duration) -> Self {
        self.lock_refresh = interval;
        self
    }

    /// Builds the plan for a request without executing it.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the plan cannot be built.
    pub fn plan(&self, request: &DeploymentRequest) -> Result<DeploymentPlan> {
        let catalog_hash = self.hasher.hash_config(self.config);
        DeploymentPlan::from_config(self.config, request, &catalog_hash)
    }

    /// Runs one session under the machine lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is held by another session, the state
    /// cannot be read, or the plan cannot be built. Step failures and a
    /// failure to save the state afterwards are reported through the
    /// returned result, not as errors.
    pub async fn run(&self, request: &DeploymentRequest) -> Result<SessionReport> {
        let lock = self.state_store.acquire_lock(&generate_holder_id()).await?;
        debug!("Holding session lock {}", lock.lock_id);

        let outcome = self.run_locked(request, &lock.lock_id).await;

        if let Err(e) = self.state_store.release_lock(&lock.lock_id).await {
            warn!("Failed to release session lock {}: {e}", lock.lock_id);
        }

        outcome
    }

    async fn run_locked(&self, request: &DeploymentRequest, lock_id: &str) -> Result<SessionReport> {
        let app = &self.config.app.name;
        let mut state = self
            .state_store
            .load()
            .await?
            .unwrap_or_else(|| DeploymentState::new(app));

        let plan = self.plan(request)?;
        info!(
            "Deploying {app} ({} steps, {} of {} deferrals used)",
            plan.step_count(),
            state.deferrals_used,
            plan.policy.max_deferrals
        );

        let engine = SessionEngine::new(self.invoker, self.gatekeeper, self.probe)
            .with_deferrals_used(state.deferrals_used);
        let result = self.run_refreshing_lock(&engine, &plan, lock_id).await;

        let version = self.config.app.version.as_deref().unwrap_or_default();
        state.record_session(SessionRecord::from_result(&plan, &result, version));
        // The steps already ran, so the session's exit code stands
        if let Err(e) = self.state_store.save(&state).await {
            error!("Failed to save deployment state: {e}");
        }

        Ok(SessionReport {
            plan,
            result,
            state,
        })
    }

    /// Runs the engine, refreshing the session lock until it finishes.
    async fn run_refreshing_lock(
        &self,
        engine: &SessionEngine<'_, I, G, P>,
        plan: &DeploymentPlan,
        lock_id: &str,
    ) -> SessionResult {
        let run = engine.run(plan);
        tokio::pin!(run);

        let period = self.lock_refresh.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                result = &mut run => return result,
                _ = ticker.tick() => {
                    if let Err(e) = self.state_store.refresh_lock(lock_id).await {
                        warn!("Failed to refresh session lock {lock_id}: {e}");
                    }
                }
            }
        }
    }
}
