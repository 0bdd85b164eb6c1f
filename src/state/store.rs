//! State store trait definition.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::DeploymentState;
use crate::error::Result;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the deployment state.
    ///
    /// Returns `None` if no state exists yet.
    async fn load(&self) -> Result<Option<DeploymentState>>;

    /// Saves the deployment state.
    async fn save(&self, state: &DeploymentState) -> Result<()>;

    /// Deletes the deployment state and any lock.
    async fn delete(&self) -> Result<()>;

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires the session lock.
    ///
    /// Fails with `LockedByOther` while another holder's lock is live.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Extends the expiry of the session lock owned by `lock_id`.
    ///
    /// Fails with `LockFailed` if the lock is gone or held by someone else.
    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo>;

    /// Releases the session lock if `lock_id` still owns it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes the session lock regardless of its holder.
    async fn force_unlock(&self) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if a live lock exists.
    async fn is_locked(&self) -> Result<bool>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
