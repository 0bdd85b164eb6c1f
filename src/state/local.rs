//! Local file-based state storage backend.
//!
//! State for each application lives in `<dir>/<app>.json`. The session lock
//! is shared by every application using the same directory.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{DeployError, Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
use super::store::StateStore;
use super::types::{DeploymentState, STATE_VERSION};

/// Default state directory name.
pub const STATE_DIR: &str = ".appdeploy";

/// Lock file name.
const LOCK_FILE: &str = "session.lock";

/// Create attempts before giving up on a contended lock.
const ACQUIRE_ATTEMPTS: usize = 3;

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Path to the state file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a store for `app` under `base_dir`.
    #[must_use]
    pub fn for_app(base_dir: impl Into<PathBuf>, app: &str) -> Self {
        let base_dir = base_dir.into();
        let state_path = base_dir.join(format!("{}.json", sanitize(app)));
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            state_path,
            lock_path,
        }
    }

    /// Creates a store for `app` in the default directory under `root`.
    #[must_use]
    pub fn in_default_dir(root: &Path, app: &str) -> Self {
        Self::for_app(root.join(STATE_DIR), app)
    }

    /// Returns the state file path.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await.map_err(|e| {
                DeployError::State(StateError::write(format!(
                    "Failed to create state directory: {e}"
                )))
            })?;
        }
        Ok(())
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        let content = match fs::read_to_string(&self.lock_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DeployError::State(StateError::Corrupted {
                    message: format!("Failed to read lock file: {e}"),
                }));
            }
        };

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            DeployError::State(StateError::Corrupted {
                message: format!("Failed to parse lock file: {e}"),
            })
        })?;

        Ok(Some(lock_info))
    }

    /// Creates the lock file, failing if one already exists.
    ///
    /// Returns `Ok(false)` when another lock file is in place.
    async fn create_lock_file(&self, content: &str) -> Result<bool> {
        let lock_failed = |e: std::io::Error| {
            DeployError::State(StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })
        };

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(lock_failed(e)),
        };

        file.write_all(content.as_bytes()).await.map_err(lock_failed)?;
        file.sync_all().await.map_err(lock_failed)?;

        Ok(true)
    }

    /// Replaces the contents of an existing lock file.
    async fn write_lock_file(&self, lock_info: &LockInfo) -> Result<()> {
        let content = serialize_lock(lock_info)?;

        let lock_failed = |e: std::io::Error| {
            DeployError::State(StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })
        };

        // Readers never see a partially written lock
        let temp_path = self.lock_path.with_extension(format!("{}.tmp", lock_info.lock_id));
        let mut file = fs::File::create(&temp_path).await.map_err(lock_failed)?;
        file.write_all(content.as_bytes()).await.map_err(lock_failed)?;
        file.sync_all().await.map_err(lock_failed)?;
        fs::rename(&temp_path, &self.lock_path)
            .await
            .map_err(lock_failed)?;

        Ok(())
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeployError::State(StateError::LockFailed {
                message: format!("Failed to delete lock file: {e}"),
            })),
        }
    }
}

fn serialize_lock(lock_info: &LockInfo) -> Result<String> {
    serde_json::to_string_pretty(lock_info).map_err(|e| {
        DeployError::State(StateError::serialization(format!(
            "Failed to serialize lock: {e}"
        )))
    })
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<DeploymentState>> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(None);
        }

        debug!("Loading state from: {}", self.state_path.display());

        let content = fs::read_to_string(&self.state_path).await.map_err(|e| {
            DeployError::State(StateError::Corrupted {
                message: format!("Failed to read state file: {e}"),
            })
        })?;

        let state: DeploymentState = serde_json::from_str(&content).map_err(|e| {
            DeployError::State(StateError::Corrupted {
                message: format!("Failed to parse state file: {e}"),
            })
        })?;

        if state.version != STATE_VERSION {
            return Err(DeployError::State(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: state.version,
            }));
        }

        Ok(Some(state))
    }

    async fn save(&self, state: &DeploymentState) -> Result<()> {
        self.ensure_dir().await?;

        debug!("Saving state to: {}", self.state_path.display());

        let content = serde_json::to_string_pretty(state).map_err(|e| {
            DeployError::State(StateError::serialization(format!(
                "Failed to serialize state: {e}"
            )))
        })?;

        let write_failed =
            |e: std::io::Error| DeployError::State(StateError::write(format!("{e}")));

        // Write to a temporary file first, then rename
        let temp_path = self.state_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await.map_err(write_failed)?;
        file.write_all(content.as_bytes()).await.map_err(write_failed)?;
        file.sync_all().await.map_err(write_failed)?;
        fs::rename(&temp_path, &self.state_path)
            .await
            .map_err(write_failed)?;

        debug!("State saved successfully");
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        if self.state_path.exists() {
            info!("Deleting state file: {}", self.state_path.display());
            fs::remove_file(&self.state_path).await.map_err(|e| {
                DeployError::State(StateError::write(format!(
                    "Failed to delete state file: {e}"
                )))
            })?;
        }

        self.delete_lock_file().await
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state_path.exists())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        self.ensure_dir().await?;

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(&holder_id);
        let content = serialize_lock(&lock_info)?;

        for _ in 0..ACQUIRE_ATTEMPTS {
            if self.create_lock_file(&content).await? {
                info!(
                    "Acquired session lock: {} (expires in {}s)",
                    lock_info.lock_id, LOCK_EXPIRY_SECS
                );
                return Ok(lock_info);
            }

            let existing = match self.read_lock_file().await {
                Ok(Some(existing)) => existing,
                // Released between our create and read
                Ok(None) => continue,
                // The holder has created the file but not finished writing it
                Err(DeployError::State(StateError::Corrupted { .. })) => {
                    return Err(DeployError::State(StateError::LockedByOther {
                        holder: String::from("unknown"),
                        since: String::from("unknown"),
                    }));
                }
                Err(e) => return Err(e),
            };

            if !existing.is_expired() {
                return Err(DeployError::State(StateError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }

            warn!("Taking over expired session lock held by {}", existing.holder);
            self.delete_lock_file().await?;
        }

        Err(DeployError::State(StateError::LockFailed {
            message: String::from("session lock is contended"),
        }))
    }

    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo> {
        let Some(mut lock_info) = self.read_lock_file().await? else {
            return Err(DeployError::State(StateError::LockFailed {
                message: format!("session lock {lock_id} is no longer present"),
            }));
        };

        if lock_info.lock_id != lock_id {
            return Err(DeployError::State(StateError::LockFailed {
                message: format!("session lock is now held by {}", lock_info.holder),
            }));
        }

        lock_info.refresh();
        self.write_lock_file(&lock_info).await?;
        debug!("Refreshed session lock: {lock_id}");

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                debug!("Released session lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<()> {
        match self.read_lock_file().await {
            Ok(Some(existing)) => {
                warn!("Force-removing session lock held by {}", existing.holder);
            }
            Ok(None) => {}
            Err(e) => warn!("Force-removing unreadable session lock: {e}"),
        }
        self.delete_lock_file().await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    async fn is_locked(&self) -> Result<bool> {
        if let Some(lock_info) = self.read_lock_file().await? {
            return Ok(!lock_info.is_expired());
        }
        Ok(false)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

/// Maps an application name to a file-name-safe stem.
fn sanitize(app: &str) -> String {
    let stem: String = app
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        String::from("state")
    } else {
        stem
    }
}
