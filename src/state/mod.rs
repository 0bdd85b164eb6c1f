//! State management module.
//!
//! This module persists what must survive between deployment sessions (the
//! deferral counter and session history) and provides the lock file that
//! keeps sessions on one machine from overlapping.

mod store;
mod local;
mod lock;
mod types;

pub use store::StateStore;
pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LockInfo, LOCK_EXPIRY_SECS, LOCK_REFRESH_SECS, generate_holder_id};
pub use types::{DeploymentState, SessionRecord, MAX_HISTORY, STATE_VERSION};
