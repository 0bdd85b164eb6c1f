//! External collaborators of the session engine.
//!
//! This module defines the seams through which the engine touches the
//! machine (installer invocation, process closure and prompts, pre-flight
//! probes) together with implementations backed by the running OS.

mod invoker;
mod gatekeeper;
mod probe;

pub use invoker::{CommandInvoker, InstallTarget, InstallerInvoker, Invocation, InvocationRequest};
pub use gatekeeper::{ClosureOutcome, ConsoleGatekeeper, ProcessGatekeeper, PromptResponse};
pub use probe::{HostProbe, SystemProbe};

#[cfg(test)]
pub use gatekeeper::MockProcessGatekeeper;
#[cfg(test)]
pub use invoker::MockInstallerInvoker;
#[cfg(test)]
pub use probe::MockHostProbe;
