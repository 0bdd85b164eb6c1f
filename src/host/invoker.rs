//! Installer invocation.
//!
//! The invoker runs one native install, uninstall or patch operation, or an
//! arbitrary executable, and reports the numeric completion code.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{InstallerConfig, PackageAction};
use crate::error::ExecutionError;

/// What the installer operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallTarget {
    /// A registered product key.
    ProductKey(String),
    /// An installer artifact on disk.
    Artifact(PathBuf),
}

/// One installer invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    /// Install, uninstall or patch.
    pub action: PackageAction,
    /// Product key or artifact.
    pub target: InstallTarget,
    /// Optional transform.
    pub transform: Option<PathBuf>,
    /// Optional patch files.
    pub patches: Vec<PathBuf>,
    /// Suppress installer UI.
    pub silent: bool,
}

/// Completion of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invocation {
    /// Numeric completion code.
    pub code: i32,
    /// Elapsed wall time.
    pub elapsed_ms: u64,
}

/// Runs installer operations and executables.
///
/// `Unreachable` errors mean the invoker itself is broken; `Failed` errors
/// are scoped to the one step.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstallerInvoker: Send + Sync {
    /// Runs one installer operation.
    async fn invoke(
        &self,
        request: &InvocationRequest,
    ) -> std::result::Result<Invocation, ExecutionError>;

    /// Runs an executable. When `wait` is false the process is left running
    /// and code 0 is reported once it has started.
    async fn run_executable(
        &self,
        path: &Path,
        args: &[String],
        wait: bool,
    ) -> std::result::Result<Invocation, ExecutionError>;
}

/// Invoker that expands command templates and runs them as child processes.
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    /// Command templates.
    templates: InstallerConfig,
}

impl CommandInvoker {
    /// Creates a new command invoker.
    #[must_use]
    pub const fn new(templates: InstallerConfig) -> Self {
        Self { templates }
    }

    /// Expands the argument template for a request.
    #[must_use]
    pub fn expand_args(&self, request: &InvocationRequest) -> Vec<String> {
        let template = self.templates.template(request.action);
        let reference = match &request.target {
            InstallTarget::ProductKey(key) => key.clone(),
            InstallTarget::Artifact(path) => path.display().to_string(),
        };
        let patch_list = request
            .patches
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(";");

        let mut args = Vec::with_capacity(template.args.len());
        for arg in &template.args {
            match arg.as_str() {
                "{ref}" => args.push(reference.clone()),
                "{transform}" => {
                    if let Some(transform) = &request.transform {
                        args.push(format!("TRANSFORMS={}", transform.display()));
                    }
                }
                "{patches}" => {
                    if !patch_list.is_empty() {
                        args.push(format!("PATCH={patch_list}"));
                    }
                }
                "{patches_list}" => {
                    if !patch_list.is_empty() {
                        args.push(patch_list.clone());
                    }
                }
                "{ui}" => {
                    let switch = if request.silent {
                        &self.templates.silent_switch
                    } else {
                        &self.templates.interactive_switch
                    };
                    if !switch.is_empty() {
                        args.push(switch.clone());
                    }
                }
                other => args.push(other.replace("{ref}", &reference)),
            }
        }
        args
    }
}

#[async_trait]
impl InstallerInvoker for CommandInvoker {
    async fn invoke(
        &self,
        request: &InvocationRequest,
    ) -> std::result::Result<Invocation, ExecutionError> {
        let program = &self.templates.template(request.action).program;
        let args = self.expand_args(request);
        info!("Running installer: {program} {}", args.join(" "));

        let started = Instant::now();
        let status = Command::new(program)
            .args(&args)
            .status()
            .await
            .map_err(|e| ExecutionError::unreachable("installer", format!("{program}: {e}")))?;

        let invocation = Invocation {
            code: status.code().unwrap_or(-1),
            elapsed_ms: elapsed_ms(started),
        };
        debug!(
            "Installer exited with {} after {} ms",
            invocation.code, invocation.elapsed_ms
        );
        Ok(invocation)
    }

    async fn run_executable(
        &self,
        path: &Path,
        args: &[String],
        wait: bool,
    ) -> std::result::Result<Invocation, ExecutionError> {
        info!("Running executable: {} {}", path.display(), args.join(" "));

        let started = Instant::now();
        let mut child = Command::new(path)
            .args(args)
            .spawn()
            .map_err(|e| ExecutionError::failed(format!("{}: {e}", path.display())))?;

        if !wait {
            debug!("Not waiting for {}", path.display());
            return Ok(Invocation {
                code: 0,
                elapsed_ms: elapsed_ms(started),
            });
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ExecutionError::failed(format!("{}: {e}", path.display())))?;

        Ok(Invocation {
            code: status.code().unwrap_or(-1),
            elapsed_ms: elapsed_ms(started),
        })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(action: PackageAction, target: InstallTarget) -> InvocationRequest {
        InvocationRequest {
            action,
            target,
            transform: None,
            patches: vec![],
            silent: true,
        }
    }

    #[test]
    fn test_expand_install_with_transform() {
        let invoker = CommandInvoker::new(InstallerConfig::default());
        let mut req = request(
            PackageAction::Install,
            InstallTarget::Artifact(PathBuf::from("acme.msi")),
        );
        req.transform = Some(PathBuf::from("acme.mst"));

        assert_eq!(
            invoker.expand_args(&req),
            vec!["/i", "acme.msi", "TRANSFORMS=acme.mst", "/qn", "/norestart"]
        );
    }

    #[test]
    fn test_expand_uninstall_interactive() {
        let invoker = CommandInvoker::new(InstallerConfig::default());
        let mut req = request(
            PackageAction::Uninstall,
            InstallTarget::ProductKey(String::from("{AAAA-0001}")),
        );
        req.silent = false;

        assert_eq!(
            invoker.expand_args(&req),
            vec!["/x", "{AAAA-0001}", "/qb-!", "/norestart"]
        );
    }

    #[test]
    fn test_expand_patch_list() {
        let invoker = CommandInvoker::new(InstallerConfig::default());
        let mut req = request(
            PackageAction::Patch,
            InstallTarget::ProductKey(String::from("{AAAA-0001}")),
        );
        req.patches = vec![PathBuf::from("a.msp"), PathBuf::from("b.msp")];

        assert_eq!(
            invoker.expand_args(&req),
            vec!["/update", "a.msp;b.msp", "/qn", "/norestart"]
        );
    }

    #[test]
    fn test_embedded_reference() {
        let mut templates = InstallerConfig::default();
        templates.uninstall.args = vec![String::from("--product={ref}"), String::from("{ui}")];
        templates.silent_switch = String::new();

        let invoker = CommandInvoker::new(templates);
        let req = request(
            PackageAction::Uninstall,
            InstallTarget::ProductKey(String::from("P1")),
        );
        assert_eq!(invoker.expand_args(&req), vec!["--product=P1"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_installer_is_unreachable() {
        let mut templates = InstallerConfig::default();
        templates.install.program = String::from("/nonexistent/appdeploy-installer");
        let invoker = CommandInvoker::new(templates);

        let req = request(
            PackageAction::Install,
            InstallTarget::ProductKey(String::from("P1")),
        );
        let err = invoker.invoke(&req).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Unreachable { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_executable_reports_exit_code() {
        let invoker = CommandInvoker::new(InstallerConfig::default());
        let args = vec![String::from("-c"), String::from("exit 7")];
        let invocation = invoker
            .run_executable(Path::new("/bin/sh"), &args, true)
            .await
            .unwrap();
        assert_eq!(invocation.code, 7);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_executable_is_step_failure() {
        let invoker = CommandInvoker::new(InstallerConfig::default());
        let err = invoker
            .run_executable(Path::new("/nonexistent/tool"), &[], true)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Failed { .. }));
    }
}
