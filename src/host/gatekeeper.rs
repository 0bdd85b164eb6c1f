//! Process closure negotiation and user prompts.
//!
//! The gatekeeper owns every interaction with the logged-on user. Outside
//! interactive mode it never blocks: closure is forced immediately and
//! prompts resolve as timed out.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::ExecutionError;
use crate::planner::{ClosureMode, DeployMode, Prompt};

/// Result of a closure negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureOutcome {
    /// No blocking process is running (or the user closed them).
    Proceed,
    /// The user postponed the deployment.
    Deferred,
    /// The processes were force-closed.
    TimedOutClosed,
}

/// Result of a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptResponse {
    /// The user acknowledged the prompt.
    Acknowledged,
    /// The user postponed the deployment.
    Deferred,
    /// Nobody answered (or no UI is permitted).
    TimedOut,
}

/// Negotiates closure of blocking processes and shows prompts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessGatekeeper: Send + Sync {
    /// Ensures none of `process_names` is running before installation.
    async fn negotiate_closure(
        &self,
        process_names: &[String],
        mode: ClosureMode,
        deploy_mode: DeployMode,
        allow_defer: bool,
    ) -> std::result::Result<ClosureOutcome, ExecutionError>;

    /// Shows a prompt. Prompts with a zero timeout are notifications.
    async fn show_prompt(
        &self,
        prompt: &Prompt,
        deploy_mode: DeployMode,
    ) -> std::result::Result<PromptResponse, ExecutionError>;
}

/// Gatekeeper backed by the OS process table and the console.
#[derive(Debug, Clone, Default)]
pub struct ConsoleGatekeeper;

impl ConsoleGatekeeper {
    /// Creates a new console gatekeeper.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Returns which of `names` are currently running.
    async fn running_among(
        &self,
        names: &[String],
    ) -> std::result::Result<Vec<String>, ExecutionError> {
        let table = list_processes().await?;
        Ok(names
            .iter()
            .filter(|name| table.iter().any(|p| same_process(p, name)))
            .cloned()
            .collect())
    }

    /// Terminates the given processes and confirms they are gone.
    async fn force_close(&self, names: &[String]) -> std::result::Result<(), ExecutionError> {
        for name in names {
            info!("Closing blocking process: {name}");
            if let Err(e) = terminate(name).await {
                warn!("Failed to terminate {name}: {e}");
            }
        }

        let still_running = self.running_among(names).await?;
        if still_running.is_empty() {
            Ok(())
        } else {
            Err(ExecutionError::failed(format!(
                "processes still running after close: {}",
                still_running.join(", ")
            )))
        }
    }
}

#[async_trait]
impl ProcessGatekeeper for ConsoleGatekeeper {
    async fn negotiate_closure(
        &self,
        process_names: &[String],
        mode: ClosureMode,
        deploy_mode: DeployMode,
        allow_defer: bool,
    ) -> std::result::Result<ClosureOutcome, ExecutionError> {
        let running = self.running_among(process_names).await?;
        if running.is_empty() {
            debug!("No blocking processes running");
            return Ok(ClosureOutcome::Proceed);
        }

        if !deploy_mode.is_interactive() {
            self.force_close(&running).await?;
            return Ok(ClosureOutcome::TimedOutClosed);
        }

        let defer_hint = if allow_defer {
            ", or type 'defer' to postpone"
        } else {
            ""
        };

        match mode {
            ClosureMode::CloseImmediate => {
                self.force_close(&running).await?;
                Ok(ClosureOutcome::TimedOutClosed)
            }
            ClosureMode::CountdownSeconds(secs) => {
                eprintln!("The following applications must be closed: {}", running.join(", "));
                eprintln!(
                    "Press Enter to close them now{defer_hint}. They will be closed automatically in {secs}s."
                );
                match read_line(Some(Duration::from_secs(secs))).await {
                    Some(line) if allow_defer && is_defer(&line) => Ok(ClosureOutcome::Deferred),
                    Some(_) => {
                        self.force_close(&running).await?;
                        Ok(ClosureOutcome::Proceed)
                    }
                    None => {
                        self.force_close(&running).await?;
                        Ok(ClosureOutcome::TimedOutClosed)
                    }
                }
            }
            ClosureMode::PersistUntilManual => {
                let mut running = running;
                loop {
                    eprintln!("Please close: {}", running.join(", "));
                    eprintln!("Press Enter once they are closed{defer_hint}.");
                    match read_line(None).await {
                        Some(line) if allow_defer && is_defer(&line) => {
                            return Ok(ClosureOutcome::Deferred);
                        }
                        Some(_) => {}
                        // Nobody is attached to the console.
                        None => {
                            self.force_close(&running).await?;
                            return Ok(ClosureOutcome::TimedOutClosed);
                        }
                    }
                    running = self.running_among(&running).await?;
                    if running.is_empty() {
                        return Ok(ClosureOutcome::Proceed);
                    }
                }
            }
        }
    }

    async fn show_prompt(
        &self,
        prompt: &Prompt,
        deploy_mode: DeployMode,
    ) -> std::result::Result<PromptResponse, ExecutionError> {
        if !deploy_mode.is_interactive() {
            debug!("Suppressing prompt in {deploy_mode} mode: {}", prompt.message);
            return Ok(PromptResponse::TimedOut);
        }

        eprintln!("{}", prompt.message);
        if prompt.timeout_secs == 0 {
            return Ok(PromptResponse::Acknowledged);
        }

        if prompt.allow_defer {
            eprintln!("Press Enter to continue, or type 'defer' to postpone.");
        } else {
            eprintln!("Press Enter to continue.");
        }

        match read_line(Some(Duration::from_secs(prompt.timeout_secs))).await {
            Some(line) if prompt.allow_defer && is_defer(&line) => Ok(PromptResponse::Deferred),
            Some(_) => Ok(PromptResponse::Acknowledged),
            None => Ok(PromptResponse::TimedOut),
        }
    }
}

/// Reads one line from stdin. `None` on timeout or end of input.
async fn read_line(timeout: Option<Duration>) -> Option<String> {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut line = String::new();

    let read = reader.read_line(&mut line);
    let bytes = match timeout {
        Some(limit) => tokio::time::timeout(limit, read).await.ok()?.ok()?,
        None => read.await.ok()?,
    };

    (bytes > 0).then_some(line)
}

fn is_defer(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "d" | "defer")
}

/// Compares a process table entry with a configured name, ignoring case and
/// a trailing `.exe`.
fn same_process(entry: &str, name: &str) -> bool {
    fn normalize(s: &str) -> String {
        let s = s.trim().to_ascii_lowercase();
        let base = s.rsplit(['/', '\\']).next().unwrap_or(&s).to_string();
        base.strip_suffix(".exe").map_or_else(|| base.clone(), str::to_string)
    }
    normalize(entry) == normalize(name)
}

async fn list_processes() -> std::result::Result<Vec<String>, ExecutionError> {
    let output = if cfg!(windows) {
        Command::new("tasklist").args(["/FO", "CSV", "/NH"]).output().await
    } else {
        Command::new("ps").args(["-A", "-o", "comm="]).output().await
    }
    .map_err(|e| ExecutionError::unreachable("process gatekeeper", e.to_string()))?;

    if !output.status.success() {
        return Err(ExecutionError::unreachable(
            "process gatekeeper",
            format!("process listing exited with {}", output.status),
        ));
    }

    Ok(parse_process_table(&String::from_utf8_lossy(&output.stdout)))
}

/// Parses `ps -o comm=` lines or `tasklist /FO CSV` rows into image names.
fn parse_process_table(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            if let Some(rest) = line.strip_prefix('"') {
                rest.split('"').next().map(str::to_string)
            } else {
                Some(line.to_string())
            }
        })
        .collect()
}

async fn terminate(name: &str) -> std::io::Result<()> {
    let status = if cfg!(windows) {
        let image = if name.to_ascii_lowercase().ends_with(".exe") {
            name.to_string()
        } else {
            format!("{name}.exe")
        };
        Command::new("taskkill").args(["/F", "/IM", &image]).status().await?
    } else {
        Command::new("pkill").args(["-x", name]).status().await?
    };

    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!("exited with {status}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::PromptCondition;

    #[test]
    fn test_same_process_ignores_case_and_extension() {
        assert!(same_process("ACME.EXE", "acme"));
        assert!(same_process("acme", "acme.exe"));
        assert!(same_process("/usr/bin/acme", "acme"));
        assert!(!same_process("acmehelper", "acme"));
    }

    #[test]
    fn test_parse_ps_output() {
        let table = parse_process_table("systemd\n  bash\n\n/usr/lib/acme\n");
        assert_eq!(table, vec!["systemd", "bash", "/usr/lib/acme"]);
    }

    #[test]
    fn test_parse_tasklist_output() {
        let table = parse_process_table(
            "\"System Idle Process\",\"0\",\"Services\",\"0\",\"8 K\"\r\n\"acme.exe\",\"4242\",\"Console\",\"1\",\"10,000 K\"\r\n",
        );
        assert_eq!(table, vec!["System Idle Process", "acme.exe"]);
    }

    #[test]
    fn test_is_defer() {
        assert!(is_defer("defer\n"));
        assert!(is_defer(" D "));
        assert!(!is_defer("\n"));
    }

    #[tokio::test]
    async fn test_prompt_never_blocks_outside_interactive() {
        let gatekeeper = ConsoleGatekeeper::new();
        let prompt = Prompt {
            message: String::from("Installing"),
            timeout_secs: 3600,
            allow_defer: true,
            condition: PromptCondition::Always,
        };
        for mode in [DeployMode::Silent, DeployMode::NonInteractive] {
            let response = gatekeeper.show_prompt(&prompt, mode).await.unwrap();
            assert_eq!(response, PromptResponse::TimedOut);
        }
    }

    #[tokio::test]
    async fn test_notification_is_acknowledged_immediately() {
        let gatekeeper = ConsoleGatekeeper::new();
        let prompt = Prompt {
            message: String::from("Installation in progress"),
            timeout_secs: 0,
            allow_defer: false,
            condition: PromptCondition::Always,
        };
        let response = gatekeeper
            .show_prompt(&prompt, DeployMode::Interactive)
            .await
            .unwrap();
        assert_eq!(response, PromptResponse::Acknowledged);
    }
}
