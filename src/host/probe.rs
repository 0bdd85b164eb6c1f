//! Host environment probes used by pre-flight checks.

use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

use crate::error::ExecutionError;

/// Read-only queries against the target machine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostProbe: Send + Sync {
    /// Free space on the volume holding `path`, in megabytes.
    async fn free_space_mb(&self, path: &Path) -> std::result::Result<u64, ExecutionError>;

    /// Whether `path` exists.
    async fn path_exists(&self, path: &Path) -> bool;
}

/// Probe that queries the live system.
#[derive(Debug, Clone, Default)]
pub struct SystemProbe;

impl SystemProbe {
    /// Creates a new system probe.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HostProbe for SystemProbe {
    async fn free_space_mb(&self, path: &Path) -> std::result::Result<u64, ExecutionError> {
        if cfg!(windows) {
            let script = format!(
                "([System.IO.DriveInfo]::new('{}')).AvailableFreeSpace",
                path.display()
            );
            let output = Command::new("powershell")
                .args(["-NoProfile", "-NonInteractive", "-Command", &script])
                .output()
                .await
                .map_err(|e| ExecutionError::failed(format!("disk query failed: {e}")))?;
            let text = String::from_utf8_lossy(&output.stdout);
            let bytes: u64 = text.trim().parse().map_err(|_| {
                ExecutionError::failed(format!("unexpected disk query output: {}", text.trim()))
            })?;
            Ok(bytes / (1024 * 1024))
        } else {
            let output = Command::new("df")
                .arg("-Pk")
                .arg(path)
                .output()
                .await
                .map_err(|e| ExecutionError::failed(format!("disk query failed: {e}")))?;
            if !output.status.success() {
                return Err(ExecutionError::failed(format!(
                    "df exited with {} for {}",
                    output.status,
                    path.display()
                )));
            }
            parse_df_available_kb(&String::from_utf8_lossy(&output.stdout))
                .map(|kb| kb / 1024)
                .ok_or_else(|| ExecutionError::failed("unexpected df output"))
        }
    }

    async fn path_exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}

/// Extracts the available-kilobytes column from POSIX `df -Pk` output.
fn parse_df_available_kb(output: &str) -> Option<u64> {
    output
        .lines()
        .nth(1)
        .and_then(|line| line.split_whitespace().nth(3))
        .and_then(|field| field.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_df_output() {
        let output = "Filesystem     1024-blocks      Used Available Capacity Mounted on\n\
                      /dev/sda1        102400000  51200000  51200000      50% /\n";
        assert_eq!(parse_df_available_kb(output), Some(51_200_000));
    }

    #[test]
    fn test_parse_df_garbage() {
        assert_eq!(parse_df_available_kb("nothing here"), None);
        assert_eq!(parse_df_available_kb(""), None);
    }

    #[tokio::test]
    async fn test_path_exists() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let probe = SystemProbe::new();
        assert!(probe.path_exists(temp.path()).await);
        assert!(!probe.path_exists(Path::new("/nonexistent/appdeploy/marker")).await);
    }
}
