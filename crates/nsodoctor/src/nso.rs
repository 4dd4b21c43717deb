//! Collaborator interface to the NSO daemon.
//!
//! NSO is a black box to this tool. Everything it needs is behind the
//! `ManagementApi` trait: the status command, a session/read-transaction
//! round trip, per-device write-transaction attempts (always aborted),
//! the native lock-clear operation, and the start command. The production
//! implementation drives the NSO binaries; tests substitute mocks.

use crate::config::Config;
use async_trait::async_trait;
use std::process::Output;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors from the management layer. Lock conflicts get their own variant
/// because diagnosis treats them differently from plain failures.
#[derive(Debug, Error)]
pub enum NsoError {
    #[error("lock conflict: {0}")]
    LockConflict(String),
    #[error("daemon error: {0}")]
    Daemon(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl NsoError {
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, Self::LockConflict(_))
    }

    /// Classify raw daemon error text. NSO reports lock contention with
    /// messages containing "locked" or "lock denied".
    pub fn from_daemon_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let lower = text.to_lowercase();
        if lower.contains("locked") || lower.contains("lock denied") {
            Self::LockConflict(text)
        } else {
            Self::Daemon(text)
        }
    }
}

/// Reply from the daemon status command.
#[derive(Debug, Clone)]
pub struct StatusReply {
    /// Command exited with a success code
    pub success: bool,
    /// Output reported "status: started"
    pub started: bool,
    pub detail: String,
}

impl StatusReply {
    pub fn is_up(&self) -> bool {
        self.success && self.started
    }
}

/// The NSO operations this tool consumes. Timeouts are applied by callers;
/// implementations just do the work.
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// Invoke the daemon's status command.
    async fn daemon_status(&self) -> Result<StatusReply, NsoError>;

    /// Open a management session, start a read transaction, read one
    /// top-level path, and close everything. Never leaves a session open.
    async fn read_top_level(&self) -> Result<(), NsoError>;

    /// List the names of all managed devices.
    async fn list_devices(&self) -> Result<Vec<String>, NsoError>;

    /// Attempt a short-lived write transaction scoped to one device. The
    /// transaction is ALWAYS aborted, never committed. `Ok(())` means the
    /// device is not locked; `Err(LockConflict)` means it is.
    async fn try_device_write(&self, device: &str) -> Result<(), NsoError>;

    /// Invoke the daemon's native lock-clearing operation. Idempotent on
    /// the daemon side: clearing nothing is not an error.
    async fn clear_locks(&self) -> Result<(), NsoError>;

    /// Launch the daemon start command and return without waiting for
    /// readiness; verification polls separately.
    async fn start_daemon(&self) -> Result<(), NsoError>;
}

/// Production implementation driving the NSO binaries.
pub struct NsoCli {
    config: Config,
}

impl NsoCli {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    async fn run_ncs_cli(&self, command: &str) -> Result<Output, NsoError> {
        debug!("ncs_cli -C -u {} -c {:?}", self.config.api_user, command);
        let output = Command::new(self.config.ncs_cli_bin())
            .arg("-C")
            .arg("-u")
            .arg(&self.config.api_user)
            .arg("-c")
            .arg(command)
            .output()
            .await?;
        Ok(output)
    }

    /// Arguments for one `ncs_cmd` invocation. Sessions are opened as the
    /// configured user in the configured context so daemon-side audit logs
    /// attribute the diagnostic traffic correctly.
    fn ncs_cmd_args(&self, command: &str) -> Vec<String> {
        vec![
            "-o".to_string(),
            "-u".to_string(),
            self.config.api_user.clone(),
            "-x".to_string(),
            self.config.api_context.clone(),
            "-c".to_string(),
            command.to_string(),
        ]
    }

    async fn run_ncs_cmd(&self, command: &str) -> Result<Output, NsoError> {
        let args = self.ncs_cmd_args(command);
        debug!("ncs_cmd {:?}", args);
        let output = Command::new(self.config.ncs_cmd_bin())
            .args(&args)
            .output()
            .await?;
        Ok(output)
    }
}

#[async_trait]
impl ManagementApi for NsoCli {
    async fn daemon_status(&self) -> Result<StatusReply, NsoError> {
        let output = Command::new(self.config.ncs_bin())
            .arg("--status")
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let started = stdout.contains("status: started");
        let detail = if output.status.success() {
            stdout.lines().next().unwrap_or("").to_string()
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            truncate(stderr.trim(), 200)
        };

        Ok(StatusReply {
            success: output.status.success(),
            started,
            detail,
        })
    }

    async fn read_top_level(&self) -> Result<(), NsoError> {
        // One read against operational state proves the whole path:
        // session open, transaction start, read, close.
        let output = self.run_ncs_cmd("mget /ncs-state/version").await?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(NsoError::from_daemon_text(truncate(stderr.trim(), 200)))
        }
    }

    async fn list_devices(&self) -> Result<Vec<String>, NsoError> {
        let output = self.run_ncs_cli("show devices list").await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NsoError::from_daemon_text(truncate(stderr.trim(), 200)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_device_list(&stdout))
    }

    async fn try_device_write(&self, device: &str) -> Result<(), NsoError> {
        // mlock takes the device lock inside a write transaction; the
        // trailing abort guarantees nothing is ever committed.
        let cmd = format!("mtrans rw; mlock /devices/device{{{device}}}; mabort");
        let output = self.run_ncs_cmd(&cmd).await?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(NsoError::from_daemon_text(truncate(stderr.trim(), 200)))
        }
    }

    async fn clear_locks(&self) -> Result<(), NsoError> {
        let output = self.run_ncs_cli("clear locks").await?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(NsoError::Daemon(truncate(stderr.trim(), 200)))
        }
    }

    async fn start_daemon(&self) -> Result<(), NsoError> {
        // `ncs` forks and daemonizes; a success exit only means the launch
        // worked. Readiness is the verification loop's job.
        let output = Command::new(self.config.ncs_bin())
            .current_dir(&self.config.run_dir)
            .arg("--cd")
            .arg(&self.config.run_dir)
            .output()
            .await?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(NsoError::Daemon(truncate(stderr.trim(), 200)))
        }
    }
}

/// Parse `show devices list` output: first column of each data row is the
/// device name; header and separator rows are skipped.
fn parse_device_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("NAME") && !line.starts_with('-'))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timeouts;
    use std::path::PathBuf;

    fn test_config() -> Config {
        Config {
            nso_dir: PathBuf::from("/opt/nso"),
            run_dir: PathBuf::from("/opt/ncs-run"),
            api_user: "admin".to_string(),
            api_context: "health_check".to_string(),
            timeouts: Timeouts::default(),
            auto_fix: true,
            json: false,
        }
    }

    #[test]
    fn test_ncs_cmd_args_carry_session_identity() {
        let cli = NsoCli::new(test_config());
        assert_eq!(
            cli.ncs_cmd_args("mget /ncs-state/version"),
            vec!["-o", "-u", "admin", "-x", "health_check", "-c", "mget /ncs-state/version"]
        );
    }

    #[test]
    fn test_lock_conflict_classification() {
        let err = NsoError::from_daemon_text("resource /devices/device{r1} is locked by session 42");
        assert!(err.is_lock_conflict());

        let err = NsoError::from_daemon_text("the configuration database lock denied");
        assert!(err.is_lock_conflict());

        let err = NsoError::from_daemon_text("connection refused");
        assert!(!err.is_lock_conflict());
    }

    #[test]
    fn test_parse_device_list() {
        let stdout = "\
NAME  ADDRESS    DESCRIPTION  NED ID        ADMIN STATE
-----------------------------------------------------------
r1    10.0.0.1   -            cisco-ios-cli unlocked
r2    10.0.0.2   -            cisco-ios-cli unlocked
";
        assert_eq!(parse_device_list(stdout), vec!["r1", "r2"]);
    }

    #[test]
    fn test_parse_device_list_empty() {
        assert!(parse_device_list("").is_empty());
        assert!(parse_device_list("NAME ADDRESS\n----\n").is_empty());
    }

    #[test]
    fn test_status_reply_is_up() {
        let up = StatusReply {
            success: true,
            started: true,
            detail: "vsn: 6.1.4".to_string(),
        };
        assert!(up.is_up());

        let starting = StatusReply {
            success: true,
            started: false,
            detail: "status: starting".to_string(),
        };
        assert!(!starting.is_up());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        let long = "a".repeat(250);
        assert_eq!(truncate(&long, 200).len(), 203);
    }
}
