//! Configuration for nsodoctor.
//!
//! Everything is read once at startup: the NSO installation location and the
//! management-API identity come from the environment, behaviour switches come
//! from the CLI. Nothing re-reads the environment mid-run.

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable locating the NSO installation root.
pub const ENV_NSO_DIR: &str = "NCS_DIR";

/// Environment variable locating the runtime directory the daemon starts in.
pub const ENV_RUN_DIR: &str = "NCS_RUN_DIR";

/// Environment variable for the management-session username.
pub const ENV_API_USER: &str = "NSO_API_USER";

/// Environment variable for the management-session context.
pub const ENV_API_CONTEXT: &str = "NSO_API_CONTEXT";

/// Per-probe and per-action time budgets. All of these are sub-budgets of
/// the overall run deadline; a probe that exceeds its own budget is recorded
/// as TIMEOUT and the run moves on.
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// `ncs --status` probe
    pub status_probe: Duration,
    /// Session + read-transaction probe
    pub api_probe: Duration,
    /// Whole lock probe (device list + all per-device attempts)
    pub lock_probe: Duration,
    /// One per-device write-transaction attempt
    pub lock_per_device: Duration,
    /// Process table scan
    pub inventory_probe: Duration,
    /// Native lock-clear operation
    pub clear_locks: Duration,
    /// Grace period per termination tier before escalating to SIGKILL
    pub terminate_grace: Duration,
    /// Launching the daemon start command
    pub restart_launch: Duration,
    /// Fixed polling cadence during verification
    pub verify_interval: Duration,
    /// Hard wall-clock budget for the entire run
    pub overall: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            status_probe: Duration::from_secs(10),
            api_probe: Duration::from_secs(10),
            lock_probe: Duration::from_secs(15),
            lock_per_device: Duration::from_secs(5),
            inventory_probe: Duration::from_secs(5),
            clear_locks: Duration::from_secs(10),
            terminate_grace: Duration::from_secs(2),
            restart_launch: Duration::from_secs(15),
            verify_interval: Duration::from_secs(3),
            overall: Duration::from_secs(60),
        }
    }
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// NSO installation root (contains bin/ncs, bin/ncs_cli, bin/ncs_cmd)
    pub nso_dir: PathBuf,
    /// Directory the daemon is started from
    pub run_dir: PathBuf,
    /// Username for diagnostic management sessions
    pub api_user: String,
    /// Session context for diagnostic management sessions
    pub api_context: String,
    pub timeouts: Timeouts,
    /// When false, only probing and reporting occur
    pub auto_fix: bool,
    /// Render the report as JSON instead of human-readable text
    pub json: bool,
}

impl Config {
    /// Build configuration from the environment plus CLI overrides.
    pub fn from_env(
        nso_dir_override: Option<PathBuf>,
        deadline_secs: Option<u64>,
        auto_fix: bool,
        json: bool,
    ) -> Result<Self> {
        let nso_dir = match nso_dir_override.or_else(|| std::env::var(ENV_NSO_DIR).ok().map(PathBuf::from)) {
            Some(dir) => dir,
            None => bail!(
                "NSO installation not found: set {} or pass --nso-dir",
                ENV_NSO_DIR
            ),
        };

        let run_dir = std::env::var(ENV_RUN_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_run_dir());

        let api_user = std::env::var(ENV_API_USER).unwrap_or_else(|_| "admin".to_string());
        let api_context =
            std::env::var(ENV_API_CONTEXT).unwrap_or_else(|_| "health_check".to_string());

        let mut timeouts = Timeouts::default();
        if let Some(secs) = deadline_secs {
            timeouts.overall = Duration::from_secs(secs);
        }

        Ok(Self {
            nso_dir,
            run_dir,
            api_user,
            api_context,
            timeouts,
            auto_fix,
            json,
        })
    }

    pub fn ncs_bin(&self) -> PathBuf {
        self.nso_dir.join("bin").join("ncs")
    }

    pub fn ncs_cli_bin(&self) -> PathBuf {
        self.nso_dir.join("bin").join("ncs_cli")
    }

    pub fn ncs_cmd_bin(&self) -> PathBuf {
        self.nso_dir.join("bin").join("ncs_cmd")
    }
}

fn default_run_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join("ncs-run")
    } else {
        PathBuf::from("/var/opt/ncs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts_within_overall_budget() {
        let t = Timeouts::default();
        // No single probe budget may exceed the overall deadline, or the
        // max-not-sum bound on the probe stage would be meaningless.
        assert!(t.status_probe < t.overall);
        assert!(t.api_probe < t.overall);
        assert!(t.lock_probe < t.overall);
        assert!(t.inventory_probe < t.overall);
        assert!(t.lock_per_device <= t.lock_probe);
    }

    #[test]
    fn test_bin_paths() {
        let cfg = Config {
            nso_dir: PathBuf::from("/opt/nso"),
            run_dir: PathBuf::from("/opt/ncs-run"),
            api_user: "admin".to_string(),
            api_context: "health_check".to_string(),
            timeouts: Timeouts::default(),
            auto_fix: true,
            json: false,
        };
        assert_eq!(cfg.ncs_bin(), PathBuf::from("/opt/nso/bin/ncs"));
        assert_eq!(cfg.ncs_cli_bin(), PathBuf::from("/opt/nso/bin/ncs_cli"));
        assert_eq!(cfg.ncs_cmd_bin(), PathBuf::from("/opt/nso/bin/ncs_cmd"));
    }

    #[test]
    fn test_deadline_override() {
        let cfg = Config::from_env(Some(PathBuf::from("/opt/nso")), Some(25), true, false).unwrap();
        assert_eq!(cfg.timeouts.overall, Duration::from_secs(25));
        assert!(cfg.auto_fix);
    }
}
