//! Process inventory for the NSO daemon tree.
//!
//! The daemon is a multi-process system: the main Erlang VM, per-package
//! Python VMs, and auxiliary Java runtime processes. They are identified by
//! command-line pattern matching; this module is the only place that knows
//! the patterns, so a daemon rename touches exactly one table.

use async_trait::async_trait;
use nso_common::{ProcessRecord, ProcessRole};
use sysinfo::{ProcessRefreshKind, RefreshKind, System};
use tracing::debug;

/// Role-identifying command-line patterns. Order matters: the first match
/// wins, and worker patterns come first so a wrapper process mentioning the
/// main binary is not misclassified.
pub const PROCESS_PATTERNS: &[(ProcessRole, &str)] = &[
    (ProcessRole::Worker, "ncs_pyvm/startup.py"),
    (ProcessRole::Auxiliary, "NcsJVMLauncher"),
    (ProcessRole::Auxiliary, "webapp-runner.jar"),
    (ProcessRole::Main, "ncs.smp"),
];

/// Classify one command line against the pattern table.
pub fn classify(cmdline: &str) -> Option<ProcessRole> {
    PROCESS_PATTERNS
        .iter()
        .find(|(_, pattern)| cmdline.contains(pattern))
        .map(|(role, _)| *role)
}

/// Source of raw process-table snapshots. Production reads the live system;
/// tests supply canned tables.
#[async_trait]
pub trait ProcessSource: Send + Sync {
    /// Full (pid, command line) snapshot of the process table.
    async fn process_table(&self) -> Vec<(u32, String)>;
}

/// Signal delivery to daemon processes. Split from `ProcessSource` so the
/// executor can be tested without sending real signals.
pub trait ProcessControl: Send + Sync {
    /// Request voluntary termination (SIGTERM). Returns false if the
    /// process was already gone.
    fn terminate(&self, pid: u32) -> bool;

    /// Unconditional kill (SIGKILL). Returns false if already gone.
    fn kill(&self, pid: u32) -> bool;

    /// Liveness check (signal 0).
    fn alive(&self, pid: u32) -> bool;
}

/// Take a fresh daemon-process snapshot: scan the process table and keep
/// only records matching the pattern table, excluding this tool itself.
/// Records are valid only for the instant of the scan.
pub async fn snapshot(source: &dyn ProcessSource) -> Vec<ProcessRecord> {
    let own_pid = std::process::id();
    let mut records = Vec::new();

    for (pid, cmdline) in source.process_table().await {
        if pid == own_pid {
            continue;
        }
        if let Some(role) = classify(&cmdline) {
            debug!("inventory: pid={} role={} cmd={}", pid, role.as_str(), cmdline);
            records.push(ProcessRecord { pid, role, cmdline });
        }
    }

    records
}

/// Records of one role, preserving snapshot order.
pub fn by_role(records: &[ProcessRecord], role: ProcessRole) -> Vec<ProcessRecord> {
    records.iter().filter(|r| r.role == role).cloned().collect()
}

/// Live process table via sysinfo.
pub struct HostProcesses;

#[async_trait]
impl ProcessSource for HostProcesses {
    async fn process_table(&self) -> Vec<(u32, String)> {
        // The sysinfo refresh walks /proc; keep it off the async threads.
        let table = tokio::task::spawn_blocking(|| {
            let system = System::new_with_specifics(
                RefreshKind::new().with_processes(ProcessRefreshKind::new()),
            );
            system
                .processes()
                .iter()
                .map(|(pid, process)| (pid.as_u32(), process.cmd().join(" ")))
                .collect::<Vec<_>>()
        })
        .await;

        table.unwrap_or_default()
    }
}

/// Signal delivery via the host kernel.
pub struct HostSignals;

impl HostSignals {
    fn send(&self, pid: u32, signal: Option<nix::sys::signal::Signal>) -> bool {
        let pid = nix::unistd::Pid::from_raw(pid as libc::pid_t);
        nix::sys::signal::kill(pid, signal).is_ok()
    }
}

impl ProcessControl for HostSignals {
    fn terminate(&self, pid: u32) -> bool {
        self.send(pid, Some(nix::sys::signal::Signal::SIGTERM))
    }

    fn kill(&self, pid: u32) -> bool {
        self.send(pid, Some(nix::sys::signal::Signal::SIGKILL))
    }

    fn alive(&self, pid: u32) -> bool {
        // Signal 0 performs the permission/existence check without delivery.
        self.send(pid, None)
    }
}
