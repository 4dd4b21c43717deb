//! Data model shared between the nsodoctor binary and its tests.
//!
//! Every read of NSO state (process table, lock table) is modelled as a
//! snapshot type that is only valid for the instant it was taken. Probe and
//! action results are plain enums, never exceptions: a hung probe is a
//! `Timeout` outcome, a failed action is a `Failed` outcome, and the run
//! keeps going either way.

use serde::{Deserialize, Serialize};

/// Identity of a diagnostic probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeId {
    /// `ncs --status` control-interface check
    Status,
    /// Management session + read transaction round trip
    Api,
    /// Per-device aborted write transactions
    DeviceLocks,
    /// Process table scan for daemon processes
    ProcessInventory,
}

impl ProbeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Api => "api",
            Self::DeviceLocks => "device-locks",
            Self::ProcessInventory => "process-inventory",
        }
    }
}

/// Three-valued probe outcome.
///
/// `Degraded` means the daemon answered but with a failure; `Timeout` means
/// it did not answer within the probe's own budget. The distinction matters:
/// a status probe that fails cleanly with no processes running means
/// "not running", while a status probe that times out means "hung".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeOutcome {
    Ok,
    Degraded,
    Timeout,
}

impl ProbeOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Degraded => "degraded",
            Self::Timeout => "timeout",
        }
    }
}

/// Result of one probe. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub probe: ProbeId,
    pub outcome: ProbeOutcome,
    pub elapsed_ms: u64,
    pub detail: String,
    /// Structured payload, e.g. `{"lock_conflict": true}` for the API probe
    /// or `{"locked": ["r1"]}` for the lock probe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ProbeResult {
    /// Whether the payload records a lock-flavoured error. Used by diagnosis
    /// to tell a stuck session apart from a plain API failure.
    pub fn has_lock_evidence(&self) -> bool {
        self.payload
            .as_ref()
            .and_then(|p| p.get("lock_conflict"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Per-device outcome of the lock probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceLockStatus {
    pub device: String,
    pub locked: bool,
    /// How the lock state was probed. Always an attempted (and aborted)
    /// write transaction; recorded so the report is self-describing.
    pub method: String,
    pub detail: String,
}

impl DeviceLockStatus {
    pub fn probed(device: impl Into<String>, locked: bool, detail: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            locked,
            method: "aborted-write-transaction".to_string(),
            detail: detail.into(),
        }
    }
}

/// Role of a daemon process, which also defines termination order:
/// workers first, auxiliary runtime second, the main daemon last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessRole {
    /// Service/package VM processes spawned by the daemon
    Worker,
    /// Auxiliary runtime processes (JVM launcher, embedded web runner)
    Auxiliary,
    /// The main daemon process itself
    Main,
}

impl ProcessRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Auxiliary => "auxiliary",
            Self::Main => "main",
        }
    }

    /// Tiers in the order they must be terminated.
    pub const TERMINATION_ORDER: [ProcessRole; 3] =
        [ProcessRole::Worker, ProcessRole::Auxiliary, ProcessRole::Main];
}

/// One daemon process found by the inventory scan. Valid only for the
/// snapshot it came from; never carried across refreshes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub role: ProcessRole,
    pub cmdline: String,
}

/// Overall verdict aggregated from all probe results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    /// All probes OK, no device locked
    Healthy,
    /// Control interface and API answer, but at least one device is locked
    DegradedLocks,
    /// Control interface and API answer, lock-flavoured API evidence but no
    /// device lock: a stuck session is holding something
    DegradedSessions,
    /// Status or API probe did not answer in time
    Hung,
    /// No daemon processes and the status probe failed cleanly
    NotRunning,
}

impl Verdict {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Verdicts caused by a held lock. Recovery from these requires the
    /// device lock table to come back clean, not just responsive probes.
    pub fn involves_locks(&self) -> bool {
        matches!(self, Self::DegradedLocks | Self::DegradedSessions)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "HEALTHY",
            Self::DegradedLocks => "DEGRADED (locks)",
            Self::DegradedSessions => "DEGRADED (sessions)",
            Self::Hung => "HUNG",
            Self::NotRunning => "NOT RUNNING",
        }
    }
}

/// Kind of remediation action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    ClearLocks,
    TerminateProcesses,
    RestartDaemon,
    WaitForReady,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClearLocks => "clear-locks",
            Self::TerminateProcesses => "terminate-processes",
            Self::RestartDaemon => "restart-daemon",
            Self::WaitForReady => "wait-for-ready",
        }
    }
}

/// Outcome of one remediation action. Starts `Pending`, mutated exactly once
/// by the executor, never reused across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionOutcome {
    Pending,
    Applied,
    Failed,
    /// Precondition re-check found nothing to do (e.g. clearing locks when
    /// no device is locked anymore)
    SkippedAlreadySatisfied,
}

impl ActionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::SkippedAlreadySatisfied => "skipped (already satisfied)",
        }
    }
}

/// One planned remediation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationAction {
    pub kind: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub timeout_secs: u64,
    pub outcome: ActionOutcome,
    pub detail: String,
}

impl RemediationAction {
    pub fn new(kind: ActionKind, timeout_secs: u64) -> Self {
        Self {
            kind,
            target: None,
            timeout_secs,
            outcome: ActionOutcome::Pending,
            detail: String::new(),
        }
    }
}

/// Ordered remediation plan. Actions execute strictly in this order and
/// each action's precondition is re-checked immediately before it runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemediationPlan {
    pub actions: Vec<RemediationAction>,
}

impl RemediationPlan {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn kinds(&self) -> Vec<ActionKind> {
        self.actions.iter().map(|a| a.kind).collect()
    }

    /// Kinds of actions that actually ran (applied or failed), in order.
    pub fn executed_kinds(&self) -> Vec<ActionKind> {
        self.actions
            .iter()
            .filter(|a| matches!(a.outcome, ActionOutcome::Applied | ActionOutcome::Failed))
            .map(|a| a.kind)
            .collect()
    }
}

/// Terminal state of a health-check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinalState {
    /// No problems found, nothing done
    Healthy,
    /// Problems found, remediation applied and verified within budget
    Recovered,
    /// Problems found and not (fully) fixed, or verification budget exhausted
    Unrecovered,
    /// Problems found but auto-fix was disabled; diagnosis only
    FixDisabled,
}

impl FinalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "HEALTHY",
            Self::Recovered => "RECOVERED",
            Self::Unrecovered => "UNRECOVERED",
            Self::FixDisabled => "FIX DISABLED",
        }
    }

    /// Process exit code: 0 = healthy, 1 = fixed, 2 = not fixed.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Healthy => 0,
            Self::Recovered => 1,
            Self::Unrecovered | Self::FixDisabled => 2,
        }
    }
}

/// Full structured summary of one health-check run. Rendered human-readable
/// and as JSON; also appended to the run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub version: String,
    /// ISO 8601 start timestamp
    pub started_at: String,
    pub deadline_secs: u64,
    pub auto_fix: bool,
    pub verdict: Verdict,
    pub final_state: FinalState,
    pub exit_code: i32,
    pub probes: Vec<ProbeResult>,
    pub locks: Vec<DeviceLockStatus>,
    pub processes: Vec<ProcessRecord>,
    pub actions: Vec<RemediationAction>,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub fixes: Vec<String>,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(FinalState::Healthy.exit_code(), 0);
        assert_eq!(FinalState::Recovered.exit_code(), 1);
        assert_eq!(FinalState::Unrecovered.exit_code(), 2);
        assert_eq!(FinalState::FixDisabled.exit_code(), 2);
    }

    #[test]
    fn test_lock_flavoured_verdicts() {
        assert!(Verdict::DegradedLocks.involves_locks());
        assert!(Verdict::DegradedSessions.involves_locks());
        assert!(!Verdict::Hung.involves_locks());
        assert!(!Verdict::NotRunning.involves_locks());
        assert!(!Verdict::Healthy.involves_locks());
    }

    #[test]
    fn test_termination_order() {
        assert_eq!(
            ProcessRole::TERMINATION_ORDER,
            [ProcessRole::Worker, ProcessRole::Auxiliary, ProcessRole::Main]
        );
    }

    #[test]
    fn test_probe_outcome_serialization() {
        let json = serde_json::to_string(&ProbeOutcome::Timeout).unwrap();
        assert_eq!(json, r#""timeout""#);
        let json = serde_json::to_string(&ProbeId::DeviceLocks).unwrap();
        assert_eq!(json, r#""device-locks""#);
    }

    #[test]
    fn test_lock_evidence_payload() {
        let mut result = ProbeResult {
            probe: ProbeId::Api,
            outcome: ProbeOutcome::Degraded,
            elapsed_ms: 12,
            detail: "session is locked".to_string(),
            payload: Some(serde_json::json!({ "lock_conflict": true })),
        };
        assert!(result.has_lock_evidence());

        result.payload = None;
        assert!(!result.has_lock_evidence());
    }

    #[test]
    fn test_executed_kinds_skips_pending_and_skipped() {
        let mut plan = RemediationPlan::empty();
        plan.actions.push(RemediationAction::new(ActionKind::ClearLocks, 10));
        plan.actions.push(RemediationAction::new(ActionKind::WaitForReady, 60));
        plan.actions[0].outcome = ActionOutcome::SkippedAlreadySatisfied;
        plan.actions[1].outcome = ActionOutcome::Applied;

        assert_eq!(plan.executed_kinds(), vec![ActionKind::WaitForReady]);
    }
}
