//! Remediation planning and execution.
//!
//! The planner maps a verdict to an ordered plan; the executor runs it
//! strictly sequentially, re-checking each action's precondition immediately
//! before acting. Another operator may be touching the daemon concurrently,
//! so the diagnosis snapshot is never trusted at execution time.
//!
//! Escalation is conservative: lock problems get lock clearing only; process
//! termination is reserved for HUNG. A daemon that is merely holding a lock
//! is never restarted in the same run.

use crate::config::Timeouts;
use crate::inventory::{self, ProcessControl, ProcessSource};
use crate::nso::ManagementApi;
use crate::probes;
use nso_common::{
    ActionKind, ActionOutcome, ProcessRole, RemediationAction, RemediationPlan, Verdict,
};
use tokio::time::timeout;
use tracing::{info, warn};

/// Build the remediation plan for a verdict. Diagnosis-only mode and a
/// healthy daemon both yield an empty plan.
pub fn plan(verdict: Verdict, auto_fix: bool, timeouts: &Timeouts) -> RemediationPlan {
    if !auto_fix || verdict.is_healthy() {
        return RemediationPlan::empty();
    }

    let kinds: &[ActionKind] = match verdict {
        Verdict::Healthy => &[],
        Verdict::DegradedLocks | Verdict::DegradedSessions => {
            &[ActionKind::ClearLocks, ActionKind::WaitForReady]
        }
        Verdict::Hung => &[
            ActionKind::TerminateProcesses,
            ActionKind::RestartDaemon,
            ActionKind::WaitForReady,
        ],
        // Nothing to terminate when nothing is running.
        Verdict::NotRunning => &[ActionKind::RestartDaemon, ActionKind::WaitForReady],
    };

    let actions = kinds
        .iter()
        .map(|&kind| RemediationAction::new(kind, action_timeout(kind, timeouts)))
        .collect();

    RemediationPlan { actions }
}

fn action_timeout(kind: ActionKind, timeouts: &Timeouts) -> u64 {
    match kind {
        ActionKind::ClearLocks => timeouts.clear_locks.as_secs(),
        ActionKind::TerminateProcesses => {
            // Three tiers, each with TERM + grace + KILL.
            timeouts.terminate_grace.as_secs() * 3 + 5
        }
        ActionKind::RestartDaemon => timeouts.restart_launch.as_secs(),
        ActionKind::WaitForReady => timeouts.overall.as_secs(),
    }
}

/// Result of executing a plan.
#[derive(Debug, Default)]
pub struct ExecutionResult {
    /// An irrecoverable action (restart launch) failed; the run is fatal.
    pub fatal: bool,
    /// Human-readable ledger of fixes that were applied.
    pub fixes: Vec<String>,
}

/// Executes remediation plans. Actions run one at a time; concurrency here
/// is deliberately impossible because killing processes and restarting the
/// daemon are ordered, stateful operations.
pub struct Executor<'a> {
    pub api: &'a dyn ManagementApi,
    pub source: &'a dyn ProcessSource,
    pub control: &'a dyn ProcessControl,
    pub timeouts: &'a Timeouts,
}

impl<'a> Executor<'a> {
    /// Run the plan in order, mutating each action's outcome in place.
    /// Stops early only on a fatal restart failure.
    pub async fn execute(&self, plan: &mut RemediationPlan) -> ExecutionResult {
        let mut result = ExecutionResult::default();

        for action in &mut plan.actions {
            info!("remediation: {}", action.kind.as_str());
            match action.kind {
                ActionKind::ClearLocks => self.clear_locks(action, &mut result).await,
                ActionKind::TerminateProcesses => self.terminate_processes(action, &mut result).await,
                ActionKind::RestartDaemon => self.restart_daemon(action, &mut result).await,
                ActionKind::WaitForReady => {
                    // Explicit plan step so the report shows verification was
                    // attempted; the polling itself is the verify loop's job.
                    action.outcome = ActionOutcome::Applied;
                    action.detail = "handed off to verification loop".to_string();
                }
            }

            if result.fatal {
                warn!("remediation aborted: {} failed irrecoverably", action.kind.as_str());
                break;
            }
        }

        result
    }

    /// clear-locks: re-probe first; clearing an already-unlocked device set
    /// is a no-op, reported as skipped rather than an error.
    async fn clear_locks(&self, action: &mut RemediationAction, result: &mut ExecutionResult) {
        let (_, locks, _) = probes::lock_probe(self.api, self.timeouts).await;
        let locked: Vec<String> = locks.iter().filter(|l| l.locked).map(|l| l.device.clone()).collect();

        if locked.is_empty() {
            action.outcome = ActionOutcome::SkippedAlreadySatisfied;
            action.detail = "no device locks present".to_string();
            return;
        }

        action.target = Some(locked.join(","));
        match timeout(self.timeouts.clear_locks, self.api.clear_locks()).await {
            Ok(Ok(())) => {
                action.outcome = ActionOutcome::Applied;
                action.detail = format!("cleared locks on {}", locked.join(", "));
                result.fixes.push(action.detail.clone());
            }
            Ok(Err(e)) => {
                // Non-fatal: verification will tell us whether the daemon
                // recovered anyway.
                warn!("clear locks failed: {}", e);
                action.outcome = ActionOutcome::Failed;
                action.detail = e.to_string();
            }
            Err(_) => {
                warn!("clear locks timed out");
                action.outcome = ActionOutcome::Failed;
                action.detail = format!("no answer within {:?}", self.timeouts.clear_locks);
            }
        }
    }

    /// terminate-processes: fresh inventory, then strict three-tier order -
    /// workers, auxiliary runtime, main daemon. Children must release
    /// resources before the parent goes away.
    async fn terminate_processes(&self, action: &mut RemediationAction, result: &mut ExecutionResult) {
        let records = inventory::snapshot(self.source).await;
        if records.is_empty() {
            action.outcome = ActionOutcome::SkippedAlreadySatisfied;
            action.detail = "no daemon processes left to terminate".to_string();
            return;
        }

        let found = records.len();
        let mut terminated = 0usize;

        for role in ProcessRole::TERMINATION_ORDER {
            let tier = inventory::by_role(&records, role);
            if tier.is_empty() {
                continue;
            }

            info!("terminating {} {} process(es)", tier.len(), role.as_str());
            for record in &tier {
                self.control.terminate(record.pid);
            }

            // Grace period for voluntary exit, then unconditional kill for
            // whatever survived.
            tokio::time::sleep(self.timeouts.terminate_grace).await;

            for record in &tier {
                if self.control.alive(record.pid) {
                    self.control.kill(record.pid);
                }
                if !self.control.alive(record.pid) {
                    terminated += 1;
                } else {
                    warn!("pid {} ({}) survived SIGKILL", record.pid, record.role.as_str());
                }
            }
        }

        action.detail = format!("terminated {}/{} process(es)", terminated, found);
        if terminated == found {
            action.outcome = ActionOutcome::Applied;
            result.fixes.push(action.detail.clone());
        } else {
            // Partial termination is non-fatal: a restart may still succeed.
            action.outcome = ActionOutcome::Failed;
        }
    }

    /// restart-daemon: skip if the control interface already answers, else
    /// launch the start command. A launch failure is fatal.
    async fn restart_daemon(&self, action: &mut RemediationAction, result: &mut ExecutionResult) {
        let status = probes::status_probe(self.api, self.timeouts.status_probe).await;
        if status.outcome.is_ok() {
            action.outcome = ActionOutcome::SkippedAlreadySatisfied;
            action.detail = "daemon already responding".to_string();
            return;
        }

        match timeout(self.timeouts.restart_launch, self.api.start_daemon()).await {
            Ok(Ok(())) => {
                action.outcome = ActionOutcome::Applied;
                action.detail = "daemon start command launched".to_string();
                result.fixes.push("restarted daemon".to_string());
            }
            Ok(Err(e)) => {
                warn!("daemon start failed: {}", e);
                action.outcome = ActionOutcome::Failed;
                action.detail = e.to_string();
                result.fatal = true;
            }
            Err(_) => {
                warn!("daemon start command did not return");
                action.outcome = ActionOutcome::Failed;
                action.detail = format!("launch did not return within {:?}", self.timeouts.restart_launch);
                result.fatal = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeouts() -> Timeouts {
        Timeouts::default()
    }

    #[test]
    fn test_healthy_plan_is_empty() {
        assert!(plan(Verdict::Healthy, true, &timeouts()).is_empty());
    }

    #[test]
    fn test_no_fix_plans_are_empty_for_every_verdict() {
        for verdict in [
            Verdict::Healthy,
            Verdict::DegradedLocks,
            Verdict::DegradedSessions,
            Verdict::Hung,
            Verdict::NotRunning,
        ] {
            assert!(plan(verdict, false, &timeouts()).is_empty(), "{:?}", verdict);
        }
    }

    #[test]
    fn test_degraded_locks_plan_never_terminates() {
        let plan = plan(Verdict::DegradedLocks, true, &timeouts());
        assert_eq!(plan.kinds(), vec![ActionKind::ClearLocks, ActionKind::WaitForReady]);
    }

    #[test]
    fn test_degraded_sessions_plan_matches_locks_plan() {
        let plan = plan(Verdict::DegradedSessions, true, &timeouts());
        assert_eq!(plan.kinds(), vec![ActionKind::ClearLocks, ActionKind::WaitForReady]);
    }

    #[test]
    fn test_hung_plan_order() {
        let plan = plan(Verdict::Hung, true, &timeouts());
        assert_eq!(
            plan.kinds(),
            vec![
                ActionKind::TerminateProcesses,
                ActionKind::RestartDaemon,
                ActionKind::WaitForReady,
            ]
        );
    }

    #[test]
    fn test_not_running_plan_skips_termination() {
        let plan = plan(Verdict::NotRunning, true, &timeouts());
        assert_eq!(plan.kinds(), vec![ActionKind::RestartDaemon, ActionKind::WaitForReady]);
        assert!(!plan.kinds().contains(&ActionKind::TerminateProcesses));
    }

    #[test]
    fn test_wait_for_ready_follows_restart() {
        for verdict in [Verdict::Hung, Verdict::NotRunning] {
            let kinds = plan(verdict, true, &timeouts()).kinds();
            let restart = kinds.iter().position(|&k| k == ActionKind::RestartDaemon).unwrap();
            assert_eq!(kinds.get(restart + 1), Some(&ActionKind::WaitForReady));
        }
    }
}
