//! Top-level health-check run state machine.
//!
//! INIT -> PROBING -> DIAGNOSED -> (if fixing) REMEDIATING -> VERIFYING ->
//! terminal. A healthy diagnosis is itself terminal. The run owns one hard
//! wall-clock deadline; every stage works against what is left of it.

use crate::config::Config;
use crate::diagnosis;
use crate::inventory::{ProcessControl, ProcessSource};
use crate::nso::ManagementApi;
use crate::probes;
use crate::remediation::{self, Executor};
use crate::verify::{self, VerifyOutcome};
use nso_common::{FinalState, RemediationPlan, RunSummary, Verdict};
use std::time::Instant;
use tracing::{info, warn};

/// Run states, in the order a run moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Probing,
    Diagnosed(Verdict),
    Remediating,
    Verifying,
    Done(FinalState),
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Probing => "PROBING",
            Self::Diagnosed(_) => "DIAGNOSED",
            Self::Remediating => "REMEDIATING",
            Self::Verifying => "VERIFYING",
            Self::Done(_) => "DONE",
        }
    }
}

/// One health-check invocation. Owns the deadline, the probe results, and
/// the applied-action ledger; destroyed when the process exits.
pub struct HealthCheckRun {
    config: Config,
    started: Instant,
    deadline: Instant,
    state: RunState,
}

impl HealthCheckRun {
    pub fn new(config: Config) -> Self {
        let started = Instant::now();
        let deadline = started + config.timeouts.overall;
        Self {
            config,
            started,
            deadline,
            state: RunState::Init,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) {
        info!("run: {} -> {}", self.state.as_str(), next.as_str());
        self.state = next;
    }

    /// Execute the full probe / diagnose / remediate / verify sequence and
    /// produce the run summary. Never panics on daemon misbehaviour; every
    /// failure ends in a terminal state with an exit code.
    pub async fn run(
        &mut self,
        api: &dyn ManagementApi,
        source: &dyn ProcessSource,
        control: &dyn ProcessControl,
    ) -> RunSummary {
        let started_at = chrono::Utc::now().to_rfc3339();

        self.transition(RunState::Probing);
        let report = probes::run_probes(api, source, &self.config.timeouts).await;

        let verdict = diagnosis::aggregate(&report);
        self.transition(RunState::Diagnosed(verdict));
        let mut issues = diagnosis::issues(&report, verdict);

        let mut plan = RemediationPlan::empty();
        let mut fixes = Vec::new();

        let final_state = if verdict.is_healthy() {
            FinalState::Healthy
        } else if !self.config.auto_fix {
            info!("auto-fix disabled, reporting only");
            FinalState::FixDisabled
        } else {
            self.transition(RunState::Remediating);
            plan = remediation::plan(verdict, true, &self.config.timeouts);
            let executor = Executor {
                api,
                source,
                control,
                timeouts: &self.config.timeouts,
            };
            let execution = executor.execute(&mut plan).await;
            fixes = execution.fixes;

            if execution.fatal {
                issues.push("daemon restart failed; manual intervention required".to_string());
                FinalState::Unrecovered
            } else {
                self.transition(RunState::Verifying);
                // For lock-flavoured verdicts, responsive probes alone prove
                // nothing; verification must also see the lock table clean.
                let require_lock_free = verdict.involves_locks();
                match verify::verify(api, self.deadline, &self.config.timeouts, require_lock_free).await {
                    VerifyOutcome::Recovered { elapsed_ms } => {
                        fixes.push(format!("daemon verified responsive after {} ms", elapsed_ms));
                        FinalState::Recovered
                    }
                    VerifyOutcome::Unrecovered { detail } => {
                        warn!("daemon did not recover: {}", detail);
                        issues.push(format!("verification failed: {}", detail));
                        FinalState::Unrecovered
                    }
                }
            }
        };

        self.transition(RunState::Done(final_state));

        RunSummary {
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at,
            deadline_secs: self.config.timeouts.overall.as_secs(),
            auto_fix: self.config.auto_fix,
            verdict,
            final_state,
            exit_code: final_state.exit_code(),
            probes: report.results,
            locks: report.locks,
            processes: report.processes,
            actions: plan.actions,
            issues,
            warnings: report.warnings,
            fixes,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}
