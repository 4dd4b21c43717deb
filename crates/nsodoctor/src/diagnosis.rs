//! Verdict aggregation from probe results.
//!
//! Precedence, most severe condition first:
//! - NOT RUNNING beats HUNG: with an empty process inventory and a status
//!   probe that failed cleanly, there is nothing to be hung.
//! - HUNG beats DEGRADED-*: an unresponsive control interface means the
//!   daemon cannot safely serve any operation, locks included.
//! - A locked device beats stuck-session evidence.

use crate::probes::ProbeReport;
use nso_common::{ProbeId, ProbeOutcome, Verdict};
use tracing::info;

/// Combine probe outcomes into one overall verdict.
pub fn aggregate(report: &ProbeReport) -> Verdict {
    let status = report.outcome(ProbeId::Status);
    let api = report.outcome(ProbeId::Api);
    let no_processes = report.processes.is_empty();

    let verdict = if no_processes && status == ProbeOutcome::Degraded {
        // Failed cleanly with no processes: the daemon is simply down.
        Verdict::NotRunning
    } else if status == ProbeOutcome::Timeout || api == ProbeOutcome::Timeout {
        Verdict::Hung
    } else if status == ProbeOutcome::Degraded {
        // The daemon answers but reports itself broken while its processes
        // are still around; treated like a hang so remediation restarts it.
        Verdict::Hung
    } else if !report.locked_devices().is_empty() {
        Verdict::DegradedLocks
    } else if api == ProbeOutcome::Degraded
        && report.probe(ProbeId::Api).map(|r| r.has_lock_evidence()).unwrap_or(false)
    {
        // Lock-flavoured API failure with no device actually locked: a
        // stuck session is holding something.
        Verdict::DegradedSessions
    } else if api == ProbeOutcome::Degraded {
        Verdict::Hung
    } else {
        Verdict::Healthy
    };

    info!("diagnosis: {}", verdict.as_str());
    verdict
}

/// Issues for the summary ledger, one line per obstruction.
pub fn issues(report: &ProbeReport, verdict: Verdict) -> Vec<String> {
    let mut issues = Vec::new();

    match verdict {
        Verdict::Healthy => return issues,
        Verdict::NotRunning => issues.push("daemon not running (no processes found)".to_string()),
        Verdict::Hung => {
            for id in [ProbeId::Status, ProbeId::Api] {
                if let Some(result) = report.probe(id) {
                    if !result.outcome.is_ok() {
                        issues.push(format!(
                            "{} probe {}: {}",
                            id.as_str(),
                            result.outcome.as_str(),
                            result.detail
                        ));
                    }
                }
            }
        }
        Verdict::DegradedLocks => {
            for lock in report.locked_devices() {
                issues.push(format!("device {} is locked: {}", lock.device, lock.detail));
            }
        }
        Verdict::DegradedSessions => {
            if let Some(result) = report.probe(ProbeId::Api) {
                issues.push(format!("stuck session suspected: {}", result.detail));
            }
        }
    }

    issues
}
