//! Post-remediation verification.
//!
//! Polls the status and API probes at a fixed cadence until the daemon
//! answers and the run's remaining budget is not gone. When the diagnosed
//! obstruction was a held lock, responsiveness alone proves nothing (those
//! probes were already OK); recovery then additionally requires a lock
//! re-probe showing zero locked devices. The cadence is deliberately fixed
//! rather than exponential: daemon startup time is roughly known and
//! bounded, so backoff growth only wastes budget.

use crate::config::Timeouts;
use crate::nso::ManagementApi;
use crate::probes;
use std::time::Instant;
use tracing::{info, warn};

/// Outcome of the verification loop. There is no partial credit: success
/// observed after the deadline is still `Unrecovered`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Recovered { elapsed_ms: u64 },
    Unrecovered { detail: String },
}

impl VerifyOutcome {
    pub fn is_recovered(&self) -> bool {
        matches!(self, Self::Recovered { .. })
    }
}

/// Poll until the daemon is verified healthy or `deadline` passes. With
/// `require_lock_free` the lock probe must additionally report no locked
/// device; an inconclusive lock probe never counts as recovery.
pub async fn verify(
    api: &dyn ManagementApi,
    deadline: Instant,
    timeouts: &Timeouts,
    require_lock_free: bool,
) -> VerifyOutcome {
    let start = Instant::now();
    let mut attempt = 0u32;
    let mut last_obstruction: Option<String> = None;

    loop {
        let now = Instant::now();
        if now >= deadline {
            return exhausted(attempt, last_obstruction);
        }

        attempt += 1;

        // Cap each probe at the remaining budget so a hung daemon cannot
        // push the run past its deadline.
        let remaining = deadline - now;
        let status_budget = timeouts.status_probe.min(remaining);
        let api_budget = timeouts.api_probe.min(remaining);
        let mut lock_budgets = timeouts.clone();
        lock_budgets.lock_probe = lock_budgets.lock_probe.min(remaining);
        lock_budgets.lock_per_device = lock_budgets.lock_per_device.min(remaining);

        let (status, api_result, obstruction) = tokio::join!(
            probes::status_probe(api, status_budget),
            probes::api_probe(api, api_budget),
            lock_obstruction(api, require_lock_free, &lock_budgets),
        );
        last_obstruction = obstruction;

        if status.outcome.is_ok() && api_result.outcome.is_ok() && last_obstruction.is_none() {
            // Everything answered, but only success observed inside the
            // budget counts as recovery.
            if Instant::now() > deadline {
                return VerifyOutcome::Unrecovered {
                    detail: "daemon recovered after the deadline".to_string(),
                };
            }
            let elapsed_ms = start.elapsed().as_millis() as u64;
            info!("daemon recovered after {} ms ({} attempt(s))", elapsed_ms, attempt);
            return VerifyOutcome::Recovered { elapsed_ms };
        }

        // Fixed cadence; give up early if the next poll cannot fit.
        if Instant::now() + timeouts.verify_interval >= deadline {
            return exhausted(attempt, last_obstruction);
        }
        tokio::time::sleep(timeouts.verify_interval).await;
    }
}

/// Re-probe the lock table when the obstruction being fixed was a lock.
/// `None` means clear; `Some(detail)` names what still blocks recovery.
async fn lock_obstruction(
    api: &dyn ManagementApi,
    required: bool,
    timeouts: &Timeouts,
) -> Option<String> {
    if !required {
        return None;
    }

    let (result, locks, _) = probes::lock_probe(api, timeouts).await;
    if !result.outcome.is_ok() {
        return Some(format!("lock probe inconclusive: {}", result.detail));
    }

    let held: Vec<&str> = locks.iter().filter(|l| l.locked).map(|l| l.device.as_str()).collect();
    if held.is_empty() {
        None
    } else {
        Some(format!("device locks still held: {}", held.join(", ")))
    }
}

fn exhausted(attempt: u32, last_obstruction: Option<String>) -> VerifyOutcome {
    warn!("verification budget exhausted after {} attempt(s)", attempt);
    let detail = match last_obstruction {
        Some(obstruction) => format!("budget exhausted after {} attempt(s); {}", attempt, obstruction),
        None => format!("budget exhausted after {} attempt(s)", attempt),
    };
    VerifyOutcome::Unrecovered { detail }
}
