//! Diagnostic probes against the NSO daemon.
//!
//! Four independent probes, each with its own budget and a three-valued
//! outcome. They run concurrently so a hung daemon costs one probe timeout,
//! not the sum of all of them. A probe that hangs is recorded as TIMEOUT;
//! nothing a probe does can abort the run.

use crate::config::Timeouts;
use crate::inventory::{self, ProcessSource};
use crate::nso::ManagementApi;
use nso_common::{DeviceLockStatus, ProbeId, ProbeOutcome, ProbeResult, ProcessRecord};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Everything the probe stage produced for one run.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub results: Vec<ProbeResult>,
    pub locks: Vec<DeviceLockStatus>,
    pub processes: Vec<ProcessRecord>,
    /// Non-fatal observations (e.g. a slow but working API)
    pub warnings: Vec<String>,
}

impl ProbeReport {
    pub fn probe(&self, id: ProbeId) -> Option<&ProbeResult> {
        self.results.iter().find(|r| r.probe == id)
    }

    pub fn outcome(&self, id: ProbeId) -> ProbeOutcome {
        self.probe(id).map(|r| r.outcome).unwrap_or(ProbeOutcome::Degraded)
    }

    pub fn locked_devices(&self) -> Vec<&DeviceLockStatus> {
        self.locks.iter().filter(|l| l.locked).collect()
    }
}

/// Run all probes concurrently. Wall time is bounded by the largest
/// individual probe budget plus scheduling overhead, never the sum.
pub async fn run_probes(
    api: &dyn ManagementApi,
    source: &dyn ProcessSource,
    timeouts: &Timeouts,
) -> ProbeReport {
    let (status, api_result, (lock_result, locks, lock_warnings), (inv_result, processes)) = tokio::join!(
        status_probe(api, timeouts.status_probe),
        api_probe(api, timeouts.api_probe),
        lock_probe(api, timeouts),
        inventory_probe(source, timeouts.inventory_probe),
    );

    let mut warnings = Vec::new();
    if api_result.outcome.is_ok() && api_result.elapsed_ms > slow_api_threshold_ms(timeouts) {
        warnings.push(format!(
            "API responsive but slow ({} ms)",
            api_result.elapsed_ms
        ));
    }
    warnings.extend(lock_warnings);

    ProbeReport {
        results: vec![status, api_result, lock_result, inv_result],
        locks,
        processes,
        warnings,
    }
}

/// Above half the probe budget the API is "working but slow": a warning in
/// the summary, not an issue.
fn slow_api_threshold_ms(timeouts: &Timeouts) -> u64 {
    (timeouts.api_probe.as_millis() / 2) as u64
}

/// Control-interface probe: the daemon's own status command.
pub async fn status_probe(api: &dyn ManagementApi, budget: Duration) -> ProbeResult {
    let start = Instant::now();
    match timeout(budget, api.daemon_status()).await {
        Ok(Ok(reply)) if reply.is_up() => result(ProbeId::Status, ProbeOutcome::Ok, start, reply.detail, None),
        Ok(Ok(reply)) => {
            warn!("status probe: daemon answered but not started: {}", reply.detail);
            result(ProbeId::Status, ProbeOutcome::Degraded, start, reply.detail, None)
        }
        Ok(Err(e)) => {
            warn!("status probe failed: {}", e);
            result(ProbeId::Status, ProbeOutcome::Degraded, start, e.to_string(), None)
        }
        Err(_) => {
            warn!("status probe timed out after {:?}", budget);
            result(
                ProbeId::Status,
                ProbeOutcome::Timeout,
                start,
                format!("no answer within {:?}", budget),
                None,
            )
        }
    }
}

/// API connectivity probe: session + read transaction + one read + close.
pub async fn api_probe(api: &dyn ManagementApi, budget: Duration) -> ProbeResult {
    let start = Instant::now();
    match timeout(budget, api.read_top_level()).await {
        Ok(Ok(())) => result(ProbeId::Api, ProbeOutcome::Ok, start, "read transaction ok", None),
        Ok(Err(e)) => {
            warn!("api probe failed: {}", e);
            let payload = serde_json::json!({ "lock_conflict": e.is_lock_conflict() });
            result(ProbeId::Api, ProbeOutcome::Degraded, start, e.to_string(), Some(payload))
        }
        Err(_) => {
            warn!("api probe timed out after {:?}", budget);
            result(
                ProbeId::Api,
                ProbeOutcome::Timeout,
                start,
                format!("no answer within {:?}", budget),
                None,
            )
        }
    }
}

/// Device lock probe: one aborted write transaction per device, strictly
/// serialized so two attempts never race for the same lock state.
pub async fn lock_probe(
    api: &dyn ManagementApi,
    timeouts: &Timeouts,
) -> (ProbeResult, Vec<DeviceLockStatus>, Vec<String>) {
    let start = Instant::now();
    match timeout(timeouts.lock_probe, lock_probe_inner(api, timeouts.lock_per_device)).await {
        Ok(Ok((locks, warnings))) => {
            let locked: Vec<&str> = locks.iter().filter(|l| l.locked).map(|l| l.device.as_str()).collect();
            let detail = if locked.is_empty() {
                format!("{} device(s), no locks", locks.len())
            } else {
                format!("{} device(s), locked: {}", locks.len(), locked.join(", "))
            };
            let payload = serde_json::json!({ "locked": locked });
            (
                result(ProbeId::DeviceLocks, ProbeOutcome::Ok, start, detail, Some(payload)),
                locks,
                warnings,
            )
        }
        Ok(Err(e)) => {
            warn!("lock probe could not list devices: {}", e);
            (
                result(ProbeId::DeviceLocks, ProbeOutcome::Degraded, start, e.to_string(), None),
                Vec::new(),
                Vec::new(),
            )
        }
        Err(_) => {
            warn!("lock probe timed out after {:?}", timeouts.lock_probe);
            (
                result(
                    ProbeId::DeviceLocks,
                    ProbeOutcome::Timeout,
                    start,
                    format!("no answer within {:?}", timeouts.lock_probe),
                    None,
                ),
                Vec::new(),
                Vec::new(),
            )
        }
    }
}

async fn lock_probe_inner(
    api: &dyn ManagementApi,
    per_device: Duration,
) -> Result<(Vec<DeviceLockStatus>, Vec<String>), crate::nso::NsoError> {
    let devices = api.list_devices().await?;
    let mut locks = Vec::with_capacity(devices.len());
    let mut warnings = Vec::new();

    for device in devices {
        match timeout(per_device, api.try_device_write(&device)).await {
            Ok(Ok(())) => {
                debug!("lock probe: {}: ok", device);
                locks.push(DeviceLockStatus::probed(device, false, "write transaction ok"));
            }
            Ok(Err(e)) if e.is_lock_conflict() => {
                debug!("lock probe: {}: LOCKED", device);
                locks.push(DeviceLockStatus::probed(device, true, e.to_string()));
            }
            Ok(Err(e)) => {
                // Failed for some other reason; not evidence of a lock.
                warnings.push(format!("lock probe on {}: {}", device, e));
                locks.push(DeviceLockStatus::probed(device, false, e.to_string()));
            }
            Err(_) => {
                // A write attempt that cannot even start within its budget
                // is treated as a held lock.
                debug!("lock probe: {}: LOCKED (timeout)", device);
                locks.push(DeviceLockStatus::probed(
                    device,
                    true,
                    format!("write attempt timed out after {:?}", per_device),
                ));
            }
        }
    }

    Ok((locks, warnings))
}

/// Process inventory probe: daemon-process snapshot with role tags.
pub async fn inventory_probe(
    source: &dyn ProcessSource,
    budget: Duration,
) -> (ProbeResult, Vec<ProcessRecord>) {
    let start = Instant::now();
    match timeout(budget, inventory::snapshot(source)).await {
        Ok(records) if records.is_empty() => (
            result(
                ProbeId::ProcessInventory,
                ProbeOutcome::Degraded,
                start,
                "no daemon processes found",
                None,
            ),
            records,
        ),
        Ok(records) => {
            let detail = format!("{} daemon process(es)", records.len());
            (
                result(ProbeId::ProcessInventory, ProbeOutcome::Ok, start, detail, None),
                records,
            )
        }
        Err(_) => (
            result(
                ProbeId::ProcessInventory,
                ProbeOutcome::Timeout,
                start,
                format!("process scan did not finish within {:?}", budget),
                None,
            ),
            Vec::new(),
        ),
    }
}

fn result(
    probe: ProbeId,
    outcome: ProbeOutcome,
    start: Instant,
    detail: impl Into<String>,
    payload: Option<serde_json::Value>,
) -> ProbeResult {
    ProbeResult {
        probe,
        outcome,
        elapsed_ms: start.elapsed().as_millis() as u64,
        detail: detail.into(),
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nso::{NsoError, StatusReply};
    use async_trait::async_trait;

    struct StubApi {
        status_started: bool,
        devices: Vec<String>,
        locked: Vec<String>,
    }

    #[async_trait]
    impl ManagementApi for StubApi {
        async fn daemon_status(&self) -> Result<StatusReply, NsoError> {
            Ok(StatusReply {
                success: true,
                started: self.status_started,
                detail: "status".to_string(),
            })
        }

        async fn read_top_level(&self) -> Result<(), NsoError> {
            Ok(())
        }

        async fn list_devices(&self) -> Result<Vec<String>, NsoError> {
            Ok(self.devices.clone())
        }

        async fn try_device_write(&self, device: &str) -> Result<(), NsoError> {
            if self.locked.iter().any(|d| d == device) {
                Err(NsoError::LockConflict(format!("{} is locked", device)))
            } else {
                Ok(())
            }
        }

        async fn clear_locks(&self) -> Result<(), NsoError> {
            Ok(())
        }

        async fn start_daemon(&self) -> Result<(), NsoError> {
            Ok(())
        }
    }

    struct StubSource(Vec<(u32, String)>);

    #[async_trait]
    impl ProcessSource for StubSource {
        async fn process_table(&self) -> Vec<(u32, String)> {
            self.0.clone()
        }
    }

    fn fast_timeouts() -> Timeouts {
        Timeouts {
            status_probe: Duration::from_millis(200),
            api_probe: Duration::from_millis(200),
            lock_probe: Duration::from_millis(400),
            lock_per_device: Duration::from_millis(100),
            inventory_probe: Duration::from_millis(200),
            ..Timeouts::default()
        }
    }

    #[tokio::test]
    async fn test_all_ok_report() {
        let api = StubApi {
            status_started: true,
            devices: vec!["r1".to_string(), "r2".to_string()],
            locked: vec![],
        };
        let source = StubSource(vec![(100, "ncs.smp".to_string())]);

        let report = run_probes(&api, &source, &fast_timeouts()).await;
        assert!(report.outcome(ProbeId::Status).is_ok());
        assert!(report.outcome(ProbeId::Api).is_ok());
        assert!(report.outcome(ProbeId::DeviceLocks).is_ok());
        assert!(report.outcome(ProbeId::ProcessInventory).is_ok());
        assert!(report.locked_devices().is_empty());
        assert_eq!(report.processes.len(), 1);
        assert!(report.warnings.is_empty());
    }

    /// Answers everything immediately except the API read, which takes
    /// `delay` before succeeding.
    struct SlowApi {
        delay: Duration,
    }

    #[async_trait]
    impl ManagementApi for SlowApi {
        async fn daemon_status(&self) -> Result<StatusReply, NsoError> {
            Ok(StatusReply {
                success: true,
                started: true,
                detail: "status: started".to_string(),
            })
        }

        async fn read_top_level(&self) -> Result<(), NsoError> {
            tokio::time::sleep(self.delay).await;
            Ok(())
        }

        async fn list_devices(&self) -> Result<Vec<String>, NsoError> {
            Ok(vec![])
        }

        async fn try_device_write(&self, _device: &str) -> Result<(), NsoError> {
            Ok(())
        }

        async fn clear_locks(&self) -> Result<(), NsoError> {
            Ok(())
        }

        async fn start_daemon(&self) -> Result<(), NsoError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_slow_api_is_a_warning_not_an_issue() {
        // 150 ms against a 200 ms budget: past the half-budget threshold,
        // still inside the budget.
        let api = SlowApi { delay: Duration::from_millis(150) };
        let source = StubSource(vec![(100, "ncs.smp".to_string())]);

        let report = run_probes(&api, &source, &fast_timeouts()).await;
        assert!(report.outcome(ProbeId::Api).is_ok());
        assert!(
            report.warnings.iter().any(|w| w.contains("slow")),
            "warnings: {:?}",
            report.warnings
        );
    }

    #[tokio::test]
    async fn test_locked_device_detected() {
        let api = StubApi {
            status_started: true,
            devices: vec!["r1".to_string(), "r2".to_string()],
            locked: vec!["r1".to_string()],
        };
        let source = StubSource(vec![(100, "ncs.smp".to_string())]);

        let report = run_probes(&api, &source, &fast_timeouts()).await;
        let locked = report.locked_devices();
        assert_eq!(locked.len(), 1);
        assert_eq!(locked[0].device, "r1");
        assert_eq!(locked[0].method, "aborted-write-transaction");
        // The lock probe itself succeeded even though a device is locked.
        assert!(report.outcome(ProbeId::DeviceLocks).is_ok());
    }

    #[tokio::test]
    async fn test_empty_inventory_is_degraded() {
        let api = StubApi { status_started: true, devices: vec![], locked: vec![] };
        let source = StubSource(vec![(1, "/sbin/init".to_string())]);

        let report = run_probes(&api, &source, &fast_timeouts()).await;
        assert_eq!(report.outcome(ProbeId::ProcessInventory), ProbeOutcome::Degraded);
        assert!(report.processes.is_empty());
    }
}
