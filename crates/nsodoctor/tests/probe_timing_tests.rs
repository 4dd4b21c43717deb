//! Probe concurrency and deadline properties.
//!
//! The probe stage must cost at most the largest individual probe budget
//! plus scheduling overhead, never the sum of all budgets - a hung daemon
//! stalls every probe at once, and serial timeout stacking would blow the
//! overall deadline before remediation even starts.

use async_trait::async_trait;
use nso_common::{ProbeId, ProbeOutcome};
use nsodoctor::config::Timeouts;
use nsodoctor::inventory::ProcessSource;
use nsodoctor::nso::{ManagementApi, NsoError, StatusReply};
use nsodoctor::probes;
use std::time::{Duration, Instant};

/// Daemon where every operation blocks indefinitely.
struct HungDaemon;

async fn hang<T>() -> T {
    tokio::time::sleep(Duration::from_secs(600)).await;
    unreachable!("probe budget must expire first")
}

#[async_trait]
impl ManagementApi for HungDaemon {
    async fn daemon_status(&self) -> Result<StatusReply, NsoError> {
        hang().await
    }

    async fn read_top_level(&self) -> Result<(), NsoError> {
        hang().await
    }

    async fn list_devices(&self) -> Result<Vec<String>, NsoError> {
        hang().await
    }

    async fn try_device_write(&self, _device: &str) -> Result<(), NsoError> {
        hang().await
    }

    async fn clear_locks(&self) -> Result<(), NsoError> {
        hang().await
    }

    async fn start_daemon(&self) -> Result<(), NsoError> {
        hang().await
    }
}

/// Process table scan that never returns.
struct HungSource;

#[async_trait]
impl ProcessSource for HungSource {
    async fn process_table(&self) -> Vec<(u32, String)> {
        hang().await
    }
}

#[tokio::test]
async fn probe_stage_cost_is_max_of_budgets_not_sum() {
    let timeouts = Timeouts {
        status_probe: Duration::from_millis(300),
        api_probe: Duration::from_millis(300),
        lock_probe: Duration::from_millis(300),
        lock_per_device: Duration::from_millis(100),
        inventory_probe: Duration::from_millis(300),
        ..Timeouts::default()
    };

    let start = Instant::now();
    let report = probes::run_probes(&HungDaemon, &HungSource, &timeouts).await;
    let elapsed = start.elapsed();

    // Sum of budgets would be 1200 ms; the bound is one budget plus slack.
    assert!(
        elapsed < Duration::from_millis(900),
        "probe stage took {:?}, probes are stacking serially",
        elapsed
    );

    // Every probe was recorded as TIMEOUT, none aborted the stage.
    for id in [
        ProbeId::Status,
        ProbeId::Api,
        ProbeId::DeviceLocks,
        ProbeId::ProcessInventory,
    ] {
        assert_eq!(report.outcome(id), ProbeOutcome::Timeout, "{:?}", id);
    }
}

#[tokio::test]
async fn hung_probe_yields_timeout_outcome_not_panic() {
    let timeouts = Timeouts {
        status_probe: Duration::from_millis(100),
        ..Timeouts::default()
    };

    let result = probes::status_probe(&HungDaemon, timeouts.status_probe).await;
    assert_eq!(result.outcome, ProbeOutcome::Timeout);
    assert!(result.elapsed_ms >= 100);
    assert!(result.detail.contains("no answer"));
}
