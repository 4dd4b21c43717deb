//! Report emission.
//!
//! A run ALWAYS ends with a structured summary, fatal paths included; an
//! operator must never be left with a bare error and no context. Human
//! output goes to stdout, `--json` swaps in the machine-readable schema,
//! and a JSON copy is saved under the state directory best-effort.

use anyhow::Result;
use nso_common::RunSummary;
use std::path::PathBuf;
use tracing::debug;

const BANNER: &str = "======================================================================";

/// Render the human-readable summary to stdout.
pub fn print_human(summary: &RunSummary) {
    println!("{}", BANNER);
    println!("NSO Health Check Summary");
    println!("{}", BANNER);
    println!();
    println!("Verdict:     {}", summary.verdict.as_str());
    println!("Final state: {}", summary.final_state.as_str());
    println!();

    println!("Probes:");
    for probe in &summary.probes {
        println!(
            "  {:<18} {:<9} {:>6} ms  {}",
            probe.probe.as_str(),
            probe.outcome.as_str(),
            probe.elapsed_ms,
            probe.detail
        );
    }
    println!();

    if !summary.locks.is_empty() {
        let locked: Vec<&str> = summary
            .locks
            .iter()
            .filter(|l| l.locked)
            .map(|l| l.device.as_str())
            .collect();
        if locked.is_empty() {
            println!("Device locks: none ({} device(s) probed)", summary.locks.len());
        } else {
            println!("Device locks: {}", locked.join(", "));
        }
        println!();
    }

    if summary.issues.is_empty() {
        println!("No issues detected");
    } else {
        println!("Found {} issue(s):", summary.issues.len());
        for issue in &summary.issues {
            println!("   - {}", issue);
        }
    }

    if !summary.warnings.is_empty() {
        println!();
        println!("{} warning(s):", summary.warnings.len());
        for warning in &summary.warnings {
            println!("   - {}", warning);
        }
    }

    if !summary.actions.is_empty() {
        println!();
        println!("Remediation actions:");
        for action in &summary.actions {
            println!(
                "  {:<20} {:<28} {}",
                action.kind.as_str(),
                action.outcome.as_str(),
                action.detail
            );
        }
    }

    if !summary.fixes.is_empty() {
        println!();
        println!("Applied {} fix(es):", summary.fixes.len());
        for fix in &summary.fixes {
            println!("   - {}", fix);
        }
    }

    println!();
    println!("Total check time: {:.2} seconds", summary.elapsed_ms as f64 / 1000.0);
    println!("Exit code: {}", summary.exit_code);
}

/// Render the JSON summary to stdout.
pub fn print_json(summary: &RunSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

/// Save a JSON copy of the summary under the state directory. Failure here
/// never affects the run outcome.
pub fn save_report(summary: &RunSummary) -> Option<PathBuf> {
    let reports_dir = state_dir()?.join("reports");
    std::fs::create_dir_all(&reports_dir).ok()?;

    let timestamp = chrono::Utc::now().to_rfc3339().replace(':', "-");
    let report_path = reports_dir.join(format!("run-{}.json", timestamp));

    let content = serde_json::to_string_pretty(summary).ok()?;
    std::fs::write(&report_path, content).ok()?;
    debug!("report saved: {}", report_path.display());
    Some(report_path)
}

/// State directory with XDG fallback chain.
pub fn state_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("NSODOCTOR_STATE_DIR") {
        return Some(PathBuf::from(dir));
    }
    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        return Some(PathBuf::from(xdg_state).join("nsodoctor"));
    }
    if let Ok(home) = std::env::var("HOME") {
        return Some(PathBuf::from(home).join(".local/state/nsodoctor"));
    }
    None
}
