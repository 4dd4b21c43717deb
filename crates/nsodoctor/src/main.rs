//! nsodoctor - health check and auto-remediation for the NSO daemon.
//!
//! Probes the daemon (status command, management API, device locks, process
//! inventory), diagnoses hangs, locks, stuck sessions, and dead daemons,
//! and - unless --no-fix is given - repairs them in order: clear locks,
//! terminate the process tree children-first, restart, verify.
//!
//! Exit codes: 0 healthy, 1 problems fixed, 2 problems not fixed.

use anyhow::Result;
use clap::Parser;
use nsodoctor::config::Config;
use nsodoctor::inventory::{HostProcesses, HostSignals};
use nsodoctor::nso::NsoCli;
use nsodoctor::report;
use nsodoctor::runlog::LogEntry;
use nsodoctor::runner::HealthCheckRun;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nsodoctor")]
#[command(about = "NSO health check and auto-fix tool", long_about = None)]
#[command(version)]
struct Cli {
    /// Only check, do not attempt auto-fix
    #[arg(long)]
    no_fix: bool,

    /// Emit the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Overall wall-clock budget in seconds
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// NSO installation directory (overrides NCS_DIR)
    #[arg(long)]
    nso_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match Config::from_env(cli.nso_dir, cli.deadline_secs, !cli.no_fix, cli.json) {
        Ok(config) => config,
        Err(e) => {
            // Even a configuration failure gets a structured line, not a
            // bare backtrace.
            eprintln!("nsodoctor: {}", e);
            std::process::exit(2);
        }
    };

    info!(
        "nsodoctor v{} starting (auto_fix={}, deadline={}s)",
        env!("CARGO_PKG_VERSION"),
        config.auto_fix,
        config.timeouts.overall.as_secs()
    );

    let api = NsoCli::new(config.clone());
    let source = HostProcesses;
    let control = HostSignals;

    let mut run = HealthCheckRun::new(config.clone());
    let summary = run.run(&api, &source, &control).await;

    if config.json {
        report::print_json(&summary)?;
    } else {
        report::print_human(&summary);
    }
    let _ = report::save_report(&summary);

    let log_entry = LogEntry {
        ts: LogEntry::now(),
        run_id: LogEntry::generate_run_id(),
        verdict: summary.verdict,
        final_state: summary.final_state,
        exit_code: summary.exit_code,
        auto_fix: summary.auto_fix,
        fixes: summary.fixes.clone(),
        duration_ms: summary.elapsed_ms,
        error: summary.issues.first().cloned().filter(|_| summary.exit_code != 0),
    };
    let _ = log_entry.write();

    std::process::exit(summary.exit_code);
}
