//! JSONL run log.
//!
//! One `LogEntry` per invocation, appended to an XDG-state-dir file with an
//! explicit env override and a stderr fallback. Gives operators a durable
//! history of verdicts and fixes across runs without grepping tool output.

use nso_common::{FinalState, Verdict};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;

/// Log entry for one nsodoctor run.
#[derive(Debug, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 timestamp
    pub ts: String,

    /// Run ID (UUID)
    pub run_id: String,

    pub verdict: Verdict,

    pub final_state: FinalState,

    pub exit_code: i32,

    /// Whether auto-fix was enabled for this run
    pub auto_fix: bool,

    /// Fixes applied during this run
    #[serde(default)]
    pub fixes: Vec<String>,

    /// Duration in milliseconds
    pub duration_ms: u64,

    /// Error detail on fatal paths
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogEntry {
    /// Discover log file path with fallback chain.
    ///
    /// Priority:
    /// 1. $NSODOCTOR_LOG_FILE environment variable (explicit override)
    /// 2. $XDG_STATE_HOME/nsodoctor/runs.jsonl (XDG standard)
    /// 3. ~/.local/state/nsodoctor/runs.jsonl (XDG fallback)
    fn discover_log_path() -> Option<String> {
        if let Ok(path) = std::env::var("NSODOCTOR_LOG_FILE") {
            return Some(path);
        }

        if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
            return Some(format!("{}/nsodoctor/runs.jsonl", xdg_state));
        }

        if let Ok(home) = std::env::var("HOME") {
            return Some(format!("{}/.local/state/nsodoctor/runs.jsonl", home));
        }

        None
    }

    /// Write the entry, falling back to stderr so the human report on
    /// stdout stays clean.
    pub fn write(&self) -> Result<(), std::io::Error> {
        let json = serde_json::to_string(self)?;

        if let Some(path) = Self::discover_log_path() {
            match Self::write_to_file(&json, &path) {
                Ok(()) => return Ok(()),
                Err(_) => {
                    eprintln!("{}", json);
                    return Ok(());
                }
            }
        }

        eprintln!("{}", json);
        Ok(())
    }

    fn write_to_file(json: &str, path: &str) -> Result<(), std::io::Error> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }

    pub fn generate_run_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> LogEntry {
        LogEntry {
            ts: LogEntry::now(),
            run_id: LogEntry::generate_run_id(),
            verdict: Verdict::Hung,
            final_state: FinalState::Recovered,
            exit_code: 1,
            auto_fix: true,
            fixes: vec!["restarted daemon".to_string()],
            duration_ms: 4200,
            error: None,
        }
    }

    #[test]
    fn test_log_entry_appends_jsonl() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("runs.jsonl");
        std::env::set_var("NSODOCTOR_LOG_FILE", &path);

        entry().write().unwrap();
        entry().write().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        let parsed: LogEntry = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.exit_code, 1);

        std::env::remove_var("NSODOCTOR_LOG_FILE");
    }

    #[test]
    fn test_error_field_omitted_when_none() {
        let json = serde_json::to_string(&entry()).unwrap();
        assert!(!json.contains("\"error\""));
    }
}
