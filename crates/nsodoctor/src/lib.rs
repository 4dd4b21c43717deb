//! nsodoctor library - exposes modules for testing.

pub mod config;
pub mod diagnosis;
pub mod inventory;
pub mod nso;
pub mod probes;
pub mod remediation;
pub mod report;
pub mod runlog;
pub mod runner;
pub mod verify;
