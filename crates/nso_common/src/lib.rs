//! NSO Common - Shared types and report schema for nsodoctor
//!
//! Pure data: probe outcomes, device lock status, process records,
//! verdicts, remediation actions, and the run summary schema.
//! No I/O lives here.

pub mod types;

pub use types::*;
