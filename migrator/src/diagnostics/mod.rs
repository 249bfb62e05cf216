//! Append-only reporting of anomalies found while migrating.

mod base;
pub mod json_lines;
pub mod memory;

pub use base::{Diagnostic, DiagnosticsSink, LogDiagnostics, log_diagnostic};
