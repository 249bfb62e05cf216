//! Logging setup shared by the migration runner and the test suites.

pub mod tracing;

pub use crate::tracing::{
    LogFlusher, TracingError, init_test_tracing, init_tracing, init_tracing_with_run_id,
};
