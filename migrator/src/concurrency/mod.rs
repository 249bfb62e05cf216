//! Coordination primitives for migration runs.
//!
//! [`shutdown`] carries the request to stop at the next page boundary. [`retry`] wraps calls to
//! the source and the sink with a timeout and a bounded number of retries.

pub mod retry;
pub mod shutdown;
