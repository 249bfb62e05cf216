//! Utilities for testing migrations against in-memory collaborators.
//!
//! - [`fixtures`] builds WordPress-shaped rows and hierarchies.
//! - [`test_sink_wrapper`] injects batch failures and row rejections into any sink.
//! - [`notifying_store`] observes checkpoints and can request a shutdown at one.
//! - [`notify`] wraps [`tokio::sync::Notify`] with a timeout.

#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod fixtures;
pub mod notify;
pub mod notifying_store;
pub mod test_sink_wrapper;
