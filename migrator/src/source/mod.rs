//! Read-only access to the legacy content store.

mod base;
pub mod memory;
pub mod wordpress;

pub use base::{ItemFilter, Source};
