//! Bulk writers into the relational target.

mod base;
pub mod memory;
pub mod postgres;

pub use base::Sink;
