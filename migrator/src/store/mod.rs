//! Durable bookkeeping of migration runs: identifier mappings and per-stage cursors.

mod base;
pub mod file;
pub mod memory;
pub mod postgres;

pub use base::{CheckpointStore, MigrationCursor};
