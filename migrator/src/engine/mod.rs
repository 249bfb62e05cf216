//! The batch upsert engine.
//!
//! [`MigrationEngine`] runs a [`MigrationPlan`]: hierarchy stages level by level, item stages
//! page by page, resolving references through the identifier map and writing idempotent
//! batches to the sink.

mod item;
mod pipeline;
mod plan;
mod rows;
mod summary;

pub use item::{ProcessedItem, process_item};
pub use pipeline::MigrationEngine;
pub use plan::{MigrationPlan, Stage};
pub use summary::MigrationSummary;
