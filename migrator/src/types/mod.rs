//! Core data types shared by every migration component.

mod ids;
mod mutation;
mod row;

pub use ids::{EntityType, SourceId, SourceKey, TargetId};
pub use mutation::{
    Cell, MigrationBatch, PendingMutation, Reference, RowOutcome, TargetRowMutation, WriteMode,
};
pub use row::{Provenance, RawRow, TrackVariant};
