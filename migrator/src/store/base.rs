use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;

use crate::error::MigrationResult;
use crate::identifiers::IdentifierMapping;
use crate::types::SourceId;

/// Progress of one stage of a migration plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationCursor {
    pub stage: String,
    /// Last item whose page was fully flushed.
    pub last_item_id: Option<SourceId>,
    pub completed: bool,
    /// Items with rows whose references could not be resolved yet.
    #[serde(default)]
    pub deferred_items: Vec<SourceId>,
}

impl MigrationCursor {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            last_item_id: None,
            completed: false,
            deferred_items: Vec::new(),
        }
    }
}

/// Trait for storing the durable state of a migration run.
///
/// Identifier mappings are append-only: saving a mapping that is already stored must be a no-op.
/// Cursors are replaced per stage.
///
/// Implementations must be safe to share between the tasks of a run.
pub trait CheckpointStore {
    /// Loads every identifier mapping recorded so far.
    fn load_mappings(&self) -> impl Future<Output = MigrationResult<Vec<IdentifierMapping>>> + Send;

    /// Appends `mappings` to the store.
    fn save_mappings(
        &self,
        mappings: Vec<IdentifierMapping>,
    ) -> impl Future<Output = MigrationResult<()>> + Send;

    /// Loads the cursors of every stage, keyed by stage name.
    fn load_cursors(
        &self,
    ) -> impl Future<Output = MigrationResult<BTreeMap<String, MigrationCursor>>> + Send;

    /// Stores `cursor`, replacing the previous cursor of its stage.
    fn save_cursor(&self, cursor: MigrationCursor)
    -> impl Future<Output = MigrationResult<()>> + Send;

    /// Removes all cursors once a run has completed.
    ///
    /// Identifier mappings are kept, so the next run updates rows in place.
    fn clear_cursors(&self) -> impl Future<Output = MigrationResult<()>> + Send;
}
