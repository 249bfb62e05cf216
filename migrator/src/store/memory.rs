use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::MigrationResult;
use crate::identifiers::IdentifierMapping;
use crate::store::{CheckpointStore, MigrationCursor};
use crate::types::{EntityType, SourceKey};

#[derive(Debug, Default)]
struct Inner {
    mappings: Vec<IdentifierMapping>,
    index: HashMap<(EntityType, SourceKey), usize>,
    cursors: BTreeMap<String, MigrationCursor>,
}

/// In-memory checkpoint store for tests and dry runs.
///
/// Nothing survives the process, so an interrupted run restarts from scratch.
#[derive(Debug, Clone)]
pub struct MemoryCheckpointStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Returns the stored cursor of `stage`.
    pub async fn cursor(&self, stage: &str) -> Option<MigrationCursor> {
        let inner = self.inner.lock().await;
        inner.cursors.get(stage).cloned()
    }

    /// Returns the number of stored identifier mappings.
    pub async fn mapping_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.mappings.len()
    }
}

impl Default for MemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn load_mappings(&self) -> MigrationResult<Vec<IdentifierMapping>> {
        let inner = self.inner.lock().await;

        Ok(inner.mappings.clone())
    }

    async fn save_mappings(&self, mappings: Vec<IdentifierMapping>) -> MigrationResult<()> {
        let mut inner = self.inner.lock().await;

        for mapping in mappings {
            let key = (mapping.entity, mapping.source_key.clone());
            if inner.index.contains_key(&key) {
                continue;
            }

            let position = inner.mappings.len();
            inner.index.insert(key, position);
            inner.mappings.push(mapping);
        }

        Ok(())
    }

    async fn load_cursors(&self) -> MigrationResult<BTreeMap<String, MigrationCursor>> {
        let inner = self.inner.lock().await;

        Ok(inner.cursors.clone())
    }

    async fn save_cursor(&self, cursor: MigrationCursor) -> MigrationResult<()> {
        let mut inner = self.inner.lock().await;
        inner.cursors.insert(cursor.stage.clone(), cursor);

        Ok(())
    }

    async fn clear_cursors(&self) -> MigrationResult<()> {
        let mut inner = self.inner.lock().await;
        inner.cursors.clear();

        Ok(())
    }
}
