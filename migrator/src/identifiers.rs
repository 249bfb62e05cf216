//! Durable mapping of source identifiers to target identifiers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bail;
use crate::error::{ErrorKind, MigrationResult};
use crate::store::CheckpointStore;
use crate::types::{EntityType, SourceKey, TargetId};

/// One `source key → target id` entry of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentifierMapping {
    pub entity: EntityType,
    pub source_key: SourceKey,
    pub target_id: TargetId,
}

impl IdentifierMapping {
    pub fn new(entity: EntityType, source_key: SourceKey, target_id: TargetId) -> Self {
        Self {
            entity,
            source_key,
            target_id,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    map: HashMap<(EntityType, SourceKey), TargetId>,
    /// Entries recorded since the last successful [`IdentifierMapper::persist`].
    pending: Vec<IdentifierMapping>,
}

/// Append-only map from source keys to target ids, shared by every task of a run.
///
/// Entries are never removed or changed: recording a different target for a mapped key fails
/// with [`ErrorKind::IdentifierRemapConflict`].
#[derive(Debug, Clone)]
pub struct IdentifierMapper {
    inner: Arc<Mutex<Inner>>,
}

impl IdentifierMapper {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Builds a mapper from every mapping stored in `store`.
    pub async fn load<S: CheckpointStore>(store: &S) -> MigrationResult<Self> {
        let mappings = store.load_mappings().await?;

        let mapper = Self::new();
        {
            let mut inner = mapper.inner.lock().await;
            for mapping in mappings {
                insert(&mut inner.map, mapping)?;
            }
            info!(count = inner.map.len(), "identifier mappings restored");
        }

        Ok(mapper)
    }

    pub async fn lookup(&self, entity: EntityType, key: &SourceKey) -> Option<TargetId> {
        let inner = self.inner.lock().await;
        inner.map.get(&(entity, key.clone())).copied()
    }

    /// Looks up several keys under a single lock acquisition.
    pub async fn lookup_many<'a, I>(&self, keys: I) -> Vec<Option<TargetId>>
    where
        I: IntoIterator<Item = (EntityType, &'a SourceKey)>,
    {
        let inner = self.inner.lock().await;
        keys.into_iter()
            .map(|(entity, key)| inner.map.get(&(entity, key.clone())).copied())
            .collect()
    }

    /// Records `key → target` for `entity`.
    ///
    /// Returns `true` when the entry is new. Recording the same pair again is a no-op.
    pub async fn record(
        &self,
        entity: EntityType,
        key: SourceKey,
        target: TargetId,
    ) -> MigrationResult<bool> {
        let mut inner = self.inner.lock().await;
        let mapping = IdentifierMapping::new(entity, key, target);

        let is_new = insert(&mut inner.map, mapping.clone())?;
        if is_new {
            debug!(%entity, key = %mapping.source_key, %target, "identifier recorded");
            inner.pending.push(mapping);
        }

        Ok(is_new)
    }

    /// Writes the entries recorded since the last call to `store`.
    ///
    /// On failure the entries stay pending and are written by the next call.
    pub async fn persist<S: CheckpointStore>(&self, store: &S) -> MigrationResult<usize> {
        let pending = {
            let mut inner = self.inner.lock().await;
            std::mem::take(&mut inner.pending)
        };

        if pending.is_empty() {
            return Ok(0);
        }

        let count = pending.len();
        if let Err(err) = store.save_mappings(pending.clone()).await {
            let mut inner = self.inner.lock().await;
            let newer = std::mem::replace(&mut inner.pending, pending);
            inner.pending.extend(newer);

            return Err(err);
        }

        debug!(count, "identifier mappings persisted");

        Ok(count)
    }

    pub async fn len(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn pending_len(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.pending.len()
    }
}

impl Default for IdentifierMapper {
    fn default() -> Self {
        Self::new()
    }
}

fn insert(
    map: &mut HashMap<(EntityType, SourceKey), TargetId>,
    mapping: IdentifierMapping,
) -> MigrationResult<bool> {
    let IdentifierMapping {
        entity,
        source_key,
        target_id,
    } = mapping;

    match map.get(&(entity, source_key.clone())) {
        Some(existing) if *existing == target_id => Ok(false),
        Some(existing) => bail!(
            ErrorKind::IdentifierRemapConflict,
            "Source identifier is already mapped to a different target",
            format!("{entity} `{source_key}` is mapped to {existing}, refusing to remap it to {target_id}")
        ),
        None => {
            map.insert((entity, source_key), target_id);
            Ok(true)
        }
    }
}
