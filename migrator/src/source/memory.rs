use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, MigrationResult};
use crate::hierarchy::HierarchyNode;
use crate::source::{ItemFilter, Source};
use crate::types::{RawRow, SourceId};

#[derive(Debug, Default)]
struct Inner {
    items: BTreeMap<SourceId, (String, Vec<RawRow>)>,
    hierarchies: HashMap<String, Vec<HierarchyNode>>,
}

/// In-memory source for tests and fixtures.
#[derive(Debug, Clone)]
pub struct MemorySource {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Adds or replaces item `item_id` of `item_type`.
    pub async fn add_item(
        &self,
        item_type: impl Into<String>,
        item_id: SourceId,
        rows: Vec<RawRow>,
    ) {
        let mut inner = self.inner.lock().await;
        inner.items.insert(item_id, (item_type.into(), rows));
    }

    pub async fn remove_item(&self, item_id: SourceId) {
        let mut inner = self.inner.lock().await;
        inner.items.remove(&item_id);
    }

    /// Replaces the nodes of `taxonomy`.
    pub async fn add_hierarchy(&self, taxonomy: impl Into<String>, nodes: Vec<HierarchyNode>) {
        let mut inner = self.inner.lock().await;
        inner.hierarchies.insert(taxonomy.into(), nodes);
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for MemorySource {
    fn name() -> &'static str {
        "memory"
    }

    async fn fetch_item_ids(
        &self,
        filter: &ItemFilter,
        after: Option<SourceId>,
        limit: u32,
    ) -> MigrationResult<Vec<SourceId>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .items
            .iter()
            .filter(|(id, (item_type, _))| {
                *item_type == filter.item_type && after.is_none_or(|after| **id > after)
            })
            .map(|(id, _)| *id)
            .take(limit as usize)
            .collect())
    }

    async fn fetch_item_rows(&self, item_id: SourceId) -> MigrationResult<Vec<RawRow>> {
        let inner = self.inner.lock().await;

        match inner.items.get(&item_id) {
            Some((_, rows)) => Ok(rows.clone()),
            None => bail!(
                ErrorKind::SourceQueryFailed,
                "Item not found in source",
                format!("item {item_id} does not exist")
            ),
        }
    }

    async fn fetch_hierarchy(&self, taxonomy: &str) -> MigrationResult<Vec<HierarchyNode>> {
        let inner = self.inner.lock().await;

        Ok(inner.hierarchies.get(taxonomy).cloned().unwrap_or_default())
    }
}
