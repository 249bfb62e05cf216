use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use crate::concurrency::shutdown::ShutdownTx;
use crate::error::MigrationResult;
use crate::identifiers::IdentifierMapping;
use crate::store::memory::MemoryCheckpointStore;
use crate::store::{CheckpointStore, MigrationCursor};
use crate::test_utils::notify::TimedNotify;

type CursorCondition = Box<dyn Fn(&MigrationCursor) -> bool + Send + Sync>;

#[derive(Default)]
struct Inner {
    history: Vec<MigrationCursor>,
    mapping_saves: Vec<usize>,
    notify_conditions: Vec<(CursorCondition, Arc<Notify>)>,
    shutdown_conditions: Vec<(CursorCondition, ShutdownTx)>,
}

/// A [`MemoryCheckpointStore`] that records every saved cursor and reacts to them.
#[derive(Clone)]
pub struct NotifyingCheckpointStore {
    store: MemoryCheckpointStore,
    inner: Arc<Mutex<Inner>>,
}

impl NotifyingCheckpointStore {
    pub fn new() -> Self {
        Self::wrap(MemoryCheckpointStore::new())
    }

    pub fn wrap(store: MemoryCheckpointStore) -> Self {
        Self {
            store,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn store(&self) -> &MemoryCheckpointStore {
        &self.store
    }

    /// Every cursor saved so far, in save order.
    pub async fn cursor_history(&self) -> Vec<MigrationCursor> {
        self.inner.lock().await.history.clone()
    }

    /// Number of mappings of every `save_mappings` call, in call order.
    pub async fn mapping_saves(&self) -> Vec<usize> {
        self.inner.lock().await.mapping_saves.clone()
    }

    /// Returns a notification fired the first time a saved cursor satisfies `condition`.
    pub async fn notify_on_cursor<F>(&self, condition: F) -> TimedNotify
    where
        F: Fn(&MigrationCursor) -> bool + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());
        let mut inner = self.inner.lock().await;
        inner
            .notify_conditions
            .push((Box::new(condition), notify.clone()));

        TimedNotify::new(notify)
    }

    /// Requests a shutdown the first time a saved cursor satisfies `condition`.
    pub async fn shutdown_on_cursor<F>(&self, condition: F, shutdown_tx: ShutdownTx)
    where
        F: Fn(&MigrationCursor) -> bool + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().await;
        inner
            .shutdown_conditions
            .push((Box::new(condition), shutdown_tx));
    }
}

impl Default for NotifyingCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointStore for NotifyingCheckpointStore {
    async fn load_mappings(&self) -> MigrationResult<Vec<IdentifierMapping>> {
        self.store.load_mappings().await
    }

    async fn save_mappings(&self, mappings: Vec<IdentifierMapping>) -> MigrationResult<()> {
        let count = mappings.len();
        self.store.save_mappings(mappings).await?;
        self.inner.lock().await.mapping_saves.push(count);

        Ok(())
    }

    async fn load_cursors(&self) -> MigrationResult<BTreeMap<String, MigrationCursor>> {
        self.store.load_cursors().await
    }

    async fn save_cursor(&self, cursor: MigrationCursor) -> MigrationResult<()> {
        self.store.save_cursor(cursor.clone()).await?;

        let mut inner = self.inner.lock().await;
        inner.notify_conditions.retain(|(condition, notify)| {
            let reached = condition(&cursor);
            if reached {
                notify.notify_one();
            }
            !reached
        });
        inner.shutdown_conditions.retain(|(condition, shutdown_tx)| {
            let reached = condition(&cursor);
            if reached {
                shutdown_tx.shutdown();
            }
            !reached
        });
        inner.history.push(cursor);

        Ok(())
    }

    async fn clear_cursors(&self) -> MigrationResult<()> {
        self.store.clear_cursors().await
    }
}
