use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{ErrorKind, MigrationResult};
use crate::migration_error;
use crate::sink::Sink;
use crate::types::{Cell, MigrationBatch, RowOutcome, TargetId, TargetRowMutation};

/// Column holding the target id of every table.
const ID_COLUMN: &str = "id";

#[derive(Debug, Default, Clone)]
struct Table {
    rows: BTreeMap<i64, BTreeMap<String, Cell>>,
}

impl Table {
    fn find(&self, mutation: &TargetRowMutation) -> Option<i64> {
        self.rows.iter().find_map(|(id, row)| {
            mutation
                .key_columns
                .iter()
                .all(|column| row.get(column) == mutation.get(column))
                .then_some(*id)
        })
    }

    fn next_id(&self) -> i64 {
        self.rows.keys().next_back().map(|id| id + 1).unwrap_or(1)
    }
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, Table>,
    batches: Vec<(String, usize)>,
}

/// In-memory sink for testing and dry runs.
///
/// Rows are upserted by their key columns. Rows without an explicit `id` get the next free id
/// of their table.
#[derive(Debug, Clone)]
pub struct MemorySink {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Returns the rows of `table` ordered by id.
    pub async fn rows(&self, table: &str) -> Vec<BTreeMap<String, Cell>> {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(table)
            .map(|table| table.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the row of `table` with target id `id`.
    pub async fn row(&self, table: &str, id: i64) -> Option<BTreeMap<String, Cell>> {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(table)
            .and_then(|table| table.rows.get(&id).cloned())
    }

    /// Returns `(table, row count)` of every batch written, in write order.
    pub async fn batches(&self) -> Vec<(String, usize)> {
        let inner = self.inner.lock().await;
        inner.batches.clone()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for MemorySink {
    fn name() -> &'static str {
        "memory"
    }

    async fn upsert_batch(&self, batch: MigrationBatch) -> MigrationResult<Vec<RowOutcome>> {
        let mut inner = self.inner.lock().await;
        inner.batches.push((batch.table.clone(), batch.len()));

        let table = inner.tables.entry(batch.table.clone()).or_default();
        let mut outcomes = Vec::with_capacity(batch.rows.len());

        for mutation in batch.rows {
            if let Some(missing) = mutation
                .key_columns
                .iter()
                .find(|column| mutation.get(column).is_none())
            {
                outcomes.push(RowOutcome::Rejected {
                    error: migration_error!(
                        ErrorKind::SinkRowRejected,
                        "Row is missing a key column",
                        format!("table `{}`, column `{missing}`", batch.table)
                    ),
                });
                continue;
            }

            let explicit_id = match mutation.get(ID_COLUMN) {
                Some(Cell::I64(id)) => Some(*id),
                _ => None,
            };

            let id = match table.find(&mutation) {
                Some(id) => id,
                None => explicit_id.unwrap_or_else(|| table.next_id()),
            };

            let row = table.rows.entry(id).or_default();
            for (column, cell) in mutation.columns {
                row.insert(column, cell);
            }
            row.insert(ID_COLUMN.to_string(), Cell::I64(id));

            outcomes.push(RowOutcome::Applied {
                target_id: TargetId::new(id),
            });
        }

        debug!(table = %batch.table, rows = outcomes.len(), "batch written to memory sink");

        Ok(outcomes)
    }
}
