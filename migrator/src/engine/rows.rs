use std::collections::HashMap;
use tracing::debug;

use crate::types::{
    Cell, EntityType, MigrationBatch, SourceId, SourceKey, TargetRowMutation, WriteMode,
};

/// A mutation whose references are all resolved, ready to be written.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedRow {
    pub table: String,
    pub mutation: TargetRowMutation,
    pub identity: Option<(EntityType, SourceKey)>,
    pub mode: WriteMode,
    pub origin: SourceId,
}

#[derive(Debug, PartialEq, Eq, Hash)]
enum RowKey {
    Identity(EntityType, SourceKey),
    Natural(Vec<Option<Cell>>),
}

impl ResolvedRow {
    fn dedup_key(&self) -> (String, RowKey) {
        let key = match &self.identity {
            Some((entity, key)) => RowKey::Identity(*entity, key.clone()),
            None => RowKey::Natural(
                self.mutation
                    .key_values()
                    .into_iter()
                    .map(|cell| cell.cloned())
                    .collect(),
            ),
        };

        (self.table.clone(), key)
    }
}

/// Removes rows targeting the same entity twice within one round.
///
/// Upserts keep the last occurrence, in the position of the first. Rows written only when
/// absent keep the first occurrence.
pub(crate) fn dedup_rows(rows: Vec<ResolvedRow>) -> Vec<ResolvedRow> {
    let mut positions: HashMap<(String, RowKey), usize> = HashMap::with_capacity(rows.len());
    let mut deduped: Vec<ResolvedRow> = Vec::with_capacity(rows.len());

    for row in rows {
        match positions.get(&row.dedup_key()) {
            Some(&position) => {
                debug!(
                    table = %row.table,
                    origin = %row.origin,
                    "duplicate row within a round"
                );
                if row.mode == WriteMode::Upsert {
                    deduped[position] = row;
                }
            }
            None => {
                positions.insert(row.dedup_key(), deduped.len());
                deduped.push(row);
            }
        }
    }

    deduped
}

/// Rows of one table split into batches of at most `max_size` rows.
#[derive(Debug)]
pub(crate) struct TableBatches {
    pub table: String,
    pub batches: Vec<Vec<ResolvedRow>>,
}

#[cfg(test)]
impl TableBatches {
    pub fn row_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }
}

/// Groups `rows` by table, in order of first appearance, and chunks them.
pub(crate) fn partition_by_table(rows: Vec<ResolvedRow>, max_size: usize) -> Vec<TableBatches> {
    let max_size = max_size.max(1);
    let mut tables: Vec<(String, Vec<ResolvedRow>)> = Vec::new();

    for row in rows {
        match tables.iter_mut().find(|(table, _)| *table == row.table) {
            Some((_, table_rows)) => table_rows.push(row),
            None => tables.push((row.table.clone(), vec![row])),
        }
    }

    tables
        .into_iter()
        .map(|(table, rows)| {
            let mut batches = Vec::with_capacity(rows.len().div_ceil(max_size));
            let mut rows = rows.into_iter().peekable();
            while rows.peek().is_some() {
                batches.push(rows.by_ref().take(max_size).collect());
            }

            TableBatches { table, batches }
        })
        .collect()
}

/// Builds the sink batch of `rows`.
pub(crate) fn to_batch(table: &str, rows: &[ResolvedRow]) -> MigrationBatch {
    MigrationBatch::new(
        table,
        rows.iter().map(|row| row.mutation.clone()).collect(),
    )
}
