use crate::aggregate::aggregate;
use crate::catalog::{ItemContext, ItemTransform, SkippedRecord};
use crate::error::MigrationResult;
use crate::reconcile::{ReconciliationConflict, reconcile};
use crate::types::{PendingMutation, RawRow, SourceId};

/// Result of running the pure part of the pipeline on one item.
#[derive(Debug)]
pub struct ProcessedItem {
    pub item_id: SourceId,
    pub mutations: Vec<PendingMutation>,
    pub conflicts: Vec<ReconciliationConflict>,
    /// Rows and records that could not be decoded.
    pub skipped: Vec<SkippedRecord>,
}

/// Aggregates, reconciles and transforms the rows of one item.
///
/// Decoding problems are scoped to the row or record they affect. An `Err` means the item as a
/// whole cannot be migrated.
pub fn process_item(
    transform: &dyn ItemTransform,
    item_id: SourceId,
    rows: &[RawRow],
) -> MigrationResult<ProcessedItem> {
    let item = aggregate(transform.grammar(), item_id, rows);

    let policy = transform.reconcile_policy();
    let mut records = Vec::new();
    let mut conflicts = Vec::new();
    for (category, slots) in &item.categories {
        let reconciled = reconcile(item_id, category, slots, policy.identity_fields(category));
        records.extend(reconciled.records);
        conflicts.extend(reconciled.conflicts);
    }

    let output = transform.transform(&ItemContext {
        item_id,
        item: &item,
        records: &records,
    })?;

    let mut skipped: Vec<SkippedRecord> = item
        .skipped
        .into_iter()
        .map(|row| SkippedRecord::new(row.key, row.error))
        .collect();
    skipped.extend(output.skipped);

    Ok(ProcessedItem {
        item_id,
        mutations: output.mutations,
        conflicts,
        skipped,
    })
}
