use std::future::Future;

use crate::error::MigrationResult;
use crate::types::{MigrationBatch, RowOutcome};

/// Trait for the relational target of a migration.
///
/// Every row of a batch is an upsert keyed by its [`crate::types::TargetRowMutation::key_columns`],
/// so writing the same batch twice converges on the same end state. The engine relies on this to
/// retry failed batches and to re-run migrations.
///
/// Failures are reported per row: a rejected row must not prevent the other rows of the batch
/// from being written. An `Err` means the whole batch failed and nothing was written.
pub trait Sink {
    /// Returns the name of the sink.
    fn name() -> &'static str;

    /// Upserts the rows of `batch`, returning one outcome per row in input order.
    fn upsert_batch(
        &self,
        batch: MigrationBatch,
    ) -> impl Future<Output = MigrationResult<Vec<RowOutcome>>> + Send;
}
