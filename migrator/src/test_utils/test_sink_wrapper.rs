use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{ErrorKind, MigrationResult};
use crate::migration_error;
use crate::sink::Sink;
use crate::types::{MigrationBatch, RowOutcome, TargetRowMutation};

type RowPredicate = Box<dyn Fn(&str, &TargetRowMutation) -> bool + Send + Sync>;

struct Inner<S> {
    wrapped_sink: S,
    /// Remaining batches to fail, with the kind of the error returned.
    failing_batches: Vec<ErrorKind>,
    rejections: Vec<RowPredicate>,
    upsert_calls: u64,
    failed_calls: u64,
}

/// Test wrapper around a [`Sink`] that injects failures.
///
/// Batches can be failed as a whole, for example with a retryable kind to exercise the
/// backoff path, and single rows can be rejected by predicate.
#[derive(Clone)]
pub struct FaultInjectingSink<S> {
    inner: Arc<Mutex<Inner<S>>>,
}

impl<S> FaultInjectingSink<S> {
    pub fn wrap(sink: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                wrapped_sink: sink,
                failing_batches: Vec::new(),
                rejections: Vec::new(),
                upsert_calls: 0,
                failed_calls: 0,
            })),
        }
    }

    /// Fails the next `count` calls with an error of `kind`.
    pub async fn fail_next_batches(&self, count: usize, kind: ErrorKind) {
        let mut inner = self.inner.lock().await;
        inner
            .failing_batches
            .extend(std::iter::repeat_n(kind, count));
    }

    /// Rejects every row of a table matching `predicate`.
    pub async fn reject_rows<F>(&self, predicate: F)
    where
        F: Fn(&str, &TargetRowMutation) -> bool + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().await;
        inner.rejections.push(Box::new(predicate));
    }

    pub async fn upsert_calls(&self) -> u64 {
        self.inner.lock().await.upsert_calls
    }

    pub async fn failed_calls(&self) -> u64 {
        self.inner.lock().await.failed_calls
    }
}

impl<S: fmt::Debug> fmt::Debug for FaultInjectingSink<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultInjectingSink").finish_non_exhaustive()
    }
}

impl<S> Sink for FaultInjectingSink<S>
where
    S: Sink + Send + Sync,
{
    fn name() -> &'static str {
        S::name()
    }

    async fn upsert_batch(&self, batch: MigrationBatch) -> MigrationResult<Vec<RowOutcome>> {
        let mut inner = self.inner.lock().await;
        inner.upsert_calls += 1;

        if !inner.failing_batches.is_empty() {
            let kind = inner.failing_batches.remove(0);
            inner.failed_calls += 1;

            return Err(migration_error!(
                kind,
                "Injected batch failure",
                format!("table `{}`, {} rows", batch.table, batch.len())
            ));
        }

        let MigrationBatch { table, rows } = batch;
        let mut rejected = BTreeMap::new();
        let mut accepted = Vec::with_capacity(rows.len());
        for (position, row) in rows.into_iter().enumerate() {
            if inner.rejections.iter().any(|reject| reject(table.as_str(), &row)) {
                rejected.insert(
                    position,
                    migration_error!(
                        ErrorKind::SinkRowRejected,
                        "Injected row rejection",
                        format!("table `{table}`, row {position}")
                    ),
                );
            } else {
                accepted.push(row);
            }
        }

        let total = accepted.len() + rejected.len();
        let mut written = if accepted.is_empty() {
            Vec::new()
        } else {
            inner
                .wrapped_sink
                .upsert_batch(MigrationBatch::new(table, accepted))
                .await?
        }
        .into_iter();

        let mut outcomes = Vec::with_capacity(total);
        for position in 0..total {
            match rejected.remove(&position) {
                Some(error) => outcomes.push(RowOutcome::Rejected { error }),
                None => {
                    if let Some(outcome) = written.next() {
                        outcomes.push(outcome);
                    }
                }
            }
        }

        Ok(outcomes)
    }
}
