use config::shared::MigrationConfig;
use futures::{StreamExt, stream};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::bail;
use crate::catalog::{HierarchyTransform, ItemTransform};
use crate::concurrency::retry::retry_with_backoff;
use crate::concurrency::shutdown::ShutdownRx;
use crate::diagnostics::{Diagnostic, DiagnosticsSink};
use crate::engine::item::{ProcessedItem, process_item};
use crate::engine::rows::{ResolvedRow, TableBatches, dedup_rows, partition_by_table, to_batch};
use crate::engine::{MigrationPlan, MigrationSummary, Stage};
use crate::error::{ErrorKind, MigrationError, MigrationResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{FLUSH_BATCH__BEFORE_WRITE, migrator_fail_point};
use crate::hierarchy::resolve;
use crate::identifiers::IdentifierMapper;
use crate::policy::build_error_handling_policy;
use crate::sink::Sink;
use crate::source::{ItemFilter, Source};
use crate::store::{CheckpointStore, MigrationCursor};
use crate::types::{Cell, MigrationBatch, PendingMutation, RowOutcome, SourceId, WriteMode};

/// Column holding the target id of a row.
const ID_COLUMN: &str = "id";

type BatchResult = (String, Vec<ResolvedRow>, MigrationResult<Vec<RowOutcome>>);

/// Deferred work of one item stage, retried once every stage has run.
struct DeferredWork<'a> {
    transform: &'a dyn ItemTransform,
    /// Rows deferred during this run.
    rows: Vec<PendingMutation>,
    /// Items deferred by an earlier, interrupted run. Their rows are rebuilt from the source.
    carried_items: Vec<SourceId>,
}

/// Runs a [`MigrationPlan`] from a [`Source`] into a [`Sink`].
///
/// Identifier mappings are saved after every flush and the stage cursor after every page.
/// A run that stops for any reason resumes from the last checkpoint, and since every write is
/// an upsert, pages written after that checkpoint are simply written again.
#[derive(Debug)]
pub struct MigrationEngine<Src, Snk, St, D> {
    config: Arc<MigrationConfig>,
    source: Src,
    sink: Snk,
    store: St,
    diagnostics: D,
    mapper: IdentifierMapper,
    shutdown_rx: ShutdownRx,
}

impl<Src, Snk, St, D> MigrationEngine<Src, Snk, St, D>
where
    Src: Source + Sync,
    Snk: Sink + Sync,
    St: CheckpointStore + Sync,
    D: DiagnosticsSink + Sync,
{
    pub fn new(
        config: MigrationConfig,
        source: Src,
        sink: Snk,
        store: St,
        diagnostics: D,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            config: Arc::new(config),
            source,
            sink,
            store,
            diagnostics,
            mapper: IdentifierMapper::new(),
            shutdown_rx,
        }
    }

    /// Identifier map of the current run.
    pub fn mapper(&self) -> &IdentifierMapper {
        &self.mapper
    }

    /// Runs every stage of `plan`, then retries deferred rows once.
    ///
    /// Returns `Err` only when the run was aborted. The summary is logged in every case.
    pub async fn run(&mut self, plan: &MigrationPlan) -> MigrationResult<MigrationSummary> {
        info!(
            source = Src::name(),
            sink = Snk::name(),
            stages = plan.stages().len(),
            "starting migration"
        );

        let mut summary = MigrationSummary::default();

        match IdentifierMapper::load(&self.store).await {
            Ok(mapper) => self.mapper = mapper,
            Err(err) => return Err(self.abort(err, &summary).await),
        }

        match self.run_plan(plan, &mut summary).await {
            Ok(()) if summary.interrupted => {
                warn!(%summary, "migration interrupted, resume to continue from the last checkpoint");
                Ok(summary)
            }
            Ok(()) => {
                info!(%summary, "migration finished");
                Ok(summary)
            }
            Err(err) => Err(self.abort(err, &summary).await),
        }
    }

    async fn run_plan(
        &self,
        plan: &MigrationPlan,
        summary: &mut MigrationSummary,
    ) -> MigrationResult<()> {
        let mut cursors = self.store.load_cursors().await?;
        let mut deferred = Vec::new();
        let mut incomplete = Vec::new();

        for stage in plan.stages() {
            let mut cursor = cursors
                .remove(stage.name())
                .unwrap_or_else(|| MigrationCursor::new(stage.name()));
            let carried_items = cursor.deferred_items.clone();

            let mut rows = Vec::new();
            if cursor.completed {
                info!(stage = stage.name(), "stage already completed, skipping");
            } else {
                if self.shutdown_rx.is_shutdown() {
                    summary.interrupted = true;
                    return Ok(());
                }

                info!(stage = stage.name(), resume_after = ?cursor.last_item_id, "starting stage");
                match stage {
                    Stage::Hierarchy(transform) => {
                        self.run_hierarchy_stage(transform.as_ref(), &mut cursor, summary)
                            .await?
                    }
                    Stage::Items(transform) => {
                        rows = self
                            .run_item_stage(transform.as_ref(), &mut cursor, summary)
                            .await?
                    }
                }

                if summary.interrupted {
                    return Ok(());
                }
                if !cursor.completed {
                    incomplete.push(stage.name());
                }
            }

            if let Stage::Items(transform) = stage {
                deferred.push(DeferredWork {
                    transform: transform.as_ref(),
                    rows,
                    carried_items,
                });
            }
        }

        for work in deferred {
            self.retry_deferred(work, summary).await?;
        }

        self.mapper.persist(&self.store).await?;
        if incomplete.is_empty() {
            self.store.clear_cursors().await?;
        } else {
            warn!(stages = ?incomplete, "stages failed, keeping cursors for the next run");
        }

        Ok(())
    }

    async fn run_hierarchy_stage(
        &self,
        transform: &dyn HierarchyTransform,
        cursor: &mut MigrationCursor,
        summary: &mut MigrationSummary,
    ) -> MigrationResult<()> {
        let taxonomy = transform.taxonomy();
        let fetched = retry_with_backoff(&self.config.retry, "fetch_hierarchy", || {
            self.source.fetch_hierarchy(taxonomy)
        })
        .await;
        let nodes = match fetched {
            Ok(nodes) => nodes,
            Err(err) => return self.stage_failed(transform.name(), err, summary).await,
        };

        let plan = resolve(nodes);
        info!(
            taxonomy,
            nodes = plan.node_count(),
            levels = plan.levels.len(),
            cycles = plan.cycles.len(),
            orphans = plan.orphans.len(),
            "hierarchy resolved"
        );

        summary.skipped += plan.duplicates.len() as u64;
        for orphan in &plan.orphans {
            self.report(Diagnostic::OrphanedParent {
                taxonomy: taxonomy.to_string(),
                node: orphan.source_id,
                missing_parent: orphan.missing_parent,
            })
            .await?;
        }

        for cycle in &plan.cycles {
            summary.skipped += cycle.len() as u64;

            self.report(Diagnostic::HierarchyCycleDetected {
                taxonomy: taxonomy.to_string(),
                members: cycle.members.clone(),
                descendants: cycle.descendants.clone(),
            })
            .await?;
        }

        // Parents are mapped by the time their children's level is resolved.
        for (depth, level) in plan.levels.iter().enumerate() {
            let pending = level.iter().map(|node| transform.transform(node)).collect();
            let unresolved = self.write_rounds(pending, summary).await?;
            for row in &unresolved {
                self.report_unresolved(row, summary).await?;
            }

            debug!(taxonomy, depth, nodes = level.len(), "hierarchy level written");
        }

        cursor.completed = true;
        self.checkpoint(cursor).await
    }

    /// Pages through the items of `transform`, returning the rows deferred on the way.
    async fn run_item_stage(
        &self,
        transform: &dyn ItemTransform,
        cursor: &mut MigrationCursor,
        summary: &mut MigrationSummary,
    ) -> MigrationResult<Vec<PendingMutation>> {
        let filter = ItemFilter::item_type(transform.item_type());
        let filter = &filter;
        let page_size = self.config.page_size;
        let mut deferred = Vec::new();

        loop {
            if self.shutdown_rx.is_shutdown() {
                info!(
                    stage = transform.name(),
                    last_item_id = ?cursor.last_item_id,
                    "shutdown requested, stopping at a page boundary"
                );
                summary.interrupted = true;
                return Ok(deferred);
            }

            let after = cursor.last_item_id;
            let fetched = retry_with_backoff(&self.config.retry, "fetch_item_ids", || {
                self.source.fetch_item_ids(filter, after, page_size)
            })
            .await;
            let ids = match fetched {
                Ok(ids) => ids,
                Err(err) => {
                    self.stage_failed(transform.name(), err, summary).await?;
                    return Ok(deferred);
                }
            };

            let Some(&last) = ids.last() else {
                break;
            };
            debug!(stage = transform.name(), items = ids.len(), %last, "migrating page");

            let unresolved = self.migrate_page(transform, &ids, summary).await?;
            summary.deferred += unresolved.len() as u64;

            let mut deferred_items: BTreeSet<SourceId> =
                cursor.deferred_items.iter().copied().collect();
            deferred_items.extend(unresolved.iter().map(|row| row.origin));
            cursor.deferred_items = deferred_items.into_iter().collect();
            cursor.last_item_id = Some(last);
            deferred.extend(unresolved);

            self.checkpoint(cursor).await?;

            if ids.len() < page_size as usize {
                break;
            }
        }

        cursor.completed = true;
        self.checkpoint(cursor).await?;
        info!(
            stage = transform.name(),
            deferred = deferred.len(),
            "item stage completed"
        );

        Ok(deferred)
    }

    /// Migrates the items `ids`, returning rows with unresolved references.
    async fn migrate_page(
        &self,
        transform: &dyn ItemTransform,
        ids: &[SourceId],
        summary: &mut MigrationSummary,
    ) -> MigrationResult<Vec<PendingMutation>> {
        let mut pending = Vec::new();

        for (item_id, result) in self.load_items(transform, ids).await {
            match result {
                Ok(item) => {
                    let mutations = self.report_anomalies(item, summary).await?;
                    pending.extend(mutations);
                }
                Err(err) => self.item_failed(item_id, err, summary).await?,
            }
        }

        self.write_rounds(pending, summary).await
    }

    /// Fetches and processes `ids` concurrently, in input order.
    async fn load_items(
        &self,
        transform: &dyn ItemTransform,
        ids: &[SourceId],
    ) -> Vec<(SourceId, MigrationResult<ProcessedItem>)> {
        let workers = usize::from(self.config.max_item_workers).max(1);

        stream::iter(ids.iter().copied())
            .map(|item_id| async move {
                let rows = retry_with_backoff(&self.config.retry, "fetch_item_rows", || {
                    self.source.fetch_item_rows(item_id)
                })
                .await;
                let result = rows.and_then(|rows| process_item(transform, item_id, &rows));

                (item_id, result)
            })
            .buffered(workers)
            .collect()
            .await
    }

    /// Reports the conflicts and skipped records of `item`, returning its mutations.
    async fn report_anomalies(
        &self,
        item: ProcessedItem,
        summary: &mut MigrationSummary,
    ) -> MigrationResult<Vec<PendingMutation>> {
        let ProcessedItem {
            item_id,
            mutations,
            conflicts,
            skipped,
        } = item;

        for conflict in conflicts {
            summary.conflicted += 1;
            self.report(Diagnostic::ReconciliationConflict {
                item_id: conflict.item_id,
                category: conflict.category,
                index: conflict.index,
                primary: conflict.primary,
                import: conflict.import,
            })
            .await?;
        }

        for record in skipped {
            summary.skipped += 1;
            self.report(Diagnostic::row_skipped(item_id, record.what, &record.error))
                .await?;
        }

        Ok(mutations)
    }

    /// Reports a stage that could not go on. Its cursor stays incomplete, so the next run
    /// resumes it from the last saved page.
    async fn stage_failed(
        &self,
        stage: &str,
        err: MigrationError,
        summary: &mut MigrationSummary,
    ) -> MigrationResult<()> {
        if build_error_handling_policy(&err).is_fatal() {
            return Err(err);
        }

        warn!(stage, error = %err, "stage failed, continuing with the next one");
        summary.failed += 1;
        self.report(Diagnostic::stage_failed(stage, &err)).await
    }

    async fn item_failed(
        &self,
        item_id: SourceId,
        err: MigrationError,
        summary: &mut MigrationSummary,
    ) -> MigrationResult<()> {
        if build_error_handling_policy(&err).is_fatal() {
            return Err(err);
        }

        summary.failed += 1;
        self.report(Diagnostic::item_failed(item_id, &err)).await
    }

    /// Writes deferred rows once more. Whatever is still unresolved is reported.
    async fn retry_deferred(
        &self,
        work: DeferredWork<'_>,
        summary: &mut MigrationSummary,
    ) -> MigrationResult<()> {
        let DeferredWork {
            transform,
            mut rows,
            carried_items,
        } = work;

        if !carried_items.is_empty() {
            info!(
                stage = transform.name(),
                items = carried_items.len(),
                "rebuilding items deferred by an earlier run"
            );
            for (item_id, result) in self.load_items(transform, &carried_items).await {
                match result {
                    Ok(item) => rows.extend(item.mutations),
                    Err(err) => self.item_failed(item_id, err, summary).await?,
                }
            }
        }

        if rows.is_empty() {
            return Ok(());
        }

        info!(
            stage = transform.name(),
            rows = rows.len(),
            "retrying deferred rows"
        );
        let unresolved = self.write_rounds(rows, summary).await?;
        for row in &unresolved {
            self.report_unresolved(row, summary).await?;
        }

        Ok(())
    }

    /// Writes `pending` in rounds until no further row becomes resolvable. The mappings
    /// recorded by each round are saved before the next one starts.
    ///
    /// Rows whose references point at rows written in an earlier round of the same call, such
    /// as a crew member and its role, are written in the next round.
    async fn write_rounds(
        &self,
        pending: Vec<PendingMutation>,
        summary: &mut MigrationSummary,
    ) -> MigrationResult<Vec<PendingMutation>> {
        let mut queue = pending;
        let mut round = 0;

        while !queue.is_empty() {
            let (ready, blocked) = self.resolve_references(queue).await;
            queue = blocked;
            if ready.is_empty() {
                break;
            }

            round += 1;
            debug!(round, ready = ready.len(), blocked = queue.len(), "writing round");
            self.flush(dedup_rows(ready), summary).await?;
            self.mapper.persist(&self.store).await?;
        }

        Ok(queue)
    }

    /// Splits `pending` into rows whose references are all mapped and rows still waiting.
    ///
    /// Rows of an already mapped entity are re-keyed by their target id.
    async fn resolve_references(
        &self,
        pending: Vec<PendingMutation>,
    ) -> (Vec<ResolvedRow>, Vec<PendingMutation>) {
        let mut ready = Vec::with_capacity(pending.len());
        let mut blocked = Vec::new();

        for mut pending in pending {
            let targets = self
                .mapper
                .lookup_many(
                    pending
                        .references
                        .iter()
                        .map(|reference| (reference.entity, &reference.key)),
                )
                .await;
            if targets.iter().any(Option::is_none) {
                blocked.push(pending);
                continue;
            }

            for (reference, target) in pending.references.iter().zip(targets.into_iter().flatten())
            {
                pending
                    .mutation
                    .set(reference.column.clone(), Cell::from(target));
            }

            let mapped = match &pending.identity {
                Some((entity, key)) => self.mapper.lookup(*entity, key).await,
                None => None,
            };

            match (mapped, pending.mode) {
                (Some(_), WriteMode::EnsureExists) => {
                    debug!(table = %pending.table, "row already exists, not writing it");
                    continue;
                }
                (Some(target), WriteMode::Upsert) => {
                    pending.mutation.key_columns = vec![ID_COLUMN.to_string()];
                    pending.mutation.set(ID_COLUMN, Cell::from(target));
                }
                (None, _) => {}
            }

            ready.push(ResolvedRow {
                table: pending.table,
                mutation: pending.mutation,
                identity: pending.identity,
                mode: pending.mode,
                origin: pending.origin,
            });
        }

        (ready, blocked)
    }

    /// Flushes `rows`, one table per flush and at most one batch per table in flight.
    async fn flush(
        &self,
        rows: Vec<ResolvedRow>,
        summary: &mut MigrationSummary,
    ) -> MigrationResult<()> {
        let tables = partition_by_table(rows, self.config.batch.max_size);
        let max_flushes = usize::from(self.config.batch.max_concurrent_flushes).max(1);

        let results: Vec<Vec<BatchResult>> = stream::iter(tables)
            .map(|table| self.flush_table(table))
            .buffer_unordered(max_flushes)
            .collect()
            .await;

        for (table, rows, result) in results.into_iter().flatten() {
            self.apply_outcomes(&table, rows, result, summary).await?;
        }

        Ok(())
    }

    async fn flush_table(&self, table: TableBatches) -> Vec<BatchResult> {
        let TableBatches { table, batches } = table;
        let mut results = Vec::with_capacity(batches.len());

        for rows in batches {
            let result = self.write_batch(to_batch(&table, &rows)).await;
            results.push((table.clone(), rows, result));
        }

        results
    }

    async fn write_batch(&self, batch: MigrationBatch) -> MigrationResult<Vec<RowOutcome>> {
        debug!(table = %batch.table, rows = batch.len(), "flushing batch");

        retry_with_backoff(&self.config.retry, "upsert_batch", || {
            let batch = batch.clone();
            async move {
                #[cfg(feature = "failpoints")]
                migrator_fail_point(FLUSH_BATCH__BEFORE_WRITE)?;

                self.sink.upsert_batch(batch).await
            }
        })
        .await
    }

    /// Records the mappings of written rows and reports the failed ones.
    async fn apply_outcomes(
        &self,
        table: &str,
        rows: Vec<ResolvedRow>,
        result: MigrationResult<Vec<RowOutcome>>,
        summary: &mut MigrationSummary,
    ) -> MigrationResult<()> {
        let outcomes = match result {
            Ok(outcomes) => outcomes,
            Err(err) => {
                if build_error_handling_policy(&err).is_fatal() {
                    return Err(err);
                }

                summary.failed += rows.len() as u64;
                return self
                    .report(Diagnostic::batch_failed(table, rows.len(), &err))
                    .await;
            }
        };

        if outcomes.len() != rows.len() {
            bail!(
                ErrorKind::InvalidState,
                "Sink returned a wrong number of row outcomes",
                format!("table `{table}`: {} rows, {} outcomes", rows.len(), outcomes.len())
            );
        }

        for (row, outcome) in rows.into_iter().zip(outcomes) {
            match outcome {
                RowOutcome::Applied { target_id } => {
                    summary.migrated += 1;
                    if let Some((entity, key)) = row.identity {
                        self.mapper.record(entity, key, target_id).await?;
                    }
                }
                RowOutcome::Rejected { error } => {
                    summary.failed += 1;
                    self.report(Diagnostic::row_rejected(row.origin, table, &error))
                        .await?;
                }
            }
        }

        Ok(())
    }

    async fn report_unresolved(
        &self,
        row: &PendingMutation,
        summary: &mut MigrationSummary,
    ) -> MigrationResult<()> {
        summary.unresolved += 1;

        let targets = self
            .mapper
            .lookup_many(
                row.references
                    .iter()
                    .map(|reference| (reference.entity, &reference.key)),
            )
            .await;

        for (reference, target) in row.references.iter().zip(targets) {
            if target.is_some() {
                continue;
            }

            self.report(Diagnostic::UnresolvedReference {
                item_id: row.origin,
                table: row.table.clone(),
                column: reference.column.clone(),
                entity: reference.entity,
                key: reference.key.clone(),
            })
            .await?;
        }

        Ok(())
    }

    /// Persists the identifier map, then `cursor`.
    async fn checkpoint(&self, cursor: &MigrationCursor) -> MigrationResult<()> {
        let mappings = self.mapper.persist(&self.store).await?;
        self.store.save_cursor(cursor.clone()).await?;

        debug!(
            stage = %cursor.stage,
            last_item_id = ?cursor.last_item_id,
            mappings,
            "checkpoint saved"
        );

        Ok(())
    }

    async fn report(&self, diagnostic: Diagnostic) -> MigrationResult<()> {
        self.diagnostics.report(diagnostic).await
    }

    /// Persists what can be persisted and reports `err` as fatal.
    async fn abort(&self, err: MigrationError, summary: &MigrationSummary) -> MigrationError {
        if let Err(persist_err) = self.mapper.persist(&self.store).await {
            error!(error = %persist_err, "failed to persist identifier mappings while aborting");
        }

        if let Err(report_err) = self.report(Diagnostic::fatal(&err)).await {
            error!(error = %report_err, "failed to report the fatal error");
        }

        error!(%summary, "migration aborted");

        err
    }
}
