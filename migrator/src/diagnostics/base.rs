use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use tracing::{error, info, warn};

use crate::error::{ErrorKind, MigrationError, MigrationResult};
use crate::types::{EntityType, SourceId, SourceKey};

/// An anomaly reported by a migration run.
///
/// None of these stop the run except [`Diagnostic::Fatal`], which is reported right before the
/// run aborts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Both track variants hold a record at the same index with different identities.
    ReconciliationConflict {
        item_id: SourceId,
        category: String,
        index: u32,
        primary: BTreeMap<String, String>,
        import: BTreeMap<String, String>,
    },
    HierarchyCycleDetected {
        taxonomy: String,
        members: Vec<SourceId>,
        /// Nodes excluded because they descend from the cycle.
        descendants: Vec<SourceId>,
    },
    OrphanedParent {
        taxonomy: String,
        node: SourceId,
        missing_parent: SourceId,
    },
    UnresolvedReference {
        item_id: SourceId,
        table: String,
        column: String,
        entity: EntityType,
        key: SourceKey,
    },
    /// A row or record could not be decoded and was skipped.
    RowSkipped {
        item_id: SourceId,
        what: String,
        error: String,
    },
    /// The sink refused a single row of a batch.
    RowRejected {
        item_id: SourceId,
        table: String,
        error: String,
    },
    /// A whole batch failed after exhausting its retries.
    BatchFailed {
        table: String,
        rows: usize,
        error: String,
    },
    /// An item could not be fetched or transformed.
    ItemFailed { item_id: SourceId, error: String },
    /// A stage stopped because its source could not be read. Later stages still run.
    StageFailed { stage: String, error: String },
    Fatal { error: String },
}

impl Diagnostic {
    pub fn row_skipped(item_id: SourceId, what: impl Into<String>, error: &MigrationError) -> Self {
        Diagnostic::RowSkipped {
            item_id,
            what: what.into(),
            error: render(error),
        }
    }

    pub fn row_rejected(item_id: SourceId, table: impl Into<String>, error: &MigrationError) -> Self {
        Diagnostic::RowRejected {
            item_id,
            table: table.into(),
            error: render(error),
        }
    }

    pub fn batch_failed(table: impl Into<String>, rows: usize, error: &MigrationError) -> Self {
        Diagnostic::BatchFailed {
            table: table.into(),
            rows,
            error: render(error),
        }
    }

    pub fn item_failed(item_id: SourceId, error: &MigrationError) -> Self {
        Diagnostic::ItemFailed {
            item_id,
            error: render(error),
        }
    }

    pub fn stage_failed(stage: impl Into<String>, error: &MigrationError) -> Self {
        Diagnostic::StageFailed {
            stage: stage.into(),
            error: render(error),
        }
    }

    pub fn fatal(error: &MigrationError) -> Self {
        Diagnostic::Fatal {
            error: render(error),
        }
    }

    /// Error kind this diagnostic corresponds to, if any.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Diagnostic::HierarchyCycleDetected { .. } => Some(ErrorKind::HierarchyCycleDetected),
            Diagnostic::UnresolvedReference { .. } => Some(ErrorKind::UnresolvedReference),
            Diagnostic::RowRejected { .. } => Some(ErrorKind::SinkRowRejected),
            _ => None,
        }
    }
}

/// Single line rendering of an error, without the backtrace.
pub(crate) fn render(error: &MigrationError) -> String {
    match error.detail() {
        Some(detail) => format!("[{:?}] {}: {}", error.kind(), error.description(), detail),
        None => format!("[{:?}] {}", error.kind(), error.description()),
    }
}

/// Emits `diagnostic` as a structured log event.
pub fn log_diagnostic(diagnostic: &Diagnostic) {
    match diagnostic {
        Diagnostic::ReconciliationConflict {
            item_id,
            category,
            index,
            ..
        } => info!(%item_id, %category, index, "primary and import records differ, keeping both"),
        Diagnostic::HierarchyCycleDetected {
            taxonomy, members, ..
        } => warn!(%taxonomy, members = ?members, "hierarchy cycle excluded"),
        Diagnostic::OrphanedParent {
            taxonomy,
            node,
            missing_parent,
        } => warn!(%taxonomy, %node, %missing_parent, "orphaned node migrated as a root"),
        Diagnostic::UnresolvedReference {
            item_id,
            table,
            column,
            entity,
            key,
        } => warn!(%item_id, %table, %column, %entity, %key, "reference could not be resolved"),
        Diagnostic::RowSkipped {
            item_id,
            what,
            error,
        } => warn!(%item_id, %what, %error, "row skipped"),
        Diagnostic::RowRejected {
            item_id,
            table,
            error,
        } => warn!(%item_id, %table, %error, "row rejected by the sink"),
        Diagnostic::BatchFailed { table, rows, error } => {
            error!(%table, rows, %error, "batch failed")
        }
        Diagnostic::ItemFailed { item_id, error } => error!(%item_id, %error, "item failed"),
        Diagnostic::StageFailed { stage, error } => error!(%stage, %error, "stage failed"),
        Diagnostic::Fatal { error } => error!(%error, "migration aborted"),
    }
}

/// Receiver of [`Diagnostic`]s.
pub trait DiagnosticsSink {
    /// Appends `diagnostic`. Reports are never rewritten or removed.
    fn report(&self, diagnostic: Diagnostic) -> impl Future<Output = MigrationResult<()>> + Send;
}

/// Diagnostics sink that only emits log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDiagnostics;

impl DiagnosticsSink for LogDiagnostics {
    async fn report(&self, diagnostic: Diagnostic) -> MigrationResult<()> {
        log_diagnostic(&diagnostic);

        Ok(())
    }
}
