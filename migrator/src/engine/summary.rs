use serde::Serialize;
use std::fmt;

/// Counts reported at the end of every run, including failed and interrupted ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    /// Target rows written.
    pub migrated: u64,
    /// Rows and records skipped because they could not be decoded, and nodes excluded from a
    /// hierarchy.
    pub skipped: u64,
    /// Reconciliation conflicts. Both records of a conflict are migrated.
    pub conflicted: u64,
    /// Rows deferred because a reference was not mapped yet.
    pub deferred: u64,
    /// Rows whose references were still not mapped after the retry pass.
    pub unresolved: u64,
    /// Failed items, rejected rows and rows of failed batches.
    pub failed: u64,
    /// `true` when the run stopped at a checkpoint before completing.
    pub interrupted: bool,
}

impl MigrationSummary {
    /// Returns `true` when some data was not migrated.
    pub fn is_partial(&self) -> bool {
        self.interrupted || self.unresolved > 0 || self.failed > 0 || self.skipped > 0
    }
}

impl fmt::Display for MigrationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "migrated={} skipped={} conflicted={} deferred={} unresolved={} failed={}",
            self.migrated,
            self.skipped,
            self.conflicted,
            self.deferred,
            self.unresolved,
            self.failed
        )?;
        if self.interrupted {
            f.write_str(" (interrupted)")?;
        }

        Ok(())
    }
}
