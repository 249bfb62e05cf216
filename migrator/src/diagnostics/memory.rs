use std::sync::Arc;
use tokio::sync::Mutex;

use crate::diagnostics::{Diagnostic, DiagnosticsSink, log_diagnostic};
use crate::error::MigrationResult;

/// Diagnostics sink keeping every report in memory, for inspection in tests.
#[derive(Debug, Clone)]
pub struct MemoryDiagnostics {
    reports: Arc<Mutex<Vec<Diagnostic>>>,
}

impl MemoryDiagnostics {
    pub fn new() -> Self {
        Self {
            reports: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn reports(&self) -> Vec<Diagnostic> {
        self.reports.lock().await.clone()
    }

    /// Returns the reports matching `predicate`.
    pub async fn matching<F>(&self, predicate: F) -> Vec<Diagnostic>
    where
        F: Fn(&Diagnostic) -> bool,
    {
        self.reports
            .lock()
            .await
            .iter()
            .filter(|diagnostic| predicate(diagnostic))
            .cloned()
            .collect()
    }
}

impl Default for MemoryDiagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsSink for MemoryDiagnostics {
    async fn report(&self, diagnostic: Diagnostic) -> MigrationResult<()> {
        log_diagnostic(&diagnostic);
        self.reports.lock().await.push(diagnostic);

        Ok(())
    }
}
