use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::diagnostics::{Diagnostic, DiagnosticsSink, log_diagnostic};
use crate::error::{ErrorKind, MigrationResult};
use crate::migration_error;

#[derive(Serialize)]
struct Line<'a> {
    reported_at: DateTime<Utc>,
    #[serde(flatten)]
    diagnostic: &'a Diagnostic,
}

/// Diagnostics sink appending one JSON object per line to a file.
#[derive(Debug, Clone)]
pub struct JsonLinesDiagnostics {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl JsonLinesDiagnostics {
    /// Opens `path` for appending, creating it when needed.
    pub async fn open(path: impl Into<PathBuf>) -> MigrationResult<Self> {
        let path = path.into();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|err| {
                migration_error!(
                    ErrorKind::IoError,
                    "Diagnostics file could not be opened",
                    format!("could not open `{}`", path.display()),
                    source: err
                )
            })?;

        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DiagnosticsSink for JsonLinesDiagnostics {
    async fn report(&self, diagnostic: Diagnostic) -> MigrationResult<()> {
        log_diagnostic(&diagnostic);

        let mut line = serde_json::to_vec(&Line {
            reported_at: Utc::now(),
            diagnostic: &diagnostic,
        })?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;

        Ok(())
    }
}
