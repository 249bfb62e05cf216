use serde::Deserialize;
use std::path::PathBuf;

use crate::shared::ValidationError;

/// Destination of operator facing diagnostics (conflicts, cycles, unresolved references).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticsConfig {
    /// Diagnostics are only emitted as log events.
    #[default]
    Log,
    /// Diagnostics are additionally appended to a JSON lines file.
    File { path: PathBuf },
}

impl DiagnosticsConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            DiagnosticsConfig::File { path } if path.as_os_str().is_empty() => {
                Err(ValidationError::MissingPath("diagnostics.file"))
            }
            _ => Ok(()),
        }
    }
}
