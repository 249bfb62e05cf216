use serde::Deserialize;
use std::path::PathBuf;

use crate::shared::{PgConnectionConfig, ValidationError};

/// Where identifier mappings and page cursors are persisted between runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStoreConfig {
    /// Nothing survives the process. Only suitable for tests and dry runs.
    Memory,
    /// A single JSON document rewritten on every checkpoint.
    File { path: PathBuf },
    /// Tables in the `migrator` schema of a Postgres database.
    Postgres { connection: PgConnectionConfig },
}

impl CheckpointStoreConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            CheckpointStoreConfig::Memory => Ok(()),
            CheckpointStoreConfig::File { path } => {
                if path.as_os_str().is_empty() {
                    return Err(ValidationError::MissingPath("checkpoint_store.file"));
                }

                Ok(())
            }
            CheckpointStoreConfig::Postgres { connection } => connection.validate(),
        }
    }
}
