use serde::Deserialize;

use crate::Config;
use crate::shared::{
    CheckpointStoreConfig, DiagnosticsConfig, MigrationConfig, SinkConfig, SourceConfig,
    ValidationError,
};

/// Complete configuration of a migration run.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid leaking
/// connection secrets into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Legacy content store to read from.
    pub source: SourceConfig,
    /// Relational store to write to.
    pub sink: SinkConfig,
    /// Persistence of identifier mappings and cursors.
    pub checkpoint_store: CheckpointStoreConfig,
    /// Destination of operator diagnostics.
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
}

impl RunnerConfig {
    /// Validates every section of the configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate()?;
        self.sink.validate()?;
        self.checkpoint_store.validate()?;
        self.diagnostics.validate()?;
        self.migration.validate()
    }
}

impl Config for RunnerConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
