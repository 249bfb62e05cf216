use serde::Deserialize;

use crate::shared::{BatchConfig, RetryConfig, ValidationError};

/// Settings of the migration engine.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MigrationConfig {
    /// Number of source items fetched per page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Number of items fetched and transformed concurrently.
    #[serde(default = "default_max_item_workers")]
    pub max_item_workers: u16,
    /// Batching of writes to the sink.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Timeouts and retries of source and sink calls.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl MigrationConfig {
    pub const DEFAULT_PAGE_SIZE: u32 = 100;

    pub const DEFAULT_MAX_ITEM_WORKERS: u16 = 8;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.page_size == 0 {
            return Err(ValidationError::invalid(
                "migration.page_size",
                "must be greater than 0",
            ));
        }

        if self.max_item_workers == 0 {
            return Err(ValidationError::invalid(
                "migration.max_item_workers",
                "must be greater than 0",
            ));
        }

        self.batch.validate()?;
        self.retry.validate()
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_item_workers: default_max_item_workers(),
            batch: BatchConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_page_size() -> u32 {
    MigrationConfig::DEFAULT_PAGE_SIZE
}

fn default_max_item_workers() -> u16 {
    MigrationConfig::DEFAULT_MAX_ITEM_WORKERS
}
