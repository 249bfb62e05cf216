use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Sink batching configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Maximum number of row mutations in a single batch submitted to the sink.
    #[serde(default = "default_batch_max_size")]
    pub max_size: usize,
    /// Maximum number of batches, each for a different target table, flushed at the same time.
    #[serde(default = "default_max_concurrent_flushes")]
    pub max_concurrent_flushes: u16,
}

impl BatchConfig {
    /// Default maximum batch size.
    pub const DEFAULT_MAX_SIZE: usize = 500;

    /// Default number of concurrent flushes.
    pub const DEFAULT_MAX_CONCURRENT_FLUSHES: u16 = 4;

    /// Validates batch configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_size == 0 {
            return Err(ValidationError::invalid(
                "batch.max_size",
                "must be greater than 0",
            ));
        }

        if self.max_concurrent_flushes == 0 {
            return Err(ValidationError::invalid(
                "batch.max_concurrent_flushes",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: default_batch_max_size(),
            max_concurrent_flushes: default_max_concurrent_flushes(),
        }
    }
}

fn default_batch_max_size() -> usize {
    BatchConfig::DEFAULT_MAX_SIZE
}

fn default_max_concurrent_flushes() -> u16 {
    BatchConfig::DEFAULT_MAX_CONCURRENT_FLUSHES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = BatchConfig {
            max_size: 0,
            ..BatchConfig::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config: BatchConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(config.max_size, BatchConfig::DEFAULT_MAX_SIZE);
        assert_eq!(
            config.max_concurrent_flushes,
            BatchConfig::DEFAULT_MAX_CONCURRENT_FLUSHES
        );
    }
}
