use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::shared::ValidationError;

/// Retry and timeout settings applied to every source and sink call.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for the delay between attempts, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after every failed attempt.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Timeout of a single attempt, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl RetryConfig {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    pub const DEFAULT_INITIAL_DELAY_MS: u64 = 200;
    pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
    pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
    pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validates retry configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::invalid(
                "retry.max_attempts",
                "must be greater than 0",
            ));
        }

        if !(self.backoff_factor >= 1.0) {
            return Err(ValidationError::invalid(
                "retry.backoff_factor",
                "must be at least 1.0",
            ));
        }

        if self.timeout_ms == 0 {
            return Err(ValidationError::invalid(
                "retry.timeout_ms",
                "must be greater than 0",
            ));
        }

        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ValidationError::invalid(
                "retry.initial_delay_ms",
                "must not exceed `retry.max_delay_ms`",
            ));
        }

        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    RetryConfig::DEFAULT_MAX_ATTEMPTS
}

fn default_initial_delay_ms() -> u64 {
    RetryConfig::DEFAULT_INITIAL_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    RetryConfig::DEFAULT_MAX_DELAY_MS
}

fn default_backoff_factor() -> f64 {
    RetryConfig::DEFAULT_BACKOFF_FACTOR
}

fn default_timeout_ms() -> u64 {
    RetryConfig::DEFAULT_TIMEOUT_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retry_config_is_valid() {
        assert!(RetryConfig::default().validate().is_ok());
    }

    #[test]
    fn backoff_factor_below_one_is_rejected() {
        let config = RetryConfig {
            backoff_factor: 0.5,
            ..RetryConfig::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn initial_delay_above_max_delay_is_rejected() {
        let config = RetryConfig {
            initial_delay_ms: 20_000,
            max_delay_ms: 1_000,
            ..RetryConfig::default()
        };

        assert!(config.validate().is_err());
    }
}
