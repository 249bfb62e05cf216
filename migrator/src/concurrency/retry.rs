//! Timeouts and bounded retries with exponential backoff for source and sink calls.

use config::shared::RetryConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{ErrorKind, MigrationError, MigrationResult};
use crate::migration_error;
use crate::policy::build_error_handling_policy;

/// Maximum fraction of the delay added as random jitter.
const JITTER_FACTOR: f64 = 0.3;

/// Calculates the backoff before retry number `attempt` (1-indexed).
///
/// `delay = initial_delay * backoff_factor^(attempt - 1)`, capped at `max_delay`, plus up to
/// 30% random jitter.
pub fn calculate_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let base_delay_ms = config.initial_delay_ms as f64 * config.backoff_factor.powi(exponent);
    let capped_delay_ms = base_delay_ms.min(config.max_delay_ms as f64);

    let jitter = rand::thread_rng().gen_range(0.0..=JITTER_FACTOR);

    Duration::from_millis((capped_delay_ms * (1.0 + jitter)) as u64)
}

/// Runs `operation` with a per-attempt timeout, retrying retryable failures.
///
/// Errors whose handling policy is not retryable are returned immediately. After
/// `max_attempts` attempts the last error is returned.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    mut f: F,
) -> MigrationResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = MigrationResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = match tokio::time::timeout(config.timeout(), f()).await {
            Ok(result) => result,
            Err(_) => Err(timed_out(operation, config)),
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let policy = build_error_handling_policy(&err);
        if !policy.is_retryable() || attempt >= max_attempts {
            return Err(err);
        }

        let backoff = calculate_backoff(config, attempt);
        warn!(
            operation,
            attempt,
            max_attempts,
            backoff_ms = backoff.as_millis() as u64,
            error = %err.description(),
            "operation failed, retrying"
        );
        tokio::time::sleep(backoff).await;
    }
}

fn timed_out(operation: &str, config: &RetryConfig) -> MigrationError {
    migration_error!(
        ErrorKind::OperationTimedOut,
        "Operation timed out",
        format!("`{operation}` did not complete within {}ms", config.timeout_ms)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 10,
            max_delay_ms: 40,
            backoff_factor: 2.0,
            timeout_ms: 50,
        }
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let config = config(5);

        let first = calculate_backoff(&config, 1);
        assert!(first >= Duration::from_millis(10) && first <= Duration::from_millis(13));

        let second = calculate_backoff(&config, 2);
        assert!(second >= Duration::from_millis(20) && second <= Duration::from_millis(26));

        let capped = calculate_backoff(&config, 10);
        assert!(capped >= Duration::from_millis(40) && capped <= Duration::from_millis(52));
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_errors_are_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));

        let result = retry_with_backoff(&config(5), "fetch", || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(migration_error!(ErrorKind::SourceConnectionFailed, "Connection reset"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));

        let err = retry_with_backoff(&config(3), "flush", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(migration_error!(ErrorKind::DatabaseUnavailable, "Database is down"))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DatabaseUnavailable);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_fail_immediately() {
        let calls = Arc::new(AtomicU32::new(0));

        let err = retry_with_backoff(&config(5), "flush", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(migration_error!(ErrorKind::SinkRowRejected, "Constraint violated"))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SinkRowRejected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out() {
        let err = retry_with_backoff(&config(2), "fetch", || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::OperationTimedOut);
    }
}
