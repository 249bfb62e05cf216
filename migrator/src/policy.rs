use crate::error::{ErrorKind, MigrationError};

/// What the engine does with a failed operation.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorDirective {
    /// Transient failure, the call is retried with backoff.
    Retry,
    /// The affected row, item or batch is reported and the run continues.
    Skip,
    /// The run stops after persisting what it can.
    Abort,
}

/// Policy describing how a [`MigrationError`] is handled.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ErrorHandlingPolicy {
    directive: ErrorDirective,
    solution: Option<&'static str>,
}

impl ErrorHandlingPolicy {
    const fn new(directive: ErrorDirective, solution: Option<&'static str>) -> Self {
        Self {
            directive,
            solution,
        }
    }

    pub fn directive(&self) -> ErrorDirective {
        self.directive
    }

    /// Returns an optional operator-facing solution message.
    pub fn solution(&self) -> Option<&'static str> {
        self.solution
    }

    pub fn is_retryable(&self) -> bool {
        self.directive == ErrorDirective::Retry
    }

    pub fn is_fatal(&self) -> bool {
        self.directive == ErrorDirective::Abort
    }
}

/// Builds the [`ErrorHandlingPolicy`] for `error`.
///
/// Aggregated errors are fatal as soon as one of them is.
pub fn build_error_handling_policy(error: &MigrationError) -> ErrorHandlingPolicy {
    let kinds = error.kinds();
    if let Some(fatal) = kinds
        .iter()
        .map(|kind| policy_for_kind(*kind))
        .find(ErrorHandlingPolicy::is_fatal)
    {
        return fatal;
    }

    policy_for_kind(error.kind())
}

fn policy_for_kind(kind: ErrorKind) -> ErrorHandlingPolicy {
    match kind {
        // Keep this list narrow: only failures expected to recover without intervention.
        ErrorKind::SourceConnectionFailed
        | ErrorKind::SinkConnectionFailed
        | ErrorKind::DatabaseUnavailable
        | ErrorKind::OperationTimedOut
        | ErrorKind::IoError => ErrorHandlingPolicy::new(ErrorDirective::Retry, None),

        ErrorKind::IdentifierRemapConflict => ErrorHandlingPolicy::new(
            ErrorDirective::Abort,
            Some(
                "A source identifier was mapped to two target rows. Inspect the checkpoint store and the target table before re-running.",
            ),
        ),
        ErrorKind::CheckpointStoreFailed => ErrorHandlingPolicy::new(
            ErrorDirective::Abort,
            Some("Verify the checkpoint store is reachable and writable, then resume the run."),
        ),
        ErrorKind::ConfigError => ErrorHandlingPolicy::new(
            ErrorDirective::Abort,
            Some("Fix the configuration and restart the run."),
        ),
        ErrorKind::InvalidState | ErrorKind::WorkerPanic => ErrorHandlingPolicy::new(
            ErrorDirective::Abort,
            Some("This indicates a bug in the migrator. Resume from the last checkpoint after reporting it."),
        ),

        ErrorKind::SourceQueryFailed => ErrorHandlingPolicy::new(
            ErrorDirective::Skip,
            Some("Verify the source tables and the configured table prefix."),
        ),
        ErrorKind::SinkWriteFailed
        | ErrorKind::SinkRowRejected
        | ErrorKind::DatabaseQueryFailed => ErrorHandlingPolicy::new(
            ErrorDirective::Skip,
            Some("Verify the target schema matches the expected tables and unique constraints."),
        ),

        #[cfg(feature = "failpoints")]
        ErrorKind::WithRetry => {
            ErrorHandlingPolicy::new(ErrorDirective::Retry, Some("Will retry automatically."))
        }
        #[cfg(feature = "failpoints")]
        ErrorKind::WithSkip => {
            ErrorHandlingPolicy::new(ErrorDirective::Skip, Some("The batch is skipped."))
        }
        #[cfg(feature = "failpoints")]
        ErrorKind::WithAbort => {
            ErrorHandlingPolicy::new(ErrorDirective::Abort, Some("The run is aborted."))
        }

        _ => ErrorHandlingPolicy::new(ErrorDirective::Skip, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration_error;

    fn err(kind: ErrorKind) -> MigrationError {
        migration_error!(kind, "test error")
    }

    #[test]
    fn transient_failures_are_retried() {
        for kind in [
            ErrorKind::SourceConnectionFailed,
            ErrorKind::SinkConnectionFailed,
            ErrorKind::DatabaseUnavailable,
            ErrorKind::OperationTimedOut,
        ] {
            assert_eq!(
                build_error_handling_policy(&err(kind)).directive(),
                ErrorDirective::Retry
            );
        }
    }

    #[test]
    fn remap_conflict_aborts_with_solution() {
        let policy = build_error_handling_policy(&err(ErrorKind::IdentifierRemapConflict));

        assert!(policy.is_fatal());
        assert!(policy.solution().is_some());
    }

    #[test]
    fn decoding_errors_are_skipped() {
        let policy = build_error_handling_policy(&err(ErrorKind::MalformedScalarEncoding));

        assert_eq!(policy.directive(), ErrorDirective::Skip);
    }

    #[test]
    fn aggregate_with_fatal_member_is_fatal() {
        let aggregate = MigrationError::from(vec![
            err(ErrorKind::SinkWriteFailed),
            err(ErrorKind::IdentifierRemapConflict),
        ]);

        assert!(build_error_handling_policy(&aggregate).is_fatal());
    }
}
