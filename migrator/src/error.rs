//! Error types and result definitions for migration operations.
//!
//! [`MigrationError`] carries a classification ([`ErrorKind`]), a static description, optional
//! dynamic detail, an optional source error, the caller location and a backtrace. Several
//! errors can be aggregated into one, which is how failures of concurrent flushes are reported.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::sync::Arc;

/// Result type used throughout the migrator.
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Detailed payload stored for single [`MigrationError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for migration operations.
#[derive(Debug, Clone)]
pub struct MigrationError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Multiple aggregated errors, for example one per failed table flush.
    Many {
        errors: Vec<MigrationError>,
        location: &'static Location<'static>,
    },
}

/// Categories of errors raised while migrating.
///
/// The kind drives the handling policy in [`crate::policy`].
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Decoding Errors
    MalformedScalarEncoding,
    KeyGrammarNotMatched,

    // Structural Errors
    HierarchyCycleDetected,
    UnresolvedReference,
    IdentifierRemapConflict,

    // Source Errors
    SourceConnectionFailed,
    SourceQueryFailed,

    // Sink Errors
    SinkConnectionFailed,
    SinkWriteFailed,
    SinkRowRejected,

    // Database Errors
    DatabaseUnavailable,
    DatabaseQueryFailed,

    // Checkpoint Errors
    CheckpointStoreFailed,

    // Transport Errors
    OperationTimedOut,

    // Data & Transformation Errors
    ConversionError,
    InvalidData,

    // Configuration Errors
    ConfigError,

    // IO & Serialization Errors
    IoError,
    SerializationError,
    DeserializationError,

    // State Errors
    InvalidState,
    WorkerPanic,

    // Unknown / Uncategorized
    Unknown,

    // Error kinds used by fault injection tests to select a handling directive.
    #[cfg(feature = "failpoints")]
    WithRetry,
    #[cfg(feature = "failpoints")]
    WithSkip,
    #[cfg(feature = "failpoints")]
    WithAbort,
}

impl MigrationError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.description.as_ref(),
            ErrorRepr::Many { .. } => "Multiple errors occurred",
        }
    }

    /// Returns the detailed error information if available.
    ///
    /// For multiple errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Returns `true` when any aggregated error is of `kind`.
    pub fn contains(&self, kind: ErrorKind) -> bool {
        self.kinds().contains(&kind)
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified instance.
    ///
    /// Has no effect on aggregated errors, which forward their first error as source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    /// Creates a [`MigrationError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        MigrationError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for MigrationError {
    fn eq(&self, other: &MigrationError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl Hash for MigrationError {
    /// Hashes the kind and static description only, so occurrences of the same
    /// failure group together regardless of detail or location.
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.repr).hash(state);
        match &self.repr {
            ErrorRepr::Single(payload) => {
                payload.kind.hash(state);
                payload.description.hash(state);
            }
            ErrorRepr::Many { errors, .. } => {
                errors.len().hash(state);
                for error in errors {
                    error.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                write_detail(payload.detail.as_deref(), f, 1)?;
                write_backtrace(payload.backtrace.as_ref(), f, 1)?;

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if errors.is_empty() {
                    write!(f, "\n  (no inner errors provided)")?;
                }

                for (index, error) in errors.iter().enumerate() {
                    let rendered = format!("{error}");
                    let mut lines = rendered.lines();
                    match lines.next() {
                        Some(first_line) => write!(f, "\n  {}. {}", index + 1, first_line)?,
                        None => write!(f, "\n  {}.", index + 1)?,
                    }

                    for line in lines {
                        if line.is_empty() {
                            write!(f, "\n     ")?;
                        } else {
                            write!(f, "\n     {line}")?;
                        }
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

fn write_backtrace(
    backtrace: &Backtrace,
    f: &mut fmt::Formatter<'_>,
    indent: usize,
) -> fmt::Result {
    let indent_str = "  ".repeat(indent);

    let rendered_backtrace = format!("{backtrace}");
    if !rendered_backtrace.trim().is_empty() {
        write!(f, "\n{indent_str}Backtrace:")?;
        for line in rendered_backtrace.lines() {
            if line.trim().is_empty() {
                write!(f, "\n{indent_str}  ")?;
            } else {
                write!(f, "\n{indent_str}  {line}")?;
            }
        }
    }

    Ok(())
}

fn write_detail(detail: Option<&str>, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
    let Some(detail) = detail else {
        return Ok(());
    };

    let indent_str = "  ".repeat(indent);
    if detail.trim().is_empty() {
        return write!(f, "\n{indent_str}Detail: <empty>");
    }

    write!(f, "\n{indent_str}Detail:")?;
    for line in detail.lines() {
        if line.trim().is_empty() {
            write!(f, "\n{indent_str}  ")?;
        } else {
            write!(f, "\n{indent_str}  {line}")?;
        }
    }

    Ok(())
}

/// Creates a [`MigrationError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for MigrationError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> MigrationError {
        MigrationError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`MigrationError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for MigrationError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> MigrationError {
        MigrationError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates a vector of errors.
///
/// A vector with exactly one error yields that error unwrapped.
impl<E> From<Vec<E>> for MigrationError
where
    E: Into<MigrationError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> MigrationError {
        let location = Location::caller();

        let mut errors: Vec<MigrationError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1 {
            if let Some(error) = errors.pop() {
                return error;
            }
        }

        MigrationError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for MigrationError {
    #[track_caller]
    fn from(err: std::io::Error) -> MigrationError {
        let detail = err.to_string();
        MigrationError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Maps JSON failures to [`ErrorKind::SerializationError`] or [`ErrorKind::DeserializationError`].
impl From<serde_json::Error> for MigrationError {
    #[track_caller]
    fn from(err: serde_json::Error) -> MigrationError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        let detail = err.to_string();
        MigrationError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<std::num::ParseIntError> for MigrationError {
    #[track_caller]
    fn from(err: std::num::ParseIntError) -> MigrationError {
        let detail = err.to_string();
        MigrationError::from_components(
            ErrorKind::ConversionError,
            Cow::Borrowed("Integer parsing failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<std::num::TryFromIntError> for MigrationError {
    #[track_caller]
    fn from(err: std::num::TryFromIntError) -> MigrationError {
        let detail = err.to_string();
        MigrationError::from_components(
            ErrorKind::ConversionError,
            Cow::Borrowed("Integer conversion failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`sqlx::Error`] to [`MigrationError`].
///
/// Transport failures and transient server states (SQLSTATE classes 08, 40, 53 and 57) map to
/// [`ErrorKind::DatabaseUnavailable`], everything else to [`ErrorKind::DatabaseQueryFailed`].
impl From<sqlx::Error> for MigrationError {
    #[track_caller]
    fn from(err: sqlx::Error) -> MigrationError {
        let kind = match &err {
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some(code) if is_transient_sqlstate(code) => ErrorKind::DatabaseUnavailable,
                _ => ErrorKind::DatabaseQueryFailed,
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::WorkerCrashed => ErrorKind::DatabaseUnavailable,
            sqlx::Error::Configuration(_) => ErrorKind::ConfigError,
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                ErrorKind::ConversionError
            }
            _ => ErrorKind::DatabaseQueryFailed,
        };

        let detail = err.to_string();
        MigrationError::from_components(
            kind,
            Cow::Borrowed("Database operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<sqlx::migrate::MigrateError> for MigrationError {
    #[track_caller]
    fn from(err: sqlx::migrate::MigrateError) -> MigrationError {
        let detail = err.to_string();
        MigrationError::from_components(
            ErrorKind::CheckpointStoreFailed,
            Cow::Borrowed("Checkpoint store migrations failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<tokio::time::error::Elapsed> for MigrationError {
    #[track_caller]
    fn from(err: tokio::time::error::Elapsed) -> MigrationError {
        MigrationError::from_components(
            ErrorKind::OperationTimedOut,
            Cow::Borrowed("Operation timed out"),
            None,
            Some(Arc::new(err)),
        )
    }
}

fn is_transient_sqlstate(code: &str) -> bool {
    ["08", "40", "53", "57"]
        .iter()
        .any(|class| code.starts_with(class))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration_error;

    #[test]
    fn aggregate_of_one_error_is_unwrapped() {
        let err = MigrationError::from(vec![migration_error!(
            ErrorKind::SinkWriteFailed,
            "Batch failed"
        )]);

        assert_eq!(err.kind(), ErrorKind::SinkWriteFailed);
        assert!(err.backtrace().is_some());
    }

    #[test]
    fn aggregate_exposes_all_kinds() {
        let err = MigrationError::from(vec![
            migration_error!(ErrorKind::SinkWriteFailed, "Batch failed"),
            migration_error!(ErrorKind::IdentifierRemapConflict, "Remap", "people/1"),
        ]);

        assert_eq!(err.kind(), ErrorKind::SinkWriteFailed);
        assert!(err.contains(ErrorKind::IdentifierRemapConflict));
        assert!(err.to_string().starts_with("[Many] 2 errors aggregated"));
    }

    #[test]
    fn display_includes_detail_block() {
        let err = migration_error!(
            ErrorKind::MalformedScalarEncoding,
            "Length prefix mismatch",
            "declared 4 bytes, found 3"
        );

        let rendered = err.to_string();

        assert!(rendered.starts_with("[MalformedScalarEncoding] Length prefix mismatch @"));
        assert!(rendered.contains("Detail:\n    declared 4 bytes, found 3"));
    }

    #[test]
    fn transient_sqlstates_are_recognized() {
        assert!(is_transient_sqlstate("08006"));
        assert!(is_transient_sqlstate("40001"));
        assert!(!is_transient_sqlstate("23505"));
    }
}
