use migrator::error::MigrationError;
use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

pub type RunnerResult<T> = Result<T, RunnerError>;

/// Captured backtrace wrapper to avoid thiserror's unstable feature detection.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type of the runner binary.
#[derive(Debug)]
pub enum RunnerError {
    /// The migration aborted.
    Migration(MigrationError),
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    /// The checkpoint schema could not be migrated.
    Schema(sqlx::Error, CapturedBacktrace),
    Io(std::io::Error, CapturedBacktrace),
}

impl RunnerError {
    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            RunnerError::Migration(_) => "migration error",
            RunnerError::Config(_, _) => "configuration error",
            RunnerError::Schema(_, _) => "checkpoint schema error",
            RunnerError::Io(_, _) => "i/o error",
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            RunnerError::Migration(err) => err.backtrace(),
            RunnerError::Config(_, cb) => Some(&cb.0),
            RunnerError::Schema(_, cb) => Some(&cb.0),
            RunnerError::Io(_, cb) => Some(&cb.0),
        }
    }

    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        RunnerError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Returns a user-oriented report for terminal output.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("migration run failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {self}\n"));

        let mut source = Error::source(self);
        let mut idx = 1usize;
        while let Some(err) = source {
            out.push_str(&format!("cause {idx}: {err}\n"));
            source = err.source();
            idx += 1;
        }

        if should_render_backtrace()
            && let Some(backtrace) = self.backtrace()
        {
            out.push_str("backtrace:\n");
            out.push_str(&backtrace.to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerError::Migration(err) => write!(f, "{err}"),
            RunnerError::Config(source, _) => write!(f, "configuration error: {source}"),
            RunnerError::Schema(source, _) => write!(f, "checkpoint schema error: {source}"),
            RunnerError::Io(source, _) => write!(f, "i/o error: {source}"),
        }
    }
}

impl Error for RunnerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RunnerError::Migration(err) => err.source(),
            RunnerError::Config(source, _) => Some(source.as_ref()),
            RunnerError::Schema(source, _) => Some(source),
            RunnerError::Io(source, _) => Some(source),
        }
    }
}

impl From<sqlx::Error> for RunnerError {
    fn from(err: sqlx::Error) -> Self {
        RunnerError::Schema(err, CapturedBacktrace::capture())
    }
}

impl From<std::io::Error> for RunnerError {
    fn from(err: std::io::Error) -> Self {
        RunnerError::Io(err, CapturedBacktrace::capture())
    }
}

impl From<MigrationError> for RunnerError {
    fn from(err: MigrationError) -> Self {
        RunnerError::Migration(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migrator::error::ErrorKind;
    use migrator::migration_error;

    #[test]
    fn report_names_the_category_and_the_error() {
        let err = RunnerError::from(migration_error!(
            ErrorKind::IdentifierRemapConflict,
            "Source identifier already mapped"
        ));

        let report = err.render_report();

        assert!(report.starts_with("migration run failed\n"));
        assert!(report.contains("category: migration error\n"));
        assert!(report.contains("Source identifier already mapped"));
    }

    #[test]
    fn io_errors_keep_their_source() {
        let err = RunnerError::from(std::io::Error::other("disk full"));

        assert_eq!(err.category(), "i/o error");
        assert_eq!(err.to_string(), "i/o error: disk full");
        assert!(err.source().is_some());
    }
}
