use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, MigrationResult};

pub const FLUSH_BATCH__BEFORE_WRITE: &str = "flush_batch.before_write";

/// Fails with an error whose kind is selected by the failpoint parameter: `retry`, `skip` or
/// `abort`.
pub fn migrator_fail_point(name: &str) -> MigrationResult<()> {
    fail_point!(name, |parameter| {
        let error_kind = match parameter.as_deref() {
            Some("retry") => ErrorKind::WithRetry,
            Some("abort") => ErrorKind::WithAbort,
            _ => ErrorKind::WithSkip,
        };

        bail!(
            error_kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
