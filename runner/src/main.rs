//! Migration runner binary.
//!
//! Loads the configuration, initializes tracing and runs the film archive migration from the
//! configured WordPress database into the relational target.

use crate::configuration::load_runner_config;
use crate::core::start_migration_with_config;
use crate::error::{RunnerError, RunnerResult};

use telemetry::init_tracing_with_run_id;
use tracing::error;
use uuid::Uuid;

mod configuration;
mod core;
mod error;

fn main() -> RunnerResult<()> {
    let runner_config = load_runner_config()?;

    // Every log line of a run carries its id, so runs can be told apart after a resume.
    let run_id = Uuid::new_v4().to_string();
    let _log_flusher = init_tracing_with_run_id(env!("CARGO_BIN_NAME"), &run_id)
        .map_err(RunnerError::config)?;

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_migration_with_config(runner_config));

    if let Err(err) = result {
        error!("{err}");
        eprint!("{}", err.render_report());

        return Err(err);
    }

    Ok(())
}
