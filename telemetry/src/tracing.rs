use std::io;
use std::sync::Once;

use config::environment::Environment;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

/// Filter used by tests when `RUST_LOG` is not set.
const DEFAULT_TEST_FILTER: &str = "warn";

static INIT_TEST_TRACING: Once = Once::new();

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to determine runtime environment: {0}")]
    Environment(#[from] io::Error),

    #[error("failed to bridge `log` records into tracing: {0}")]
    LogTracer(#[from] tracing_log::log::SetLoggerError),

    #[error("failed to install the global tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Keeps the non-blocking writer alive. Dropping it flushes buffered log lines.
#[must_use = "dropping the flusher loses buffered log lines"]
pub struct LogFlusher {
    _guard: WorkerGuard,
}

/// Installs the global subscriber for `app_name`.
///
/// Logs are JSON in staging and production and human readable in development. Output goes
/// through a non-blocking stdout writer; keep the returned [`LogFlusher`] alive until exit.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    init_tracing_with_fields(app_name, None)
}

/// Same as [`init_tracing`] but attaches `run_id` to every JSON log line.
pub fn init_tracing_with_run_id(app_name: &str, run_id: &str) -> Result<LogFlusher, TracingError> {
    init_tracing_with_fields(app_name, Some(run_id))
}

fn init_tracing_with_fields(
    app_name: &str,
    run_id: Option<&str>,
) -> Result<LogFlusher, TracingError> {
    let environment = Environment::load()?;

    LogTracer::init()?;

    let (writer, guard) = tracing_appender::non_blocking(io::stdout());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = if environment.structured_logs() {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(writer)
            .boxed()
    } else {
        fmt::layer().pretty().with_writer(writer).boxed()
    };

    Registry::default().with(filter).with(fmt_layer).try_init()?;

    match run_id {
        Some(run_id) => {
            tracing::info!(app = app_name, run_id, %environment, "tracing initialized")
        }
        None => tracing::info!(app = app_name, %environment, "tracing initialized"),
    }

    Ok(LogFlusher { _guard: guard })
}

/// Installs a test writer subscriber once per test binary.
///
/// Subsequent calls are no-ops so every test can call it unconditionally.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_FILTER));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
