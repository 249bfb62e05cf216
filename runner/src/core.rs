use config::shared::{
    BatchConfig, CheckpointStoreConfig, DiagnosticsConfig, MigrationConfig, MySqlConnectionConfig,
    PgConnectionConfig, RetryConfig, RunnerConfig, SinkConfig, SourceConfig,
};
use migrator::catalog::film_archive_plan;
use migrator::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use migrator::diagnostics::json_lines::JsonLinesDiagnostics;
use migrator::diagnostics::{DiagnosticsSink, LogDiagnostics};
use migrator::engine::MigrationEngine;
use migrator::migrations::apply_checkpoint_migrations;
use migrator::sink::Sink;
use migrator::sink::memory::MemorySink;
use migrator::sink::postgres::PostgresSink;
use migrator::source::Source;
use migrator::source::wordpress::WordPressSource;
use migrator::store::CheckpointStore;
use migrator::store::file::FileCheckpointStore;
use migrator::store::memory::MemoryCheckpointStore;
use migrator::store::postgres::PostgresCheckpointStore;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::RunnerResult;

/// Runs the film archive migration described by `runner_config`.
///
/// Source, sink, checkpoint store and diagnostics are dispatched statically, one level at a
/// time, so the engine is monomorphized for each combination.
pub async fn start_migration_with_config(runner_config: RunnerConfig) -> RunnerResult<()> {
    info!("starting migration run");

    log_config(&runner_config);

    match &runner_config.source {
        SourceConfig::WordPress {
            connection,
            table_prefix,
            max_connections,
        } => {
            let source = WordPressSource::new(connection, table_prefix, *max_connections);
            with_source(&runner_config, source).await
        }
    }
}

async fn with_source<Src>(runner_config: &RunnerConfig, source: Src) -> RunnerResult<()>
where
    Src: Source + Sync,
{
    match &runner_config.sink {
        SinkConfig::Memory => {
            warn!("using the memory sink, nothing will be written to the target database");
            with_sink(runner_config, source, MemorySink::new()).await
        }
        SinkConfig::Postgres {
            connection,
            schema,
            max_connections,
        } => {
            let sink = PostgresSink::new(connection, schema, *max_connections);
            with_sink(runner_config, source, sink).await
        }
    }
}

async fn with_sink<Src, Snk>(runner_config: &RunnerConfig, source: Src, sink: Snk) -> RunnerResult<()>
where
    Src: Source + Sync,
    Snk: Sink + Sync,
{
    match &runner_config.checkpoint_store {
        CheckpointStoreConfig::Memory => {
            warn!("using the memory checkpoint store, an interrupted run cannot be resumed");
            with_store(runner_config, source, sink, MemoryCheckpointStore::new()).await
        }
        CheckpointStoreConfig::File { path } => {
            let store = FileCheckpointStore::open(path.clone()).await?;
            with_store(runner_config, source, sink, store).await
        }
        CheckpointStoreConfig::Postgres { connection } => {
            apply_checkpoint_migrations(connection).await?;
            let store = PostgresCheckpointStore::new(connection);
            with_store(runner_config, source, sink, store).await
        }
    }
}

async fn with_store<Src, Snk, St>(
    runner_config: &RunnerConfig,
    source: Src,
    sink: Snk,
    store: St,
) -> RunnerResult<()>
where
    Src: Source + Sync,
    Snk: Sink + Sync,
    St: CheckpointStore + Sync,
{
    match &runner_config.diagnostics {
        DiagnosticsConfig::Log => {
            run_migration(runner_config, source, sink, store, LogDiagnostics).await
        }
        DiagnosticsConfig::File { path } => {
            let diagnostics = JsonLinesDiagnostics::open(path.clone()).await?;
            run_migration(runner_config, source, sink, store, diagnostics).await
        }
    }
}

#[tracing::instrument(skip_all, fields(source = Src::name(), sink = Snk::name()))]
async fn run_migration<Src, Snk, St, D>(
    runner_config: &RunnerConfig,
    source: Src,
    sink: Snk,
    store: St,
    diagnostics: D,
) -> RunnerResult<()>
where
    Src: Source + Sync,
    Snk: Sink + Sync,
    St: CheckpointStore + Sync,
    D: DiagnosticsSink + Sync,
{
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let shutdown_handle = spawn_shutdown_listener(shutdown_tx);

    let mut engine = MigrationEngine::new(
        runner_config.migration.clone(),
        source,
        sink,
        store,
        diagnostics,
        shutdown_rx,
    );
    let result = engine.run(&film_archive_plan()).await;

    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    let summary = result?;
    if summary.interrupted {
        warn!(%summary, "migration interrupted, run again to resume from the last checkpoint");
    } else if summary.is_partial() {
        warn!(%summary, "migration completed with anomalies, see the diagnostics");
    } else {
        info!(%summary, "migration completed");
    }

    Ok(())
}

/// Requests a checkpoint-and-stop on SIGINT or SIGTERM.
///
/// The engine notices the request at the next page boundary, flushes what it holds and
/// persists its cursor before returning.
fn spawn_shutdown_listener(shutdown_tx: ShutdownTx) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                warn!(error = %err, "failed to register SIGTERM handler, only ctrl+c stops the run");
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("sigint (ctrl+c) received, stopping at the next checkpoint");
                    shutdown_tx.shutdown();
                }
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("sigint (ctrl+c) received, stopping at the next checkpoint");
            }
            _ = sigterm.recv() => {
                info!("sigterm received, stopping at the next checkpoint");
            }
        }

        shutdown_tx.shutdown();
    })
}

fn log_config(config: &RunnerConfig) {
    match &config.source {
        SourceConfig::WordPress {
            connection,
            table_prefix,
            max_connections,
        } => {
            log_mysql_connection_config(connection);
            debug!(%table_prefix, max_connections, "wordpress source config");
        }
    }

    match &config.sink {
        SinkConfig::Memory => debug!("using memory sink config"),
        SinkConfig::Postgres {
            connection,
            schema,
            max_connections,
        } => {
            log_pg_connection_config("target", connection);
            debug!(%schema, max_connections, "postgres sink config");
        }
    }

    match &config.checkpoint_store {
        CheckpointStoreConfig::Memory => debug!("using memory checkpoint store config"),
        CheckpointStoreConfig::File { path } => {
            debug!(path = %path.display(), "using file checkpoint store config")
        }
        CheckpointStoreConfig::Postgres { connection } => {
            log_pg_connection_config("checkpoint store", connection)
        }
    }

    log_migration_config(&config.migration);
}

fn log_mysql_connection_config(config: &MySqlConnectionConfig) {
    debug!(
        host = %config.host,
        port = config.port,
        dbname = %config.name,
        username = %config.username,
        "source mysql connection config",
    );
}

fn log_pg_connection_config(role: &str, config: &PgConnectionConfig) {
    debug!(
        role,
        host = %config.host,
        port = config.port,
        dbname = %config.name,
        username = %config.username,
        tls_enabled = config.tls.enabled,
        "postgres connection config",
    );
}

fn log_migration_config(config: &MigrationConfig) {
    debug!(
        page_size = config.page_size,
        max_item_workers = config.max_item_workers,
        "migration config"
    );
    log_batch_config(&config.batch);
    log_retry_config(&config.retry);
}

fn log_batch_config(config: &BatchConfig) {
    debug!(
        max_size = config.max_size,
        max_concurrent_flushes = config.max_concurrent_flushes,
        "batch config"
    );
}

fn log_retry_config(config: &RetryConfig) {
    debug!(
        max_attempts = config.max_attempts,
        initial_delay_ms = config.initial_delay_ms,
        max_delay_ms = config.max_delay_ms,
        backoff_factor = config.backoff_factor,
        timeout_ms = config.timeout_ms,
        "retry config"
    );
}
