use migrator::catalog::film_archive_plan;
use migrator::catalog::locations::LOCATIONS_TABLE;
use migrator::concurrency::shutdown::create_shutdown_channel;
use migrator::diagnostics::Diagnostic;
use migrator::diagnostics::memory::MemoryDiagnostics;
use migrator::engine::{MigrationEngine, MigrationSummary};
use migrator::error::{ErrorKind, MigrationResult};
use migrator::failpoints::FLUSH_BATCH__BEFORE_WRITE;
use migrator::sink::memory::MemorySink;
use migrator::store::memory::MemoryCheckpointStore;
use migrator::test_utils::failpoints::CustomFailScenario;
use migrator::test_utils::fixtures::{FilmArchive, test_migration_config};
use telemetry::init_test_tracing;

async fn migrate_locations(
    sink: &MemorySink,
    store: &MemoryCheckpointStore,
    diagnostics: &MemoryDiagnostics,
) -> MigrationResult<MigrationSummary> {
    let archive = FilmArchive::new().with_default_locations().await;
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let mut engine = MigrationEngine::new(
        test_migration_config(),
        archive.source,
        sink.clone(),
        store.clone(),
        diagnostics.clone(),
        shutdown_rx,
    );

    engine.run(&film_archive_plan()).await
}

#[tokio::test(flavor = "multi_thread")]
async fn retryable_flush_errors_are_retried() {
    init_test_tracing();
    let _scenario = CustomFailScenario::setup(&[(FLUSH_BATCH__BEFORE_WRITE, "2*return(retry)")]);

    let sink = MemorySink::new();
    let summary = migrate_locations(
        &sink,
        &MemoryCheckpointStore::new(),
        &MemoryDiagnostics::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.migrated, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(sink.rows(LOCATIONS_TABLE).await.len(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn skippable_flush_error_fails_only_its_batch() {
    init_test_tracing();
    let _scenario = CustomFailScenario::setup(&[(FLUSH_BATCH__BEFORE_WRITE, "1*return(skip)")]);

    let diagnostics = MemoryDiagnostics::new();
    let summary = migrate_locations(&MemorySink::new(), &MemoryCheckpointStore::new(), &diagnostics)
        .await
        .unwrap();

    // The roots are lost, so their descendants stay unresolved.
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.unresolved, 2);
    assert!(summary.is_partial());

    let failed = diagnostics
        .matching(|diagnostic| matches!(diagnostic, Diagnostic::BatchFailed { .. }))
        .await;
    assert_eq!(failed.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn fatal_flush_error_aborts_and_keeps_the_checkpoint() {
    init_test_tracing();
    let _scenario = CustomFailScenario::setup(&[(FLUSH_BATCH__BEFORE_WRITE, "1*return(abort)")]);

    let sink = MemorySink::new();
    let store = MemoryCheckpointStore::new();
    let diagnostics = MemoryDiagnostics::new();
    let err = migrate_locations(&sink, &store, &diagnostics)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WithAbort);
    assert!(sink.rows(LOCATIONS_TABLE).await.is_empty());
    assert!(store.cursor("locations").await.is_none());

    let fatal = diagnostics
        .matching(|diagnostic| matches!(diagnostic, Diagnostic::Fatal { .. }))
        .await;
    assert_eq!(fatal.len(), 1);

    // The failpoint fired once, so a second run goes through.
    let summary = migrate_locations(&sink, &store, &diagnostics).await.unwrap();
    assert_eq!(summary.migrated, 4);
}
