use migrator::catalog::film_archive_plan;
use migrator::catalog::movies::MOVIES_TABLE;
use migrator::catalog::people::PEOPLE_TABLE;
use migrator::concurrency::shutdown::create_shutdown_channel;
use migrator::diagnostics::memory::MemoryDiagnostics;
use migrator::engine::MigrationEngine;
use migrator::sink::memory::MemorySink;
use migrator::store::file::FileCheckpointStore;
use migrator::store::memory::MemoryCheckpointStore;
use migrator::test_utils::fixtures::{FilmArchive, movie, person, test_migration_config};
use migrator::test_utils::notifying_store::NotifyingCheckpointStore;
use migrator::types::SourceId;
use telemetry::init_test_tracing;

async fn three_people_and_a_movie() -> FilmArchive {
    FilmArchive::new()
        .with_default_locations()
        .await
        .with_person(person(15, "Graciela Borges", &[1]))
        .await
        .with_person(person(16, "Mercedes Morán", &[]))
        .await
        .with_person(person(742, "Lucrecia Martel", &[1, 2, 3]))
        .await
        .with_movie(movie(900, "La ciénaga"))
        .await
}

#[tokio::test(flavor = "multi_thread")]
async fn interrupted_run_resumes_from_its_cursor() {
    init_test_tracing();
    let archive = three_people_and_a_movie().await;
    let sink = MemorySink::new();
    let diagnostics = MemoryDiagnostics::new();
    let store = NotifyingCheckpointStore::new();

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    store
        .shutdown_on_cursor(
            |cursor| cursor.stage == "people" && cursor.last_item_id.is_some() && !cursor.completed,
            shutdown_tx,
        )
        .await;

    let mut engine = MigrationEngine::new(
        test_migration_config(),
        archive.source.clone(),
        sink.clone(),
        store.clone(),
        diagnostics.clone(),
        shutdown_rx,
    );
    let summary = engine.run(&film_archive_plan()).await.unwrap();

    assert!(summary.interrupted);
    assert!(summary.is_partial());
    // The first page of people was flushed before stopping.
    assert_eq!(sink.rows(PEOPLE_TABLE).await.len(), 2);
    assert!(sink.rows(MOVIES_TABLE).await.is_empty());
    let cursor = store.store().cursor("people").await.unwrap();
    assert_eq!(cursor.last_item_id, Some(SourceId::new(16)));
    assert!(store.store().cursor("locations").await.unwrap().completed);

    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let mut engine = MigrationEngine::new(
        test_migration_config(),
        archive.source.clone(),
        sink.clone(),
        store.store().clone(),
        diagnostics.clone(),
        shutdown_rx,
    );
    let summary = engine.run(&film_archive_plan()).await.unwrap();

    assert!(!summary.interrupted);
    // Locations were completed by the first run and the first page of people is not re-read.
    assert_eq!(summary.migrated, 2);
    assert_eq!(sink.rows(PEOPLE_TABLE).await.len(), 3);
    assert_eq!(sink.rows(MOVIES_TABLE).await.len(), 1);
    assert!(store.store().cursor("people").await.is_none());
    assert!(store.store().mapping_count().await >= 7);
}

#[tokio::test(flavor = "multi_thread")]
async fn every_page_is_checkpointed() {
    init_test_tracing();
    let archive = three_people_and_a_movie().await;
    let store = NotifyingCheckpointStore::wrap(MemoryCheckpointStore::new());
    let people_done = store
        .notify_on_cursor(|cursor| cursor.stage == "people" && cursor.completed)
        .await;

    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let mut engine = MigrationEngine::new(
        test_migration_config(),
        archive.source.clone(),
        MemorySink::new(),
        store.clone(),
        MemoryDiagnostics::new(),
        shutdown_rx,
    );
    engine.run(&film_archive_plan()).await.unwrap();
    people_done.notified().await;

    let people_pages: Vec<_> = store
        .cursor_history()
        .await
        .into_iter()
        .filter(|cursor| cursor.stage == "people")
        .map(|cursor| (cursor.last_item_id.map(|id| id.into_inner()), cursor.completed))
        .collect();
    assert_eq!(
        people_pages,
        vec![(Some(16), false), (Some(742), false), (Some(742), true)]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn mappings_are_saved_after_every_flush() {
    init_test_tracing();
    let archive = FilmArchive::new().with_default_locations().await;
    let sink = MemorySink::new();
    let store = NotifyingCheckpointStore::new();

    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let mut engine = MigrationEngine::new(
        test_migration_config(),
        archive.source.clone(),
        sink.clone(),
        store.clone(),
        MemoryDiagnostics::new(),
        shutdown_rx,
    );
    engine.run(&film_archive_plan()).await.unwrap();

    // The three levels of the tree are written in one stage, each flush is saved on its own.
    let flushed: Vec<usize> = sink.batches().await.into_iter().map(|(_, rows)| rows).collect();
    assert_eq!(flushed, vec![2, 1, 1]);
    assert_eq!(store.mapping_saves().await, flushed);
}

#[tokio::test(flavor = "multi_thread")]
async fn file_store_keeps_the_identifier_map_between_runs() {
    init_test_tracing();
    let archive = three_people_and_a_movie().await;
    let sink = MemorySink::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkpoint.json");

    for _ in 0..2 {
        let store = FileCheckpointStore::open(path.clone()).await.unwrap();
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let mut engine = MigrationEngine::new(
            test_migration_config(),
            archive.source.clone(),
            sink.clone(),
            store,
            MemoryDiagnostics::new(),
            shutdown_rx,
        );
        let summary = engine.run(&film_archive_plan()).await.unwrap();
        assert_eq!(summary.failed, 0);
    }

    assert_eq!(sink.rows(PEOPLE_TABLE).await.len(), 3);
    let reopened = FileCheckpointStore::open(path.clone()).await.unwrap();
    assert_eq!(reopened.path(), path.as_path());
}
