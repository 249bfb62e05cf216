use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use migrator::catalog::film_archive_plan;
use migrator::catalog::movies::{
    MOVIE_CAST_TABLE, MOVIE_COUNTRIES_TABLE, MOVIE_CREW_TABLE, MOVIES_TABLE, MoviesTransform,
    ROLES_TABLE,
};
use migrator::catalog::people::{PEOPLE_TABLE, PERSON_NATIONALITIES_TABLE, PeopleTransform};
use migrator::catalog::locations::{LOCATION_TAXONOMY, LOCATIONS_TABLE};
use migrator::concurrency::shutdown::create_shutdown_channel;
use migrator::diagnostics::Diagnostic;
use migrator::diagnostics::memory::MemoryDiagnostics;
use migrator::engine::{MigrationEngine, MigrationPlan, Stage};
use migrator::error::{ErrorKind, MigrationResult};
use migrator::hierarchy::HierarchyNode;
use migrator::migration_error;
use migrator::sink::Sink;
use migrator::sink::memory::MemorySink;
use migrator::source::memory::MemorySource;
use migrator::source::{ItemFilter, Source};
use migrator::store::CheckpointStore;
use migrator::store::memory::MemoryCheckpointStore;
use migrator::test_utils::fixtures::{
    FilmArchive, PostRows, country, movie, person, serialized_ids, test_migration_config,
};
use migrator::test_utils::test_sink_wrapper::FaultInjectingSink;
use migrator::types::{
    Cell, EntityType, MigrationBatch, RawRow, RowOutcome, SourceId, SourceKey, TargetId,
};
use telemetry::init_test_tracing;

fn engine<Snk, St>(
    archive: &FilmArchive,
    sink: Snk,
    store: St,
    diagnostics: &MemoryDiagnostics,
) -> MigrationEngine<MemorySource, Snk, St, MemoryDiagnostics>
where
    Snk: Sink + Sync,
    St: CheckpointStore + Sync,
{
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    MigrationEngine::new(
        test_migration_config(),
        archive.source.clone(),
        sink,
        store,
        diagnostics.clone(),
        shutdown_rx,
    )
}

async fn target_of(
    engine: &MigrationEngine<MemorySource, impl Sink + Sync, impl CheckpointStore + Sync, MemoryDiagnostics>,
    entity: EntityType,
    key: SourceKey,
) -> Cell {
    let target = engine
        .mapper()
        .lookup(entity, &key)
        .await
        .unwrap_or_else(|| panic!("{entity} {key} is not mapped"));

    Cell::from(target)
}

fn column<'a>(row: &'a BTreeMap<String, Cell>, column: &str) -> &'a Cell {
    row.get(column)
        .unwrap_or_else(|| panic!("row has no column `{column}`"))
}

/// A movie directed by person 742 whose crew record is stored in both tracks.
fn la_cienaga() -> PostRows {
    let martel = serialized_ids(&[742]);
    let borges = serialized_ids(&[15]);

    movie(900, "La ciénaga")
        .meta("post_name", "la-cienaga")
        .slot(
            "ficha_tecnica_direccion",
            false,
            0,
            &[("persona", martel.as_str()), ("rol", "Director")],
        )
        .slot(
            "ficha_tecnica_direccion",
            true,
            0,
            &[("persona", "742"), ("rol", "Director"), ("comentario", "Ópera prima")],
        )
        .slot(
            "interpretes",
            false,
            0,
            &[
                ("interprete", borges.as_str()),
                ("nombre_del_personaje", "Mecha"),
                ("protagonista", "1"),
            ],
        )
}

async fn default_archive() -> FilmArchive {
    FilmArchive::new()
        .with_default_locations()
        .await
        .with_person(person(742, "Lucrecia Martel", &[1, 2, 3]))
        .await
        .with_person(person(15, "Graciela Borges", &[]))
        .await
        .with_movie(la_cienaga())
        .await
}

#[tokio::test(flavor = "multi_thread")]
async fn locations_are_written_after_their_parents() {
    init_test_tracing();
    let archive = FilmArchive::new().with_default_locations().await;
    let sink = MemorySink::new();
    let diagnostics = MemoryDiagnostics::new();
    let mut engine = engine(&archive, sink.clone(), MemoryCheckpointStore::new(), &diagnostics);

    let summary = engine.run(&film_archive_plan()).await.unwrap();

    assert_eq!(summary.migrated, 4);
    assert!(!summary.is_partial());

    let argentina = target_of(&engine, EntityType::Location, SourceId::new(1).as_key()).await;
    let buenos_aires = target_of(&engine, EntityType::Location, SourceId::new(2).as_key()).await;
    let la_plata = target_of(&engine, EntityType::Location, SourceId::new(3).as_key()).await;

    let Cell::I64(buenos_aires_id) = buenos_aires else {
        panic!("unexpected target id {buenos_aires:?}");
    };
    let Cell::I64(la_plata_id) = la_plata else {
        panic!("unexpected target id {la_plata:?}");
    };
    let buenos_aires_row = sink.row(LOCATIONS_TABLE, buenos_aires_id).await.unwrap();
    let la_plata_row = sink.row(LOCATIONS_TABLE, la_plata_id).await.unwrap();
    assert_eq!(column(&buenos_aires_row, "parent_id"), &argentina);
    assert_eq!(column(&la_plata_row, "parent_id"), &buenos_aires);

    // Roots are flushed together, then one batch per level.
    assert_eq!(
        sink.batches().await,
        vec![
            (LOCATIONS_TABLE.to_string(), 2),
            (LOCATIONS_TABLE.to_string(), 1),
            (LOCATIONS_TABLE.to_string(), 1),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn film_archive_migrates_people_movies_crew_and_cast() {
    init_test_tracing();
    let archive = default_archive().await;
    let sink = MemorySink::new();
    let diagnostics = MemoryDiagnostics::new();
    let mut engine = engine(&archive, sink.clone(), MemoryCheckpointStore::new(), &diagnostics);

    let summary = engine.run(&film_archive_plan()).await.unwrap();

    assert_eq!(summary.conflicted, 0);
    assert_eq!(summary.unresolved, 0);
    assert_eq!(summary.failed, 0);
    assert!(!summary.interrupted);

    let martel = sink.row(PEOPLE_TABLE, 742).await.unwrap();
    assert_eq!(
        column(&martel, "first_name"),
        &Cell::Text("Lucrecia".to_string())
    );
    let la_plata = target_of(&engine, EntityType::Location, SourceId::new(3).as_key()).await;
    assert_eq!(column(&martel, "birth_location_id"), &la_plata);

    let movie = sink.row(MOVIES_TABLE, 900).await.unwrap();
    assert_eq!(
        column(&movie, "status"),
        &Cell::Text("PUBLISHED".to_string())
    );

    assert_eq!(sink.rows(ROLES_TABLE).await.len(), 1);
    let director = target_of(&engine, EntityType::Role, SourceKey::from_name("Director")).await;

    // Both tracks hold the same crew member, so they merge into one row.
    let crew = sink.rows(MOVIE_CREW_TABLE).await;
    assert_eq!(crew.len(), 1);
    assert_eq!(column(&crew[0], "movie_id"), &Cell::I64(900));
    assert_eq!(column(&crew[0], "person_id"), &Cell::I64(742));
    assert_eq!(column(&crew[0], "role_id"), &director);
    assert_eq!(
        column(&crew[0], "department"),
        &Cell::Text("direccion".to_string())
    );
    assert_eq!(
        column(&crew[0], "notes"),
        &Cell::Text("Ópera prima".to_string())
    );

    let cast = sink.rows(MOVIE_CAST_TABLE).await;
    assert_eq!(cast.len(), 1);
    assert_eq!(column(&cast[0], "person_id"), &Cell::I64(15));
    assert_eq!(column(&cast[0], "is_principal"), &Cell::Bool(true));
}

#[tokio::test(flavor = "multi_thread")]
async fn countries_link_nationalities_and_coproductions_to_locations() {
    init_test_tracing();
    let nationalities = serialized_ids(&[7361, 7362]);
    let coproduction = serialized_ids(&[7362]);
    let archive = FilmArchive::new()
        .with_default_locations()
        .await
        .with_countries(vec![country(7361, "Argentina"), country(7362, "España")])
        .await
        .with_person(person(742, "Lucrecia Martel", &[]).meta("nacionalidad", &nationalities))
        .await
        .with_movie(movie(900, "La ciénaga").meta("coproduccion", &coproduction))
        .await;
    let sink = MemorySink::new();
    let diagnostics = MemoryDiagnostics::new();
    let mut engine = engine(&archive, sink.clone(), MemoryCheckpointStore::new(), &diagnostics);

    let summary = engine.run(&film_archive_plan()).await.unwrap();

    assert_eq!(summary.unresolved, 0);
    assert_eq!(summary.failed, 0);

    // Argentina already is a root location, España is added next to it.
    let argentina = target_of(&engine, EntityType::Location, SourceId::new(1).as_key()).await;
    let espana = target_of(&engine, EntityType::Country, SourceId::new(7362).as_key()).await;
    assert_eq!(
        target_of(&engine, EntityType::Country, SourceId::new(7361).as_key()).await,
        argentina
    );
    assert_eq!(sink.rows(LOCATIONS_TABLE).await.len(), 5);

    let nationalities: Vec<_> = sink
        .rows(PERSON_NATIONALITIES_TABLE)
        .await
        .iter()
        .map(|row| (column(row, "person_id").clone(), column(row, "location_id").clone()))
        .collect();
    assert_eq!(
        nationalities,
        vec![(Cell::I64(742), argentina), (Cell::I64(742), espana.clone())]
    );

    let countries = sink.rows(MOVIE_COUNTRIES_TABLE).await;
    assert_eq!(countries.len(), 1);
    assert_eq!(column(&countries[0], "movie_id"), &Cell::I64(900));
    assert_eq!(column(&countries[0], "country_id"), &espana);
    assert_eq!(column(&countries[0], "is_primary"), &Cell::Bool(false));
}

#[tokio::test(flavor = "multi_thread")]
async fn rerunning_the_migration_creates_no_duplicate_rows() {
    init_test_tracing();
    let archive = default_archive().await;
    let sink = MemorySink::new();
    let store = MemoryCheckpointStore::new();
    let diagnostics = MemoryDiagnostics::new();

    let tables = [
        LOCATIONS_TABLE,
        PEOPLE_TABLE,
        MOVIES_TABLE,
        ROLES_TABLE,
        MOVIE_CREW_TABLE,
        MOVIE_CAST_TABLE,
    ];

    engine(&archive, sink.clone(), store.clone(), &diagnostics)
        .run(&film_archive_plan())
        .await
        .unwrap();
    let mut first_run = Vec::new();
    for table in tables {
        first_run.push(sink.rows(table).await);
    }

    // Once with the identifier map, once without it: natural keys alone must converge too.
    for store in [store, MemoryCheckpointStore::new()] {
        let summary = engine(&archive, sink.clone(), store, &diagnostics)
            .run(&film_archive_plan())
            .await
            .unwrap();
        assert_eq!(summary.failed, 0);

        let mut rerun = Vec::new();
        for table in tables {
            rerun.push(sink.rows(table).await);
        }
        assert_eq!(rerun, first_run);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_counter_does_not_force_the_number_of_records() {
    init_test_tracing();
    let archive = FilmArchive::new()
        .with_person(person(15, "Graciela Borges", &[]))
        .await
        .with_person(person(16, "Mercedes Morán", &[]))
        .await
        .with_movie(
            movie(900, "La ciénaga")
                .meta("interpretes", "2")
                .slot(
                    "interpretes",
                    false,
                    0,
                    &[("interprete", "15"), ("nombre_del_personaje", "Mecha")],
                )
                .slot(
                    "interpretes",
                    false,
                    3,
                    &[("interprete", "16"), ("nombre_del_personaje", "Tali")],
                ),
        )
        .await;
    let sink = MemorySink::new();
    let diagnostics = MemoryDiagnostics::new();

    engine(&archive, sink.clone(), MemoryCheckpointStore::new(), &diagnostics)
        .run(&film_archive_plan())
        .await
        .unwrap();

    let billing: Vec<_> = sink
        .rows(MOVIE_CAST_TABLE)
        .await
        .iter()
        .map(|row| column(row, "billing_order").clone())
        .collect();
    assert_eq!(billing, vec![Cell::I64(1), Cell::I64(4)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn conflicting_tracks_keep_both_records_and_report_the_conflict() {
    init_test_tracing();
    let archive = FilmArchive::new()
        .with_person(person(15, "Graciela Borges", &[]))
        .await
        .with_person(person(16, "Mercedes Morán", &[]))
        .await
        .with_movie(
            movie(900, "La ciénaga")
                .slot(
                    "interpretes",
                    false,
                    0,
                    &[("interprete", "15"), ("nombre_del_personaje", "Mecha")],
                )
                .slot(
                    "interpretes",
                    true,
                    0,
                    &[("interprete", "16"), ("nombre_del_personaje", "Tali")],
                ),
        )
        .await;
    let sink = MemorySink::new();
    let diagnostics = MemoryDiagnostics::new();

    let summary = engine(&archive, sink.clone(), MemoryCheckpointStore::new(), &diagnostics)
        .run(&film_archive_plan())
        .await
        .unwrap();

    assert_eq!(summary.conflicted, 1);
    assert_eq!(sink.rows(MOVIE_CAST_TABLE).await.len(), 2);

    let conflicts = diagnostics
        .matching(|diagnostic| matches!(diagnostic, Diagnostic::ReconciliationConflict { .. }))
        .await;
    assert_eq!(conflicts.len(), 1);
    let Diagnostic::ReconciliationConflict {
        item_id,
        category,
        index,
        ..
    } = &conflicts[0]
    else {
        unreachable!();
    };
    assert_eq!(*item_id, SourceId::new(900));
    assert_eq!(category, "interpretes");
    assert_eq!(*index, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_references_are_deferred_then_reported() {
    init_test_tracing();
    let archive = FilmArchive::new()
        .with_movie(movie(900, "La ciénaga").slot(
            "interpretes",
            false,
            0,
            &[("interprete", "999"), ("nombre_del_personaje", "Momi")],
        ))
        .await;
    let sink = MemorySink::new();
    let diagnostics = MemoryDiagnostics::new();

    let summary = engine(&archive, sink.clone(), MemoryCheckpointStore::new(), &diagnostics)
        .run(&film_archive_plan())
        .await
        .unwrap();

    assert_eq!(summary.deferred, 1);
    assert_eq!(summary.unresolved, 1);
    assert!(sink.row(MOVIES_TABLE, 900).await.is_some());
    assert!(sink.rows(MOVIE_CAST_TABLE).await.is_empty());

    let unresolved = diagnostics
        .matching(|diagnostic| matches!(diagnostic, Diagnostic::UnresolvedReference { .. }))
        .await;
    assert_eq!(
        unresolved,
        vec![Diagnostic::UnresolvedReference {
            item_id: SourceId::new(900),
            table: MOVIE_CAST_TABLE.to_string(),
            column: "person_id".to_string(),
            entity: EntityType::Person,
            key: SourceId::new(999).as_key(),
        }]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn deferred_rows_are_written_by_the_retry_pass() {
    init_test_tracing();
    let archive = FilmArchive::new()
        .with_person(person(15, "Graciela Borges", &[]))
        .await
        .with_movie(movie(900, "La ciénaga").slot(
            "interpretes",
            false,
            0,
            &[("interprete", "15"), ("nombre_del_personaje", "Mecha")],
        ))
        .await;
    let sink = MemorySink::new();
    let diagnostics = MemoryDiagnostics::new();

    // Movies before people: every cast row waits for its person.
    let plan = MigrationPlan::new(vec![
        Stage::Items(Arc::new(MoviesTransform::new())),
        Stage::Items(Arc::new(PeopleTransform::new())),
    ]);
    let summary = engine(&archive, sink.clone(), MemoryCheckpointStore::new(), &diagnostics)
        .run(&plan)
        .await
        .unwrap();

    assert_eq!(summary.deferred, 1);
    assert_eq!(summary.unresolved, 0);
    let cast = sink.rows(MOVIE_CAST_TABLE).await;
    assert_eq!(cast.len(), 1);
    assert_eq!(column(&cast[0], "person_id"), &Cell::I64(15));
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_values_skip_only_the_affected_record() {
    init_test_tracing();
    let archive = FilmArchive::new()
        .with_default_locations()
        .await
        .with_person(
            person(742, "Lucrecia Martel", &[]).meta("lugar_nacimiento", r#"a:1:{i:0;s:7:"3";}"#),
        )
        .await;
    let sink = MemorySink::new();
    let diagnostics = MemoryDiagnostics::new();

    let summary = engine(&archive, sink.clone(), MemoryCheckpointStore::new(), &diagnostics)
        .run(&film_archive_plan())
        .await
        .unwrap();

    assert_eq!(summary.skipped, 1);
    let martel = sink.row(PEOPLE_TABLE, 742).await.unwrap();
    assert_eq!(column(&martel, "birth_location_id"), &Cell::Null);

    let skipped = diagnostics
        .matching(|diagnostic| matches!(diagnostic, Diagnostic::RowSkipped { .. }))
        .await;
    assert_eq!(skipped.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_sink_failures_are_retried() {
    init_test_tracing();
    let archive = FilmArchive::new().with_default_locations().await;
    let memory = MemorySink::new();
    let sink = FaultInjectingSink::wrap(memory.clone());
    sink.fail_next_batches(2, ErrorKind::SinkConnectionFailed)
        .await;
    let diagnostics = MemoryDiagnostics::new();

    let summary = engine(&archive, sink.clone(), MemoryCheckpointStore::new(), &diagnostics)
        .run(&film_archive_plan())
        .await
        .unwrap();

    assert_eq!(summary.failed, 0);
    assert_eq!(summary.migrated, 4);
    assert_eq!(sink.failed_calls().await, 2);
    assert_eq!(memory.rows(LOCATIONS_TABLE).await.len(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_fail_the_batch_and_the_run_goes_on() {
    init_test_tracing();
    let archive = FilmArchive::new().with_default_locations().await;
    let sink = FaultInjectingSink::wrap(MemorySink::new());
    // Every attempt of the first batch, the roots of the location tree.
    sink.fail_next_batches(3, ErrorKind::SinkConnectionFailed)
        .await;
    let diagnostics = MemoryDiagnostics::new();

    let summary = engine(&archive, sink.clone(), MemoryCheckpointStore::new(), &diagnostics)
        .run(&film_archive_plan())
        .await
        .unwrap();

    assert_eq!(summary.failed, 2);
    // Buenos Aires waits for Argentina, La Plata for Buenos Aires.
    assert_eq!(summary.unresolved, 2);
    assert_eq!(summary.migrated, 0);

    let failed_batches = diagnostics
        .matching(|diagnostic| matches!(diagnostic, Diagnostic::BatchFailed { rows: 2, .. }))
        .await;
    assert_eq!(failed_batches.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_rows_are_reported_and_the_rest_of_the_batch_is_written() {
    init_test_tracing();
    let archive = default_archive().await;
    let memory = MemorySink::new();
    let sink = FaultInjectingSink::wrap(memory.clone());
    sink.reject_rows(|table, row| table == PEOPLE_TABLE && row.get("id") == Some(&Cell::I64(15)))
        .await;
    let diagnostics = MemoryDiagnostics::new();

    let summary = engine(&archive, sink, MemoryCheckpointStore::new(), &diagnostics)
        .run(&film_archive_plan())
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    // The cast row of the rejected person cannot be written.
    assert_eq!(summary.unresolved, 1);
    assert!(memory.row(PEOPLE_TABLE, 742).await.is_some());
    assert!(memory.row(PEOPLE_TABLE, 15).await.is_none());
    assert_eq!(memory.rows(MOVIE_CREW_TABLE).await.len(), 1);

    let rejected = diagnostics
        .matching(|diagnostic| matches!(diagnostic, Diagnostic::RowRejected { .. }))
        .await;
    assert_eq!(rejected.len(), 1);
}

/// A target without unique constraints: every write inserts a new row.
#[derive(Debug, Clone, Default)]
struct AlwaysInsertingSink {
    next_id: Arc<AtomicI64>,
}

impl Sink for AlwaysInsertingSink {
    fn name() -> &'static str {
        "always_inserting"
    }

    async fn upsert_batch(&self, batch: MigrationBatch) -> MigrationResult<Vec<RowOutcome>> {
        Ok(batch
            .rows
            .iter()
            .map(|_| RowOutcome::Applied {
                target_id: TargetId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
            })
            .collect())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn remapped_identifier_aborts_the_run() {
    init_test_tracing();
    let archive = FilmArchive::new().with_default_locations().await;
    let sink = AlwaysInsertingSink::default();
    let store = MemoryCheckpointStore::new();
    let diagnostics = MemoryDiagnostics::new();

    engine(&archive, sink.clone(), store.clone(), &diagnostics)
        .run(&film_archive_plan())
        .await
        .unwrap();

    // The second run writes Argentina again and gets a new id for it.
    let err = engine(&archive, sink, store, &diagnostics)
        .run(&film_archive_plan())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::IdentifierRemapConflict);
    let fatal = diagnostics
        .matching(|diagnostic| matches!(diagnostic, Diagnostic::Fatal { .. }))
        .await;
    assert_eq!(fatal.len(), 1);
}

/// Source whose location taxonomy cannot be reached.
#[derive(Debug, Clone)]
struct UnreachableLocationsSource {
    source: MemorySource,
}

impl Source for UnreachableLocationsSource {
    fn name() -> &'static str {
        "unreachable_locations"
    }

    async fn fetch_item_ids(
        &self,
        filter: &ItemFilter,
        after: Option<SourceId>,
        limit: u32,
    ) -> MigrationResult<Vec<SourceId>> {
        self.source.fetch_item_ids(filter, after, limit).await
    }

    async fn fetch_item_rows(&self, item_id: SourceId) -> MigrationResult<Vec<RawRow>> {
        self.source.fetch_item_rows(item_id).await
    }

    async fn fetch_hierarchy(&self, taxonomy: &str) -> MigrationResult<Vec<HierarchyNode>> {
        if taxonomy == LOCATION_TAXONOMY {
            return Err(migration_error!(
                ErrorKind::SourceConnectionFailed,
                "Connection to the source was lost"
            ));
        }

        self.source.fetch_hierarchy(taxonomy).await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_taxonomy_fails_its_stage_and_later_stages_still_run() {
    init_test_tracing();
    let archive = FilmArchive::new()
        .with_default_locations()
        .await
        .with_person(person(15, "Graciela Borges", &[]))
        .await
        .with_movie(movie(900, "La ciénaga"))
        .await;
    let sink = MemorySink::new();
    let store = MemoryCheckpointStore::new();
    let diagnostics = MemoryDiagnostics::new();

    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let mut failing = MigrationEngine::new(
        test_migration_config(),
        UnreachableLocationsSource {
            source: archive.source.clone(),
        },
        sink.clone(),
        store.clone(),
        diagnostics.clone(),
        shutdown_rx,
    );
    let summary = failing.run(&film_archive_plan()).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert!(summary.is_partial());
    assert!(sink.row(PEOPLE_TABLE, 15).await.is_some());
    assert!(sink.row(MOVIES_TABLE, 900).await.is_some());
    assert!(sink.rows(LOCATIONS_TABLE).await.is_empty());

    let failed = diagnostics
        .matching(|diagnostic| matches!(diagnostic, Diagnostic::StageFailed { .. }))
        .await;
    assert_eq!(failed.len(), 1);
    let Diagnostic::StageFailed { stage, .. } = &failed[0] else {
        unreachable!();
    };
    assert_eq!(stage, "locations");

    // Completed stages keep their cursors so that the next run only retries the failed one.
    assert!(store.cursor("locations").await.is_none());
    assert!(store.cursor("people").await.is_some_and(|cursor| cursor.completed));

    let summary = engine(&archive, sink.clone(), store.clone(), &diagnostics)
        .run(&film_archive_plan())
        .await
        .unwrap();

    assert_eq!(summary.migrated, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(sink.rows(LOCATIONS_TABLE).await.len(), 4);
    assert!(store.cursor("people").await.is_none());
}
