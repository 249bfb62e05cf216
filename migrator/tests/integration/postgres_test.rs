//! Runs against a local Postgres server configured through `TESTS_DATABASE_HOST`,
//! `TESTS_DATABASE_PORT`, `TESTS_DATABASE_USERNAME` and `TESTS_DATABASE_PASSWORD`.

use config::shared::{IntoConnectOptions, PgConnectionConfig, TlsConfig};
use migrator::catalog::film_archive_plan;
use migrator::concurrency::shutdown::create_shutdown_channel;
use migrator::diagnostics::memory::MemoryDiagnostics;
use migrator::engine::MigrationEngine;
use migrator::migrations::apply_checkpoint_migrations;
use migrator::sink::postgres::PostgresSink;
use migrator::store::postgres::PostgresCheckpointStore;
use migrator::test_utils::fixtures::{FilmArchive, test_migration_config};
use sqlx::{Connection, Executor, PgConnection, Row};
use telemetry::init_test_tracing;
use uuid::Uuid;

const TARGET_SCHEMA: &str = "archive";

fn local_pg_connection_config() -> PgConnectionConfig {
    PgConnectionConfig {
        host: std::env::var("TESTS_DATABASE_HOST").expect("TESTS_DATABASE_HOST must be set"),
        port: std::env::var("TESTS_DATABASE_PORT")
            .expect("TESTS_DATABASE_PORT must be set")
            .parse()
            .expect("TESTS_DATABASE_PORT must be a valid port number"),
        name: Uuid::new_v4().to_string(),
        username: std::env::var("TESTS_DATABASE_USERNAME")
            .expect("TESTS_DATABASE_USERNAME must be set"),
        password: std::env::var("TESTS_DATABASE_PASSWORD")
            .ok()
            .map(Into::into),
        tls: TlsConfig {
            trusted_root_certs: String::new(),
            enabled: false,
        },
    }
}

/// Creates a fresh database holding the `locations` target table.
async fn spawn_target_database() -> (PgConnectionConfig, PgConnection) {
    let config = local_pg_connection_config();

    let mut server = PgConnection::connect_with(&config.without_db())
        .await
        .expect("Failed to connect to Postgres");
    server
        .execute(format!(r#"create database "{}""#, config.name).as_str())
        .await
        .expect("Failed to create test database");

    let mut connection = PgConnection::connect_with(&config.with_db())
        .await
        .expect("Failed to connect to test database");
    connection
        .execute(
            format!(
                "create schema {TARGET_SCHEMA};
                 create table {TARGET_SCHEMA}.locations (
                     id bigserial primary key,
                     name text not null,
                     slug text not null unique,
                     parent_id bigint references {TARGET_SCHEMA}.locations (id)
                 );"
            )
            .as_str(),
        )
        .await
        .expect("Failed to create target schema");

    (config, connection)
}

async fn run_migration(config: &PgConnectionConfig, archive: &FilmArchive) {
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let mut engine = MigrationEngine::new(
        test_migration_config(),
        archive.source.clone(),
        PostgresSink::new(config, TARGET_SCHEMA, 2),
        PostgresCheckpointStore::new(config),
        MemoryDiagnostics::new(),
        shutdown_rx,
    );

    let summary = engine.run(&film_archive_plan()).await.unwrap();
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.unresolved, 0);
}

#[ignore = "requires a local Postgres server"]
#[tokio::test(flavor = "multi_thread")]
async fn locations_are_upserted_into_postgres() {
    init_test_tracing();
    let (config, mut connection) = spawn_target_database().await;
    apply_checkpoint_migrations(&config).await.unwrap();
    let archive = FilmArchive::new().with_default_locations().await;

    run_migration(&config, &archive).await;
    run_migration(&config, &archive).await;

    let rows = sqlx::query(&format!(
        "select child.slug, parent.slug as parent_slug
         from {TARGET_SCHEMA}.locations child
         left join {TARGET_SCHEMA}.locations parent on parent.id = child.parent_id
         order by child.slug"
    ))
    .fetch_all(&mut connection)
    .await
    .unwrap();

    let pairs: Vec<(String, Option<String>)> = rows
        .iter()
        .map(|row| (row.get("slug"), row.get("parent_slug")))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("argentina".to_string(), None),
            ("buenos-aires".to_string(), Some("argentina".to_string())),
            ("la-plata".to_string(), Some("buenos-aires".to_string())),
            ("uruguay".to_string(), None),
        ]
    );

    let mappings: i64 = sqlx::query_scalar("select count(*) from migrator.identifier_mappings")
        .fetch_one(&mut connection)
        .await
        .unwrap();
    assert_eq!(mappings, 4);
}
