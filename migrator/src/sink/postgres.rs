use config::shared::{IntoConnectOptions, PgConnectionConfig};
use pg_escape::{quote_identifier, quote_literal};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, PgPool, Postgres, QueryBuilder, Row};
use std::time::Duration;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, MigrationError, MigrationResult};
use crate::migration_error;
use crate::sink::Sink;
use crate::types::{Cell, MigrationBatch, RowOutcome, TargetId, TargetRowMutation};

/// Duration after which idle connections are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Sink upserting rows into tables of a Postgres schema.
///
/// Each batch runs in one transaction and each row in its own savepoint, so a row violating a
/// constraint is rolled back alone and reported as rejected. Every target table must have an
/// `id` column and a unique constraint over the key columns of its rows.
#[derive(Debug, Clone)]
pub struct PostgresSink {
    pool: PgPool,
    schema: String,
}

impl PostgresSink {
    pub fn new(config: &PgConnectionConfig, schema: &str, max_connections: u32) -> Self {
        let pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(max_connections)
            .idle_timeout(Some(IDLE_TIMEOUT))
            .connect_lazy_with(config.with_db());

        Self::from_pool(pool, schema)
    }

    pub fn from_pool(pool: PgPool, schema: &str) -> Self {
        Self {
            pool,
            schema: schema.to_string(),
        }
    }
}

/// Builds `INSERT … ON CONFLICT (keys) DO UPDATE … RETURNING id` for `mutation`.
///
/// Integers and booleans are bound. Text is inlined as a quoted literal so that it coerces to
/// enum and domain columns.
fn build_upsert<'a>(
    schema: &str,
    table: &str,
    mutation: &'a TargetRowMutation,
) -> MigrationResult<QueryBuilder<'a, Postgres>> {
    if mutation.key_columns.is_empty() {
        bail!(
            ErrorKind::InvalidData,
            "Row has no key columns",
            format!("rows of `{table}` must name the columns identifying them")
        );
    }

    let mut builder = QueryBuilder::new(format!(
        "INSERT INTO {}.{} (",
        quote_identifier(schema),
        quote_identifier(table)
    ));

    let mut columns = builder.separated(", ");
    for column in mutation.columns.keys() {
        columns.push(quote_identifier(column));
    }
    builder.push(") VALUES (");

    let mut values = builder.separated(", ");
    for cell in mutation.columns.values() {
        match cell {
            Cell::Null => values.push("NULL"),
            Cell::Bool(value) => values.push_bind(*value),
            Cell::I64(value) => values.push_bind(*value),
            Cell::Text(value) => values.push(quote_literal(value)),
        };
    }
    builder.push(") ON CONFLICT (");

    let mut keys = builder.separated(", ");
    for key in &mutation.key_columns {
        keys.push(quote_identifier(key));
    }
    builder.push(") DO UPDATE SET ");

    let mut updated: Vec<&String> = mutation
        .columns
        .keys()
        .filter(|column| !mutation.key_columns.contains(column))
        .collect();
    // An update is needed even when every column is a key, otherwise RETURNING yields no row.
    if updated.is_empty() {
        updated.push(&mutation.key_columns[0]);
    }

    let mut assignments = builder.separated(", ");
    for column in updated {
        let column = quote_identifier(column);
        assignments.push(format!("{column} = EXCLUDED.{column}"));
    }
    builder.push(" RETURNING id");

    Ok(builder)
}

/// Whether `err` concerns the row itself rather than the connection or the statement.
fn is_row_error(err: &sqlx::Error) -> bool {
    match err {
        // Class 22 is data exceptions, class 23 integrity constraint violations.
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| code.starts_with("22") || code.starts_with("23")),
        _ => false,
    }
}

/// Re-classifies a database error as a sink error.
fn sink_error(err: sqlx::Error, description: &'static str) -> MigrationError {
    let converted = MigrationError::from(err);
    let kind = if converted.kind() == ErrorKind::DatabaseUnavailable {
        ErrorKind::SinkConnectionFailed
    } else {
        ErrorKind::SinkWriteFailed
    };

    migration_error!(kind, description, source: converted)
}

impl Sink for PostgresSink {
    fn name() -> &'static str {
        "postgres"
    }

    async fn upsert_batch(&self, batch: MigrationBatch) -> MigrationResult<Vec<RowOutcome>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| sink_error(err, "Batch transaction could not be started"))?;

        let mut outcomes = Vec::with_capacity(batch.rows.len());
        for mutation in &batch.rows {
            let mut builder = match build_upsert(&self.schema, &batch.table, mutation) {
                Ok(builder) => builder,
                Err(error) => {
                    outcomes.push(RowOutcome::Rejected { error });
                    continue;
                }
            };

            let mut savepoint = tx
                .begin()
                .await
                .map_err(|err| sink_error(err, "Row savepoint could not be created"))?;

            match builder.build().fetch_one(&mut *savepoint).await {
                Ok(row) => {
                    let id: i64 = row.try_get("id")?;
                    savepoint
                        .commit()
                        .await
                        .map_err(|err| sink_error(err, "Row savepoint could not be released"))?;
                    outcomes.push(RowOutcome::Applied {
                        target_id: TargetId::new(id),
                    });
                }
                Err(err) if is_row_error(&err) => {
                    savepoint
                        .rollback()
                        .await
                        .map_err(|err| sink_error(err, "Row savepoint could not be rolled back"))?;
                    outcomes.push(RowOutcome::Rejected {
                        error: migration_error!(
                            ErrorKind::SinkRowRejected,
                            "Row was rejected by the target",
                            format!("table `{}`", batch.table),
                            source: err
                        ),
                    });
                }
                Err(err) => return Err(sink_error(err, "Row could not be written")),
            }
        }

        tx.commit()
            .await
            .map_err(|err| sink_error(err, "Batch transaction could not be committed"))?;

        debug!(table = %batch.table, rows = outcomes.len(), "batch written to postgres");

        Ok(outcomes)
    }
}
