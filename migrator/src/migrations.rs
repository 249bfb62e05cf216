use config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::{Executor, postgres::PgPoolOptions};
use tracing::info;

/// Creates the checkpoint tables in the `migrator` schema.
///
/// The migrations run with `search_path` set to `migrator`, so the `_sqlx_migrations` metadata
/// table lands in that schema too and the target schema stays untouched.
pub async fn apply_checkpoint_migrations(
    connection_config: &PgConnectionConfig,
) -> Result<(), sqlx::Error> {
    let options = connection_config.with_db();

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("create schema if not exists migrator;").await?;
                conn.execute("set search_path = 'migrator';").await?;

                Ok(())
            })
        })
        .connect_with(options)
        .await?;

    info!("applying checkpoint migrations");

    let migrator = sqlx::migrate!("./migrations");
    migrator.run(&pool).await?;

    info!("checkpoint migrations successfully applied");

    Ok(())
}
