use config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::error::{ErrorKind, MigrationResult};
use crate::identifiers::IdentifierMapping;
use crate::migration_error;
use crate::store::{CheckpointStore, MigrationCursor};
use crate::types::{SourceId, SourceKey, TargetId};

/// Maximum number of connections in the pool.
///
/// Checkpoints are written once per page, so two connections are plenty.
const MAX_POOL_CONNECTIONS: u32 = 2;

/// Duration after which idle connections are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates a lazily connected pool with automatic idle connection cleanup.
fn create_database_pool(config: &PgConnectionConfig) -> PgPool {
    let options = config.with_db();

    PgPoolOptions::new()
        .min_connections(0)
        .max_connections(MAX_POOL_CONNECTIONS)
        .idle_timeout(Some(IDLE_TIMEOUT))
        .connect_lazy_with(options)
}

/// Checkpoint store kept in the `migrator` schema of a Postgres database.
///
/// The tables are created by [`crate::migrations::apply_checkpoint_migrations`], which must run
/// before the store is used.
#[derive(Debug, Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    pub fn new(config: &PgConnectionConfig) -> Self {
        Self {
            pool: create_database_pool(config),
        }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn to_db_id(id: SourceId) -> MigrationResult<i64> {
    Ok(i64::try_from(id.into_inner())?)
}

fn from_db_id(id: i64) -> MigrationResult<SourceId> {
    Ok(SourceId::new(u64::try_from(id)?))
}

impl CheckpointStore for PostgresCheckpointStore {
    async fn load_mappings(&self) -> MigrationResult<Vec<IdentifierMapping>> {
        let rows = sqlx::query(
            r#"
            SELECT entity_type, source_key, target_id
            FROM migrator.identifier_mappings
            ORDER BY created_at, entity_type, source_key
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut mappings = Vec::with_capacity(rows.len());
        for row in rows {
            let entity: String = row.try_get("entity_type")?;
            let source_key: String = row.try_get("source_key")?;
            let target_id: i64 = row.try_get("target_id")?;

            mappings.push(IdentifierMapping::new(
                entity.parse()?,
                SourceKey::from_canonical(source_key),
                TargetId::new(target_id),
            ));
        }

        debug!(count = mappings.len(), "identifier mappings loaded");

        Ok(mappings)
    }

    async fn save_mappings(&self, mappings: Vec<IdentifierMapping>) -> MigrationResult<()> {
        if mappings.is_empty() {
            return Ok(());
        }

        let mut entities = Vec::with_capacity(mappings.len());
        let mut source_keys = Vec::with_capacity(mappings.len());
        let mut target_ids = Vec::with_capacity(mappings.len());
        for mapping in mappings {
            entities.push(mapping.entity.as_str().to_string());
            source_keys.push(mapping.source_key.as_str().to_string());
            target_ids.push(mapping.target_id.into_inner());
        }

        sqlx::query(
            r#"
            INSERT INTO migrator.identifier_mappings (entity_type, source_key, target_id)
            SELECT * FROM UNNEST($1::text[], $2::text[], $3::bigint[])
            ON CONFLICT (entity_type, source_key) DO NOTHING
            "#,
        )
        .bind(entities)
        .bind(source_keys)
        .bind(target_ids)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            migration_error!(
                ErrorKind::CheckpointStoreFailed,
                "Identifier mappings could not be saved",
                source: err
            )
        })?;

        Ok(())
    }

    async fn load_cursors(&self) -> MigrationResult<BTreeMap<String, MigrationCursor>> {
        let rows = sqlx::query(
            r#"
            SELECT stage, last_item_id, completed, deferred_items
            FROM migrator.stage_cursors
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut cursors = BTreeMap::new();
        for row in rows {
            let stage: String = row.try_get("stage")?;
            let last_item_id: Option<i64> = row.try_get("last_item_id")?;
            let deferred_items: Vec<i64> = row.try_get("deferred_items")?;

            let cursor = MigrationCursor {
                stage: stage.clone(),
                last_item_id: last_item_id.map(from_db_id).transpose()?,
                completed: row.try_get("completed")?,
                deferred_items: deferred_items
                    .into_iter()
                    .map(from_db_id)
                    .collect::<MigrationResult<_>>()?,
            };
            cursors.insert(stage, cursor);
        }

        Ok(cursors)
    }

    async fn save_cursor(&self, cursor: MigrationCursor) -> MigrationResult<()> {
        let last_item_id = cursor.last_item_id.map(to_db_id).transpose()?;
        let deferred_items = cursor
            .deferred_items
            .iter()
            .copied()
            .map(to_db_id)
            .collect::<MigrationResult<Vec<_>>>()?;

        sqlx::query(
            r#"
            INSERT INTO migrator.stage_cursors (stage, last_item_id, completed, deferred_items)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (stage)
            DO UPDATE SET
                last_item_id = EXCLUDED.last_item_id,
                completed = EXCLUDED.completed,
                deferred_items = EXCLUDED.deferred_items,
                updated_at = NOW()
            "#,
        )
        .bind(&cursor.stage)
        .bind(last_item_id)
        .bind(cursor.completed)
        .bind(deferred_items)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            migration_error!(
                ErrorKind::CheckpointStoreFailed,
                "Stage cursor could not be saved",
                format!("stage `{}`", cursor.stage),
                source: err
            )
        })?;

        Ok(())
    }

    async fn clear_cursors(&self) -> MigrationResult<()> {
        sqlx::query("DELETE FROM migrator.stage_cursors")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
