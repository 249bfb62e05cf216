use config::shared::{IntoConnectOptions, MySqlConnectionConfig};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{MySqlPool, Row};
use std::time::Duration;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, MigrationError, MigrationResult};
use crate::hierarchy::HierarchyNode;
use crate::migration_error;
use crate::source::{ItemFilter, Source};
use crate::types::{RawRow, SourceId};

/// Post columns surfaced as rows, keyed by their column name.
pub const POST_COLUMNS: &[&str] = &["post_title", "post_name", "post_content", "post_status"];

/// Post statuses that are migrated. Trash, revisions and auto-drafts are left behind.
const MIGRATED_STATUSES: &str = "'publish', 'draft'";

/// Duration after which idle connections are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Source reading a WordPress database.
///
/// Items are rows of `{prefix}posts`, their flat rows come from `{prefix}postmeta` and the post
/// columns listed in [`POST_COLUMNS`]. Hierarchies are term taxonomies.
#[derive(Debug, Clone)]
pub struct WordPressSource {
    pool: MySqlPool,
    table_prefix: String,
}

impl WordPressSource {
    /// Creates a lazily connected source. `table_prefix` must only contain `[A-Za-z0-9_]`.
    pub fn new(config: &MySqlConnectionConfig, table_prefix: &str, max_connections: u32) -> Self {
        let pool = MySqlPoolOptions::new()
            .min_connections(0)
            .max_connections(max_connections)
            .idle_timeout(Some(IDLE_TIMEOUT))
            .connect_lazy_with(config.with_db());

        Self::from_pool(pool, table_prefix)
    }

    pub fn from_pool(pool: MySqlPool, table_prefix: &str) -> Self {
        Self {
            pool,
            table_prefix: table_prefix.to_string(),
        }
    }

    fn table(&self, name: &str) -> String {
        format!("`{}{}`", self.table_prefix, name)
    }
}

/// Re-classifies a database error as a source error.
fn source_error(err: sqlx::Error, description: &'static str) -> MigrationError {
    let converted = MigrationError::from(err);
    let kind = if converted.kind() == ErrorKind::DatabaseUnavailable {
        ErrorKind::SourceConnectionFailed
    } else {
        ErrorKind::SourceQueryFailed
    };

    migration_error!(kind, description, source: converted)
}

impl Source for WordPressSource {
    fn name() -> &'static str {
        "wordpress"
    }

    async fn fetch_item_ids(
        &self,
        filter: &ItemFilter,
        after: Option<SourceId>,
        limit: u32,
    ) -> MigrationResult<Vec<SourceId>> {
        let query = format!(
            r#"
            SELECT ID
            FROM {posts}
            WHERE post_type = ?
              AND post_status IN ({MIGRATED_STATUSES})
              AND ID > ?
            ORDER BY ID
            LIMIT ?
            "#,
            posts = self.table("posts"),
        );

        let rows = sqlx::query(&query)
            .bind(&filter.item_type)
            .bind(after.map(SourceId::into_inner).unwrap_or(0))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| source_error(err, "Item ids could not be fetched"))?;

        rows.iter()
            .map(|row| -> MigrationResult<SourceId> { Ok(SourceId::new(row.try_get("ID")?)) })
            .collect()
    }

    async fn fetch_item_rows(&self, item_id: SourceId) -> MigrationResult<Vec<RawRow>> {
        let post_query = format!(
            r#"
            SELECT post_title, post_name, post_content, post_status
            FROM {posts}
            WHERE ID = ?
            "#,
            posts = self.table("posts"),
        );

        let Some(post) = sqlx::query(&post_query)
            .bind(item_id.into_inner())
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| source_error(err, "Item could not be fetched"))?
        else {
            bail!(
                ErrorKind::SourceQueryFailed,
                "Item not found in source",
                format!("post {item_id} does not exist")
            );
        };

        let mut rows = Vec::new();
        for column in POST_COLUMNS {
            let value: Option<String> = post.try_get(*column)?;
            rows.push(RawRow::new(item_id, *column, value.unwrap_or_default()));
        }

        let meta_query = format!(
            r#"
            SELECT meta_key, meta_value
            FROM {postmeta}
            WHERE post_id = ?
            ORDER BY meta_id
            "#,
            postmeta = self.table("postmeta"),
        );

        let meta = sqlx::query(&meta_query)
            .bind(item_id.into_inner())
            .fetch_all(&self.pool)
            .await
            .map_err(|err| source_error(err, "Item metadata could not be fetched"))?;

        for row in meta {
            let key: Option<String> = row.try_get("meta_key")?;
            let value: Option<String> = row.try_get("meta_value")?;
            if let Some(key) = key {
                rows.push(RawRow::new(item_id, key, value.unwrap_or_default()));
            }
        }

        debug!(%item_id, rows = rows.len(), "item rows fetched");

        Ok(rows)
    }

    async fn fetch_hierarchy(&self, taxonomy: &str) -> MigrationResult<Vec<HierarchyNode>> {
        let query = format!(
            r#"
            SELECT t.term_id, t.name, t.slug, tt.parent
            FROM {terms} t
            INNER JOIN {term_taxonomy} tt ON t.term_id = tt.term_id
            WHERE tt.taxonomy = ?
            ORDER BY t.term_id
            "#,
            terms = self.table("terms"),
            term_taxonomy = self.table("term_taxonomy"),
        );

        let rows = sqlx::query(&query)
            .bind(taxonomy)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| source_error(err, "Hierarchy could not be fetched"))?;

        let mut nodes = Vec::with_capacity(rows.len());
        for row in rows {
            let term_id: u64 = row.try_get("term_id")?;
            let parent: u64 = row.try_get("parent")?;
            let slug: String = row.try_get("slug")?;

            let name: String = row.try_get("name")?;

            let mut node = HierarchyNode::new(SourceId::new(term_id), name);
            if !slug.trim().is_empty() {
                node = node.with_slug(slug);
            }
            // WordPress stores roots with parent 0.
            if parent != 0 {
                node = node.with_parent(SourceId::new(parent));
            }
            nodes.push(node);
        }

        debug!(taxonomy, nodes = nodes.len(), "hierarchy fetched");

        Ok(nodes)
    }
}
