use config::shared::{BatchConfig, MigrationConfig, RetryConfig};

use crate::catalog::countries::COUNTRY_TAXONOMY;
use crate::catalog::locations::LOCATION_TAXONOMY;
use crate::catalog::movies::MOVIE_POST_TYPE;
use crate::catalog::people::PERSON_POST_TYPE;
use crate::codec::{self, Scalar, ScalarList};
use crate::hierarchy::HierarchyNode;
use crate::source::memory::MemorySource;
use crate::types::{RawRow, SourceId};

/// Migration settings with small pages and fast retries.
pub fn test_migration_config() -> MigrationConfig {
    MigrationConfig {
        page_size: 2,
        max_item_workers: 4,
        batch: BatchConfig {
            max_size: 3,
            max_concurrent_flushes: 2,
        },
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_factor: 2.0,
            timeout_ms: 5_000,
        },
    }
}

/// Encodes `ids` the way the archive stores post references, as serialized strings.
pub fn serialized_ids(ids: &[u64]) -> String {
    codec::encode(&ScalarList::new(
        ids.iter().map(|id| Scalar::Str(id.to_string())).collect(),
    ))
}

/// Builder of the flat rows of one post.
#[derive(Debug, Clone)]
pub struct PostRows {
    item_id: SourceId,
    rows: Vec<RawRow>,
}

impl PostRows {
    pub fn new(item_id: u64) -> Self {
        Self {
            item_id: SourceId::new(item_id),
            rows: Vec::new(),
        }
    }

    pub fn item_id(&self) -> SourceId {
        self.item_id
    }

    pub fn title(self, title: &str) -> Self {
        self.meta("post_title", title)
    }

    pub fn status(self, status: &str) -> Self {
        self.meta("post_status", status)
    }

    pub fn meta(mut self, key: &str, value: &str) -> Self {
        self.rows.push(RawRow::new(self.item_id, key, value));
        self
    }

    /// Adds every `(field, value)` of a repeater slot, `{category}[_import]_{index}_{field}`.
    pub fn slot(self, category: &str, import: bool, index: u32, fields: &[(&str, &str)]) -> Self {
        let variant = if import { "_import" } else { "" };
        fields.iter().fold(self, |rows, (field, value)| {
            rows.meta(&format!("{category}{variant}_{index}_{field}"), value)
        })
    }

    pub fn build(self) -> Vec<RawRow> {
        self.rows
    }
}

pub fn location(id: u64, name: &str, parent: Option<u64>) -> HierarchyNode {
    let node = HierarchyNode::new(SourceId::new(id), name);
    match parent {
        Some(parent) => node.with_parent(SourceId::new(parent)),
        None => node,
    }
}

pub fn country(id: u64, name: &str) -> HierarchyNode {
    HierarchyNode::new(SourceId::new(id), name)
}

/// Populates a [`MemorySource`] with a small film archive.
#[derive(Debug, Clone, Default)]
pub struct FilmArchive {
    pub source: MemorySource,
}

impl FilmArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_locations(self, nodes: Vec<HierarchyNode>) -> Self {
        self.source.add_hierarchy(LOCATION_TAXONOMY, nodes).await;
        self
    }

    pub async fn with_countries(self, nodes: Vec<HierarchyNode>) -> Self {
        self.source.add_hierarchy(COUNTRY_TAXONOMY, nodes).await;
        self
    }

    pub async fn with_person(self, person: PostRows) -> Self {
        self.source
            .add_item(PERSON_POST_TYPE, person.item_id(), person.build())
            .await;
        self
    }

    pub async fn with_movie(self, movie: PostRows) -> Self {
        self.source
            .add_item(MOVIE_POST_TYPE, movie.item_id(), movie.build())
            .await;
        self
    }

    /// Argentina → Buenos Aires → La Plata, plus Uruguay.
    pub async fn with_default_locations(self) -> Self {
        self.with_locations(vec![
            location(3, "La Plata", Some(2)),
            location(1, "Argentina", None),
            location(2, "Buenos Aires", Some(1)),
            location(4, "Uruguay", None),
        ])
        .await
    }
}

/// A person born at `birth_path`, a root-first location path.
pub fn person(id: u64, name: &str, birth_path: &[u64]) -> PostRows {
    let rows = PostRows::new(id).title(name).status("publish");
    if birth_path.is_empty() {
        rows
    } else {
        rows.meta("lugar_nacimiento", &serialized_ids(birth_path))
    }
}

/// A published movie without crew or cast.
pub fn movie(id: u64, title: &str) -> PostRows {
    PostRows::new(id).title(title).status("publish")
}
