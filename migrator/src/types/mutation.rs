use std::collections::BTreeMap;
use std::fmt;

use crate::error::MigrationError;
use crate::types::{EntityType, SourceId, SourceKey, TargetId};

/// A single column value written to the target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Cell {
    Null,
    Bool(bool),
    I64(i64),
    Text(String),
}

impl Cell {
    /// Builds a text cell, mapping blank strings to [`Cell::Null`].
    pub fn text_or_null(value: Option<&str>) -> Cell {
        match value.map(str::trim) {
            Some(value) if !value.is_empty() => Cell::Text(value.to_string()),
            _ => Cell::Null,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => f.write_str("null"),
            Cell::Bool(value) => write!(f, "{value}"),
            Cell::I64(value) => write!(f, "{value}"),
            Cell::Text(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<TargetId> for Cell {
    fn from(value: TargetId) -> Self {
        Cell::I64(value.into_inner())
    }
}

/// Insert-or-update of one target row.
///
/// `key_columns` names the columns whose values identify the row, so that re-submitting the same
/// mutation converges on the same end state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRowMutation {
    pub key_columns: Vec<String>,
    pub columns: BTreeMap<String, Cell>,
}

impl TargetRowMutation {
    pub fn new<I, K>(key_columns: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            key_columns: key_columns.into_iter().map(Into::into).collect(),
            columns: BTreeMap::new(),
        }
    }

    pub fn with(mut self, column: impl Into<String>, cell: Cell) -> Self {
        self.columns.insert(column.into(), cell);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, cell: Cell) {
        self.columns.insert(column.into(), cell);
    }

    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.columns.get(column)
    }

    /// Returns the values of the key columns, used to deduplicate rows within a batch.
    pub fn key_values(&self) -> Vec<Option<&Cell>> {
        self.key_columns
            .iter()
            .map(|column| self.columns.get(column))
            .collect()
    }
}

/// Bounded list of mutations for one target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationBatch {
    pub table: String,
    pub rows: Vec<TargetRowMutation>,
}

impl MigrationBatch {
    pub fn new(table: impl Into<String>, rows: Vec<TargetRowMutation>) -> Self {
        Self {
            table: table.into(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Per-row result reported by a sink.
#[derive(Debug, Clone)]
pub enum RowOutcome {
    Applied { target_id: TargetId },
    Rejected { error: MigrationError },
}

/// Column whose value is the target id of another, already migrated, entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub column: String,
    pub entity: EntityType,
    pub key: SourceKey,
}

impl Reference {
    pub fn new(column: impl Into<String>, entity: EntityType, key: impl Into<SourceKey>) -> Self {
        Self {
            column: column.into(),
            entity,
            key: key.into(),
        }
    }
}

/// How a mutation interacts with rows that already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Insert the row or update it in place.
    Upsert,
    /// Only write the row when its identity is not mapped yet.
    ///
    /// Used for catalog rows, such as roles, shared by many items.
    EnsureExists,
}

/// A mutation produced by a transform whose references are not resolved yet.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub table: String,
    pub mutation: TargetRowMutation,
    pub references: Vec<Reference>,
    /// Entity recorded in the identifier map once the row is written.
    pub identity: Option<(EntityType, SourceKey)>,
    pub mode: WriteMode,
    /// Item the mutation was derived from.
    pub origin: SourceId,
}

impl PendingMutation {
    pub fn upsert(table: impl Into<String>, mutation: TargetRowMutation, origin: SourceId) -> Self {
        Self {
            table: table.into(),
            mutation,
            references: Vec::new(),
            identity: None,
            mode: WriteMode::Upsert,
            origin,
        }
    }

    pub fn ensure_exists(
        table: impl Into<String>,
        mutation: TargetRowMutation,
        origin: SourceId,
    ) -> Self {
        Self {
            mode: WriteMode::EnsureExists,
            ..Self::upsert(table, mutation, origin)
        }
    }

    pub fn with_identity(mut self, entity: EntityType, key: impl Into<SourceKey>) -> Self {
        self.identity = Some((entity, key.into()));
        self
    }

    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.references.push(reference);
        self
    }

    /// Adds a reference when `key` is present, or stores `null` in the column otherwise.
    pub fn with_optional_reference(
        mut self,
        column: &str,
        entity: EntityType,
        key: Option<SourceKey>,
    ) -> Self {
        match key {
            Some(key) => self.references.push(Reference::new(column, entity, key)),
            None => self.mutation.set(column, Cell::Null),
        }
        self
    }
}
