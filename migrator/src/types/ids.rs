use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::bail;
use crate::error::{ErrorKind, MigrationError};

/// Identifier of a post or term in the legacy content store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(u64);

impl SourceId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }

    /// Returns the canonical key under which this id is mapped.
    pub fn as_key(&self) -> SourceKey {
        SourceKey(self.0.to_string())
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SourceId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Canonical text form of a source identifier.
///
/// Posts and terms use their decimal id. Catalog entries without an id of their own, such as
/// crew roles, use their normalized name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceKey(String);

impl SourceKey {
    /// Builds a key from a free text name, trimming and lower-casing it.
    pub fn from_name(name: &str) -> Self {
        Self(name.trim().to_lowercase())
    }

    /// Wraps an already canonical key, as read back from a checkpoint store.
    pub fn from_canonical(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SourceId> for SourceKey {
    fn from(value: SourceId) -> Self {
        value.as_key()
    }
}

/// Primary key of a row in the relational target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(i64);

impl TargetId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of entity an identifier mapping belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Movie,
    Person,
    Location,
    Role,
    Country,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Movie => "movie",
            EntityType::Person => "person",
            EntityType::Location => "location",
            EntityType::Role => "role",
            EntityType::Country => "country",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let entity = match s {
            "movie" => EntityType::Movie,
            "person" => EntityType::Person,
            "location" => EntityType::Location,
            "role" => EntityType::Role,
            "country" => EntityType::Country,
            other => bail!(
                ErrorKind::InvalidData,
                "Unknown entity type",
                format!("`{other}` is not a known entity type")
            ),
        };

        Ok(entity)
    }
}
