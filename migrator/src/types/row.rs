use serde::{Deserialize, Serialize};

use crate::types::SourceId;

/// One flat key/value row of a content item, as produced by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub item_id: SourceId,
    pub key: String,
    pub value: String,
}

impl RawRow {
    pub fn new(item_id: SourceId, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            item_id,
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One of the two parallel populations a repeater category can be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackVariant {
    Primary,
    Import,
}

/// Which track variant(s) a reconciled record was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Primary,
    Import,
    Merged,
}

impl From<TrackVariant> for Provenance {
    fn from(value: TrackVariant) -> Self {
        match value {
            TrackVariant::Primary => Provenance::Primary,
            TrackVariant::Import => Provenance::Import,
        }
    }
}
