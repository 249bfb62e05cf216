use std::future::Future;

use crate::error::MigrationResult;
use crate::hierarchy::HierarchyNode;
use crate::types::{RawRow, SourceId};

/// Selects the items of one content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFilter {
    pub item_type: String,
}

impl ItemFilter {
    pub fn item_type(item_type: impl Into<String>) -> Self {
        Self {
            item_type: item_type.into(),
        }
    }
}

/// Trait for stores the migration reads from.
///
/// Sources are never written to. Every call may be retried, so implementations must not keep
/// per-call state.
pub trait Source {
    /// Returns the name of the source.
    fn name() -> &'static str;

    /// Returns up to `limit` ids of items matching `filter`, ascending, strictly greater than
    /// `after`.
    fn fetch_item_ids(
        &self,
        filter: &ItemFilter,
        after: Option<SourceId>,
        limit: u32,
    ) -> impl Future<Output = MigrationResult<Vec<SourceId>>> + Send;

    /// Returns every flat row of item `item_id`, including its own columns such as
    /// `post_title`.
    fn fetch_item_rows(
        &self,
        item_id: SourceId,
    ) -> impl Future<Output = MigrationResult<Vec<RawRow>>> + Send;

    /// Returns the nodes of `taxonomy`.
    fn fetch_hierarchy(
        &self,
        taxonomy: &str,
    ) -> impl Future<Output = MigrationResult<Vec<HierarchyNode>>> + Send;
}
