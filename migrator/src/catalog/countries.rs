use std::collections::BTreeSet;

use crate::catalog::locations::LOCATIONS_TABLE;
use crate::catalog::{HierarchyTransform, ItemContext, TransformOutput, slugify};
use crate::codec;
use crate::hierarchy::HierarchyNode;
use crate::types::{Cell, EntityType, PendingMutation, SourceId, TargetRowMutation};

/// WordPress taxonomy holding countries, referenced by nationalities and co-productions.
pub const COUNTRY_TAXONOMY: &str = "pais";

/// Country taxonomy → root rows of `locations`.
///
/// Countries share the location table. A country whose slug already names a location is mapped
/// onto that row; `parent_id` is never written, so an existing row keeps its place in the tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountriesTransform;

impl HierarchyTransform for CountriesTransform {
    fn name(&self) -> &str {
        "countries"
    }

    fn taxonomy(&self) -> &str {
        COUNTRY_TAXONOMY
    }

    fn entity(&self) -> EntityType {
        EntityType::Country
    }

    fn transform(&self, node: &HierarchyNode) -> PendingMutation {
        let slug = match node.slug.as_deref().map(str::trim) {
            Some(slug) if !slug.is_empty() => slug.to_string(),
            _ => slugify(&node.name),
        };

        let mutation = TargetRowMutation::new(["slug"])
            .with("name", Cell::Text(node.name.trim().to_string()))
            .with("slug", Cell::Text(slug));

        PendingMutation::upsert(LOCATIONS_TABLE, mutation, node.source_id)
            .with_identity(EntityType::Country, node.source_id.as_key())
    }
}

/// Decodes the serialized country term ids stored in `key`.
///
/// Duplicates are dropped and the order of first appearance is kept. A value that does not
/// decode is reported as skipped and yields no country.
pub(crate) fn country_ids(
    context: &ItemContext<'_>,
    key: &str,
    output: &mut TransformOutput,
) -> Vec<SourceId> {
    let Some(raw) = context.attribute(key) else {
        return Vec::new();
    };

    let list = match codec::decode(raw) {
        Ok(list) => list,
        Err(err) => {
            output.skip(key, err);
            return Vec::new();
        }
    };

    let mut seen = BTreeSet::new();
    list.iter()
        .filter_map(|scalar| scalar.as_source_id())
        .filter(|id| seen.insert(*id))
        .collect()
}
