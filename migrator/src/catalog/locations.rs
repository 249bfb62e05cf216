use crate::catalog::{HierarchyTransform, slugify};
use crate::hierarchy::HierarchyNode;
use crate::types::{Cell, EntityType, PendingMutation, TargetRowMutation};

pub const LOCATIONS_TABLE: &str = "locations";

/// WordPress taxonomy holding the location tree.
pub const LOCATION_TAXONOMY: &str = "localidad";

/// Location taxonomy → `locations {id, name, slug, parent_id}`.
///
/// Rows are keyed by slug until the location is mapped, then by id.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocationsTransform;

impl HierarchyTransform for LocationsTransform {
    fn name(&self) -> &str {
        "locations"
    }

    fn taxonomy(&self) -> &str {
        LOCATION_TAXONOMY
    }

    fn entity(&self) -> EntityType {
        EntityType::Location
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
            .with_identity(EntityType::Location, node.source_id.as_key())
            .with_optional_reference(
                "parent_id",
                EntityType::Location,
                node.parent.map(|parent| parent.as_key()),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Reference, SourceId};

    #[test]
    fn child_references_its_parent_location() {
        let node = HierarchyNode::new(SourceId::new(2), "Buenos Aires")
            .with_parent(SourceId::new(1));

        let pending = LocationsTransform.transform(&node);

        assert_eq!(
            pending.mutation.get("slug"),
            Some(&Cell::Text("buenos-aires".to_string()))
        );
        assert_eq!(
            pending.references,
            vec![Reference::new("parent_id", EntityType::Location, SourceId::new(1))]
        );
        assert_eq!(
            pending.identity,
            Some((EntityType::Location, SourceId::new(2).as_key()))
        );
    }

    #[test]
    fn root_has_a_null_parent() {
        let node = HierarchyNode::new(SourceId::new(1), "Argentina").with_slug("argentina");

        let pending = LocationsTransform.transform(&node);

        assert!(pending.references.is_empty());
        assert_eq!(pending.mutation.get("parent_id"), Some(&Cell::Null));
    }
}
