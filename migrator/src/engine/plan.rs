use std::fmt;
use std::sync::Arc;

use crate::catalog::{HierarchyTransform, ItemTransform};

/// One step of a [`MigrationPlan`].
#[derive(Clone)]
pub enum Stage {
    /// Migrates a taxonomy tree, parents before children.
    Hierarchy(Arc<dyn HierarchyTransform>),
    /// Pages through the items of one content type.
    Items(Arc<dyn ItemTransform>),
}

impl Stage {
    /// Name under which the stage's cursor is stored.
    pub fn name(&self) -> &str {
        match self {
            Stage::Hierarchy(transform) => transform.name(),
            Stage::Items(transform) => transform.name(),
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Hierarchy(transform) => f
                .debug_struct("Hierarchy")
                .field("name", &transform.name())
                .field("taxonomy", &transform.taxonomy())
                .finish(),
            Stage::Items(transform) => f
                .debug_struct("Items")
                .field("name", &transform.name())
                .field("item_type", &transform.item_type())
                .finish(),
        }
    }
}

/// Ordered stages of a migration.
///
/// A stage may only reference entities migrated by earlier stages or by itself.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    stages: Vec<Stage>,
}

impl MigrationPlan {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}
