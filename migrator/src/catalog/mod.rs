//! Mapping of the WordPress film archive onto the relational schema.
//!
//! Each content type is described by a transform: [`locations`] and [`countries`] for
//! taxonomies, [`people`] and [`movies`] for post types. [`film_archive_plan`] orders them so that every
//! reference points at an entity migrated by an earlier stage.

pub mod countries;
pub mod locations;
pub mod movies;
pub mod people;
mod transform;

use std::sync::Arc;

pub use transform::{
    HierarchyTransform, ItemContext, ItemTransform, SkippedRecord, TransformOutput, slugify,
};

use crate::engine::{MigrationPlan, Stage};

/// Locations and countries first, then people (who reference both), then movies (which
/// reference people, roles and countries).
pub fn film_archive_plan() -> MigrationPlan {
    MigrationPlan::new(vec![
        Stage::Hierarchy(Arc::new(locations::LocationsTransform)),
        Stage::Hierarchy(Arc::new(countries::CountriesTransform)),
        Stage::Items(Arc::new(people::PeopleTransform::new())),
        Stage::Items(Arc::new(movies::MoviesTransform::new())),
    ])
}
