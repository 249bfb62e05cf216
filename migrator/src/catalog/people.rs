use crate::catalog::countries::country_ids;
use crate::catalog::{ItemContext, ItemTransform, TransformOutput};
use crate::codec;
use crate::error::{ErrorKind, MigrationResult};
use crate::grammar::KeyGrammar;
use crate::reconcile::ReconcilePolicy;
use crate::types::{
    Cell, EntityType, PendingMutation, Reference, SourceId, SourceKey, TargetRowMutation,
};
use crate::{bail, migration_error};

pub const PEOPLE_TABLE: &str = "people";
pub const PERSON_NATIONALITIES_TABLE: &str = "person_nationalities";

/// WordPress post type of people.
pub const PERSON_POST_TYPE: &str = "persona";

const BIRTH_PLACE_KEY: &str = "lugar_nacimiento";
const DEATH_PLACE_KEY: &str = "lugar_muerte";
const NATIONALITY_KEY: &str = "nacionalidad";

/// `persona` posts → `people`.
///
/// The WordPress id is kept as the target id. Birth and death places are serialized location
/// paths (country, province, city); the last element is the referenced location. Every country
/// term in `nacionalidad` becomes a row of `person_nationalities`.
#[derive(Debug)]
pub struct PeopleTransform {
    grammar: KeyGrammar,
    policy: ReconcilePolicy,
}

impl PeopleTransform {
    pub fn new() -> Self {
        Self {
            grammar: KeyGrammar::new(Vec::new()),
            policy: ReconcilePolicy::new(),
        }
    }
}

impl Default for PeopleTransform {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits a full name into first name(s) and last name.
///
/// The last word is the last name. A single word is a first name only.
pub fn split_full_name(full_name: &str) -> (String, Option<String>) {
    let words: Vec<&str> = full_name.split_whitespace().collect();
    match words.split_last() {
        Some((last, rest)) if !rest.is_empty() => (rest.join(" "), Some(last.to_string())),
        Some((only, _)) => (only.to_string(), None),
        None => (String::new(), None),
    }
}

/// Extracts the location a place path points at, if any.
fn place_reference(
    context: &ItemContext<'_>,
    key: &str,
    output: &mut TransformOutput,
) -> Option<SourceKey> {
    let raw = context.attribute(key)?;
    match codec::decode(raw) {
        Ok(path) => path.last_id().map(|id| id.as_key()),
        Err(err) => {
            output.skip(key, err);
            None
        }
    }
}

pub(crate) fn target_id_of(item_id: SourceId) -> MigrationResult<i64> {
    i64::try_from(item_id.into_inner()).map_err(|err| {
        migration_error!(
            ErrorKind::ConversionError,
            "Item id does not fit a target id",
            format!("item {item_id}"),
            source: err
        )
    })
}

impl ItemTransform for PeopleTransform {
    fn name(&self) -> &str {
        "people"
    }

    fn item_type(&self) -> &str {
        PERSON_POST_TYPE
    }

    fn grammar(&self) -> &KeyGrammar {
        &self.grammar
    }

    fn reconcile_policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    fn transform(&self, context: &ItemContext<'_>) -> MigrationResult<TransformOutput> {
        let Some(full_name) = context.non_blank("post_title") else {
            bail!(
                ErrorKind::InvalidData,
                "Person has no name",
                format!("post {} has an empty post_title", context.item_id)
            );
        };

        let mut output = TransformOutput::default();
        let (first_name, last_name) = split_full_name(full_name);
        let birth_place = place_reference(context, BIRTH_PLACE_KEY, &mut output);
        let death_place = place_reference(context, DEATH_PLACE_KEY, &mut output);

        let mutation = TargetRowMutation::new(["id"])
            .with("id", Cell::I64(target_id_of(context.item_id)?))
            .with("slug", Cell::text_or_null(context.attribute("post_name")))
            .with("first_name", Cell::Text(first_name))
            .with("last_name", Cell::text_or_null(last_name.as_deref()))
            .with("biography", Cell::text_or_null(context.attribute("post_content")))
            .with("is_active", Cell::Bool(true));

        output.push(
            PendingMutation::upsert(PEOPLE_TABLE, mutation, context.item_id)
                .with_identity(EntityType::Person, context.item_id.as_key())
                .with_optional_reference("birth_location_id", EntityType::Location, birth_place)
                .with_optional_reference("death_location_id", EntityType::Location, death_place),
        );

        for country in country_ids(context, NATIONALITY_KEY, &mut output) {
            output.push(
                PendingMutation::upsert(
                    PERSON_NATIONALITIES_TABLE,
                    TargetRowMutation::new(["person_id", "location_id"]),
                    context.item_id,
                )
                .with_reference(Reference::new("person_id", EntityType::Person, context.item_id))
                .with_reference(Reference::new("location_id", EntityType::Country, country)),
            );
        }

        Ok(output)
    }
}
