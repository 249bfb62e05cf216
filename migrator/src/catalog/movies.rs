use crate::catalog::countries::country_ids;
use crate::catalog::people::target_id_of;
use crate::catalog::{ItemContext, ItemTransform, TransformOutput, slugify};
use crate::codec;
use crate::error::{ErrorKind, MigrationResult};
use crate::grammar::{CategoryFamily, KeyGrammar};
use crate::reconcile::{ReconcilePolicy, Record};
use crate::types::{
    Cell, EntityType, PendingMutation, Reference, SourceId, SourceKey, TargetRowMutation,
};
use crate::{bail, migration_error};

pub const MOVIES_TABLE: &str = "movies";
pub const ROLES_TABLE: &str = "roles";
pub const MOVIE_CREW_TABLE: &str = "movie_crew";
pub const MOVIE_CAST_TABLE: &str = "movie_cast";
pub const MOVIE_COUNTRIES_TABLE: &str = "movie_countries";

/// WordPress post type of movies.
pub const MOVIE_POST_TYPE: &str = "pelicula";

/// Crew categories are `ficha_tecnica_{department}`.
const CREW_PREFIX: &str = "ficha_tecnica_";
const CAST_CATEGORY: &str = "interpretes";
const COPRODUCTION_KEY: &str = "coproduccion";

const CREDITED_AS_PREFIX: &str = "Acreditado como: ";

/// `pelicula` posts → `movies`, plus their crew, cast and co-producing countries.
#[derive(Debug)]
pub struct MoviesTransform {
    grammar: KeyGrammar,
    policy: ReconcilePolicy,
    crew: CategoryFamily,
    cast: CategoryFamily,
}

impl MoviesTransform {
    pub fn new() -> Self {
        let crew = CategoryFamily::prefixed(CREW_PREFIX);
        let cast = CategoryFamily::exact(CAST_CATEGORY);

        Self {
            grammar: KeyGrammar::new(vec![crew.clone(), cast.clone()]),
            policy: ReconcilePolicy::new()
                .with_identity(crew.clone(), ["persona", "rol"])
                .with_identity(cast.clone(), ["interprete", "nombre_del_personaje"]),
            crew,
            cast,
        }
    }

    fn movie(&self, context: &ItemContext<'_>, output: &mut TransformOutput) -> MigrationResult<()> {
        let Some(title) = context.non_blank("post_title") else {
            bail!(
                ErrorKind::InvalidData,
                "Movie has no title",
                format!("post {} has an empty post_title", context.item_id)
            );
        };

        let slug = match context.non_blank("post_name") {
            Some(slug) => slug.to_string(),
            None => slugify(title),
        };
        let status = match context.attribute("post_status").map(str::trim) {
            Some("publish") => "PUBLISHED",
            _ => "DRAFT",
        };

        let mutation = TargetRowMutation::new(["id"])
            .with("id", Cell::I64(target_id_of(context.item_id)?))
            .with("title", Cell::Text(title.to_string()))
            .with("slug", Cell::Text(slug))
            .with("status", Cell::Text(status.to_string()))
            .with("synopsis", Cell::text_or_null(context.attribute("post_content")));

        output.push(
            PendingMutation::upsert(MOVIES_TABLE, mutation, context.item_id)
                .with_identity(EntityType::Movie, context.item_id.as_key()),
        );

        Ok(())
    }

    /// Co-producing countries are never the primary country of the movie.
    fn coproductions(&self, context: &ItemContext<'_>, output: &mut TransformOutput) {
        for country in country_ids(context, COPRODUCTION_KEY, output) {
            output.push(
                PendingMutation::upsert(
                    MOVIE_COUNTRIES_TABLE,
                    TargetRowMutation::new(["movie_id", "country_id"])
                        .with("is_primary", Cell::Bool(false)),
                    context.item_id,
                )
                .with_reference(Reference::new("movie_id", EntityType::Movie, context.item_id))
                .with_reference(Reference::new("country_id", EntityType::Country, country)),
            );
        }
    }

    fn crew_member(
        &self,
        item_id: SourceId,
        record: &Record,
        output: &mut TransformOutput,
    ) -> MigrationResult<()> {
        let department = record
            .category
            .strip_prefix(CREW_PREFIX)
            .unwrap_or(&record.category);
        let person = person_reference(record, "persona")?;
        let Some(role) = record.get("rol").map(str::trim).filter(|role| !role.is_empty()) else {
            bail!(
                ErrorKind::InvalidData,
                "Crew member has no role",
                format!("item {item_id}, {}[{}]", record.category, record.index)
            );
        };
        let role_key = SourceKey::from_name(role);

        output.push(
            PendingMutation::ensure_exists(
                ROLES_TABLE,
                TargetRowMutation::new(["slug"])
                    .with("name", Cell::Text(role.to_string()))
                    .with("slug", Cell::Text(slugify(role))),
                item_id,
            )
            .with_identity(EntityType::Role, role_key.clone()),
        );

        let mutation = TargetRowMutation::new(["movie_id", "person_id", "role_id"])
            .with("department", Cell::Text(department.to_string()))
            .with("billing_order", Cell::I64(i64::from(record.index) + 1))
            .with("notes", Cell::text_or_null(notes(record).as_deref()));

        output.push(
            PendingMutation::upsert(MOVIE_CREW_TABLE, mutation, item_id)
                .with_reference(Reference::new("movie_id", EntityType::Movie, item_id))
                .with_reference(Reference::new("person_id", EntityType::Person, person))
                .with_reference(Reference::new("role_id", EntityType::Role, role_key)),
        );

        Ok(())
    }

    fn cast_member(
        &self,
        item_id: SourceId,
        record: &Record,
        output: &mut TransformOutput,
    ) -> MigrationResult<()> {
        let person = person_reference(record, "interprete")?;
        let character = record
            .get("nombre_del_personaje")
            .map(str::trim)
            .unwrap_or_default();
        let is_principal = record
            .get("protagonista")
            .map(str::trim)
            .is_some_and(|value| value == "1" || value.eq_ignore_ascii_case("true"));

        let mutation = TargetRowMutation::new(["movie_id", "person_id", "character_name"])
            .with("character_name", Cell::Text(character.to_string()))
            .with("billing_order", Cell::I64(i64::from(record.index) + 1))
            .with("is_principal", Cell::Bool(is_principal))
            .with("notes", Cell::text_or_null(notes(record).as_deref()));

        output.push(
            PendingMutation::upsert(MOVIE_CAST_TABLE, mutation, item_id)
                .with_reference(Reference::new("movie_id", EntityType::Movie, item_id))
                .with_reference(Reference::new("person_id", EntityType::Person, person)),
        );

        Ok(())
    }
}

impl Default for MoviesTransform {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes the serialized person id stored in `field`.
fn person_reference(record: &Record, field: &str) -> MigrationResult<SourceKey> {
    let raw = record.get(field).unwrap_or_default();
    match codec::decode(raw)?.first_id() {
        Some(person) => Ok(person.as_key()),
        None => Err(migration_error!(
            ErrorKind::InvalidData,
            "Record does not reference a person",
            format!("{}[{}] has no usable `{field}`", record.category, record.index)
        )),
    }
}

/// Renders the credit of a crew or cast record.
///
/// `acreditado_con_su` holds either a flag (`1`, `2`) or the name the person was credited
/// under. Only the latter is kept, ahead of the free text comment.
fn notes(record: &Record) -> Option<String> {
    let credited_as = record
        .get("acreditado_con_su")
        .map(str::trim)
        .filter(|value| !matches!(*value, "" | "1" | "2"));
    let comment = record
        .get("comentario")
        .map(str::trim)
        .filter(|value| !value.is_empty());

    match (credited_as, comment) {
        (Some(name), Some(comment)) => Some(format!("{CREDITED_AS_PREFIX}{name}. {comment}")),
        (Some(name), None) => Some(format!("{CREDITED_AS_PREFIX}{name}")),
        (None, Some(comment)) => Some(comment.to_string()),
        (None, None) => None,
    }
}

fn record_label(record: &Record) -> String {
    format!("{}[{}]", record.category, record.index)
}

impl ItemTransform for MoviesTransform {
    fn name(&self) -> &str {
        "movies"
    }

    fn item_type(&self) -> &str {
        MOVIE_POST_TYPE
    }

    fn grammar(&self) -> &KeyGrammar {
        &self.grammar
    }

    fn reconcile_policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    fn transform(&self, context: &ItemContext<'_>) -> MigrationResult<TransformOutput> {
        let mut output = TransformOutput::default();
        self.movie(context, &mut output)?;
        self.coproductions(context, &mut output);

        for record in context.records_of(&self.crew) {
            if let Err(err) = self.crew_member(context.item_id, record, &mut output) {
                output.skip(record_label(record), err);
            }
        }

        for record in context.records_of(&self.cast) {
            if let Err(err) = self.cast_member(context.item_id, record, &mut output) {
                output.skip(record_label(record), err);
            }
        }

        Ok(output)
    }
}
