use crate::aggregate::AggregatedItem;
use crate::error::MigrationError;
use crate::grammar::{CategoryFamily, KeyGrammar};
use crate::hierarchy::HierarchyNode;
use crate::reconcile::{ReconcilePolicy, Record};
use crate::types::{EntityType, PendingMutation, SourceId};

/// Everything known about one item once its rows are aggregated and reconciled.
#[derive(Debug)]
pub struct ItemContext<'a> {
    pub item_id: SourceId,
    pub item: &'a AggregatedItem,
    /// Reconciled records of every category, ordered by category then index.
    pub records: &'a [Record],
}

impl ItemContext<'_> {
    /// Returns a plain attribute of the item, such as `post_title`.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.item.attribute(key)
    }

    /// Returns the trimmed attribute, or `None` when it is absent or blank.
    pub fn non_blank(&self, key: &str) -> Option<&str> {
        self.attribute(key)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Records whose category belongs to `family`.
    pub fn records_of<'s>(
        &'s self,
        family: &'s CategoryFamily,
    ) -> impl Iterator<Item = &'s Record> + 's {
        self.records
            .iter()
            .filter(move |record| family.accepts(&record.category))
    }
}

/// A record or attribute a transform could not use.
#[derive(Debug, Clone)]
pub struct SkippedRecord {
    pub what: String,
    pub error: MigrationError,
}

impl SkippedRecord {
    pub fn new(what: impl Into<String>, error: MigrationError) -> Self {
        Self {
            what: what.into(),
            error,
        }
    }
}

#[derive(Debug, Default)]
pub struct TransformOutput {
    pub mutations: Vec<PendingMutation>,
    pub skipped: Vec<SkippedRecord>,
}

impl TransformOutput {
    pub fn push(&mut self, mutation: PendingMutation) {
        self.mutations.push(mutation);
    }

    pub fn skip(&mut self, what: impl Into<String>, error: MigrationError) {
        self.skipped.push(SkippedRecord::new(what, error));
    }
}

/// Turns items of one content type into target rows.
///
/// Transforms are pure: they see one item at a time and express links to other entities as
/// references that the engine resolves.
pub trait ItemTransform: Send + Sync {
    /// Name of the stage, used for cursors and logs.
    fn name(&self) -> &str;

    /// Content type of the migrated items.
    fn item_type(&self) -> &str;

    /// Repeater categories of the item type.
    fn grammar(&self) -> &KeyGrammar;

    fn reconcile_policy(&self) -> &ReconcilePolicy;

    /// Builds the mutations of one item.
    ///
    /// An `Err` fails the whole item. Problems limited to a record are reported in
    /// [`TransformOutput::skipped`].
    fn transform(&self, context: &ItemContext<'_>) -> Result<TransformOutput, MigrationError>;
}

/// Turns the nodes of a taxonomy into target rows.
pub trait HierarchyTransform: Send + Sync {
    fn name(&self) -> &str;

    fn taxonomy(&self) -> &str;

    fn entity(&self) -> EntityType;

    /// Builds the mutation of `node`, referencing its parent when it has one.
    fn transform(&self, node: &HierarchyNode) -> PendingMutation;
}

/// Lower-cases `value` and joins its alphanumeric runs with `-`.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for word in value
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
    {
        if !slug.is_empty() {
            slug.push('-');
        }
        slug.extend(word.chars().flat_map(char::to_lowercase));
    }
    slug
}
