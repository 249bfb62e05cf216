//! Groups the raw rows of one item into repeater slots.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::error::{ErrorKind, MigrationError};
use crate::grammar::{KeyGrammar, ParsedKey};
use crate::migration_error;
use crate::types::{RawRow, SourceId, TrackVariant};

/// Populated fields of one record in one track variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slot {
    fields: BTreeMap<String, String>,
}

impl Slot {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn into_fields(self) -> BTreeMap<String, String> {
        self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Slot
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(field, value)| (field.into(), value.into()))
                .collect(),
        }
    }
}

/// Slots of one category, per track variant, keyed by index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategorySlots {
    pub primary: BTreeMap<u32, Slot>,
    pub import: BTreeMap<u32, Slot>,
    /// Counter values found for the primary variant. Informational only.
    pub primary_hint: Option<u32>,
    /// Counter values found for the import variant. Informational only.
    pub import_hint: Option<u32>,
}

impl CategorySlots {
    pub fn variant(&self, variant: TrackVariant) -> &BTreeMap<u32, Slot> {
        match variant {
            TrackVariant::Primary => &self.primary,
            TrackVariant::Import => &self.import,
        }
    }

    fn variant_mut(&mut self, variant: TrackVariant) -> &mut BTreeMap<u32, Slot> {
        match variant {
            TrackVariant::Primary => &mut self.primary,
            TrackVariant::Import => &mut self.import,
        }
    }

    /// Indices populated in either variant, ascending.
    pub fn indices(&self) -> BTreeSet<u32> {
        self.primary
            .keys()
            .chain(self.import.keys())
            .copied()
            .collect()
    }

    /// Authoritative record span: highest populated index + 1 across both variants.
    pub fn span(&self) -> u32 {
        self.indices()
            .last()
            .map(|index| index.saturating_add(1))
            .unwrap_or(0)
    }
}

/// A row that belongs to a known category but could not be used.
#[derive(Debug, Clone)]
pub struct SkippedRow {
    pub key: String,
    pub error: MigrationError,
}

/// Result of aggregating the rows of one item.
#[derive(Debug, Clone)]
pub struct AggregatedItem {
    pub item_id: SourceId,
    pub categories: BTreeMap<String, CategorySlots>,
    /// Rows outside of every registered category, such as `post_title`.
    pub unmatched: BTreeMap<String, String>,
    pub skipped: Vec<SkippedRow>,
}

impl AggregatedItem {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.unmatched.get(key).map(String::as_str)
    }
}

/// Aggregates `rows` of item `item_id` into slots.
///
/// Blank values never populate a slot. When a slot field appears twice the first non-blank
/// value is kept.
pub fn aggregate(grammar: &KeyGrammar, item_id: SourceId, rows: &[RawRow]) -> AggregatedItem {
    let mut categories: BTreeMap<String, CategorySlots> = BTreeMap::new();
    let mut unmatched = BTreeMap::new();
    let mut skipped = Vec::new();

    for row in rows {
        match grammar.parse(&row.key) {
            ParsedKey::Slot(key) => {
                if row.value.trim().is_empty() {
                    continue;
                }

                let rendered_key = key.to_string();
                let slot = categories
                    .entry(key.category)
                    .or_default()
                    .variant_mut(key.variant)
                    .entry(key.index)
                    .or_default();

                match slot.fields.entry(key.field) {
                    Entry::Vacant(entry) => {
                        entry.insert(row.value.clone());
                    }
                    Entry::Occupied(entry) if entry.get() != &row.value => {
                        debug!(
                            %item_id,
                            key = %rendered_key,
                            kept = %entry.get(),
                            discarded = %row.value,
                            "duplicate slot field, keeping the first value"
                        );
                    }
                    Entry::Occupied(_) => {}
                }
            }
            ParsedKey::Counter(key) => {
                let value = row.value.trim();
                if value.is_empty() {
                    continue;
                }

                let Ok(hint) = value.parse::<u32>() else {
                    warn!(%item_id, key = %key, value, "ignoring non-integer counter value");
                    continue;
                };

                let slots = categories.entry(key.category).or_default();
                match key.variant {
                    TrackVariant::Primary => slots.primary_hint = Some(hint),
                    TrackVariant::Import => slots.import_hint = Some(hint),
                }
            }
            ParsedKey::NotMatched if grammar.claims(&row.key) => {
                skipped.push(SkippedRow {
                    key: row.key.clone(),
                    error: migration_error!(
                        ErrorKind::KeyGrammarNotMatched,
                        "Key of a repeater category does not parse",
                        format!("item {item_id}, key `{}`", row.key)
                    ),
                });
            }
            ParsedKey::NotMatched => {
                unmatched
                    .entry(row.key.clone())
                    .or_insert_with(|| row.value.clone());
            }
        }
    }

    for (category, slots) in &categories {
        log_counter_drift(item_id, category, slots);
    }

    AggregatedItem {
        item_id,
        categories,
        unmatched,
        skipped,
    }
}

fn log_counter_drift(item_id: SourceId, category: &str, slots: &CategorySlots) {
    for (variant, hint) in [
        (TrackVariant::Primary, slots.primary_hint),
        (TrackVariant::Import, slots.import_hint),
    ] {
        let Some(hint) = hint else {
            continue;
        };

        let populated = slots.variant(variant).len();
        if populated as u64 != u64::from(hint) {
            debug!(
                %item_id,
                category,
                ?variant,
                hint,
                populated,
                span = slots.span(),
                "counter disagrees with populated slots"
            );
        }
    }
}
