//! Merges the PRIMARY and IMPORT tracks of a category into canonical records.
//!
//! Per index: a single variant is emitted as is; two variants with equal identity fields are
//! merged with PRIMARY winning on conflicting values; two variants with different identities
//! are both emitted and reported as a conflict.

use std::collections::BTreeMap;
use tracing::debug;

use crate::aggregate::{CategorySlots, Slot};
use crate::codec;
use crate::grammar::CategoryFamily;
use crate::types::{Provenance, SourceId, TrackVariant};

/// Canonical form of one repeated record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub category: String,
    pub index: u32,
    pub fields: BTreeMap<String, String>,
    pub provenance: Provenance,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// Two records at the same index whose identity fields differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationConflict {
    pub item_id: SourceId,
    pub category: String,
    pub index: u32,
    pub primary: BTreeMap<String, String>,
    pub import: BTreeMap<String, String>,
}

/// Output of [`reconcile`].
#[derive(Debug, Clone, Default)]
pub struct Reconciled {
    pub records: Vec<Record>,
    pub conflicts: Vec<ReconciliationConflict>,
}

/// Identity fields per category family.
#[derive(Debug, Clone, Default)]
pub struct ReconcilePolicy {
    rules: Vec<(CategoryFamily, Vec<String>)>,
}

impl ReconcilePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity<I, F>(mut self, family: CategoryFamily, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        self.rules
            .push((family, fields.into_iter().map(Into::into).collect()));
        self
    }

    /// Identity fields of `category`. Categories without a rule have no identity fields, so
    /// both variants at an index are always merged.
    pub fn identity_fields(&self, category: &str) -> &[String] {
        self.rules
            .iter()
            .find(|(family, _)| family.accepts(category))
            .map(|(_, fields)| fields.as_slice())
            .unwrap_or(&[])
    }
}

/// Normalizes an identity value for comparison.
///
/// Values that decode to a non-empty scalar list compare by their canonical scalars, so a
/// serialized `a:1:{i:0;s:3:"742";}` equals a bare `742`. Everything else compares trimmed and
/// case-insensitively.
pub fn normalize_identity(value: &str) -> String {
    match codec::decode(value) {
        Ok(list) if !list.is_empty() => list.canonical(),
        _ => value.trim().to_lowercase(),
    }
}

/// Value an identity field takes in a merged record.
///
/// A single serialized id is stored as the bare id, so `a:1:{i:0;s:3:"742";}` becomes `742`.
/// Any other value is kept as PRIMARY wrote it.
fn merged_identity(value: &str) -> String {
    match codec::decode(value) {
        Ok(list) if list.len() == 1 => match list.first_id() {
            Some(id) => id.to_string(),
            None => value.to_string(),
        },
        _ => value.to_string(),
    }
}

fn same_identity(primary: &Slot, import: &Slot, identity_fields: &[String]) -> bool {
    identity_fields.iter().all(|field| {
        match (primary.get(field), import.get(field)) {
            (Some(a), Some(b)) => normalize_identity(a) == normalize_identity(b),
            (None, None) => true,
            _ => false,
        }
    })
}

/// Reconciles the slots of one category of item `item_id`.
///
/// Records are ordered by index, PRIMARY before IMPORT on a shared index.
pub fn reconcile(
    item_id: SourceId,
    category: &str,
    slots: &CategorySlots,
    identity_fields: &[String],
) -> Reconciled {
    let mut reconciled = Reconciled::default();

    for index in slots.indices() {
        let record = |slot: &Slot, provenance: Provenance| Record {
            category: category.to_string(),
            index,
            fields: slot.fields().clone(),
            provenance,
        };

        match (slots.primary.get(&index), slots.import.get(&index)) {
            (Some(primary), None) => reconciled
                .records
                .push(record(primary, TrackVariant::Primary.into())),
            (None, Some(import)) => reconciled
                .records
                .push(record(import, TrackVariant::Import.into())),
            (Some(primary), Some(import)) if same_identity(primary, import, identity_fields) => {
                let mut fields = import.fields().clone();
                for (field, value) in primary.fields() {
                    let value = if identity_fields.contains(field) {
                        merged_identity(value)
                    } else {
                        value.clone()
                    };
                    if let Some(overridden) = fields.insert(field.clone(), value.clone()) {
                        if overridden != value && !identity_fields.contains(field) {
                            debug!(
                                %item_id,
                                category,
                                index,
                                %field,
                                primary = %value,
                                import = %overridden,
                                "primary value wins over import value"
                            );
                        }
                    }
                }

                reconciled.records.push(Record {
                    category: category.to_string(),
                    index,
                    fields,
                    provenance: Provenance::Merged,
                });
            }
            (Some(primary), Some(import)) => {
                reconciled
                    .records
                    .push(record(primary, Provenance::Primary));
                reconciled.records.push(record(import, Provenance::Import));
                reconciled.conflicts.push(ReconciliationConflict {
                    item_id,
                    category: category.to_string(),
                    index,
                    primary: primary.fields().clone(),
                    import: import.fields().clone(),
                });
            }
            (None, None) => {}
        }
    }

    reconciled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::grammar::KeyGrammar;
    use crate::types::RawRow;

    fn identity() -> Vec<String> {
        vec!["personId".to_string(), "role".to_string()]
    }

    fn slot(fields: &[(&str, &str)]) -> Slot {
        fields.iter().copied().collect()
    }

    fn slots(primary: Vec<(u32, Slot)>, import: Vec<(u32, Slot)>) -> CategorySlots {
        CategorySlots {
            primary: primary.into_iter().collect(),
            import: import.into_iter().collect(),
            ..CategorySlots::default()
        }
    }

    #[test]
    fn serialized_and_bare_ids_merge_into_one_record() {
        let item_id = SourceId::new(1);
        let rows = vec![
            RawRow::new(item_id, "crew_0_personId", r#"a:1:{i:0;s:3:"742";}"#),
            RawRow::new(item_id, "crew_0_role", "Director"),
            RawRow::new(item_id, "crew_import_0_personId", "742"),
            RawRow::new(item_id, "crew_import_0_role", "Director"),
        ];
        let item = aggregate(&KeyGrammar::any(), item_id, &rows);

        let reconciled = reconcile(item_id, "crew", &item.categories["crew"], &identity());

        assert!(reconciled.conflicts.is_empty());
        assert_eq!(reconciled.records.len(), 1);
        let record = &reconciled.records[0];
        assert_eq!(record.index, 0);
        assert_eq!(record.provenance, Provenance::Merged);
        assert_eq!(record.get("role"), Some("Director"));
        assert_eq!(record.get("personId"), Some("742"));
    }

    #[test]
    fn identical_tracks_merge_to_the_same_content() {
        let fields: &[(&str, &str)] = &[("personId", "9"), ("role", "Montaje"), ("comentario", "x")];
        let slots = slots(vec![(0, slot(fields))], vec![(0, slot(fields))]);

        let reconciled = reconcile(SourceId::new(1), "crew", &slots, &identity());

        assert_eq!(reconciled.records.len(), 1);
        assert_eq!(reconciled.records[0].provenance, Provenance::Merged);
        assert_eq!(
            reconciled.records[0].fields,
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>()
        );
    }

    #[test]
    fn primary_wins_and_import_fills_gaps() {
        let slots = slots(
            vec![(
                0,
                slot(&[("personId", "9"), ("role", "director"), ("comentario", "primary")]),
            )],
            vec![(
                0,
                slot(&[
                    ("personId", "9"),
                    ("role", " Director "),
                    ("comentario", "import"),
                    ("acreditado_con_su", "Juan"),
                ]),
            )],
        );

        let reconciled = reconcile(SourceId::new(1), "crew", &slots, &identity());
        let record = &reconciled.records[0];

        assert_eq!(record.get("comentario"), Some("primary"));
        assert_eq!(record.get("acreditado_con_su"), Some("Juan"));
        assert_eq!(record.get("role"), Some("director"));
    }

    #[test]
    fn differing_identities_keep_both_records_and_report_a_conflict() {
        let slots = slots(
            vec![
                (0, slot(&[("personId", "9"), ("role", "Director")])),
                (1, slot(&[("personId", "4"), ("role", "Guion")])),
            ],
            vec![
                (0, slot(&[("personId", "10"), ("role", "Director")])),
                (1, slot(&[("personId", "5"), ("role", "Guion")])),
            ],
        );

        let reconciled = reconcile(SourceId::new(1), "crew", &slots, &identity());

        assert_eq!(reconciled.records.len(), 4);
        assert_eq!(reconciled.conflicts.len(), 2);
        let order: Vec<_> = reconciled
            .records
            .iter()
            .map(|r| (r.index, r.provenance))
            .collect();
        assert_eq!(
            order,
            vec![
                (0, Provenance::Primary),
                (0, Provenance::Import),
                (1, Provenance::Primary),
                (1, Provenance::Import),
            ]
        );
    }

    #[test]
    fn identity_missing_on_one_side_is_a_conflict() {
        let slots = slots(
            vec![(0, slot(&[("personId", "9"), ("role", "Director")]))],
            vec![(0, slot(&[("personId", "9")]))],
        );

        let reconciled = reconcile(SourceId::new(1), "crew", &slots, &identity());

        assert_eq!(reconciled.conflicts.len(), 1);
    }

    #[test]
    fn single_variant_indices_keep_their_provenance_in_index_order() {
        let slots = slots(
            vec![(3, slot(&[("personId", "3")]))],
            vec![(0, slot(&[("personId", "1")]))],
        );

        let reconciled = reconcile(SourceId::new(1), "crew", &slots, &identity());

        assert_eq!(
            reconciled
                .records
                .iter()
                .map(|r| (r.index, r.provenance))
                .collect::<Vec<_>>(),
            vec![(0, Provenance::Import), (3, Provenance::Primary)]
        );
    }

    #[test]
    fn policy_selects_identity_by_family() {
        let policy = ReconcilePolicy::new()
            .with_identity(CategoryFamily::prefixed("ficha_tecnica_"), ["persona", "rol"])
            .with_identity(CategoryFamily::exact("interpretes"), ["interprete", "nombre_del_personaje"]);

        assert_eq!(policy.identity_fields("ficha_tecnica_montaje"), ["persona", "rol"]);
        assert_eq!(
            policy.identity_fields("interpretes"),
            ["interprete", "nombre_del_personaje"]
        );
        assert!(policy.identity_fields("otros").is_empty());
    }
}
