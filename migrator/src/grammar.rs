//! Grammar of repeater field keys.
//!
//! Repeated records are stored as flat keys `{category}[_import]_{index}_{field}` and an
//! optional counter key `{category}[_import]`. The only signal separating the category from the
//! field is the first purely numeric segment.

use std::fmt;

use crate::types::TrackVariant;

/// Reserved segment marking the IMPORT track variant.
const IMPORT_SEGMENT: &str = "import";

/// Set of categories a grammar recognizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryFamily {
    /// Exactly one category, for example `interpretes`.
    Exact(String),
    /// Every category starting with the prefix, for example `ficha_tecnica_`.
    Prefixed(String),
}

impl CategoryFamily {
    pub fn exact(name: impl Into<String>) -> Self {
        CategoryFamily::Exact(name.into())
    }

    pub fn prefixed(prefix: impl Into<String>) -> Self {
        CategoryFamily::Prefixed(prefix.into())
    }

    /// Returns `true` when `category` belongs to this family.
    pub fn accepts(&self, category: &str) -> bool {
        match self {
            CategoryFamily::Exact(name) => category == name,
            CategoryFamily::Prefixed(prefix) => {
                category.len() > prefix.len() && category.starts_with(prefix.as_str())
            }
        }
    }

    fn claims(&self, key: &str) -> bool {
        match self {
            CategoryFamily::Exact(name) => {
                key.strip_prefix(name.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('_'))
            }
            CategoryFamily::Prefixed(prefix) => key.starts_with(prefix.as_str()),
        }
    }
}

/// Key of one field of one repeated record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub category: String,
    pub variant: TrackVariant,
    pub index: u32,
    pub field: String,
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.category)?;
        if self.variant == TrackVariant::Import {
            write!(f, "_{IMPORT_SEGMENT}")?;
        }
        write!(f, "_{}_{}", self.index, self.field)
    }
}

/// Key holding the expected number of records of a category.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub category: String,
    pub variant: TrackVariant,
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.category)?;
        if self.variant == TrackVariant::Import {
            write!(f, "_{IMPORT_SEGMENT}")?;
        }
        Ok(())
    }
}

/// Result of parsing a key. Parsing is total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedKey {
    Slot(SlotKey),
    Counter(CounterKey),
    NotMatched,
}

/// Parser for repeater keys of a configured set of categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGrammar {
    families: Vec<CategoryFamily>,
    any: bool,
}

impl KeyGrammar {
    pub fn new(families: Vec<CategoryFamily>) -> Self {
        Self {
            families,
            any: false,
        }
    }

    /// A grammar accepting every category.
    pub fn any() -> Self {
        Self {
            families: Vec::new(),
            any: true,
        }
    }

    pub fn families(&self) -> &[CategoryFamily] {
        &self.families
    }

    /// Returns `true` when `key` starts with a registered category.
    ///
    /// Such keys that fail to parse are malformed rather than unrelated metadata.
    pub fn claims(&self, key: &str) -> bool {
        self.any || self.families.iter().any(|family| family.claims(key))
    }

    pub fn accepts_category(&self, category: &str) -> bool {
        self.any || self.families.iter().any(|family| family.accepts(category))
    }

    pub fn parse(&self, key: &str) -> ParsedKey {
        let segments: Vec<&str> = key.split('_').collect();

        let index_position = segments
            .iter()
            .position(|segment| !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()));

        let (prefix, rest) = match index_position {
            Some(position) => (&segments[..position], Some(&segments[position..])),
            None => (&segments[..], None),
        };

        let Some((category, variant)) = self.split_category(prefix) else {
            return ParsedKey::NotMatched;
        };

        let Some(rest) = rest else {
            return ParsedKey::Counter(CounterKey { category, variant });
        };

        let Ok(index) = rest[0].parse::<u32>() else {
            return ParsedKey::NotMatched;
        };

        let field = rest[1..].join("_");
        if field.is_empty() {
            return ParsedKey::NotMatched;
        }

        ParsedKey::Slot(SlotKey {
            category,
            variant,
            index,
            field,
        })
    }

    fn split_category(&self, prefix: &[&str]) -> Option<(String, TrackVariant)> {
        if prefix.is_empty() || prefix.iter().any(|segment| segment.is_empty()) {
            return None;
        }

        let (segments, variant) = match prefix.split_last() {
            Some((last, head)) if *last == IMPORT_SEGMENT && !head.is_empty() => {
                (head, TrackVariant::Import)
            }
            _ => (prefix, TrackVariant::Primary),
        };

        let category = segments.join("_");
        self.accepts_category(&category)
            .then_some((category, variant))
    }
}
