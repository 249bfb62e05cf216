//! Codec for the legacy serialized scalar array format.
//!
//! Values such as `a:1:{i:0;s:3:"742";}` are PHP `serialize()` output restricted to flat arrays
//! of integers and strings. String lengths are byte counts and are validated exactly; decoding
//! either returns the whole list or fails with [`ErrorKind::MalformedScalarEncoding`].

use std::fmt;
use std::str;

use crate::bail;
use crate::error::{ErrorKind, MigrationResult};
use crate::types::{SourceId, SourceKey};

/// A decoded scalar value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scalar {
    Int(i64),
    Str(String),
}

impl Scalar {
    /// Returns the canonical text form used for identifier lookups.
    pub fn as_source_key(&self) -> SourceKey {
        match self {
            Scalar::Int(value) => SourceKey::from_canonical(value.to_string()),
            Scalar::Str(value) => SourceKey::from_canonical(value.trim()),
        }
    }

    /// Interprets the scalar as a positive source id.
    pub fn as_source_id(&self) -> Option<SourceId> {
        match self {
            Scalar::Int(value) => u64::try_from(*value).ok(),
            Scalar::Str(value) => value.trim().parse::<u64>().ok(),
        }
        .filter(|id| *id > 0)
        .map(SourceId::new)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(value) => write!(f, "{value}"),
            Scalar::Str(value) => f.write_str(value),
        }
    }
}

/// Ordered list of decoded scalars.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ScalarList(Vec<Scalar>);

impl ScalarList {
    pub fn new(values: Vec<Scalar>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scalar> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<Scalar> {
        self.0
    }

    /// First element as a source id. Zero, negative and non-numeric values are no reference.
    pub fn first_id(&self) -> Option<SourceId> {
        self.0.first().and_then(Scalar::as_source_id)
    }

    /// Last element as a source id, used for location paths stored root first.
    pub fn last_id(&self) -> Option<SourceId> {
        self.0.last().and_then(Scalar::as_source_id)
    }

    /// Canonical comparison form: trimmed, lower-cased elements joined by commas.
    pub fn canonical(&self) -> String {
        self.0
            .iter()
            .map(|scalar| scalar.to_string().trim().to_lowercase())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl From<Vec<Scalar>> for ScalarList {
    fn from(values: Vec<Scalar>) -> Self {
        Self(values)
    }
}

/// Decodes a legacy serialized value.
///
/// Blank input decodes to an empty list. A bare integer literal decodes to a one element list.
pub fn decode(raw: &str) -> MigrationResult<ScalarList> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(ScalarList::default());
    }

    if is_integer_literal(trimmed) {
        let value = parse_i64(trimmed)?;
        return Ok(ScalarList(vec![Scalar::Int(value)]));
    }

    let mut parser = Parser::new(trimmed.as_bytes());
    let list = match parser.peek() {
        Some(b'a') => parser.array()?,
        Some(b'i') | Some(b's') => ScalarList(vec![parser.scalar()?]),
        _ => bail!(
            ErrorKind::MalformedScalarEncoding,
            "Unsupported serialized value",
            format!("value starts with an unknown type marker: `{}`", preview(trimmed))
        ),
    };

    if !parser.is_at_end() {
        bail!(
            ErrorKind::MalformedScalarEncoding,
            "Trailing data after serialized value",
            format!("{} unexpected bytes at offset {}", parser.remaining(), parser.pos)
        );
    }

    Ok(list)
}

/// Encodes `list` as a zero indexed serialized array.
pub fn encode(list: &ScalarList) -> String {
    let mut out = format!("a:{}:{{", list.len());
    for (index, scalar) in list.iter().enumerate() {
        out.push_str(&format!("i:{index};"));
        match scalar {
            Scalar::Int(value) => out.push_str(&format!("i:{value};")),
            Scalar::Str(value) => out.push_str(&format!("s:{}:\"{}\";", value.len(), value)),
        }
    }
    out.push('}');
    out
}

fn is_integer_literal(value: &str) -> bool {
    let digits = value
        .strip_prefix('-')
        .or_else(|| value.strip_prefix('+'))
        .unwrap_or(value);

    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn parse_i64(value: &str) -> MigrationResult<i64> {
    match value.parse::<i64>() {
        Ok(value) => Ok(value),
        Err(err) => bail!(
            ErrorKind::MalformedScalarEncoding,
            "Integer out of range",
            format!("`{}` is not a 64 bit integer", preview(value)),
            source: err
        ),
    }
}

fn preview(value: &str) -> String {
    value.chars().take(32).collect()
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn is_at_end(&self) -> bool {
        self.pos == self.input.len()
    }

    fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    fn expect(&mut self, expected: &[u8]) -> MigrationResult<()> {
        if self.input[self.pos..].starts_with(expected) {
            self.pos += expected.len();
            return Ok(());
        }

        bail!(
            ErrorKind::MalformedScalarEncoding,
            "Unexpected token in serialized value",
            format!(
                "expected `{}` at offset {}",
                String::from_utf8_lossy(expected),
                self.pos
            )
        )
    }

    /// Reads bytes up to `terminator`, consuming the terminator.
    fn read_until(&mut self, terminator: u8) -> MigrationResult<&'a str> {
        let start = self.pos;
        let Some(offset) = self.input[start..].iter().position(|b| *b == terminator) else {
            bail!(
                ErrorKind::MalformedScalarEncoding,
                "Unterminated serialized token",
                format!("missing `{}` after offset {start}", terminator as char)
            );
        };

        self.pos = start + offset + 1;
        self.utf8(start, start + offset)
    }

    fn utf8(&self, start: usize, end: usize) -> MigrationResult<&'a str> {
        match str::from_utf8(&self.input[start..end]) {
            Ok(value) => Ok(value),
            Err(err) => bail!(
                ErrorKind::MalformedScalarEncoding,
                "Length prefix splits a character",
                format!("bytes {start}..{end} are not valid UTF-8"),
                source: err
            ),
        }
    }

    fn length(&mut self, terminator: u8) -> MigrationResult<usize> {
        let digits = self.read_until(terminator)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            bail!(
                ErrorKind::MalformedScalarEncoding,
                "Invalid length prefix",
                format!("`{digits}` is not a length")
            );
        }

        match digits.parse::<usize>() {
            Ok(length) => Ok(length),
            Err(err) => bail!(
                ErrorKind::MalformedScalarEncoding,
                "Invalid length prefix",
                format!("`{digits}` is not a length"),
                source: err
            ),
        }
    }

    fn array(&mut self) -> MigrationResult<ScalarList> {
        self.expect(b"a:")?;
        let declared = self.length(b':')?;
        self.expect(b"{")?;

        let mut values = Vec::with_capacity(declared.min(64));
        while self.peek() != Some(b'}') {
            if self.is_at_end() {
                bail!(
                    ErrorKind::MalformedScalarEncoding,
                    "Unterminated serialized array",
                    format!("array declared {declared} elements but input ended")
                );
            }

            // Keys only carry the PHP array position, the element order is what matters.
            self.scalar()?;
            values.push(self.scalar()?);
        }
        self.expect(b"}")?;

        if values.len() != declared {
            bail!(
                ErrorKind::MalformedScalarEncoding,
                "Array length mismatch",
                format!("declared {declared} elements, found {}", values.len())
            );
        }

        Ok(ScalarList(values))
    }

    fn scalar(&mut self) -> MigrationResult<Scalar> {
        match self.peek() {
            Some(b'i') => {
                self.expect(b"i:")?;
                let literal = self.read_until(b';')?;
                if !is_integer_literal(literal) {
                    bail!(
                        ErrorKind::MalformedScalarEncoding,
                        "Invalid integer literal",
                        format!("`{}` is not an integer", preview(literal))
                    );
                }
                Ok(Scalar::Int(parse_i64(literal)?))
            }
            Some(b's') => {
                self.expect(b"s:")?;
                let length = self.length(b':')?;
                self.expect(b"\"")?;

                let start = self.pos;
                let end = start.saturating_add(length);
                if end > self.input.len() {
                    bail!(
                        ErrorKind::MalformedScalarEncoding,
                        "String length exceeds input",
                        format!(
                            "declared {length} bytes at offset {start}, only {} available",
                            self.input.len() - start
                        )
                    );
                }

                let value = self.utf8(start, end)?;
                self.pos = end;
                if self.expect(b"\";").is_err() {
                    bail!(
                        ErrorKind::MalformedScalarEncoding,
                        "String length prefix mismatch",
                        format!("declared {length} bytes at offset {start} but the string does not end there")
                    );
                }

                Ok(Scalar::Str(value.to_string()))
            }
            Some(other) => bail!(
                ErrorKind::MalformedScalarEncoding,
                "Unsupported serialized type",
                format!(
                    "type marker `{}` at offset {} is not an integer or string",
                    other as char, self.pos
                )
            ),
            None => bail!(
                ErrorKind::MalformedScalarEncoding,
                "Unexpected end of serialized value"
            ),
        }
    }
}
