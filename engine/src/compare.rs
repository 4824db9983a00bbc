//! Multi-key ordering of entities.
//!
//! A sort specifier is a field name, optionally prefixed with `-` for
//! descending order. The comparator walks the specifiers left to right and
//! falls through to the next one on ties. It is used to place a single
//! entity inside an already sorted list, never to sort a whole list.

use crate::entity::{CREATED_AT, UPDATED_AT};
use crate::{error::Result, Entity, Error};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Field name that may never be used as a sort key.
const RESTRICTED_FIELD: &str = "password";

/// Check a field name against `^[A-Za-z][0-9A-Za-z_]*$`.
pub fn validate_field_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidKey(name.to_string()))
    }
}

/// One key of a sort order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortSpecifier {
    /// Resolved field name
    pub field: String,
    /// Whether larger values come first
    pub descending: bool,
}

impl SortSpecifier {
    /// Ascending order on `field`.
    pub fn ascending(field: &str) -> Result<Self> {
        Self::build(field, false)
    }

    /// Descending order on `field`.
    pub fn descending(field: &str) -> Result<Self> {
        Self::build(field, true)
    }

    /// Parse `field` or `-field`.
    pub fn parse(spec: &str) -> Result<Self> {
        match spec.strip_prefix('-') {
            Some(field) => Self::build(field, true),
            None => Self::build(spec, false),
        }
    }

    fn build(field: &str, descending: bool) -> Result<Self> {
        let field = match field {
            "_created_at" => CREATED_AT,
            "_updated_at" => UPDATED_AT,
            other => other,
        };
        validate_field_name(field)?;
        if field == RESTRICTED_FIELD {
            return Err(Error::RestrictedField(field.to_string()));
        }
        Ok(Self {
            field: field.to_string(),
            descending,
        })
    }

    /// Compare two entities on this key alone.
    pub fn compare(&self, a: &Entity, b: &Entity) -> Ordering {
        let ordering = compare_optional(a.get(&self.field).as_ref(), b.get(&self.field).as_ref());
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

impl fmt::Display for SortSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "-{}", self.field)
        } else {
            write!(f, "{}", self.field)
        }
    }
}

/// Compare two JSON values.
///
/// Numbers compare numerically, strings lexicographically and booleans with
/// `false < true`. Values of different kinds, nulls and composite values are
/// never less than one another, so they compare equal.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn compare_optional(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => compare_values(a, b),
        _ => Ordering::Equal,
    }
}

/// Compare two entities by a list of already validated specifiers.
///
/// An exhausted list means the entities are equal for ordering purposes.
pub fn compare(a: &Entity, b: &Entity, specifiers: &[SortSpecifier]) -> Ordering {
    for specifier in specifiers {
        match specifier.compare(a, b) {
            Ordering::Equal => continue,
            decided => return decided,
        }
    }
    Ordering::Equal
}

/// Compare two entities by raw specifier strings.
///
/// Specifiers are validated as they are reached, so a malformed key after a
/// deciding key is not reported.
pub fn compare_by<S: AsRef<str>>(a: &Entity, b: &Entity, specifiers: &[S]) -> Result<Ordering> {
    for raw in specifiers {
        let specifier = SortSpecifier::parse(raw.as_ref())?;
        match specifier.compare(a, b) {
            Ordering::Equal => continue,
            decided => return Ok(decided),
        }
    }
    Ok(Ordering::Equal)
}

/// Index at which `entity` belongs in the sorted `list`.
///
/// This is the first position whose occupant does not sort before `entity`,
/// or the end of the list when every occupant does. Without specifiers the
/// entity goes to the front.
pub fn insertion_index(list: &[Entity], entity: &Entity, specifiers: &[SortSpecifier]) -> usize {
    if specifiers.is_empty() {
        return 0;
    }
    list.iter()
        .position(|existing| compare(existing, entity, specifiers) != Ordering::Less)
        .unwrap_or(list.len())
}
