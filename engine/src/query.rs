//! Query specifications and their canonical identity.
//!
//! A [`QuerySpec`] is an immutable description of what a consumer wants to
//! see: a collection, field constraints, a sort order, pagination and
//! whether a total count is needed. [`QuerySpec::key`] canonicalizes it into
//! a [`QueryKey`] used both to address the cache and to decide whether a
//! running sync has to be reset.

use crate::compare::{compare_values, validate_field_name, SortSpecifier};
use crate::{error::Result, CollectionName, Entity, Error};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A constraint on one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    EqualTo(Value),
    NotEqualTo(Value),
    LessThan(Value),
    LessThanOrEqualTo(Value),
    GreaterThan(Value),
    GreaterThanOrEqualTo(Value),
    ContainedIn(Vec<Value>),
    NotContainedIn(Vec<Value>),
    Exists(bool),
}

impl Constraint {
    /// Wire form of the constraint.
    pub fn to_json(&self) -> Value {
        match self {
            Constraint::EqualTo(v) => v.clone(),
            Constraint::NotEqualTo(v) => json!({ "$ne": v }),
            Constraint::LessThan(v) => json!({ "$lt": v }),
            Constraint::LessThanOrEqualTo(v) => json!({ "$lte": v }),
            Constraint::GreaterThan(v) => json!({ "$gt": v }),
            Constraint::GreaterThanOrEqualTo(v) => json!({ "$gte": v }),
            Constraint::ContainedIn(vs) => json!({ "$in": vs }),
            Constraint::NotContainedIn(vs) => json!({ "$nin": vs }),
            Constraint::Exists(flag) => json!({ "$exists": flag }),
        }
    }

    /// Whether a field value satisfies the constraint.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        match (self, value) {
            (Constraint::Exists(flag), v) => v.is_some_and(|v| !v.is_null()) == *flag,
            (Constraint::EqualTo(expected), v) => v.unwrap_or(&Value::Null) == expected,
            (Constraint::NotEqualTo(expected), v) => v.unwrap_or(&Value::Null) != expected,
            (Constraint::ContainedIn(set), v) => set.contains(v.unwrap_or(&Value::Null)),
            (Constraint::NotContainedIn(set), v) => !set.contains(v.unwrap_or(&Value::Null)),
            (_, None) => false,
            (Constraint::LessThan(bound), Some(v)) => ordered(v, bound) == Some(Ordering::Less),
            (Constraint::LessThanOrEqualTo(bound), Some(v)) => {
                matches!(ordered(v, bound), Some(Ordering::Less | Ordering::Equal))
            }
            (Constraint::GreaterThan(bound), Some(v)) => {
                ordered(v, bound) == Some(Ordering::Greater)
            }
            (Constraint::GreaterThanOrEqualTo(bound), Some(v)) => {
                matches!(ordered(v, bound), Some(Ordering::Greater | Ordering::Equal))
            }
        }
    }
}

/// Ordering between values of the same kind, `None` across kinds.
fn ordered(a: &Value, b: &Value) -> Option<Ordering> {
    let same_kind = matches!(
        (a, b),
        (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::Bool(_), Value::Bool(_))
    );
    same_kind.then(|| compare_values(a, b))
}

/// Canonical identity of a [`QuerySpec`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for QueryKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Typed description of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    collection: CollectionName,
    filters: BTreeMap<String, Constraint>,
    order: Vec<SortSpecifier>,
    limit: Option<usize>,
    skip: usize,
    count: bool,
}

impl QuerySpec {
    /// Query everything in `collection`.
    pub fn new(collection: impl Into<CollectionName>) -> Result<Self> {
        let collection = collection.into();
        if collection.is_empty() {
            return Err(Error::InvalidQuery("collection name is empty".into()));
        }
        Ok(Self {
            collection,
            filters: BTreeMap::new(),
            order: Vec::new(),
            limit: None,
            skip: 0,
            count: false,
        })
    }

    /// Add a constraint on `field`, replacing any previous one.
    pub fn filter(mut self, field: &str, constraint: Constraint) -> Result<Self> {
        validate_field_name(field)?;
        self.filters.insert(field.to_string(), constraint);
        Ok(self)
    }

    /// Shorthand for an equality constraint.
    pub fn equal_to(self, field: &str, value: impl Into<Value>) -> Result<Self> {
        self.filter(field, Constraint::EqualTo(value.into()))
    }

    /// Append an ascending sort key.
    pub fn ascending(mut self, field: &str) -> Result<Self> {
        self.order.push(SortSpecifier::ascending(field)?);
        Ok(self)
    }

    /// Append a descending sort key.
    pub fn descending(mut self, field: &str) -> Result<Self> {
        self.order.push(SortSpecifier::descending(field)?);
        Ok(self)
    }

    /// Replace the sort order from `field`/`-field` strings.
    pub fn order_by<S: AsRef<str>>(mut self, specifiers: &[S]) -> Result<Self> {
        self.order = specifiers
            .iter()
            .map(|s| SortSpecifier::parse(s.as_ref()))
            .collect::<Result<_>>()?;
        Ok(self)
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Ask for a total count alongside the results.
    pub fn with_count(mut self) -> Self {
        self.count = true;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn filters(&self) -> &BTreeMap<String, Constraint> {
        &self.filters
    }

    pub fn sort_specifiers(&self) -> &[SortSpecifier] {
        &self.order
    }

    pub fn page_limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn page_skip(&self) -> usize {
        self.skip
    }

    pub fn wants_count(&self) -> bool {
        self.count
    }

    /// Whether an entity satisfies the collection and every constraint.
    pub fn matches(&self, entity: &Entity) -> bool {
        entity.collection == self.collection
            && self
                .filters
                .iter()
                .all(|(field, constraint)| constraint.matches(entity.get(field).as_ref()))
    }

    /// Wire form of the query, without the collection name.
    pub fn to_json(&self) -> Value {
        let mut query = Map::new();
        let filters: Map<String, Value> = self
            .filters
            .iter()
            .map(|(field, constraint)| (field.clone(), constraint.to_json()))
            .collect();
        query.insert("where".into(), Value::Object(filters));
        if !self.order.is_empty() {
            let order: Vec<String> = self.order.iter().map(ToString::to_string).collect();
            query.insert("order".into(), Value::from(order.join(",")));
        }
        if let Some(limit) = self.limit {
            query.insert("limit".into(), Value::from(limit));
        }
        if self.skip > 0 {
            query.insert("skip".into(), Value::from(self.skip));
        }
        if self.count {
            query.insert("count".into(), Value::from(1));
        }
        Value::Object(query)
    }

    /// Canonical key: `{"className":…,"query":…}` with sorted object keys.
    pub fn key(&self) -> QueryKey {
        let value = json!({
            "className": self.collection,
            "query": self.to_json(),
        });
        let mut out = String::new();
        write_canonical(&value, &mut out);
        QueryKey(out)
    }
}

/// Serialize with object keys sorted at every level, independently of the
/// map implementation serde_json was built with.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, value)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn todos() -> QuerySpec {
        QuerySpec::new("Todo").unwrap()
    }

    #[test]
    fn key_is_canonical() {
        let spec = todos()
            .equal_to("done", false)
            .unwrap()
            .descending("createdAt")
            .unwrap()
            .limit(10);

        assert_eq!(
            spec.key().as_str(),
            r#"{"className":"Todo","query":{"limit":10,"order":"-createdAt","where":{"done":false}}}"#
        );
    }

    #[test]
    fn structurally_equal_specs_share_a_key() {
        let a = todos()
            .equal_to("owner", "ann")
            .unwrap()
            .equal_to("done", false)
            .unwrap();
        let b = todos()
            .equal_to("done", false)
            .unwrap()
            .equal_to("owner", "ann")
            .unwrap();
        assert_eq!(a.key(), b.key());

        let c = b.clone().limit(5);
        assert_ne!(a.key(), c.key());
        assert_ne!(a.key(), a.clone().with_count().key());
    }

    #[test]
    fn nested_values_are_sorted() {
        let spec = todos()
            .equal_to("meta", json!({"z": 1, "a": {"y": 2, "b": 3}}))
            .unwrap();
        assert!(spec
            .key()
            .as_str()
            .contains(r#""meta":{"a":{"b":3,"y":2},"z":1}"#));
    }

    #[test]
    fn rejects_invalid_shapes() {
        assert!(matches!(QuerySpec::new(""), Err(Error::InvalidQuery(_))));
        assert!(matches!(
            todos().equal_to("$where", 1),
            Err(Error::InvalidKey(_))
        ));
        assert!(matches!(
            todos().ascending("password"),
            Err(Error::RestrictedField(_))
        ));
        assert!(matches!(
            todos().order_by(&["title", "9lives"]),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn named_accessors() {
        let spec = todos()
            .order_by(&["-_created_at", "title"])
            .unwrap()
            .limit(3)
            .skip(6)
            .with_count();
        assert_eq!(spec.sort_specifiers().len(), 2);
        assert_eq!(spec.sort_specifiers()[0].field, "createdAt");
        assert_eq!(spec.page_limit(), Some(3));
        assert_eq!(spec.page_skip(), 6);
        assert!(spec.wants_count());
    }

    #[test]
    fn constraint_matching() {
        let entity = Entity::new("t1", "Todo", 100)
            .with("done", false)
            .with("priority", 3);

        assert!(todos().equal_to("done", false).unwrap().matches(&entity));
        assert!(!todos().equal_to("done", true).unwrap().matches(&entity));
        assert!(todos()
            .filter("priority", Constraint::GreaterThan(json!(2)))
            .unwrap()
            .matches(&entity));
        assert!(!todos()
            .filter("priority", Constraint::LessThan(json!("9")))
            .unwrap()
            .matches(&entity));
        assert!(todos()
            .filter("priority", Constraint::ContainedIn(vec![json!(1), json!(3)]))
            .unwrap()
            .matches(&entity));
        assert!(todos()
            .filter("owner", Constraint::Exists(false))
            .unwrap()
            .matches(&entity));
        assert!(todos()
            .filter("createdAt", Constraint::LessThanOrEqualTo(json!(100)))
            .unwrap()
            .matches(&entity));
        assert!(!QuerySpec::new("Note").unwrap().matches(&entity));
    }
}
