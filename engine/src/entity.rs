//! Entity and result set types.

use crate::{CollectionName, EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved key holding the creation timestamp.
pub const CREATED_AT: &str = "createdAt";
/// Reserved key holding the last modification timestamp.
pub const UPDATED_AT: &str = "updatedAt";
/// Reserved key holding the entity id.
pub const OBJECT_ID: &str = "objectId";

/// An identified record as delivered by the cache, the remote query or the
/// live channel.
///
/// Two entities are the same entity when their ids match; the rest of the
/// payload may differ between versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Unique identifier for this entity
    pub id: EntityId,
    /// Collection this entity belongs to
    pub collection: CollectionName,
    /// When the entity was first created (milliseconds since epoch)
    pub created_at: Timestamp,
    /// When the entity was last updated (milliseconds since epoch)
    pub updated_at: Timestamp,
    /// User-defined fields
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Entity {
    /// Create an entity with empty fields.
    pub fn new(
        id: impl Into<EntityId>,
        collection: impl Into<CollectionName>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            created_at: timestamp,
            updated_at: timestamp,
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Set a field, bumping `updated_at`.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>, timestamp: Timestamp) {
        self.fields.insert(field.into(), value.into());
        self.updated_at = timestamp;
    }

    /// Read a field by name, resolving the reserved keys.
    pub fn get(&self, field: &str) -> Option<Value> {
        match field {
            CREATED_AT => Some(Value::from(self.created_at)),
            UPDATED_AT => Some(Value::from(self.updated_at)),
            OBJECT_ID => Some(Value::from(self.id.clone())),
            other => self.fields.get(other).cloned(),
        }
    }

    /// Whether two values refer to the same entity.
    pub fn same_id(&self, other: &Entity) -> bool {
        self.id == other.id
    }
}

/// Outcome of a find against the cache or the remote service.
///
/// `count` is present exactly when the query asked for counting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSet {
    pub results: Vec<Entity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl ResultSet {
    /// A result set without a tracked count.
    pub fn new(results: Vec<Entity>) -> Self {
        Self {
            results,
            count: None,
        }
    }

    /// A result set carrying a total count.
    pub fn counted(results: Vec<Entity>, count: usize) -> Self {
        Self {
            results,
            count: Some(count),
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Ids in result order.
    pub fn ids(&self) -> Vec<&str> {
        self.results.iter().map(|e| e.id.as_str()).collect()
    }
}

impl From<Vec<Entity>> for ResultSet {
    fn from(results: Vec<Entity>) -> Self {
        Self::new(results)
    }
}
