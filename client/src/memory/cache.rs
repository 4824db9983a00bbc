//! Pinned entity cache held in memory.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use querysync_engine::error::Result;
use querysync_engine::{execute, Entity, EntityId, Error, QueryKey, QuerySpec, ResultSet};
use serde::{Deserialize, Serialize};

use super::lock;
use crate::service::Cache;

/// Version of the cache snapshot format.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Cache backed by a concurrent map of query key to pinned entities.
///
/// `replace_all` swaps a key's entities in one step, so readers never see
/// the key empty in between.
#[derive(Debug, Default)]
pub struct MemoryCache {
    pins: DashMap<QueryKey, BTreeMap<EntityId, Entity>>,
    read_failure: Mutex<Option<Error>>,
    write_failure: Mutex<Option<Error>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a cache from a persisted snapshot.
    pub fn from_snapshot(snapshot: CacheSnapshot) -> Result<Self> {
        if snapshot.format_version != CACHE_FORMAT_VERSION {
            return Err(Error::Cache(format!(
                "unsupported snapshot format {}",
                snapshot.format_version
            )));
        }

        let cache = Self::new();
        for (key, entities) in snapshot.pins {
            cache.pins.insert(key, entities);
        }
        tracing::debug!(keys = cache.pins.len(), "cache restored from snapshot");
        Ok(cache)
    }

    /// Capture every pinned key.
    pub fn snapshot(&self) -> CacheSnapshot {
        let pins = self
            .pins
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        CacheSnapshot {
            format_version: CACHE_FORMAT_VERSION,
            taken_at: Utc::now(),
            pins,
        }
    }

    /// Entities pinned under `key`, ordered by id.
    pub fn pinned(&self, key: &QueryKey) -> Vec<Entity> {
        self.pins
            .get(key)
            .map(|entities| entities.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Keys with at least one pinned entity.
    pub fn keys(&self) -> Vec<QueryKey> {
        let mut keys: Vec<_> = self
            .pins
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Make the next read fail with `error`.
    pub fn fail_next_read(&self, error: Error) {
        *lock(&self.read_failure) = Some(error);
    }

    /// Make the next write fail with `error`.
    pub fn fail_next_write(&self, error: Error) {
        *lock(&self.write_failure) = Some(error);
    }

    fn check_read(&self) -> Result<()> {
        lock(&self.read_failure).take().map_or(Ok(()), Err)
    }

    fn check_write(&self) -> Result<()> {
        lock(&self.write_failure).take().map_or(Ok(()), Err)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn read(&self, key: &QueryKey, spec: &QuerySpec) -> Result<ResultSet> {
        self.check_read()?;
        let pinned = self.pinned(key);
        Ok(execute(spec, &pinned))
    }

    async fn pin_all(&self, key: &QueryKey, entities: &[Entity]) -> Result<()> {
        self.check_write()?;
        let mut pinned = self.pins.entry(key.clone()).or_default();
        for entity in entities {
            pinned.insert(entity.id.clone(), entity.clone());
        }
        Ok(())
    }

    async fn unpin_all(&self, key: &QueryKey) -> Result<()> {
        self.check_write()?;
        self.pins.remove(key);
        Ok(())
    }

    async fn pin_one(&self, key: &QueryKey, entity: &Entity) -> Result<()> {
        self.check_write()?;
        self.pins
            .entry(key.clone())
            .or_default()
            .insert(entity.id.clone(), entity.clone());
        Ok(())
    }

    async fn unpin_one(&self, key: &QueryKey, entity: &Entity) -> Result<()> {
        self.check_write()?;
        if let Some(mut pinned) = self.pins.get_mut(key) {
            pinned.remove(&entity.id);
        }
        Ok(())
    }

    async fn replace_all(&self, key: &QueryKey, entities: &[Entity]) -> Result<()> {
        self.check_write()?;
        let pinned = entities
            .iter()
            .map(|entity| (entity.id.clone(), entity.clone()))
            .collect();
        self.pins.insert(key.clone(), pinned);
        Ok(())
    }
}

/// Serializable image of a [`MemoryCache`].
///
/// Keys and entities are kept in `BTreeMap`s so the JSON form is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    pub format_version: u32,
    pub taken_at: DateTime<Utc>,
    pub pins: BTreeMap<QueryKey, BTreeMap<EntityId, Entity>>,
}

impl CacheSnapshot {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Cache(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Cache(e.to_string()))
    }

    /// Number of pinned entities across all keys.
    pub fn entity_count(&self) -> usize {
        self.pins.values().map(BTreeMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn todo(id: &str, at: u64, done: bool) -> Entity {
        Entity::new(id, "Todo", at).with("done", done)
    }

    #[tokio::test]
    async fn read_evaluates_query_over_pins() {
        let cache = MemoryCache::new();
        let spec = QuerySpec::new("Todo")
            .unwrap()
            .equal_to("done", false)
            .unwrap()
            .descending("createdAt")
            .unwrap()
            .with_count();
        let key = spec.key();

        cache
            .pin_all(&key, &[todo("a", 1, false), todo("b", 2, true), todo("c", 3, false)])
            .await
            .unwrap();

        let results = cache.read(&key, &spec).await.unwrap();
        assert_eq!(results.ids(), vec!["c", "a"]);
        assert_eq!(results.count, Some(2));
    }

    #[tokio::test]
    async fn replace_swaps_pins() {
        let cache = MemoryCache::new();
        let key = QuerySpec::new("Todo").unwrap().key();

        cache.pin_one(&key, &todo("a", 1, false)).await.unwrap();
        cache.replace_all(&key, &[todo("b", 2, false)]).await.unwrap();

        let ids: Vec<_> = cache.pinned(&key).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["b"]);

        cache.unpin_one(&key, &todo("b", 2, false)).await.unwrap();
        assert!(cache.pinned(&key).is_empty());
        assert!(cache.keys().is_empty());
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let cache = MemoryCache::new();
        let spec = QuerySpec::new("Todo").unwrap();
        let key = spec.key();

        cache.fail_next_read(Error::Cache("corrupt".into()));
        assert_eq!(
            cache.read(&key, &spec).await,
            Err(Error::Cache("corrupt".into()))
        );
        assert!(cache.read(&key, &spec).await.is_ok());

        cache.fail_next_write(Error::Cache("full".into()));
        assert!(cache.pin_one(&key, &todo("a", 1, false)).await.is_err());
        assert!(cache.pinned(&key).is_empty());
        assert!(cache.pin_one(&key, &todo("a", 1, false)).await.is_ok());
    }

    #[tokio::test]
    async fn snapshot_survives_json() {
        let cache = MemoryCache::new();
        let key = QuerySpec::new("Todo").unwrap().key();
        cache
            .pin_all(&key, &[todo("a", 1, false), todo("b", 2, true)])
            .await
            .unwrap();

        let json = cache.snapshot().to_json().unwrap();
        let snapshot = CacheSnapshot::from_json(&json).unwrap();
        assert_eq!(snapshot.entity_count(), 2);

        let restored = MemoryCache::from_snapshot(snapshot).unwrap();
        assert_eq!(restored.pinned(&key), cache.pinned(&key));
    }

    #[test]
    fn rejects_unknown_snapshot_format() {
        let mut snapshot = MemoryCache::new().snapshot();
        snapshot.format_version = 99;
        assert!(matches!(
            MemoryCache::from_snapshot(snapshot),
            Err(Error::Cache(_))
        ));
        assert!(CacheSnapshot::from_json("not json").is_err());
    }
}
