//! Immutable inputs of one generation's sync.

use std::sync::Arc;

use querysync_engine::{Entity, QueryKey, QuerySpec};

use crate::bus::GenerationScope;
use crate::config::{RetryPolicy, SyncOptions};
use crate::service::{Cache, DataService};
use crate::Context;

/// Query, options and collaborators shared by the tasks of one generation.
pub struct QuerySession {
    pub spec: QuerySpec,
    pub key: QueryKey,
    pub options: SyncOptions,
    pub service: Arc<dyn DataService>,
    pub cache: Arc<dyn Cache>,
    pub retry: RetryPolicy,
}

impl QuerySession {
    pub fn new(context: &Context, spec: QuerySpec, options: SyncOptions) -> Self {
        let key = spec.key();
        Self {
            spec,
            key,
            options,
            service: Arc::clone(&context.service),
            cache: Arc::clone(&context.cache),
            retry: context.config.retry,
        }
    }

    /// Whether a refresh happens while older results may already be shown.
    pub fn refreshes_in_background(&self) -> bool {
        self.options.enable_cache || self.options.enable_live || self.options.initial_seed.is_some()
    }

    /// Replace the pinned snapshot of this query, failing the scope on error.
    pub async fn replace_pins(&self, scope: &GenerationScope, entities: &[Entity]) {
        if let Err(error) = self.cache.replace_all(&self.key, entities).await {
            scope.fail(error);
            return;
        }
        tracing::debug!(
            generation = scope.generation(),
            key = %self.key,
            pinned = entities.len(),
            "cache snapshot replaced"
        );
    }

    pub async fn pin(&self, scope: &GenerationScope, entity: &Entity) {
        if let Err(error) = self.cache.pin_one(&self.key, entity).await {
            scope.fail(error);
        }
    }

    pub async fn unpin(&self, scope: &GenerationScope, entity: &Entity) {
        if let Err(error) = self.cache.unpin_one(&self.key, entity).await {
            scope.fail(error);
        }
    }

    /// Read the cached snapshot into the scope's generation.
    pub async fn seed_from_cache(&self, scope: &GenerationScope) {
        match self.cache.read(&self.key, &self.spec).await {
            Ok(results) => {
                tracing::debug!(
                    generation = scope.generation(),
                    key = %self.key,
                    cached = results.len(),
                    "cache read completed"
                );
                scope.seed_from_cache(results);
            }
            Err(error) => {
                scope.fail(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Dispatcher;
    use crate::config::Config;
    use crate::memory::{MemoryCache, MemoryDataService};
    use crate::service::Cache;
    use async_trait::async_trait;
    use querysync_engine::error::Result;
    use querysync_engine::{Error, ResultSet, SyncState};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Cache that keeps the two-step `replace_all` default.
    #[derive(Default)]
    struct TwoStepCache {
        inner: MemoryCache,
        fail_pin_all: AtomicBool,
    }

    #[async_trait]
    impl Cache for TwoStepCache {
        async fn read(&self, key: &QueryKey, spec: &QuerySpec) -> Result<ResultSet> {
            self.inner.read(key, spec).await
        }

        async fn pin_all(&self, key: &QueryKey, entities: &[Entity]) -> Result<()> {
            if self.fail_pin_all.swap(false, Ordering::SeqCst) {
                return Err(Error::Cache("quota exceeded".into()));
            }
            self.inner.pin_all(key, entities).await
        }

        async fn unpin_all(&self, key: &QueryKey) -> Result<()> {
            self.inner.unpin_all(key).await
        }

        async fn pin_one(&self, key: &QueryKey, entity: &Entity) -> Result<()> {
            self.inner.pin_one(key, entity).await
        }

        async fn unpin_one(&self, key: &QueryKey, entity: &Entity) -> Result<()> {
            self.inner.unpin_one(key, entity).await
        }
    }

    fn session(cache: Arc<TwoStepCache>) -> QuerySession {
        let context = Context::new(
            Config::new("memory://", "test"),
            Arc::new(MemoryDataService::new()),
            cache,
        );
        QuerySession::new(&context, QuerySpec::new("Todo").unwrap(), SyncOptions::default())
    }

    fn pinned_ids(cache: &TwoStepCache, key: &QueryKey) -> Vec<String> {
        cache.inner.pinned(key).into_iter().map(|e| e.id).collect()
    }

    #[tokio::test]
    async fn default_replace_swaps_pin_set() {
        let cache = Arc::new(TwoStepCache::default());
        let session = session(cache.clone());
        let scope = GenerationScope::new(1, Dispatcher::new(SyncState::default()));

        cache
            .pin_all(&session.key, &[Entity::new("old", "Todo", 1), Entity::new("kept", "Todo", 2)])
            .await
            .unwrap();

        session
            .replace_pins(&scope, &[Entity::new("kept", "Todo", 2), Entity::new("new", "Todo", 3)])
            .await;

        assert_eq!(pinned_ids(&cache, &session.key), vec!["kept", "new"]);
        assert!(scope.dispatcher().snapshot().error.is_none());
    }

    #[tokio::test]
    async fn failed_second_step_fails_generation() {
        let cache = Arc::new(TwoStepCache::default());
        let session = session(cache.clone());
        let dispatcher = Dispatcher::new(SyncState::default());
        let scope = GenerationScope::new(1, dispatcher.clone());

        cache
            .pin_all(&session.key, &[Entity::new("old", "Todo", 1)])
            .await
            .unwrap();
        cache.fail_pin_all.store(true, Ordering::SeqCst);

        session.replace_pins(&scope, &[Entity::new("new", "Todo", 2)]).await;

        // The unpin already happened; the key is left empty.
        assert!(pinned_ids(&cache, &session.key).is_empty());
        let state = dispatcher.snapshot();
        assert_eq!(state.error, Some(Error::Cache("quota exceeded".into())));
        assert!(!state.is_loading);
        assert!(!state.is_syncing);
    }
}
