//! Data service over an in-memory entity store.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use querysync_engine::error::Result;
use querysync_engine::{
    execute, CollectionName, Entity, EntityId, Error, QuerySpec, ResultSet,
};
use tokio::sync::mpsc;

use super::lock;
use crate::service::{DataService, LiveEvent, LiveSubscription, SubscriptionId};

/// Sender half of a subscriber's event channel.
type EventSender = mpsc::UnboundedSender<LiveEvent>;

#[derive(Debug)]
struct Subscriber {
    spec: QuerySpec,
    sender: EventSender,
}

/// Data service holding its collections in memory.
///
/// Saving or destroying an entity emits the matching [`LiveEvent`] to every
/// subscriber whose query is affected. New subscriptions receive
/// [`LiveEvent::Open`] immediately.
#[derive(Debug, Default)]
pub struct MemoryDataService {
    collections: DashMap<CollectionName, BTreeMap<EntityId, Entity>>,
    subscribers: DashMap<SubscriptionId, Subscriber>,
    find_failures: Mutex<VecDeque<Error>>,
    subscribe_failures: Mutex<VecDeque<Error>>,
    find_latency: Mutex<Duration>,
    find_calls: AtomicUsize,
}

impl MemoryDataService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entity and notify subscribers.
    pub fn save(&self, entity: Entity) {
        let previous = self
            .collections
            .entry(entity.collection.clone())
            .or_default()
            .insert(entity.id.clone(), entity.clone());

        tracing::debug!(
            collection = %entity.collection,
            id = %entity.id,
            created = previous.is_none(),
            "entity saved"
        );

        self.notify(|spec| {
            let before = previous.as_ref().is_some_and(|p| spec.matches(p));
            let after = spec.matches(&entity);
            match (previous.is_some(), before, after) {
                (false, _, true) => Some(LiveEvent::Create(entity.clone())),
                (true, true, true) => Some(LiveEvent::Update(entity.clone())),
                (true, false, true) => Some(LiveEvent::Enter(entity.clone())),
                (true, true, false) => Some(LiveEvent::Leave(entity.clone())),
                _ => None,
            }
        });
    }

    /// Delete an entity and notify subscribers. Returns the deleted entity.
    pub fn destroy(&self, collection: &str, id: &str) -> Option<Entity> {
        let removed = self
            .collections
            .get_mut(collection)
            .and_then(|mut entities| entities.remove(id))?;

        tracing::debug!(collection, id, "entity destroyed");

        self.notify(|spec| {
            spec.matches(&removed)
                .then(|| LiveEvent::Delete(removed.clone()))
        });
        Some(removed)
    }

    /// Send an event to every subscriber as is.
    pub fn emit(&self, event: LiveEvent) {
        self.notify(|_| Some(event.clone()));
    }

    /// Report a dropped connection on every live channel.
    pub fn close_subscriptions(&self) {
        self.emit(LiveEvent::Close);
    }

    /// Report a restored connection on every live channel.
    pub fn reopen_subscriptions(&self) {
        self.emit(LiveEvent::Open);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Queue errors returned by the next finds, in order.
    pub fn fail_finds(&self, errors: impl IntoIterator<Item = Error>) {
        lock(&self.find_failures).extend(errors);
    }

    /// Queue errors returned by the next subscribes, in order.
    pub fn fail_subscribes(&self, errors: impl IntoIterator<Item = Error>) {
        lock(&self.subscribe_failures).extend(errors);
    }

    /// Delay every find by `latency`.
    pub fn set_find_latency(&self, latency: Duration) {
        *lock(&self.find_latency) = latency;
    }

    /// Number of finds started so far.
    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    fn notify(&self, event_for: impl Fn(&QuerySpec) -> Option<LiveEvent>) {
        let mut disconnected = Vec::new();

        for entry in self.subscribers.iter() {
            let subscriber = entry.value();
            if let Some(event) = event_for(&subscriber.spec) {
                if subscriber.sender.send(event).is_err() {
                    disconnected.push(entry.key().clone());
                }
            }
        }

        for id in disconnected {
            tracing::debug!(subscription = %id, "dropping disconnected subscriber");
            self.subscribers.remove(&id);
        }
    }
}

#[async_trait]
impl DataService for MemoryDataService {
    async fn find(&self, spec: &QuerySpec) -> Result<ResultSet> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);

        let latency = *lock(&self.find_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = lock(&self.find_failures).pop_front() {
            return Err(error);
        }

        let entities: Vec<Entity> = self
            .collections
            .get(spec.collection())
            .map(|entities| entities.values().cloned().collect())
            .unwrap_or_default();
        Ok(execute(spec, &entities))
    }

    async fn subscribe(&self, spec: &QuerySpec) -> Result<LiveSubscription> {
        if let Some(error) = lock(&self.subscribe_failures).pop_front() {
            return Err(error);
        }

        let (sender, events) = mpsc::unbounded_channel();
        let id = SubscriptionId::new();
        let _ = sender.send(LiveEvent::Open);

        self.subscribers.insert(
            id.clone(),
            Subscriber {
                spec: spec.clone(),
                sender,
            },
        );
        tracing::info!(subscription = %id, collection = spec.collection(), "live subscription registered");

        Ok(LiveSubscription { id, events })
    }

    async fn unsubscribe(&self, id: &SubscriptionId) -> Result<()> {
        if self.subscribers.remove(id).is_some() {
            tracing::info!(subscription = %id, "live subscription unregistered");
        }
        Ok(())
    }
}
