//! Collaborators consumed by the orchestrator.
//!
//! The data service executes queries and streams live changes; the cache
//! persists entities pinned under a [`QueryKey`]. Both are traits so any
//! transport or storage backend can be plugged in through [`crate::Context`].

use std::fmt;

use async_trait::async_trait;
use querysync_engine::error::Result;
use querysync_engine::{Entity, QueryKey, QuerySpec, ResultSet};
use tokio::sync::mpsc;

/// Identifier of an established live subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An event on a live channel.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// The channel is connected.
    Open,
    /// The channel lost its connection.
    Close,
    Create(Entity),
    Update(Entity),
    /// An existing entity started matching the query.
    Enter(Entity),
    /// An existing entity stopped matching the query.
    Leave(Entity),
    Delete(Entity),
}

impl LiveEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LiveEvent::Open => "open",
            LiveEvent::Close => "close",
            LiveEvent::Create(_) => "create",
            LiveEvent::Update(_) => "update",
            LiveEvent::Enter(_) => "enter",
            LiveEvent::Leave(_) => "leave",
            LiveEvent::Delete(_) => "delete",
        }
    }
}

/// An established subscription: its id and the ordered event stream.
#[derive(Debug)]
pub struct LiveSubscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<LiveEvent>,
}

/// Remote query execution and live updates.
///
/// Connectivity failures must be reported as
/// [`querysync_engine::Error::Connection`]; they are the only retried errors.
#[async_trait]
pub trait DataService: Send + Sync {
    /// Run a one-shot query. `count` is filled when the query asks for it.
    async fn find(&self, spec: &QuerySpec) -> Result<ResultSet>;

    /// Open a live subscription for the query.
    async fn subscribe(&self, spec: &QuerySpec) -> Result<LiveSubscription>;

    /// Close a subscription opened by [`DataService::subscribe`].
    async fn unsubscribe(&self, id: &SubscriptionId) -> Result<()>;
}

/// Local persistence of entities pinned under a query key.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Evaluate `spec` against the entities pinned under `key`.
    async fn read(&self, key: &QueryKey, spec: &QuerySpec) -> Result<ResultSet>;

    async fn pin_all(&self, key: &QueryKey, entities: &[Entity]) -> Result<()>;

    async fn unpin_all(&self, key: &QueryKey) -> Result<()>;

    async fn pin_one(&self, key: &QueryKey, entity: &Entity) -> Result<()>;

    async fn unpin_one(&self, key: &QueryKey, entity: &Entity) -> Result<()>;

    /// Replace everything pinned under `key` with `entities`.
    ///
    /// The default unpins then pins, so a reader can briefly observe an
    /// empty key. Backends that can swap in one step should override it.
    async fn replace_all(&self, key: &QueryKey, entities: &[Entity]) -> Result<()> {
        self.unpin_all(key).await?;
        self.pin_all(key, entities).await
    }
}
