//! # querysync-client
//!
//! Keeps the result set of a declarative query consistent across a local
//! cache, a one-shot remote query and a live update stream.
//!
//! All state lives in a [`querysync_engine::SyncState`] owned by a
//! [`Dispatcher`]; the tasks started by the [`Orchestrator`] only ever
//! change it by dispatching generation-tagged actions. A reload or a new
//! query starts a fresh generation, and whatever the previous one still
//! had in flight is ignored when it lands.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use querysync_client::memory::{MemoryCache, MemoryDataService};
//! use querysync_client::{Config, Context, Orchestrator, SyncOptions};
//! use querysync_engine::{Entity, QuerySpec};
//!
//! # async fn demo() -> querysync_engine::error::Result<()> {
//! let service = Arc::new(MemoryDataService::new());
//! service.save(Entity::new("t1", "Todo", 1).with("done", false));
//!
//! let context = Context::new(
//!     Config::new("memory://", "demo"),
//!     service.clone(),
//!     Arc::new(MemoryCache::new()),
//! );
//! let orchestrator = Orchestrator::new(context);
//!
//! let spec = QuerySpec::new("Todo")?.descending("createdAt")?.limit(20);
//! let handle = orchestrator.observe(spec, SyncOptions::default());
//!
//! let state = handle.wait_for(|s| s.is_live && !s.is_loading).await;
//! println!("{:?}", state.map(|s| s.len()));
//! handle.detach().await;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod fetch;
pub mod live;
pub mod memory;
pub mod orchestrator;
pub mod service;
pub mod session;

pub use bus::{Dispatcher, GenerationScope};
pub use config::{Config, ConfigError, Context, RetryPolicy, Runtime, SyncOptions};
pub use orchestrator::{Orchestrator, QueryHandle};
pub use service::{Cache, DataService, LiveEvent, LiveSubscription, SubscriptionId};
pub use session::QuerySession;
