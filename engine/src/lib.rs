//! # Querysync Engine
//!
//! The pure core of a synced query: it keeps one result set consistent
//! while results arrive from a local cache, a one-shot remote query and a
//! live update stream, in any order and with any of them failing.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches the cache, the network or a timer
//! - **Deterministic**: the same sequence of actions always yields the same state
//! - **Generation-scoped**: every action names the epoch it belongs to, and
//!   actions from a superseded epoch are dropped
//!
//! ## Core Concepts
//!
//! ### Query identity
//!
//! A [`QuerySpec`] is a typed query description. [`QuerySpec::key`] turns it
//! into a canonical [`QueryKey`], stable across runs, used to address the
//! cache and to detect that a query changed.
//!
//! ### Ordering
//!
//! [`SortSpecifier`] and [`compare()`] order entities by a list of keys, with
//! `-field` meaning descending. The comparator only places single entities
//! into an already sorted list.
//!
//! ### State
//!
//! [`SyncState::apply`] is the transition function. [`Action::Reset`] starts
//! a new [`Generation`]; every other action is dropped when its generation is
//! stale or when the state already failed.
//!
//! ## Quick Start
//!
//! ```rust
//! use querysync_engine::{Action, Entity, QuerySpec, ResultSet, SyncState};
//!
//! let spec = QuerySpec::new("Todo").unwrap().descending("createdAt").unwrap();
//! let mut state = SyncState::default();
//!
//! state.apply(Action::LoadFromServer {
//!     generation: state.generation,
//!     results: ResultSet::new(vec![Entity::new("a", "Todo", 1)]),
//! });
//! state.apply(Action::Upsert {
//!     generation: state.generation,
//!     entity: Entity::new("b", "Todo", 2),
//!     order: spec.sort_specifiers().to_vec(),
//!     limit: spec.page_limit(),
//! });
//!
//! assert_eq!(state.ids(), vec!["b", "a"]);
//! ```

pub mod compare;
pub mod entity;
pub mod error;
pub mod execute;
pub mod query;
pub mod state;

// Re-export main types at crate root
pub use compare::{compare, compare_by, compare_values, insertion_index, SortSpecifier};
pub use entity::{Entity, ResultSet};
pub use error::Error;
pub use execute::execute;
pub use query::{Constraint, QueryKey, QuerySpec};
pub use state::{reduce, Action, Phase, SyncState, INITIAL_GENERATION};

/// Type aliases for clarity
pub type EntityId = String;
pub type CollectionName = String;
pub type Generation = u64;
pub type Timestamp = u64;
