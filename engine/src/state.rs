//! Sync state and its transition function.
//!
//! Every observable change to a synced query goes through [`SyncState::apply`].
//! Actions other than [`Action::Reset`] carry the generation that was active
//! when the operation producing them started; an action from any other
//! generation is dropped, and so is every action once the state holds an
//! error.
//!
//! # Invariants
//!
//! - An error is terminal for its generation.
//! - `results` stays ordered by the sort specifiers used for upserts.
//! - When present, `count >= results.len()`.
//! - `is_loading` is only true before the first load of a generation.

use crate::compare::{insertion_index, SortSpecifier};
use crate::{Entity, Error, Generation, ResultSet};

/// First generation of a freshly observed query.
pub const INITIAL_GENERATION: Generation = 1;

/// Coarse phase derived from the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loading,
    Ready,
    Error,
}

/// The single source of observable state for one synced query.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState {
    pub generation: Generation,
    pub is_loading: bool,
    pub is_live: bool,
    pub is_syncing: bool,
    pub results: Option<Vec<Entity>>,
    pub count: Option<usize>,
    pub error: Option<Error>,
}

/// A state transition request.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Results read from the local cache.
    SeedFromCache {
        generation: Generation,
        results: ResultSet,
    },
    SetLive {
        generation: Generation,
        live: bool,
    },
    SetSyncing {
        generation: Generation,
        syncing: bool,
    },
    /// Authoritative results from the remote query.
    LoadFromServer {
        generation: Generation,
        results: ResultSet,
    },
    /// An entity entered or changed inside the result set.
    Upsert {
        generation: Generation,
        entity: Entity,
        order: Vec<SortSpecifier>,
        limit: Option<usize>,
    },
    /// An entity left the result set.
    Remove {
        generation: Generation,
        entity: Entity,
    },
    Fail {
        generation: Generation,
        error: Error,
    },
    /// Start a new generation, optionally pre-populated.
    Reset { seed: Option<ResultSet> },
}

impl Action {
    /// Generation the action is addressed to, `None` for a reset.
    pub fn generation(&self) -> Option<Generation> {
        match self {
            Action::SeedFromCache { generation, .. }
            | Action::SetLive { generation, .. }
            | Action::SetSyncing { generation, .. }
            | Action::LoadFromServer { generation, .. }
            | Action::Upsert { generation, .. }
            | Action::Remove { generation, .. }
            | Action::Fail { generation, .. } => Some(*generation),
            Action::Reset { .. } => None,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Action::SeedFromCache { .. } => "seed_from_cache",
            Action::SetLive { .. } => "set_live",
            Action::SetSyncing { .. } => "set_syncing",
            Action::LoadFromServer { .. } => "load_from_server",
            Action::Upsert { .. } => "upsert",
            Action::Remove { .. } => "remove",
            Action::Fail { .. } => "fail",
            Action::Reset { .. } => "reset",
        }
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::initial(INITIAL_GENERATION, None)
    }
}

impl SyncState {
    /// State at the start of `generation`.
    ///
    /// Without a seed the generation starts loading; with one it starts ready
    /// and shows the seed.
    pub fn initial(generation: Generation, seed: Option<ResultSet>) -> Self {
        let is_loading = seed.is_none();
        let (results, count) = match seed {
            Some(seed) => (Some(seed.results), seed.count),
            None => (None, None),
        };
        Self {
            generation,
            is_loading,
            is_live: false,
            is_syncing: false,
            results,
            count,
            error: None,
        }
    }

    pub fn phase(&self) -> Phase {
        if self.error.is_some() {
            Phase::Error
        } else if self.is_loading {
            Phase::Loading
        } else {
            Phase::Ready
        }
    }

    /// Number of entities currently shown.
    pub fn len(&self) -> usize {
        self.results.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids in result order, empty when nothing is loaded.
    pub fn ids(&self) -> Vec<&str> {
        self.results
            .iter()
            .flatten()
            .map(|e| e.id.as_str())
            .collect()
    }

    /// Apply an action in place.
    ///
    /// Returns `false` when the action was dropped, either because it belongs
    /// to another generation or because the generation already failed, and
    /// when a flag toggle left the flag as it was.
    pub fn apply(&mut self, action: Action) -> bool {
        if let Action::Reset { seed } = action {
            *self = Self::initial(self.generation + 1, seed);
            return true;
        }

        if action.generation() != Some(self.generation) || self.error.is_some() {
            return false;
        }

        match action {
            Action::SeedFromCache { results, .. } => {
                if !self.is_loading {
                    return false;
                }
                self.is_loading = false;
                self.results = Some(results.results);
                self.count = results.count;
            }
            Action::SetLive { live, .. } => {
                if self.is_live == live {
                    return false;
                }
                self.is_live = live;
            }
            Action::SetSyncing { syncing, .. } => {
                if self.is_syncing == syncing {
                    return false;
                }
                self.is_syncing = syncing;
            }
            Action::LoadFromServer { results, .. } => {
                self.is_loading = false;
                self.is_syncing = false;
                self.results = Some(results.results);
                self.count = results.count;
            }
            Action::Upsert {
                entity,
                order,
                limit,
                ..
            } => self.upsert(entity, &order, limit),
            Action::Remove { entity, .. } => self.remove(&entity),
            Action::Fail { error, .. } => {
                self.is_loading = false;
                self.is_live = false;
                self.is_syncing = false;
                self.error = Some(error);
            }
            Action::Reset { .. } => {}
        }
        true
    }

    fn upsert(&mut self, entity: Entity, order: &[SortSpecifier], limit: Option<usize>) {
        // Nothing is shown yet; the next full load will include the entity.
        let Some(results) = self.results.as_mut() else {
            return;
        };

        let before = results.len();
        results.retain(|e| !e.same_id(&entity));
        let index = insertion_index(results, &entity, order);
        results.insert(index, entity);

        if let Some(count) = self.count {
            let grown = (count + results.len()).saturating_sub(before);
            self.count = Some(grown.max(results.len()));
        }

        if let Some(limit) = limit {
            results.truncate(limit);
        }
    }

    fn remove(&mut self, entity: &Entity) {
        let Some(results) = self.results.as_mut() else {
            return;
        };

        results.retain(|e| !e.same_id(entity));

        if let Some(count) = self.count {
            self.count = Some(count.saturating_sub(1).max(results.len()));
        }
    }
}

/// Pure form of [`SyncState::apply`].
pub fn reduce(state: &SyncState, action: Action) -> SyncState {
    let mut next = state.clone();
    next.apply(action);
    next
}
