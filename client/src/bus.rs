//! Dispatch bus: the single path from async completions to state.
//!
//! Every task that finishes an operation reports through a
//! [`GenerationScope`], which stamps the action with the generation that was
//! current when the operation *started*. The [`Dispatcher`] applies actions
//! one at a time inside the watch channel's lock, so observers never see a
//! half-applied transition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use querysync_engine::{Action, Entity, Error, Generation, QuerySpec, ResultSet, SyncState};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Inner {
    state: watch::Sender<SyncState>,
    closed: AtomicBool,
}

/// Serializes actions into the reducer and publishes the result.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(initial: SyncState) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            inner: Arc::new(Inner {
                state,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Apply an action. Returns whether it changed the state.
    ///
    /// The closed flag is checked under the watch lock, so nothing lands
    /// after [`Dispatcher::close`] returns.
    pub fn dispatch(&self, action: Action) -> bool {
        let name = action.name();
        let generation = action.generation();
        let mut closed = false;
        let applied = self.inner.state.send_if_modified(|state| {
            if self.inner.closed.load(Ordering::Acquire) {
                closed = true;
                return false;
            }
            state.apply(action)
        });

        if closed {
            tracing::trace!(action = name, "bus closed, action dropped");
        } else if applied {
            tracing::trace!(action = name, ?generation, "action applied");
        } else {
            tracing::trace!(action = name, ?generation, "action dropped");
        }
        applied
    }

    /// Read the current state without cloning it.
    pub fn with_state<R>(&self, f: impl FnOnce(&SyncState) -> R) -> R {
        f(&*self.inner.state.borrow())
    }

    pub fn snapshot(&self) -> SyncState {
        self.inner.state.borrow().clone()
    }

    pub fn generation(&self) -> Generation {
        self.inner.state.borrow().generation
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    /// Stop accepting actions. The last state stays readable.
    pub fn close(&self) {
        self.inner.state.send_if_modified(|_| {
            self.inner.closed.store(true, Ordering::Release);
            false
        });
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// Generation-tagged dispatch handle with cooperative cancellation.
///
/// Cloning shares the cancellation token; [`GenerationScope::child`] creates
/// a token cancelled together with its parent but cancellable on its own.
#[derive(Debug, Clone)]
pub struct GenerationScope {
    generation: Generation,
    cancel: CancellationToken,
    dispatcher: Dispatcher,
}

impl GenerationScope {
    pub fn new(generation: Generation, dispatcher: Dispatcher) -> Self {
        Self {
            generation,
            cancel: CancellationToken::new(),
            dispatcher,
        }
    }

    pub const fn generation(&self) -> Generation {
        self.generation
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// A scope in the same generation with its own child token.
    pub fn child(&self) -> Self {
        Self {
            generation: self.generation,
            cancel: self.cancel.child_token(),
            dispatcher: self.dispatcher.clone(),
        }
    }

    /// Whether the bus still shows this scope's generation.
    pub fn is_current(&self) -> bool {
        self.dispatcher.generation() == self.generation
    }

    pub fn seed_from_cache(&self, results: ResultSet) -> bool {
        self.dispatcher.dispatch(Action::SeedFromCache {
            generation: self.generation,
            results,
        })
    }

    pub fn set_live(&self, live: bool) -> bool {
        self.dispatcher.dispatch(Action::SetLive {
            generation: self.generation,
            live,
        })
    }

    pub fn set_syncing(&self, syncing: bool) -> bool {
        self.dispatcher.dispatch(Action::SetSyncing {
            generation: self.generation,
            syncing,
        })
    }

    pub fn load_from_server(&self, results: ResultSet) -> bool {
        self.dispatcher.dispatch(Action::LoadFromServer {
            generation: self.generation,
            results,
        })
    }

    /// Upsert placed by the query's sort order and truncated to its limit.
    pub fn upsert(&self, entity: Entity, spec: &QuerySpec) -> bool {
        self.dispatcher.dispatch(Action::Upsert {
            generation: self.generation,
            entity,
            order: spec.sort_specifiers().to_vec(),
            limit: spec.page_limit(),
        })
    }

    pub fn remove(&self, entity: Entity) -> bool {
        self.dispatcher.dispatch(Action::Remove {
            generation: self.generation,
            entity,
        })
    }

    pub fn fail(&self, error: Error) -> bool {
        tracing::error!(generation = self.generation, error = %error, "synced query failed");
        self.dispatcher.dispatch(Action::Fail {
            generation: self.generation,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_scope_cannot_touch_new_generation() {
        let dispatcher = Dispatcher::new(SyncState::default());
        let old = GenerationScope::new(1, dispatcher.clone());

        assert!(dispatcher.dispatch(Action::Reset { seed: None }));
        assert!(!old.is_current());
        assert!(!old.load_from_server(ResultSet::new(vec![Entity::new("a", "Todo", 1)])));

        let state = dispatcher.snapshot();
        assert_eq!(state.generation, 2);
        assert!(state.is_loading);
        assert!(state.results.is_none());
    }

    #[test]
    fn closed_bus_keeps_last_snapshot() {
        let dispatcher = Dispatcher::new(SyncState::default());
        let scope = GenerationScope::new(1, dispatcher.clone());
        assert!(scope.load_from_server(ResultSet::default()));

        dispatcher.close();
        assert!(dispatcher.is_closed());
        assert!(!scope.set_live(true));
        assert!(!dispatcher.dispatch(Action::Reset { seed: None }));
        assert_eq!(dispatcher.generation(), 1);
        assert!(!dispatcher.snapshot().is_loading);
    }

    #[test]
    fn observers_see_applied_actions() {
        let dispatcher = Dispatcher::new(SyncState::default());
        let mut rx = dispatcher.subscribe();
        let scope = GenerationScope::new(1, dispatcher.clone());

        scope.set_syncing(true);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_syncing);

        // Dropped actions do not wake observers.
        GenerationScope::new(7, dispatcher.clone()).set_live(true);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn repeated_flag_does_not_wake_observers() {
        let dispatcher = Dispatcher::new(SyncState::default());
        let scope = GenerationScope::new(1, dispatcher.clone());
        let mut rx = dispatcher.subscribe();

        assert!(!scope.set_live(false));
        assert!(!rx.has_changed().unwrap());

        assert!(scope.set_live(true));
        rx.borrow_and_update();
        assert!(!scope.set_live(true));
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn close_is_silent_and_final() {
        let dispatcher = Dispatcher::new(SyncState::default());
        let scope = GenerationScope::new(1, dispatcher.clone());
        let mut rx = dispatcher.subscribe();

        dispatcher.close();
        assert!(!rx.has_changed().unwrap());
        assert!(!scope.fail(Error::Cache("late".into())));
        assert!(!scope.load_from_server(ResultSet::default()));
        assert!(!rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), SyncState::default());
    }

    #[test]
    fn child_cancellation_is_independent() {
        let parent = GenerationScope::new(1, Dispatcher::new(SyncState::default()));
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancel();
        assert!(other.is_cancelled());
        assert_eq!(other.generation(), 1);
    }
}
