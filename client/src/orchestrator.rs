//! Sync orchestrator: sequences cache, remote and live work per generation.
//!
//! [`Orchestrator::observe`] spawns a driver task that owns the I/O of the
//! current generation and exposes it through a [`QueryHandle`]. The driver
//! reacts to two commands: restart (a reset already advanced the
//! generation) and detach. A superseded generation is cancelled and its
//! successor starts right away; the old live channel closes in the
//! background. Only detach waits for those closes, up to
//! [`TEARDOWN_TIMEOUT`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use querysync_engine::{Action, QueryKey, QuerySpec, SyncState, INITIAL_GENERATION};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::bus::{Dispatcher, GenerationScope};
use crate::config::SyncOptions;
use crate::fetch::{self, FetchHandle};
use crate::live;
use crate::session::QuerySession;
use crate::Context;

/// Upper bound on how long a detach waits for live channels to close.
pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Entry point for observing synced queries.
#[derive(Clone)]
pub struct Orchestrator {
    context: Context,
}

impl Orchestrator {
    pub fn new(context: Context) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Start syncing `spec` and return a handle to its state.
    ///
    /// Must be called from within a tokio runtime.
    pub fn observe(&self, spec: QuerySpec, options: SyncOptions) -> QueryHandle {
        let options = self.context.config.constrain(options);
        let initial = SyncState::initial(INITIAL_GENERATION, options.initial_seed.clone());
        let dispatcher = Dispatcher::new(initial);
        let target = Arc::new(Mutex::new(Target { spec, options }));
        let (commands, receiver) = mpsc::unbounded_channel();

        let driver = Driver {
            context: self.context.clone(),
            dispatcher: dispatcher.clone(),
            target: Arc::clone(&target),
            commands: receiver,
        };
        tokio::spawn(driver.run());

        QueryHandle {
            context: self.context.clone(),
            dispatcher,
            target,
            commands,
        }
    }
}

/// What the next generation should sync.
#[derive(Debug)]
struct Target {
    spec: QuerySpec,
    options: SyncOptions,
}

fn lock(target: &Mutex<Target>) -> MutexGuard<'_, Target> {
    target.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
enum Command {
    Restart,
    Detach(oneshot::Sender<()>),
}

/// Consumer side of an observed query.
///
/// Dropping the handle tears the query down in the background; use
/// [`QueryHandle::detach`] to wait for it.
pub struct QueryHandle {
    context: Context,
    dispatcher: Dispatcher,
    target: Arc<Mutex<Target>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl QueryHandle {
    /// Snapshot of the current state.
    pub fn state(&self) -> SyncState {
        self.dispatcher.snapshot()
    }

    /// Receiver notified on every applied transition.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.dispatcher.subscribe()
    }

    /// Canonical key of the query currently observed.
    pub fn key(&self) -> QueryKey {
        lock(&self.target).spec.key()
    }

    /// Wait until the state satisfies `predicate` and return that state.
    pub async fn wait_for<F>(&self, predicate: F) -> Result<SyncState, watch::error::RecvError>
    where
        F: FnMut(&SyncState) -> bool,
    {
        let mut receiver = self.subscribe();
        let state = receiver.wait_for(predicate).await?;
        Ok(state.clone())
    }

    /// Start a clean generation of the current query.
    ///
    /// The reset is applied before this returns; the startup sequence of the
    /// new generation runs in the background.
    pub fn reload(&self) {
        let seed = lock(&self.target).options.initial_seed.clone();
        if !self.dispatcher.dispatch(Action::Reset { seed }) {
            return;
        }
        tracing::debug!(generation = self.dispatcher.generation(), "reload requested");
        let _ = self.commands.send(Command::Restart);
    }

    /// Switch to another query or options.
    ///
    /// Returns whether a new generation was started; nothing happens when
    /// neither the key nor the options changed.
    pub fn update(&self, spec: QuerySpec, options: SyncOptions) -> bool {
        let options = self.context.config.constrain(options);
        {
            let mut target = lock(&self.target);
            if target.spec.key() == spec.key() && target.options == options {
                return false;
            }
            target.spec = spec;
            target.options = options;
        }
        self.reload();
        true
    }

    /// Tear the query down and return its final state.
    ///
    /// After this the state no longer changes.
    pub async fn detach(self) -> SyncState {
        let (done, finished) = oneshot::channel();
        if self.commands.send(Command::Detach(done)).is_ok() {
            let _ = finished.await;
        }
        self.dispatcher.close();
        self.dispatcher.snapshot()
    }
}

struct Driver {
    context: Context,
    dispatcher: Dispatcher,
    target: Arc<Mutex<Target>>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Driver {
    async fn run(mut self) {
        let mut running = self.start().await;
        let mut teardowns: Vec<JoinHandle<()>> = Vec::new();

        loop {
            match self.commands.recv().await {
                Some(Command::Restart) => {
                    if running.scope.generation() == self.dispatcher.generation() {
                        continue;
                    }
                    teardowns.retain(|task| !task.is_finished());
                    teardowns.extend(running.stop());
                    running = self.start().await;
                }
                Some(Command::Detach(done)) => {
                    teardowns.extend(running.stop());
                    finish(teardowns).await;
                    self.dispatcher.close();
                    let _ = done.send(());
                    return;
                }
                None => {
                    teardowns.extend(running.stop());
                    finish(teardowns).await;
                    self.dispatcher.close();
                    return;
                }
            }
        }
    }

    /// Run the startup sequence for the current generation.
    async fn start(&self) -> Running {
        let (spec, options) = {
            let target = lock(&self.target);
            (target.spec.clone(), target.options.clone())
        };
        let scope = GenerationScope::new(self.dispatcher.generation(), self.dispatcher.clone());
        let session = Arc::new(QuerySession::new(&self.context, spec, options));

        tracing::info!(
            generation = scope.generation(),
            key = %session.key,
            cache = session.options.enable_cache,
            live = session.options.enable_live,
            "synced query started"
        );

        if session.options.enable_cache {
            match &session.options.initial_seed {
                // Pin before any fetch can replace the key's snapshot.
                Some(seed) => session.replace_pins(&scope, &seed.results).await,
                None => {
                    let session = Arc::clone(&session);
                    let scope = scope.clone();
                    tokio::spawn(async move { session.seed_from_cache(&scope).await });
                }
            }
        }

        if session.options.enable_live {
            Running {
                live: Some(live::spawn(Arc::clone(&session), scope.clone())),
                fetch: None,
                scope,
            }
        } else {
            Running {
                fetch: Some(fetch::spawn(session, &scope)),
                live: None,
                scope,
            }
        }
    }
}

/// Tasks of one running generation.
struct Running {
    scope: GenerationScope,
    fetch: Option<FetchHandle>,
    live: Option<JoinHandle<()>>,
}

impl Running {
    /// Cancel the generation without waiting for it.
    ///
    /// Returns the live task, which still completes a subscribe in flight
    /// and unsubscribes; its late dispatches carry a stale generation.
    fn stop(self) -> Option<JoinHandle<()>> {
        if let Some(fetch) = &self.fetch {
            fetch.cancel();
        }
        self.scope.cancel();
        tracing::info!(generation = self.scope.generation(), "synced query stopped");
        self.live
    }
}

/// Wait for pending teardowns, at most [`TEARDOWN_TIMEOUT`].
async fn finish(teardowns: Vec<JoinHandle<()>>) {
    let pending = teardowns.len();
    let drain = async {
        for task in teardowns {
            if let Err(error) = task.await {
                tracing::warn!(error = %error, "live task ended abnormally");
            }
        }
    };
    if tokio::time::timeout(TEARDOWN_TIMEOUT, drain).await.is_err() {
        tracing::warn!(pending, "teardown still running, detaching anyway");
    }
}
