//! One-shot remote fetch with retry.
//!
//! A fetch runs as its own task. Connectivity failures are retried after a
//! jittered exponential delay for as long as the fetch is not cancelled;
//! any other failure fails the generation. Cancelling stops future retries
//! but never aborts a request already sent: its result is still dispatched
//! and the generation check decides whether it lands.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::bus::GenerationScope;
use crate::session::QuerySession;

/// Handle to a running fetch.
#[derive(Debug)]
pub struct FetchHandle {
    scope: GenerationScope,
    task: JoinHandle<()>,
}

impl FetchHandle {
    /// Suppress any retry not yet fired.
    pub fn cancel(&self) {
        self.scope.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.scope.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Start a fetch in its own child scope of `scope`.
pub fn spawn(session: Arc<QuerySession>, scope: &GenerationScope) -> FetchHandle {
    let scope = scope.child();
    let task = tokio::spawn(run(session, scope.clone()));
    FetchHandle { scope, task }
}

/// Cancel `current` if any and start a fresh fetch in its place.
pub fn restart(
    current: &mut Option<FetchHandle>,
    session: &Arc<QuerySession>,
    scope: &GenerationScope,
) {
    if let Some(previous) = current.take() {
        previous.cancel();
    }
    *current = Some(spawn(Arc::clone(session), scope));
}

async fn run(session: Arc<QuerySession>, scope: GenerationScope) {
    let generation = scope.generation();
    let mut attempt: u32 = 1;

    loop {
        if session.refreshes_in_background() {
            scope.set_syncing(true);
        }

        tracing::debug!(generation, key = %session.key, attempt, "remote fetch started");

        match session.service.find(&session.spec).await {
            Ok(results) => {
                tracing::debug!(
                    generation,
                    key = %session.key,
                    results = results.len(),
                    count = ?results.count,
                    "remote fetch completed"
                );

                let pinned = session.options.enable_cache.then(|| results.results.clone());
                scope.load_from_server(results);

                if let Some(entities) = pinned {
                    session.replace_pins(&scope, &entities).await;
                }
                return;
            }
            Err(error) if error.is_retryable() => {
                if scope.is_cancelled() {
                    return;
                }

                let delay = session.retry.delay(attempt);
                tracing::warn!(
                    generation,
                    key = %session.key,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "remote fetch failed to connect, retrying"
                );

                tokio::select! {
                    _ = scope.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                if scope.is_cancelled() {
                    return;
                }
                attempt = attempt.saturating_add(1);
            }
            Err(error) => {
                scope.fail(error);
                return;
            }
        }
    }
}
