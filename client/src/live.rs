//! Live subscription lifecycle.
//!
//! The live task owns the subscription and the one-shot fetch used to
//! reconcile with the server whenever the channel (re)opens or a full page
//! needs topping up. Events are handled strictly in delivery order: each one
//! is dispatched and, with caching on, pinned or unpinned before the next
//! event is read.
//!
//! Teardown goes through the scope's cancellation token: the task finishes
//! a subscribe call already in flight, then cancels its fetch, unsubscribes
//! and clears the live flag.

use std::sync::Arc;

use querysync_engine::Entity;
use tokio::task::JoinHandle;

use crate::bus::GenerationScope;
use crate::fetch::{self, FetchHandle};
use crate::service::{LiveEvent, LiveSubscription};
use crate::session::QuerySession;

/// Start the live task for one generation.
pub fn spawn(session: Arc<QuerySession>, scope: GenerationScope) -> JoinHandle<()> {
    tokio::spawn(run(session, scope))
}

async fn run(session: Arc<QuerySession>, scope: GenerationScope) {
    let generation = scope.generation();

    let LiveSubscription { id, mut events } = match session.service.subscribe(&session.spec).await
    {
        Ok(subscription) => subscription,
        Err(error) => {
            scope.fail(error);
            return;
        }
    };

    tracing::debug!(generation, key = %session.key, subscription = %id, "live subscription established");

    let mut fetch: Option<FetchHandle> = None;

    loop {
        let event = tokio::select! {
            biased;
            _ = scope.cancelled() => break,
            event = events.recv() => event,
        };

        let Some(event) = event else {
            tracing::debug!(generation, subscription = %id, "live channel ended");
            break;
        };

        tracing::trace!(generation, subscription = %id, event = event.name(), "live event");

        match event {
            LiveEvent::Open => {
                scope.set_live(true);
                fetch::restart(&mut fetch, &session, &scope);
            }
            LiveEvent::Close => {
                scope.set_live(false);
            }
            LiveEvent::Create(entity) | LiveEvent::Update(entity) | LiveEvent::Enter(entity) => {
                upsert(&session, &scope, entity).await;
            }
            LiveEvent::Leave(entity) | LiveEvent::Delete(entity) => {
                remove(&session, &scope, entity, &mut fetch).await;
            }
        }
    }

    if let Some(fetch) = fetch.take() {
        fetch.cancel();
    }

    if let Err(error) = session.service.unsubscribe(&id).await {
        tracing::warn!(generation, subscription = %id, error = %error, "unsubscribe failed");
    }

    scope.set_live(false);
    tracing::debug!(generation, subscription = %id, "live subscription closed");
}

async fn upsert(session: &Arc<QuerySession>, scope: &GenerationScope, entity: Entity) {
    if session.options.enable_cache {
        scope.upsert(entity.clone(), &session.spec);
        session.pin(scope, &entity).await;
    } else {
        scope.upsert(entity, &session.spec);
    }
}

async fn remove(
    session: &Arc<QuerySession>,
    scope: &GenerationScope,
    entity: Entity,
    fetch: &mut Option<FetchHandle>,
) {
    scope.remove(entity.clone());

    if needs_refill(session, scope) {
        tracing::debug!(
            generation = scope.generation(),
            key = %session.key,
            "page fell below its limit, refilling"
        );
        fetch::restart(fetch, session, scope);
    }

    if session.options.enable_cache {
        session.unpin(scope, &entity).await;
    }
}

/// A page that was full is now exactly one short of its limit.
fn needs_refill(session: &QuerySession, scope: &GenerationScope) -> bool {
    let Some(limit) = session.spec.page_limit() else {
        return false;
    };
    scope.dispatcher().with_state(|state| {
        state.generation == scope.generation()
            && state
                .results
                .as_ref()
                .is_some_and(|results| results.len() + 1 == limit)
    })
}
