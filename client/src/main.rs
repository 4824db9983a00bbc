//! querysync demo: drives one observed query through the in-memory
//! backends and logs every state it goes through.

use std::sync::Arc;
use std::time::Duration;

use querysync_client::memory::{MemoryCache, MemoryDataService};
use querysync_client::{Config, Context, Orchestrator, SyncOptions};
use querysync_engine::{Entity, Error, QuerySpec};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn now() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn todo(id: &str, title: &str) -> Entity {
    Entity::new(id, "Todo", now())
        .with("title", title)
        .with("done", false)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "querysync_client=debug,querysync_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        server = %config.server_url,
        application = %config.application_id,
        runtime = ?config.runtime,
        "starting querysync demo"
    );

    let service = Arc::new(MemoryDataService::new());
    let cache = Arc::new(MemoryCache::new());
    service.save(todo("t1", "write the reducer"));

    let orchestrator = Orchestrator::new(Context::new(config, service.clone(), cache.clone()));

    let spec = QuerySpec::new("Todo")?
        .equal_to("done", false)?
        .descending("createdAt")?
        .limit(2)
        .with_count();
    let handle = orchestrator.observe(spec, SyncOptions::default());

    let mut states = handle.subscribe();
    let logger = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            tracing::info!(
                generation = state.generation,
                phase = ?state.phase(),
                live = state.is_live,
                syncing = state.is_syncing,
                count = ?state.count,
                ids = ?state.ids(),
                "state"
            );
        }
    });

    handle
        .wait_for(|s| s.is_live && !s.is_loading && !s.is_syncing)
        .await?;

    // Drive the live channel: two inserts overflow the page, the first
    // delete refills it from the server.
    tokio::time::sleep(Duration::from_millis(5)).await;
    service.save(todo("t2", "wire the live channel"));
    tokio::time::sleep(Duration::from_millis(5)).await;
    service.save(todo("t3", "add retries"));
    service.destroy("Todo", "t3");

    // A dropped connection keeps the results on screen.
    service.close_subscriptions();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Reload through a flaky network.
    service.fail_finds([Error::Connection("network unreachable".into())]);
    handle.reload();
    handle
        .wait_for(|s| s.generation == 2 && s.is_live && !s.is_loading && !s.is_syncing)
        .await?;

    let last = handle.detach().await;
    let snapshot = cache.snapshot();
    tracing::info!(
        ids = ?last.ids(),
        count = ?last.count,
        pinned = snapshot.entity_count(),
        "demo finished"
    );

    logger.abort();
    Ok(())
}
