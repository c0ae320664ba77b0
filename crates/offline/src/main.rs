use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use idwallet_offline::{
    BackupCache, ConnectivityMonitor, ConnectivityState, DispatcherRegistry, EnqueueOptions,
    InMemoryBackupCache, InMemoryItemStore, InMemoryLocalRecords, OperationType, Priority,
    QueueConfig, QueueEngine, ResourceKind, SimulatedResourceService, SqliteBackupCache,
};
use serde_json::json;

async fn open_cache() -> anyhow::Result<Arc<dyn BackupCache>> {
    match std::env::var("IDWALLET_CACHE").as_deref() {
        Ok("memory") => {
            tracing::info!("using in-memory backup cache");
            Ok(Arc::new(InMemoryBackupCache::new()))
        }
        _ => {
            let cache = SqliteBackupCache::open_default()
                .await
                .context("failed to open SQLite backup cache")?;
            Ok(Arc::new(cache))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    idwallet_observability::init();

    let config = QueueConfig::from_env();
    let cache = open_cache().await?;

    let mut dispatcher = DispatcherRegistry::new(Arc::new(InMemoryLocalRecords::new()));
    for kind in ResourceKind::ALL {
        dispatcher = dispatcher.register(kind, Arc::new(SimulatedResourceService::new(kind)));
    }

    let engine = QueueEngine::builder(Arc::new(InMemoryItemStore::offline()), cache, dispatcher)
        .config(config)
        .build();

    let monitor = ConnectivityMonitor::new(ConnectivityState::Offline);
    let listener = engine.initialize(monitor.subscribe()).await;

    // An offline session: issue a credential, share it once it exists,
    // update the profile and open a connection request.
    let issued = engine
        .enqueue(
            OperationType::Create,
            ResourceKind::Credential,
            json!({"id": "cred-email", "type": "EmailCredential", "subject": "did:example:alice"}),
            EnqueueOptions::default().with_priority(Priority::High),
        )
        .await;
    engine
        .enqueue(
            OperationType::Share,
            ResourceKind::Credential,
            json!({"id": "cred-email", "options": {"recipient": "did:example:bob"}}),
            EnqueueOptions::default().depends_on(issued),
        )
        .await;
    engine
        .enqueue(
            OperationType::Update,
            ResourceKind::Profile,
            json!({"id": "me", "displayName": "Alice"}),
            EnqueueOptions::default().with_priority(Priority::Low),
        )
        .await;
    engine
        .enqueue(
            OperationType::Create,
            ResourceKind::Handshake,
            json!({"peer": "did:example:carol"}),
            EnqueueOptions::default(),
        )
        .await;

    let before = engine.get_queue_stats()?;
    tracing::info!(total = before.total, offline = monitor.is_offline(), "offline session queued");

    monitor.set_online();

    // Wait for the reconnect pass (and any retries) to drain.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let stats = engine.get_queue_stats()?;
        if stats.total == 0 || tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let stats = engine.get_queue_stats()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&stats).context("failed to render queue stats")?
    );

    drop(monitor);
    listener.await.context("connectivity listener panicked")?;
    Ok(())
}
