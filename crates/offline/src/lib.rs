//! `idwallet-offline`
//!
//! **Responsibility:** Offline mutation queue for the wallet.
//!
//! This crate provides:
//! - A queue engine that accepts credential, handshake and profile writes
//!   while the wallet is offline and replays them on reconnect
//! - Priority ordering, dependency gating and exponential-backoff retry
//! - Backup mirroring of queued items (in-memory or SQLite) with startup
//!   restoration
//! - A dispatcher registry binding resource kinds to remote services

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod notify;
pub mod records;
pub mod retry;
pub mod scheduler;
pub mod simulated;
pub mod sqlite_cache;
pub mod store;
pub mod types;

pub use cache::{BackupCache, InMemoryBackupCache, QUEUE_INDEX_KEY};
pub use config::QueueConfig;
pub use connectivity::{ConnectivityMonitor, ConnectivityState};
pub use dispatch::{DispatcherRegistry, ResourceService};
pub use engine::{QueueEngine, QueueEngineBuilder};
pub use error::{CacheError, QueueError, QueueResult, ServiceError, StoreError};
pub use notify::{
    Notification, NotificationSink, RecordingNotificationSink, Severity, TracingNotificationSink,
};
pub use records::{InMemoryLocalRecords, LocalRecords};
pub use retry::RetryPolicy;
pub use scheduler::{ManualScheduler, RetryHandle, RetryScheduler, ScheduledTask, TokioScheduler};
pub use simulated::SimulatedResourceService;
pub use sqlite_cache::SqliteBackupCache;
pub use store::{InMemoryItemStore, ItemStore};
pub use types::{
    EnqueueOptions, ItemPatch, PassReport, PassStatus, PriorityCounts, QueueItem, QueueRequest,
    QueueStats, ResourceCounts, sort_for_processing,
};

pub use idwallet_core::{OperationType, Priority, QueueItemId, ResourceKind};
