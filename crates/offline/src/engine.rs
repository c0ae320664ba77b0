//! Queue engine: accepts offline mutations and replays them when the wallet
//! is back online.
//!
//! One pass at a time walks the store in priority-then-age order, gates each
//! item on its dependencies, dispatches it and settles the outcome. Failed
//! items are retried out of band with exponential backoff until the retry
//! budget is spent, after which they stay in the store and the user is
//! notified once.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use idwallet_core::{OperationType, QueueItemId, ResourceKind};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::{BackupCache, QUEUE_INDEX_KEY};
use crate::config::QueueConfig;
use crate::connectivity::ConnectivityState;
use crate::dispatch::DispatcherRegistry;
use crate::error::{QueueError, QueueResult};
use crate::notify::{Notification, NotificationSink, TracingNotificationSink};
use crate::retry::{RetryPolicy, millis_saturating};
use crate::scheduler::{RetryHandle, RetryScheduler, TokioScheduler};
use crate::store::ItemStore;
use crate::types::{
    EnqueueOptions, ItemPatch, PassReport, PassStatus, QueueItem, QueueRequest, QueueStats,
    sort_for_processing,
};

/// Holds the processing flag for the lifetime of one pass.
///
/// Dropping the guard clears the flag, whichever way the pass exits.
#[derive(Debug)]
struct ProcessingGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

struct EngineInner {
    store: Arc<dyn ItemStore>,
    cache: Arc<dyn BackupCache>,
    dispatcher: DispatcherRegistry,
    notifier: Arc<dyn NotificationSink>,
    scheduler: Arc<dyn RetryScheduler>,
    config: QueueConfig,
    policy: RetryPolicy,
    processing: AtomicBool,
    retries: Mutex<HashMap<QueueItemId, RetryHandle>>,
    // Serializes read-modify-write of the restoration index.
    index_lock: tokio::sync::Mutex<()>,
}

/// Handle to the offline queue. Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct QueueEngine {
    inner: Arc<EngineInner>,
}

/// Builder for [`QueueEngine`].
pub struct QueueEngineBuilder {
    store: Arc<dyn ItemStore>,
    cache: Arc<dyn BackupCache>,
    dispatcher: DispatcherRegistry,
    notifier: Option<Arc<dyn NotificationSink>>,
    scheduler: Option<Arc<dyn RetryScheduler>>,
    config: Option<QueueConfig>,
}

impl QueueEngineBuilder {
    /// Where terminal failures are reported. Defaults to the tracing sink.
    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Timer used for retries and background passes. Defaults to Tokio.
    pub fn scheduler(mut self, scheduler: Arc<dyn RetryScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> QueueEngine {
        let config = self.config.unwrap_or_default();
        let policy = config.retry_policy();
        QueueEngine {
            inner: Arc::new(EngineInner {
                store: self.store,
                cache: self.cache,
                dispatcher: self.dispatcher,
                notifier: self
                    .notifier
                    .unwrap_or_else(|| Arc::new(TracingNotificationSink)),
                scheduler: self.scheduler.unwrap_or_else(|| Arc::new(TokioScheduler)),
                config,
                policy,
                processing: AtomicBool::new(false),
                retries: Mutex::new(HashMap::new()),
                index_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }
}

impl QueueEngine {
    pub fn builder(
        store: Arc<dyn ItemStore>,
        cache: Arc<dyn BackupCache>,
        dispatcher: DispatcherRegistry,
    ) -> QueueEngineBuilder {
        QueueEngineBuilder {
            store,
            cache,
            dispatcher,
            notifier: None,
            scheduler: None,
            config: None,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// True while a `process_queue` pass holds the processing flag.
    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::Acquire)
    }

    fn is_online(&self) -> bool {
        self.inner.store.is_online()
    }

    fn from_weak(inner: &Weak<EngineInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    // ------------------------------------------------------------------
    // Enqueue
    // ------------------------------------------------------------------

    /// Queue a mutation and return its id.
    ///
    /// Persistence failures are logged, never returned: the caller's write
    /// must not fail because the backup mirror could not be written.
    pub async fn enqueue(
        &self,
        operation: OperationType,
        resource: ResourceKind,
        data: Value,
        options: EnqueueOptions,
    ) -> QueueItemId {
        let item = QueueItem::new(operation, resource, data, &options);
        let id = item.id;

        if let Err(e) = self.inner.store.append(item.clone()) {
            error!(item_id = %id, error = %e, "failed to append queue item to store");
        }
        if let Err(e) = self.write_mirror(&item).await {
            error!(item_id = %id, error = %e, "failed to mirror queue item to backup cache");
        }
        if let Err(e) = self.index_insert(id).await {
            error!(item_id = %id, error = %e, "failed to record queue item in restoration index");
        }

        debug!(
            item_id = %id,
            operation = %operation,
            resource = %resource,
            priority = %item.priority,
            "queued offline mutation"
        );

        if options.immediate && self.is_online() {
            self.process_item(&item).await;
        }
        if options.background {
            self.schedule_background_pass();
        }

        id
    }

    /// Enqueue each request in order. Not atomic.
    pub async fn add_bulk_to_queue(&self, requests: Vec<QueueRequest>) -> Vec<QueueItemId> {
        let mut ids = Vec::with_capacity(requests.len());
        for request in requests {
            let id = self
                .enqueue(request.operation, request.resource, request.data, request.options)
                .await;
            ids.push(id);
        }
        ids
    }

    fn schedule_background_pass(&self) {
        let weak = Arc::downgrade(&self.inner);
        // Background passes are not tracked; a dropped handle does not cancel.
        let _ = self.inner.scheduler.schedule(
            self.inner.config.background_delay,
            Box::pin(async move {
                if let Some(engine) = Self::from_weak(&weak) {
                    if let Err(e) = engine.process_queue().await {
                        error!(error = %e, "background queue pass failed");
                    }
                }
            }),
        );
    }

    // ------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------

    /// Run one processing pass over the queue.
    ///
    /// Returns immediately when offline or when another pass is running.
    /// Per-item failures are handled here; only store failures escape.
    pub async fn process_queue(&self) -> QueueResult<PassReport> {
        if !self.is_online() {
            debug!("skipping queue pass: offline");
            return Ok(PassReport::empty(PassStatus::Offline));
        }
        let Some(_guard) = ProcessingGuard::acquire(&self.inner.processing) else {
            debug!("skipping queue pass: another pass is running");
            return Ok(PassReport::empty(PassStatus::AlreadyRunning));
        };

        let mut items = self.inner.store.snapshot()?;
        sort_for_processing(&mut items);
        info!(count = items.len(), "processing offline queue");

        let max_retries = self.inner.policy.max_retries;
        let mut report = PassReport::empty(PassStatus::Completed);

        for item in items {
            if !self.is_online() {
                info!(
                    processed = report.succeeded + report.failed,
                    "connectivity lost; stopping queue pass"
                );
                report.status = PassStatus::ConnectivityLost;
                break;
            }

            // The snapshot may be stale by now.
            let Some(current) = self.inner.store.get(&item.id)? else {
                continue;
            };
            if current.is_terminal(max_retries) {
                report.deferred += 1;
                continue;
            }

            if self.process_item(&current).await {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
        }

        info!(
            status = ?report.status,
            succeeded = report.succeeded,
            failed = report.failed,
            deferred = report.deferred,
            "queue pass finished"
        );
        Ok(report)
    }

    /// Dependency check, dispatch, settle. Returns whether the item succeeded.
    async fn process_item(&self, item: &QueueItem) -> bool {
        let outcome = match self.check_dependencies(item).await {
            Ok(()) => self.inner.dispatcher.dispatch(item).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                debug!(item_id = %item.id, resource = %item.resource, "queue item dispatched");
                self.settle_success(item.id).await;
                true
            }
            Err(e) => {
                self.handle_failure(item.id, e).await;
                false
            }
        }
    }

    async fn settle_success(&self, id: QueueItemId) {
        if let Err(e) = self.inner.store.remove(&id) {
            error!(item_id = %id, error = %e, "failed to remove dispatched item from store");
        }
        self.forget(&[id]).await;
    }

    // ------------------------------------------------------------------
    // Dependencies
    // ------------------------------------------------------------------

    async fn check_dependencies(&self, item: &QueueItem) -> Result<(), QueueError> {
        let pending = self.unmet_dependencies(&item.dependencies).await;
        if pending.is_empty() {
            Ok(())
        } else {
            Err(QueueError::UnmetDependency {
                id: item.id,
                pending,
            })
        }
    }

    /// True when every id in `ids` has been resolved.
    pub async fn dependencies_satisfied(&self, ids: &[QueueItemId]) -> bool {
        self.unmet_dependencies(ids).await.is_empty()
    }

    async fn unmet_dependencies(&self, ids: &[QueueItemId]) -> Vec<QueueItemId> {
        let mut pending = Vec::new();
        for id in ids {
            if !self.dependency_resolved(id).await {
                pending.push(*id);
            }
        }
        pending
    }

    async fn dependency_resolved(&self, id: &QueueItemId) -> bool {
        match self.inner.store.get(id) {
            Ok(Some(_)) => return false,
            Ok(None) => {}
            Err(e) => {
                warn!(dependency = %id, error = %e, "store lookup failed; treating dependency as unmet");
                return false;
            }
        }

        match self.inner.cache.get(&id.cache_key()).await {
            Ok(Some(_)) => {
                debug!(dependency = %id, "dependency resolved; backup mirror still lingering");
                true
            }
            Ok(None) => true,
            Err(e) => {
                warn!(dependency = %id, error = %e, "cache lookup failed; treating dependency as unmet");
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Failure handling
    // ------------------------------------------------------------------

    async fn handle_failure(&self, id: QueueItemId, err: QueueError) {
        let current = match self.inner.store.get(&id) {
            Ok(Some(item)) => item,
            Ok(None) => {
                debug!(item_id = %id, error = %err, "failed item no longer queued; nothing to settle");
                return;
            }
            Err(e) => {
                error!(item_id = %id, error = %e, "failed to read item while recording failure");
                return;
            }
        };

        let policy = &self.inner.policy;
        let next = current.retry_count.saturating_add(1);

        if policy.should_retry(current.retry_count) {
            self.record_failure(id, ItemPatch::failed_attempt(next, err.to_string()))
                .await;
            let delay = policy.delay_for(next);
            warn!(
                item_id = %id,
                resource = %current.resource,
                operation = %current.operation,
                retry_count = next,
                delay_ms = millis_saturating(delay),
                error = %err,
                "queue item failed; retry scheduled"
            );
            self.schedule_retry(id, delay);
        } else {
            // A pass may have run the final attempt ahead of its timer.
            self.cancel_retry(&id);
            self.record_failure(
                id,
                ItemPatch::failed_attempt(next, format!("Max retries exceeded: {err}")),
            )
            .await;
            error!(
                item_id = %id,
                resource = %current.resource,
                operation = %current.operation,
                retry_count = next,
                error = %err,
                "queue item exhausted its retries"
            );
            self.inner.notifier.notify(Notification::error(
                "Sync failed",
                format!(
                    "Could not {} {} after {} attempts: {err}",
                    current.operation, current.resource, next
                ),
            ));
        }
    }

    async fn record_failure(&self, id: QueueItemId, patch: ItemPatch) {
        match self.inner.store.patch(&id, &patch) {
            Ok(Some(updated)) => {
                if let Err(e) = self.write_mirror(&updated).await {
                    warn!(item_id = %id, error = %e, "failed to refresh backup mirror");
                }
            }
            Ok(None) => debug!(item_id = %id, "item removed before failure was recorded"),
            Err(e) => error!(item_id = %id, error = %e, "failed to record item failure"),
        }
    }

    fn schedule_retry(&self, id: QueueItemId, delay: Duration) {
        let weak = Arc::downgrade(&self.inner);
        let handle = self.inner.scheduler.schedule(
            delay,
            Box::pin(async move {
                if let Some(engine) = Self::from_weak(&weak) {
                    engine.retry_item(id).await;
                }
            }),
        );
        if let Some(previous) = self.retries().insert(id, handle) {
            previous.cancel();
        }
    }

    /// Body of a fired retry timer.
    async fn retry_item(&self, id: QueueItemId) {
        self.retries().remove(&id);

        if !self.is_online() {
            debug!(item_id = %id, "retry fired while offline; leaving item for the next pass");
            return;
        }

        match self.inner.store.get(&id) {
            Ok(Some(item)) if item.is_terminal(self.inner.policy.max_retries) => {
                debug!(item_id = %id, "retry fired for a terminal item");
            }
            Ok(Some(item)) => {
                self.process_item(&item).await;
            }
            Ok(None) => debug!(item_id = %id, "retry fired for an item no longer queued"),
            Err(e) => error!(item_id = %id, error = %e, "failed to load item for retry"),
        }
    }

    fn retries(&self) -> MutexGuard<'_, HashMap<QueueItemId, RetryHandle>> {
        self.inner.retries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_retry(&self, id: &QueueItemId) {
        if let Some(handle) = self.retries().remove(id) {
            handle.cancel();
        }
    }

    /// Ids with a retry timer outstanding.
    pub fn scheduled_retries(&self) -> usize {
        self.retries().len()
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Reset every exhausted item and run a fresh pass.
    pub async fn retry_failed_items(&self) -> QueueResult<PassReport> {
        let max_retries = self.inner.policy.max_retries;
        let mut revived = 0usize;

        for item in self.inner.store.snapshot()? {
            if !item.is_exhausted(max_retries) {
                continue;
            }
            self.cancel_retry(&item.id);
            if let Some(updated) = self.inner.store.patch(&item.id, &ItemPatch::reset())? {
                if let Err(e) = self.write_mirror(&updated).await {
                    warn!(item_id = %item.id, error = %e, "failed to refresh backup mirror");
                }
                revived += 1;
            }
        }

        info!(revived, "reset failed queue items");
        self.process_queue().await
    }

    /// Remove the given ids from the queue. Absent ids are ignored.
    /// Returns how many items were actually removed.
    pub async fn remove_from_queue(&self, ids: &[QueueItemId]) -> QueueResult<usize> {
        let mut removed = 0usize;
        for id in ids {
            if self.inner.store.remove(id)? {
                removed += 1;
            }
        }
        self.forget(ids).await;
        debug!(requested = ids.len(), removed, "removed items from queue");
        Ok(removed)
    }

    /// Remove every item that has never failed. Returns the number removed.
    pub async fn clear_completed_items(&self) -> QueueResult<usize> {
        let untouched: Vec<QueueItemId> = self
            .inner
            .store
            .snapshot()?
            .into_iter()
            .filter(QueueItem::is_untouched)
            .map(|item| item.id)
            .collect();

        if untouched.is_empty() {
            return Ok(0);
        }
        self.remove_from_queue(&untouched).await
    }

    pub fn get_queue_stats(&self) -> QueueResult<QueueStats> {
        let items = self.inner.store.snapshot()?;
        Ok(QueueStats::from_items(
            &items,
            self.inner.policy.max_retries,
            self.is_processing(),
        ))
    }

    // ------------------------------------------------------------------
    // Backup mirror and restoration
    // ------------------------------------------------------------------

    async fn write_mirror(&self, item: &QueueItem) -> Result<(), QueueError> {
        let value = serde_json::to_value(item)?;
        self.inner
            .cache
            .set(&item.id.cache_key(), value, Some(self.inner.config.backup_ttl))
            .await?;
        Ok(())
    }

    /// Drop all local traces of settled or removed items.
    async fn forget(&self, ids: &[QueueItemId]) {
        for id in ids {
            self.cancel_retry(id);
            if let Err(e) = self.inner.cache.remove(&id.cache_key()).await {
                warn!(item_id = %id, error = %e, "failed to erase backup mirror");
            }
        }
        if let Err(e) = self.index_remove(ids).await {
            warn!(error = %e, "failed to update restoration index");
        }
    }

    async fn read_index(&self) -> Result<Vec<QueueItemId>, QueueError> {
        match self.inner.cache.get(QUEUE_INDEX_KEY).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    async fn write_index(&self, ids: &[QueueItemId]) -> Result<(), QueueError> {
        let value = serde_json::to_value(ids)?;
        self.inner.cache.set(QUEUE_INDEX_KEY, value, None).await?;
        Ok(())
    }

    async fn index_insert(&self, id: QueueItemId) -> Result<(), QueueError> {
        let _lock = self.inner.index_lock.lock().await;
        let mut ids = self.read_index().await?;
        if !ids.contains(&id) {
            ids.push(id);
            self.write_index(&ids).await?;
        }
        Ok(())
    }

    async fn index_remove(&self, remove: &[QueueItemId]) -> Result<(), QueueError> {
        if remove.is_empty() {
            return Ok(());
        }
        let _lock = self.inner.index_lock.lock().await;
        let mut ids = self.read_index().await?;
        let before = ids.len();
        ids.retain(|id| !remove.contains(id));
        if ids.len() != before {
            self.write_index(&ids).await?;
        }
        Ok(())
    }

    /// Rehydrate items the store lost across a restart from their backup
    /// mirrors. Best effort: failures are logged and the count of restored
    /// items is returned.
    pub async fn restore_queue_from_storage(&self) -> usize {
        let indexed = match self.read_index().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "failed to read restoration index");
                return 0;
            }
        };
        let live: HashSet<QueueItemId> = match self.inner.store.snapshot() {
            Ok(items) => items.into_iter().map(|item| item.id).collect(),
            Err(e) => {
                error!(error = %e, "failed to read item store during restoration");
                return 0;
            }
        };

        let mut restored = 0usize;
        let mut stale = Vec::new();

        for id in indexed {
            if live.contains(&id) {
                continue;
            }
            match self.inner.cache.get(&id.cache_key()).await {
                Ok(Some(value)) => match serde_json::from_value::<QueueItem>(value) {
                    Ok(item) => match self.inner.store.append(item) {
                        Ok(()) => restored += 1,
                        Err(e) => warn!(item_id = %id, error = %e, "failed to restore queue item"),
                    },
                    Err(e) => {
                        warn!(item_id = %id, error = %e, "discarding unreadable backup mirror");
                        stale.push(id);
                    }
                },
                Ok(None) => stale.push(id),
                Err(e) => warn!(item_id = %id, error = %e, "failed to read backup mirror"),
            }
        }

        if let Err(e) = self.index_remove(&stale).await {
            warn!(error = %e, "failed to prune restoration index");
        }

        info!(restored, pruned = stale.len(), "restored offline queue from backup cache");
        restored
    }

    // ------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------

    /// Restore persisted items, adopt the current connectivity state and
    /// start replaying the queue whenever connectivity comes back.
    ///
    /// The returned task ends when the connectivity sender is dropped.
    pub async fn initialize(
        &self,
        mut connectivity: watch::Receiver<ConnectivityState>,
    ) -> JoinHandle<()> {
        self.restore_queue_from_storage().await;

        let initial = *connectivity.borrow_and_update();
        self.inner.store.set_online(initial.is_online());
        if initial.is_online() {
            if let Err(e) = self.process_queue().await {
                error!(error = %e, "initial queue pass failed");
            }
        }

        let engine = self.clone();
        tokio::spawn(async move {
            let mut last = initial;
            while connectivity.changed().await.is_ok() {
                let state = *connectivity.borrow_and_update();
                engine.inner.store.set_online(state.is_online());

                if state.is_online() && !last.is_online() {
                    info!("connectivity restored; replaying offline queue");
                    if let Err(e) = engine.process_queue().await {
                        error!(error = %e, "queue pass after reconnect failed");
                    }
                } else if !state.is_online() {
                    info!("connectivity lost; queueing writes");
                }
                last = state;
            }
            debug!("connectivity listener stopped");
        })
    }
}
