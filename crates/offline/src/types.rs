//! Queue item model and the read-side shapes the engine reports.

use chrono::{DateTime, Utc};
use idwallet_core::{OperationType, Priority, QueueItemId, ResourceKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A mutation deferred until the wallet can reach its backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    #[serde(rename = "type")]
    pub operation: OperationType,
    pub resource: ResourceKind,
    /// Operation-specific arguments (credential fields, target id, ...).
    pub data: Value,
    /// Creation time; tie-break for equal priorities.
    pub timestamp: DateTime<Utc>,
    /// Failed processing attempts so far.
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub priority: Priority,
    /// Items that must be resolved before this one may run.
    #[serde(default)]
    pub dependencies: Vec<QueueItemId>,
    pub version: u32,
    /// Pre-mutation snapshot for dispatchers that compare against it.
    pub original_data: Option<Value>,
}

impl QueueItem {
    /// Build a fresh, never-attempted item.
    pub fn new(
        operation: OperationType,
        resource: ResourceKind,
        data: Value,
        options: &EnqueueOptions,
    ) -> Self {
        Self {
            id: QueueItemId::new(),
            operation,
            resource,
            data,
            timestamp: Utc::now(),
            retry_count: 0,
            last_error: None,
            priority: options.priority,
            dependencies: options.dependencies.clone(),
            version: 1,
            original_data: options.original_data.clone(),
        }
    }

    /// True once the item has used up its retry budget.
    pub fn is_exhausted(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }

    /// True once the final attempt has failed too; only a reset revives it.
    pub fn is_terminal(&self, max_retries: u32) -> bool {
        self.retry_count > max_retries
    }

    /// True for items that have never failed.
    pub fn is_untouched(&self) -> bool {
        self.retry_count == 0 && self.last_error.is_none()
    }

    /// Apply a patch in place.
    pub fn apply(&mut self, patch: &ItemPatch) {
        if let Some(retry_count) = patch.retry_count {
            self.retry_count = retry_count;
        }
        if let Some(last_error) = &patch.last_error {
            self.last_error = last_error.clone();
        }
    }
}

/// Caller-tunable knobs for `enqueue`.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: Priority,
    pub dependencies: Vec<QueueItemId>,
    /// Dispatch inline when the network is reachable.
    pub immediate: bool,
    /// Schedule a queue pass shortly after enqueueing.
    pub background: bool,
    pub original_data: Option<Value>,
}

impl EnqueueOptions {
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, id: QueueItemId) -> Self {
        self.dependencies.push(id);
        self
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn background(mut self) -> Self {
        self.background = true;
        self
    }

    pub fn with_original_data(mut self, original: Value) -> Self {
        self.original_data = Some(original);
        self
    }
}

/// One entry of a bulk enqueue.
#[derive(Debug, Clone)]
pub struct QueueRequest {
    pub operation: OperationType,
    pub resource: ResourceKind,
    pub data: Value,
    pub options: EnqueueOptions,
}

impl QueueRequest {
    pub fn new(operation: OperationType, resource: ResourceKind, data: Value) -> Self {
        Self {
            operation,
            resource,
            data,
            options: EnqueueOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EnqueueOptions) -> Self {
        self.options = options;
        self
    }
}

/// Field updates the engine applies through the store's patch primitive.
///
/// `last_error: Some(None)` clears the error; `None` leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    pub retry_count: Option<u32>,
    pub last_error: Option<Option<String>>,
}

impl ItemPatch {
    pub fn failed_attempt(retry_count: u32, error: impl Into<String>) -> Self {
        Self {
            retry_count: Some(retry_count),
            last_error: Some(Some(error.into())),
        }
    }

    pub fn reset() -> Self {
        Self {
            retry_count: Some(0),
            last_error: Some(None),
        }
    }
}

/// Sort items into processing order: priority first (high → low), then
/// oldest first. The sort is stable, so equal keys keep snapshot order.
pub fn sort_for_processing(items: &mut [QueueItem]) {
    items.sort_by_key(|item| (item.priority.rank(), item.timestamp));
}

/// Per-priority item counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl PriorityCounts {
    fn record(&mut self, priority: Priority) {
        match priority {
            Priority::High => self.high += 1,
            Priority::Medium => self.medium += 1,
            Priority::Low => self.low += 1,
        }
    }
}

/// Per-resource item counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCounts {
    pub credential: usize,
    pub handshake: usize,
    pub profile: usize,
}

impl ResourceCounts {
    fn record(&mut self, resource: ResourceKind) {
        match resource {
            ResourceKind::Credential => self.credential += 1,
            ResourceKind::Handshake => self.handshake += 1,
            ResourceKind::Profile => self.profile += 1,
        }
    }
}

/// Read-only aggregation over a store snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    /// Items that have never failed.
    pub pending: usize,
    /// Items at or past the retry ceiling.
    pub failed: usize,
    pub processing: bool,
    pub by_priority: PriorityCounts,
    pub by_resource: ResourceCounts,
}

impl QueueStats {
    pub fn from_items(items: &[QueueItem], max_retries: u32, processing: bool) -> Self {
        let mut stats = QueueStats {
            total: items.len(),
            processing,
            ..Default::default()
        };

        for item in items {
            if item.retry_count == 0 {
                stats.pending += 1;
            }
            if item.is_exhausted(max_retries) {
                stats.failed += 1;
            }
            stats.by_priority.record(item.priority);
            stats.by_resource.record(item.resource);
        }

        stats
    }
}

/// How a `process_queue` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    /// Every item in the snapshot was visited.
    Completed,
    /// Another pass held the processing flag; nothing was done.
    AlreadyRunning,
    /// The network was unreachable at entry; nothing was done.
    Offline,
    /// The network dropped mid-pass; remaining items were left untouched.
    ConnectivityLost,
}

/// Outcome of a single `process_queue` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub status: PassStatus,
    pub succeeded: usize,
    pub failed: usize,
    /// Terminal items skipped because their final attempt already failed.
    pub deferred: usize,
}

impl PassReport {
    pub(crate) fn empty(status: PassStatus) -> Self {
        Self {
            status,
            succeeded: 0,
            failed: 0,
            deferred: 0,
        }
    }

    /// True if the pass did no work because of its preconditions.
    pub fn was_skipped(&self) -> bool {
        matches!(self.status, PassStatus::AlreadyRunning | PassStatus::Offline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn item_at(priority: Priority, offset_ms: i64) -> QueueItem {
        let mut item = QueueItem::new(
            OperationType::Create,
            ResourceKind::Credential,
            json!({}),
            &EnqueueOptions::default().with_priority(priority),
        );
        item.timestamp = DateTime::<Utc>::UNIX_EPOCH + Duration::milliseconds(offset_ms);
        item
    }

    #[test]
    fn new_items_start_clean() {
        let item = QueueItem::new(
            OperationType::Update,
            ResourceKind::Profile,
            json!({"name": "Ada"}),
            &EnqueueOptions::default(),
        );

        assert_eq!(item.retry_count, 0);
        assert!(item.last_error.is_none());
        assert_eq!(item.priority, Priority::Medium);
        assert_eq!(item.version, 1);
        assert!(item.dependencies.is_empty());
        assert!(item.is_untouched());
    }

    #[test]
    fn sort_puts_priority_before_age() {
        let mut items = vec![
            item_at(Priority::Low, 0),
            item_at(Priority::High, 10),
            item_at(Priority::Medium, 5),
            item_at(Priority::High, 20),
        ];
        let expected = vec![items[1].id, items[3].id, items[2].id, items[0].id];

        sort_for_processing(&mut items);

        let order: Vec<_> = items.iter().map(|i| i.id).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn patch_can_clear_last_error() {
        let mut item = item_at(Priority::Medium, 0);
        item.apply(&ItemPatch::failed_attempt(2, "boom"));
        assert_eq!(item.retry_count, 2);
        assert_eq!(item.last_error.as_deref(), Some("boom"));

        item.apply(&ItemPatch::reset());
        assert_eq!(item.retry_count, 0);
        assert!(item.last_error.is_none());
    }

    #[test]
    fn ceiling_is_exhausted_but_not_terminal() {
        let mut item = item_at(Priority::Medium, 0);
        item.retry_count = 3;
        assert!(item.is_exhausted(3));
        assert!(!item.is_terminal(3));

        item.retry_count = 4;
        assert!(item.is_terminal(3));
    }

    #[test]
    fn stats_break_down_snapshot() {
        let mut failed = item_at(Priority::High, 0);
        failed.retry_count = 3;
        failed.resource = ResourceKind::Handshake;
        let mut retrying = item_at(Priority::Low, 1);
        retrying.retry_count = 1;
        let fresh = item_at(Priority::Medium, 2);

        let stats = QueueStats::from_items(&[failed, retrying, fresh], 3, true);

        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.failed, 1);
        assert!(stats.processing);
        assert_eq!(stats.by_priority, PriorityCounts { high: 1, medium: 1, low: 1 });
        assert_eq!(
            stats.by_resource,
            ResourceCounts { credential: 2, handshake: 1, profile: 0 }
        );
    }

    #[test]
    fn item_serializes_type_field() {
        let item = item_at(Priority::High, 0);
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["type"], "create");
        assert_eq!(value["resource"], "credential");
        assert_eq!(value["priority"], "high");

        let back: QueueItem = serde_json::from_value(value).unwrap();
        assert_eq!(back, item);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn priority() -> impl Strategy<Value = Priority> {
            prop_oneof![Just(Priority::High), Just(Priority::Medium), Just(Priority::Low)]
        }

        proptest! {
            /// Property: after sorting, no item is preceded by one with a worse
            /// priority, or by an equal-priority item that is younger.
            #[test]
            fn sorted_order_is_priority_then_age(
                entries in prop::collection::vec((priority(), 0i64..50), 0..40)
            ) {
                let mut items: Vec<_> = entries
                    .iter()
                    .map(|(p, t)| item_at(*p, *t))
                    .collect();

                sort_for_processing(&mut items);

                for pair in items.windows(2) {
                    let (a, b) = (&pair[0], &pair[1]);
                    prop_assert!(a.priority.rank() <= b.priority.rank());
                    if a.priority == b.priority {
                        prop_assert!(a.timestamp <= b.timestamp);
                    }
                }
            }

            /// Property: sorting is deterministic for the same snapshot.
            #[test]
            fn sort_is_deterministic(
                entries in prop::collection::vec((priority(), 0i64..5), 0..20)
            ) {
                let items: Vec<_> = entries
                    .iter()
                    .map(|(p, t)| item_at(*p, *t))
                    .collect();

                let mut first = items.clone();
                let mut second = items;
                sort_for_processing(&mut first);
                sort_for_processing(&mut second);

                prop_assert_eq!(first, second);
            }
        }
    }
}
