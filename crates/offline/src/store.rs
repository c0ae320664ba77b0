//! Durable item store contract and the in-memory implementation.

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use idwallet_core::QueueItemId;

use crate::error::StoreError;
use crate::types::{ItemPatch, QueueItem};

/// Ordered collection of queue items plus the connectivity flag.
///
/// Only the queue engine patches or removes items; other callers append.
pub trait ItemStore: Send + Sync {
    /// Append an item at the end of the collection.
    fn append(&self, item: QueueItem) -> Result<(), StoreError>;

    /// Remove an item. Returns `false` if it was not present.
    fn remove(&self, id: &QueueItemId) -> Result<bool, StoreError>;

    /// Patch an item in place, returning the updated item if it exists.
    fn patch(&self, id: &QueueItemId, patch: &ItemPatch) -> Result<Option<QueueItem>, StoreError>;

    /// Point-in-time copy of every item, in insertion order.
    fn snapshot(&self) -> Result<Vec<QueueItem>, StoreError>;

    /// Current state of a single item.
    fn get(&self, id: &QueueItemId) -> Result<Option<QueueItem>, StoreError> {
        Ok(self.snapshot()?.into_iter().find(|item| &item.id == id))
    }

    fn is_online(&self) -> bool;

    fn set_online(&self, online: bool);
}

/// In-memory item store for tests/dev and hosts that persist elsewhere.
#[derive(Debug)]
pub struct InMemoryItemStore {
    items: RwLock<Vec<QueueItem>>,
    online: AtomicBool,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            online: AtomicBool::new(true),
        }
    }

    /// Start with the network marked unreachable.
    pub fn offline() -> Self {
        let store = Self::new();
        store.set_online(false);
        store
    }
}

impl Default for InMemoryItemStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> StoreError {
    StoreError::Storage("item store lock poisoned".to_string())
}

impl ItemStore for InMemoryItemStore {
    fn append(&self, item: QueueItem) -> Result<(), StoreError> {
        let mut items = self.items.write().map_err(|_| poisoned())?;
        if items.iter().any(|existing| existing.id == item.id) {
            return Err(StoreError::AlreadyExists(item.id));
        }
        items.push(item);
        Ok(())
    }

    fn remove(&self, id: &QueueItemId) -> Result<bool, StoreError> {
        let mut items = self.items.write().map_err(|_| poisoned())?;
        let before = items.len();
        items.retain(|item| &item.id != id);
        Ok(items.len() != before)
    }

    fn patch(&self, id: &QueueItemId, patch: &ItemPatch) -> Result<Option<QueueItem>, StoreError> {
        let mut items = self.items.write().map_err(|_| poisoned())?;
        Ok(items.iter_mut().find(|item| &item.id == id).map(|item| {
            item.apply(patch);
            item.clone()
        }))
    }

    fn snapshot(&self) -> Result<Vec<QueueItem>, StoreError> {
        let items = self.items.read().map_err(|_| poisoned())?;
        Ok(items.clone())
    }

    fn get(&self, id: &QueueItemId) -> Result<Option<QueueItem>, StoreError> {
        let items = self.items.read().map_err(|_| poisoned())?;
        Ok(items.iter().find(|item| &item.id == id).cloned())
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }
}
