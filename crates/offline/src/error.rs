//! Error taxonomy for the offline queue.

use idwallet_core::{OperationType, QueueItemId, ResourceKind};
use thiserror::Error;

/// Result type alias using QueueError.
pub type QueueResult<T> = Result<T, QueueError>;

/// Item store failure.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("queue item already exists: {0}")]
    AlreadyExists(QueueItemId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Backup cache failure.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache storage error: {0}")]
    Storage(String),
    #[error("cache value is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure reported by a remote resource service.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("operation not supported by this service: {0}")]
    Unsupported(OperationType),
    #[error("network error: {0}")]
    Network(String),
    #[error("remote service rejected the request: {0}")]
    Rejected(String),
}

/// Everything that can go wrong while processing a queue item.
///
/// Every per-item variant is retryable; the engine decides when the retry
/// budget is spent.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A dependency is still waiting in the live store.
    #[error("unmet dependencies for {id}: {pending:?}")]
    UnmetDependency {
        id: QueueItemId,
        pending: Vec<QueueItemId>,
    },

    /// No dispatcher branch exists for this (resource, type) pair.
    #[error("unknown operation: {operation} on {resource}")]
    UnknownOperation {
        resource: ResourceKind,
        operation: OperationType,
    },

    /// No service was registered for the resource kind.
    #[error("no dispatcher registered for {0}")]
    NoDispatcher(ResourceKind),

    #[error("service call failed: {0}")]
    Service(#[from] ServiceError),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }
}
