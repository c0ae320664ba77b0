//! `idwallet-core`: domain primitives for the wallet's offline mutation queue.
//!
//! This crate contains **pure domain** primitives (no IO, no async): the queue
//! item identifier and the closed vocabularies a queued mutation is built from.

pub mod error;
pub mod id;
pub mod operation;

pub use error::{DomainError, DomainResult};
pub use id::QueueItemId;
pub use operation::{OperationType, Priority, ResourceKind};
