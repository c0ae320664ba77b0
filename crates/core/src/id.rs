//! Strongly-typed queue item identifier.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a queued mutation.
///
/// UUIDv7: the high bits carry the creation time in milliseconds and the rest
/// is random, so ids sort roughly by creation and are never reused.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueItemId(Uuid);

impl QueueItemId {
    /// Create a new identifier.
    ///
    /// Prefer passing IDs explicitly in tests for determinism.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Key under which the backup cache mirrors this item (`queue_<id>`).
    pub fn cache_key(&self) -> String {
        format!("queue_{}", self.0)
    }
}

impl Default for QueueItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for QueueItemId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<QueueItemId> for Uuid {
    fn from(value: QueueItemId) -> Self {
        value.0
    }
}

impl FromStr for QueueItemId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s)
            .map_err(|e| DomainError::invalid_id(format!("QueueItemId: {}", e)))?;
        Ok(Self(uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_time_ordered_v7() {
        let id = QueueItemId::new();
        assert_eq!(id.as_uuid().get_version_num(), 7);
    }

    #[test]
    fn rapid_generation_never_collides() {
        let ids: HashSet<_> = (0..1_000).map(|_| QueueItemId::new()).collect();
        assert_eq!(ids.len(), 1_000);
    }

    #[test]
    fn cache_key_is_namespaced() {
        let id: QueueItemId = "01890a5d-ac96-774b-bcce-b302099a8057".parse().unwrap();
        assert_eq!(id.cache_key(), "queue_01890a5d-ac96-774b-bcce-b302099a8057");
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "not-an-id".parse::<QueueItemId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(_)));
    }

    #[test]
    fn display_round_trips_through_from_str() {
        let id = QueueItemId::new();
        let parsed: QueueItemId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
