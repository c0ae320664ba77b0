//! Local persistence of dispatched results.

use std::collections::HashMap;
use std::sync::RwLock;

use idwallet_core::ResourceKind;
use serde_json::Value;

use crate::error::StoreError;

/// Wallet-side record store written after a successful remote call.
pub trait LocalRecords: Send + Sync {
    /// Insert or replace the record `id` of `resource`.
    fn save(&self, resource: ResourceKind, id: &str, record: Value) -> Result<(), StoreError>;

    /// Delete the record; returns whether it existed.
    fn delete(&self, resource: ResourceKind, id: &str) -> Result<bool, StoreError>;

    fn get(&self, resource: ResourceKind, id: &str) -> Result<Option<Value>, StoreError>;
}

/// Extract a record key from its `id` field (string or number).
pub fn record_id(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// In-memory record store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryLocalRecords {
    records: RwLock<HashMap<(ResourceKind, String), Value>>,
}

impl InMemoryLocalRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, resource: ResourceKind) -> usize {
        self.records
            .read()
            .map(|records| records.keys().filter(|(kind, _)| *kind == resource).count())
            .unwrap_or(0)
    }
}

fn poisoned() -> StoreError {
    StoreError::Storage("local records lock poisoned".to_string())
}

impl LocalRecords for InMemoryLocalRecords {
    fn save(&self, resource: ResourceKind, id: &str, record: Value) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert((resource, id.to_string()), record);
        Ok(())
    }

    fn delete(&self, resource: ResourceKind, id: &str) -> Result<bool, StoreError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        Ok(records.remove(&(resource, id.to_string())).is_some())
    }

    fn get(&self, resource: ResourceKind, id: &str) -> Result<Option<Value>, StoreError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(&(resource, id.to_string())).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_id_accepts_strings_and_numbers() {
        assert_eq!(record_id(&json!({"id": "cred-1"})), Some("cred-1".to_string()));
        assert_eq!(record_id(&json!({"id": 42})), Some("42".to_string()));
        assert_eq!(record_id(&json!({"id": ""})), None);
        assert_eq!(record_id(&json!({"name": "x"})), None);
        assert_eq!(record_id(&json!("plain")), None);
    }

    #[test]
    fn records_are_namespaced_by_resource() {
        let records = InMemoryLocalRecords::new();
        records.save(ResourceKind::Credential, "1", json!({"id": "1"})).unwrap();
        records.save(ResourceKind::Profile, "1", json!({"id": "1", "name": "me"})).unwrap();

        assert_eq!(records.count(ResourceKind::Credential), 1);
        assert_eq!(
            records.get(ResourceKind::Profile, "1").unwrap(),
            Some(json!({"id": "1", "name": "me"}))
        );

        assert!(records.delete(ResourceKind::Credential, "1").unwrap());
        assert!(!records.delete(ResourceKind::Credential, "1").unwrap());
        assert_eq!(records.count(ResourceKind::Profile), 1);
    }
}
