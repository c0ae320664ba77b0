//! Stand-in backends that answer like the wallet's simulated APIs.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use idwallet_core::ResourceKind;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::dispatch::ResourceService;
use crate::error::ServiceError;

/// Echoes payloads back with server-assigned fields after a fixed latency.
#[derive(Debug, Clone)]
pub struct SimulatedResourceService {
    kind: ResourceKind,
    latency: Duration,
}

impl SimulatedResourceService {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            latency: Duration::from_millis(50),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    async fn round_trip(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

fn object(data: &Value) -> Result<serde_json::Map<String, Value>, ServiceError> {
    match data {
        Value::Object(map) => Ok(map.clone()),
        other => Err(ServiceError::Rejected(format!("expected a JSON object, got {other}"))),
    }
}

#[async_trait]
impl ResourceService for SimulatedResourceService {
    async fn create(&self, data: &Value) -> Result<Value, ServiceError> {
        self.round_trip().await;
        let mut record = object(data)?;
        record
            .entry("id")
            .or_insert_with(|| Value::String(format!("{}-{}", self.kind, Uuid::now_v7())));
        record.insert("createdAt".into(), json!(Utc::now()));
        if self.kind == ResourceKind::Handshake {
            record.entry("status").or_insert_with(|| json!("pending"));
        }
        Ok(Value::Object(record))
    }

    async fn update(&self, data: &Value, _original: Option<&Value>) -> Result<Value, ServiceError> {
        self.round_trip().await;
        let mut record = object(data)?;
        if !record.contains_key("id") {
            return Err(ServiceError::Rejected(format!("{} update requires an id", self.kind)));
        }
        record.insert("updatedAt".into(), json!(Utc::now()));
        Ok(Value::Object(record))
    }

    async fn delete(&self, _data: &Value) -> Result<(), ServiceError> {
        self.round_trip().await;
        Ok(())
    }

    async fn share(&self, data: &Value, options: &Value) -> Result<Value, ServiceError> {
        self.round_trip().await;
        Ok(json!({
            "credentialId": data.get("id").cloned().unwrap_or(Value::Null),
            "shareId": Uuid::now_v7().to_string(),
            "options": options,
        }))
    }

    async fn verify(&self, data: &Value) -> Result<Value, ServiceError> {
        self.round_trip().await;
        Ok(json!({
            "credentialId": data.get("id").cloned().unwrap_or(Value::Null),
            "verified": true,
            "checkedAt": Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant(kind: ResourceKind) -> SimulatedResourceService {
        SimulatedResourceService::new(kind).with_latency(Duration::ZERO)
    }

    #[tokio::test]
    async fn create_assigns_an_id_when_missing() {
        let created = instant(ResourceKind::Credential)
            .create(&json!({"type": "EmailCredential"}))
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap();
        assert!(id.starts_with("credential-"));
        assert_eq!(created["type"], "EmailCredential");
    }

    #[tokio::test]
    async fn handshake_create_starts_pending() {
        let created = instant(ResourceKind::Handshake)
            .create(&json!({"id": "h1"}))
            .await
            .unwrap();
        assert_eq!(created["id"], "h1");
        assert_eq!(created["status"], "pending");
    }

    #[tokio::test]
    async fn update_requires_id_and_object_payload() {
        let service = instant(ResourceKind::Profile);
        assert!(service.update(&json!({"name": "x"}), None).await.is_err());
        assert!(service.update(&json!([1, 2]), None).await.is_err());
        assert!(service.update(&json!({"id": "p"}), None).await.is_ok());
    }
}
