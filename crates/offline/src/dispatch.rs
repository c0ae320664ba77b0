//! Resource dispatch: turns a queue item into a call against the service
//! registered for its resource kind, then mirrors the result locally.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use idwallet_core::{OperationType, ResourceKind};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::{QueueError, ServiceError};
use crate::records::{LocalRecords, record_id};
use crate::types::QueueItem;

/// Remote backend for one resource kind.
///
/// Every operation defaults to [`ServiceError::Unsupported`]; implementors
/// override the ones their backend offers. Services never retry internally.
#[async_trait]
pub trait ResourceService: Send + Sync {
    async fn create(&self, _data: &Value) -> Result<Value, ServiceError> {
        Err(ServiceError::Unsupported(OperationType::Create))
    }

    /// `original` is the pre-mutation snapshot when the caller captured one.
    async fn update(&self, _data: &Value, _original: Option<&Value>) -> Result<Value, ServiceError> {
        Err(ServiceError::Unsupported(OperationType::Update))
    }

    async fn delete(&self, _data: &Value) -> Result<(), ServiceError> {
        Err(ServiceError::Unsupported(OperationType::Delete))
    }

    async fn share(&self, _data: &Value, _options: &Value) -> Result<Value, ServiceError> {
        Err(ServiceError::Unsupported(OperationType::Share))
    }

    async fn verify(&self, _data: &Value) -> Result<Value, ServiceError> {
        Err(ServiceError::Unsupported(OperationType::Verify))
    }
}

/// Maps each resource kind to its service, resolved once at construction.
#[derive(Clone)]
pub struct DispatcherRegistry {
    services: HashMap<ResourceKind, Arc<dyn ResourceService>>,
    records: Arc<dyn LocalRecords>,
}

impl fmt::Debug for DispatcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.services.keys().map(ResourceKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("DispatcherRegistry")
            .field("services", &kinds)
            .finish_non_exhaustive()
    }
}

impl DispatcherRegistry {
    pub fn new(records: Arc<dyn LocalRecords>) -> Self {
        Self {
            services: HashMap::new(),
            records,
        }
    }

    /// Register (or replace) the service for `kind`.
    pub fn register(mut self, kind: ResourceKind, service: Arc<dyn ResourceService>) -> Self {
        self.services.insert(kind, service);
        self
    }

    pub fn is_registered(&self, kind: ResourceKind) -> bool {
        self.services.contains_key(&kind)
    }

    /// Perform the item's effect. Any failure is returned for the caller's
    /// retry handling.
    pub async fn dispatch(&self, item: &QueueItem) -> Result<(), QueueError> {
        use OperationType as Op;
        use ResourceKind as Kind;

        let service = self
            .services
            .get(&item.resource)
            .ok_or(QueueError::NoDispatcher(item.resource))?;

        debug!(
            item_id = %item.id,
            resource = %item.resource,
            operation = %item.operation,
            "dispatching queue item"
        );

        match (item.resource, item.operation) {
            (Kind::Credential, Op::Create) => {
                let issued = service.create(&item.data).await?;
                self.persist(Kind::Credential, issued)
            }
            (Kind::Credential, Op::Update) => {
                let updated = service.update(&item.data, item.original_data.as_ref()).await?;
                self.persist(Kind::Credential, updated)
            }
            (Kind::Credential, Op::Delete) => {
                let target = record_id(&item.data).ok_or_else(|| {
                    QueueError::invalid_payload("credential delete requires data.id")
                })?;
                service.delete(&item.data).await?;
                self.records.delete(Kind::Credential, &target)?;
                Ok(())
            }
            (Kind::Credential, Op::Share) => {
                let options = item.data.get("options").cloned().unwrap_or_else(|| json!({}));
                service.share(&item.data, &options).await?;
                Ok(())
            }
            (Kind::Credential, Op::Verify) => {
                service.verify(&item.data).await?;
                Ok(())
            }
            (Kind::Handshake, Op::Create) => {
                let request = service.create(&item.data).await?;
                self.persist(Kind::Handshake, request)
            }
            (Kind::Handshake, Op::Update) => {
                warn!(item_id = %item.id, "handshake update is not supported yet; completing without a call");
                Ok(())
            }
            (Kind::Profile, Op::Update) => {
                let profile = service.update(&item.data, item.original_data.as_ref()).await?;
                self.persist(Kind::Profile, profile)
            }
            (resource, operation) => Err(QueueError::UnknownOperation { resource, operation }),
        }
    }

    fn persist(&self, resource: ResourceKind, record: Value) -> Result<(), QueueError> {
        let id = record_id(&record).ok_or_else(|| {
            QueueError::invalid_payload(format!("{resource} service returned a record without an id"))
        })?;
        self.records.save(resource, &id, record)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::InMemoryLocalRecords;
    use crate::types::EnqueueOptions;

    struct EchoService;

    #[async_trait]
    impl ResourceService for EchoService {
        async fn create(&self, data: &Value) -> Result<Value, ServiceError> {
            Ok(data.clone())
        }

        async fn update(&self, data: &Value, _original: Option<&Value>) -> Result<Value, ServiceError> {
            Ok(data.clone())
        }

        async fn delete(&self, _data: &Value) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn share(&self, _data: &Value, options: &Value) -> Result<Value, ServiceError> {
            if options == &json!({}) {
                Ok(json!({"shared": true}))
            } else {
                Err(ServiceError::Rejected("unexpected options".into()))
            }
        }
    }

    fn item(operation: OperationType, resource: ResourceKind, data: Value) -> QueueItem {
        QueueItem::new(operation, resource, data, &EnqueueOptions::default())
    }

    fn registry(records: &Arc<InMemoryLocalRecords>) -> DispatcherRegistry {
        let records: Arc<dyn LocalRecords> = records.clone();
        DispatcherRegistry::new(records)
            .register(ResourceKind::Credential, Arc::new(EchoService))
            .register(ResourceKind::Handshake, Arc::new(EchoService))
    }

    #[tokio::test]
    async fn credential_create_then_delete_round_trips_local_record() {
        let records = Arc::new(InMemoryLocalRecords::new());
        let registry = registry(&records);

        registry
            .dispatch(&item(OperationType::Create, ResourceKind::Credential, json!({"id": "c1"})))
            .await
            .unwrap();
        assert_eq!(records.count(ResourceKind::Credential), 1);

        registry
            .dispatch(&item(OperationType::Delete, ResourceKind::Credential, json!({"id": "c1"})))
            .await
            .unwrap();
        assert_eq!(records.count(ResourceKind::Credential), 0);
    }

    #[tokio::test]
    async fn share_defaults_options_to_empty_object() {
        let records = Arc::new(InMemoryLocalRecords::new());
        registry(&records)
            .dispatch(&item(OperationType::Share, ResourceKind::Credential, json!({"id": "c1"})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unsupported_service_operation_surfaces_as_service_error() {
        let records = Arc::new(InMemoryLocalRecords::new());
        let err = registry(&records)
            .dispatch(&item(OperationType::Verify, ResourceKind::Credential, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueueError::Service(ServiceError::Unsupported(OperationType::Verify))
        ));
    }

    #[tokio::test]
    async fn handshake_update_completes_without_effect() {
        let records = Arc::new(InMemoryLocalRecords::new());
        registry(&records)
            .dispatch(&item(OperationType::Update, ResourceKind::Handshake, json!({"id": "h1"})))
            .await
            .unwrap();
        assert_eq!(records.count(ResourceKind::Handshake), 0);
    }

    #[tokio::test]
    async fn unmapped_pairs_are_unknown_operations() {
        let records = Arc::new(InMemoryLocalRecords::new());
        let err = registry(&records)
            .dispatch(&item(OperationType::Verify, ResourceKind::Handshake, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueueError::UnknownOperation {
                resource: ResourceKind::Handshake,
                operation: OperationType::Verify
            }
        ));
    }

    #[tokio::test]
    async fn missing_service_is_reported() {
        let records = Arc::new(InMemoryLocalRecords::new());
        let err = registry(&records)
            .dispatch(&item(OperationType::Update, ResourceKind::Profile, json!({"id": "p"})))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::NoDispatcher(ResourceKind::Profile)));
    }

    #[tokio::test]
    async fn delete_without_target_id_is_invalid() {
        let records = Arc::new(InMemoryLocalRecords::new());
        let err = registry(&records)
            .dispatch(&item(OperationType::Delete, ResourceKind::Credential, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidPayload(_)));
    }
}
