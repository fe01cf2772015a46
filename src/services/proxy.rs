use crate::config::BrokerConfig;
use crate::entities::stored_objects;
use crate::services::policy::{self, PolicyRejection, UploadRequest};
use crate::services::reconcile::persist_reference;
use crate::services::storage::StorageService;
use crate::services::token::UploadContext;
use crate::utils::validation::{is_executable_content, sniff_content_type};
use anyhow::{Result, anyhow};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// Proxy upload: the process receives the bytes and re-uploads them with the
/// static storage credential.
///
/// Deliberately separate from the brokered path. The static credential has no
/// per-request scope, so this service never touches scoped-token code; it
/// runs the byte payload through the same policy checks instead, with the
/// content type taken from the received bytes rather than the caller's claim.
pub struct ProxyUploadService {
    db: DatabaseConnection,
    storage: Arc<dyn StorageService>,
    config: BrokerConfig,
}

impl ProxyUploadService {
    pub fn new(
        db: DatabaseConnection,
        storage: Arc<dyn StorageService>,
        config: BrokerConfig,
    ) -> Self {
        Self {
            db,
            storage,
            config,
        }
    }

    pub async fn upload(
        &self,
        uploaded_by: &str,
        pathname: &str,
        declared_content_type: Option<&str>,
        data: Vec<u8>,
    ) -> Result<stored_objects::Model> {
        if data.is_empty() {
            return Err(anyhow!(PolicyRejection {
                code: "EMPTY_PAYLOAD",
                message: "Uploaded payload is empty".to_string(),
            }));
        }

        if is_executable_content(&data) {
            return Err(anyhow!(PolicyRejection {
                code: "EXECUTABLE_CONTENT",
                message: "Payload contains executable content which is not allowed".to_string(),
            }));
        }

        // Trust the bytes over the caller's declaration
        let content_type =
            sniff_content_type(&data).or_else(|| declared_content_type.map(|s| s.to_string()));

        let accepted = policy::validate(
            &UploadRequest {
                pathname: pathname.to_string(),
                content_type,
                size: Some(data.len() as i64),
            },
            &self.config,
        )
        .map_err(|rejection| anyhow!(rejection))?;

        self.storage
            .put_object(&accepted.pathname, &accepted.content_type, data)
            .await?;

        let url = self.storage.object_url(&accepted.pathname).await?;
        let context = UploadContext {
            uploaded_by: uploaded_by.to_string(),
            metadata: serde_json::Value::Null,
        };

        // No completion callback follows a proxy upload; record the reference
        // here with the same idempotent write the reconciler uses.
        let outcome = persist_reference(
            &self.db,
            &accepted.pathname,
            &url,
            Some(&accepted.content_type),
            accepted.size,
            serde_json::to_value(&context).unwrap_or_default(),
            uploaded_by,
        )
        .await
        .map_err(|e| anyhow!(e.to_string()))?;

        Ok(outcome.reference)
    }
}
