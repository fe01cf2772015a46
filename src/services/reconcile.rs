use crate::config::BrokerConfig;
use crate::entities::stored_objects;
use crate::services::storage::StorageService;
use crate::services::token::{self, UploadContext};
use crate::utils::validation::normalize_content_type;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Notification from the storage provider that an object was fully written.
///
/// Everything in here except the signature is caller-influenced; the HMAC
/// over the raw body is the sole authenticity guarantee.
#[derive(Debug, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub locator: String,
    pub content_type: Option<String>,
    pub size: Option<i64>,
    /// The scoped token echoed back for explicit token binding
    pub token: Option<String>,
    pub context: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Provider signature did not verify; the event is forged or corrupt
    #[error("Completion event signature verification failed")]
    AuthenticityFailure,

    /// Event body or embedded context does not match the issuer's structure
    #[error("Completion event malformed: {0}")]
    MalformedContext(String),

    /// The idempotent reference write failed; safe for the provider to retry
    #[error("Failed to persist object reference: {0}")]
    DownstreamPersistenceFailure(String),
}

/// Outcome of a successful reconciliation. `duplicate` marks an at-least-once
/// redelivery that matched an existing reference.
#[derive(Debug)]
pub struct ReconcileOutcome {
    pub reference: stored_objects::Model,
    pub duplicate: bool,
}

pub struct CompletionReconciler {
    db: DatabaseConnection,
    storage: Arc<dyn StorageService>,
    config: BrokerConfig,
}

impl CompletionReconciler {
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

    /// Verifies a completion event and records its object reference exactly
    /// once.
    ///
    /// The provider delivers at-least-once; the unique locator constraint
    /// makes the write safe to repeat, so no locking is needed across
    /// concurrent deliveries.
    pub async fn reconcile(
        &self,
        raw_body: &[u8],
        signature: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.verify_signature(raw_body, signature)?;

        let event: CompletionEvent = serde_json::from_slice(raw_body)
            .map_err(|e| ReconcileError::MalformedContext(e.to_string()))?;

        let context: UploadContext = serde_json::from_value(event.context.clone())
            .map_err(|e| ReconcileError::MalformedContext(e.to_string()))?;

        // Explicit token binding: when the event carries the scoped token
        // back, the confirmed object must fall inside the exact pathname and
        // content-type scope the token was minted for.
        if let Some(scoped) = &event.token {
            let claims = token::verify(scoped, &self.config.token_secret).map_err(|e| {
                tracing::warn!("Completion event carried an unusable token: {}", e);
                ReconcileError::AuthenticityFailure
            })?;
            if claims.sub != event.locator {
                tracing::warn!(
                    "Completion event locator '{}' does not match token scope '{}'",
                    event.locator,
                    claims.sub
                );
                return Err(ReconcileError::AuthenticityFailure);
            }
            if let Some(ct) = &event.content_type {
                let normalized = normalize_content_type(ct);
                if !claims.cts.contains(&normalized) {
                    tracing::warn!(
                        "Completion event content type '{}' is outside token scope {:?}",
                        ct,
                        claims.cts
                    );
                    return Err(ReconcileError::AuthenticityFailure);
                }
            }
        }

        let url = self
            .storage
            .object_url(&event.locator)
            .await
            .map_err(|e| ReconcileError::DownstreamPersistenceFailure(e.to_string()))?;

        persist_reference(
            &self.db,
            &event.locator,
            &url,
            event.content_type.as_deref(),
            event.size,
            serde_json::to_value(&context).unwrap_or_default(),
            &context.uploaded_by,
        )
        .await
    }

    fn verify_signature(&self, raw_body: &[u8], signature: &str) -> Result<(), ReconcileError> {
        let expected = hex::decode(signature).map_err(|_| {
            tracing::warn!("Completion event signature is not valid hex");
            ReconcileError::AuthenticityFailure
        })?;

        let mut mac = HmacSha256::new_from_slice(self.config.provider_secret.as_bytes())
            .map_err(|_| ReconcileError::AuthenticityFailure)?;
        mac.update(raw_body);

        // Constant-time comparison
        mac.verify_slice(&expected).map_err(|_| {
            tracing::warn!("Completion event failed signature verification");
            ReconcileError::AuthenticityFailure
        })
    }
}

/// Idempotent insert of a stored object reference keyed on the locator.
///
/// A uniqueness conflict means the reference already exists; the existing row
/// is returned so a redelivered completion gets a success-equivalent
/// response. Shared with the proxy path, which records its reference inline.
pub async fn persist_reference(
    db: &DatabaseConnection,
    locator: &str,
    url: &str,
    content_type: Option<&str>,
    size: Option<i64>,
    context: serde_json::Value,
    uploaded_by: &str,
) -> Result<ReconcileOutcome, ReconcileError> {
    let model = stored_objects::ActiveModel {
        id: Set(Uuid::new_v4().to_string()),
        locator: Set(locator.to_string()),
        url: Set(url.to_string()),
        content_type: Set(content_type.map(|s| s.to_string())),
        size: Set(size),
        context: Set(context),
        uploaded_by: Set(uploaded_by.to_string()),
        created_at: Set(Utc::now()),
    };

    let inserted = stored_objects::Entity::insert(model)
        .on_conflict(
            OnConflict::column(stored_objects::Column::Locator)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await
        .map_err(|e| ReconcileError::DownstreamPersistenceFailure(e.to_string()))?;

    let reference = stored_objects::Entity::find()
        .filter(stored_objects::Column::Locator.eq(locator))
        .one(db)
        .await
        .map_err(|e| ReconcileError::DownstreamPersistenceFailure(e.to_string()))?
        .ok_or_else(|| {
            ReconcileError::DownstreamPersistenceFailure(
                "Reference row missing after idempotent insert".to_string(),
            )
        })?;

    let duplicate = inserted == 0;
    if duplicate {
        tracing::info!("Duplicate completion for locator '{}', reusing reference", locator);
    }

    Ok(ReconcileOutcome {
        reference,
        duplicate,
    })
}

/// Signs a completion body the way the storage provider does. Used by tests
/// and by the local development harness.
pub fn sign_completion(body: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::policy::AcceptedUpload;
    use anyhow::Result;
    use async_trait::async_trait;
    use sea_orm::{ConnectionTrait, Database, Schema};
    use std::time::Duration;

    struct NullStorage;

    #[async_trait]
    impl StorageService for NullStorage {
        async fn put_object(&self, _key: &str, _ct: &str, _data: Vec<u8>) -> Result<()> {
            Ok(())
        }
        async fn delete_object(&self, _key: &str) -> Result<()> {
            Ok(())
        }
        async fn object_exists(&self, _key: &str) -> Result<bool> {
            Ok(true)
        }
        async fn object_url(&self, key: &str) -> Result<String> {
            Ok(format!("https://cdn.test/{}", key))
        }
        async fn presigned_put_url(
            &self,
            key: &str,
            _content_type: &str,
            _expires_in: Duration,
        ) -> Result<String> {
            Ok(format!("https://storage.test/{}?signed", key))
        }
    }

    async fn setup_db() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let builder = db.get_database_backend();
        let schema = Schema::new(builder);
        let stmt = schema
            .create_table_from_entity(stored_objects::Entity)
            .if_not_exists()
            .to_owned();
        db.execute(builder.build(&stmt)).await.unwrap();
        db
    }

    fn reconciler(db: DatabaseConnection) -> CompletionReconciler {
        CompletionReconciler::new(db, Arc::new(NullStorage), BrokerConfig::default())
    }

    fn event_body(locator: &str, token: Option<String>) -> Vec<u8> {
        serde_json::to_vec(&CompletionEvent {
            locator: locator.to_string(),
            content_type: Some("image/png".to_string()),
            size: Some(2048),
            token,
            context: serde_json::json!({"uploaded_by": "user_123", "metadata": {}}),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_reconcile_creates_reference() {
        let reconciler = reconciler(setup_db().await);
        let body = event_body("shops/abc/logo.png", None);
        let sig = sign_completion(&body, "secret");

        let outcome = reconciler.reconcile(&body, &sig).await.unwrap();
        assert!(!outcome.duplicate);
        assert_eq!(outcome.reference.locator, "shops/abc/logo.png");
        assert_eq!(outcome.reference.url, "https://cdn.test/shops/abc/logo.png");
        assert_eq!(outcome.reference.uploaded_by, "user_123");
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_idempotent() {
        let db = setup_db().await;
        let reconciler = reconciler(db.clone());
        let body = event_body("shops/abc/logo.png", None);
        let sig = sign_completion(&body, "secret");

        let first = reconciler.reconcile(&body, &sig).await.unwrap();
        let second = reconciler.reconcile(&body, &sig).await.unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.reference.id, second.reference.id);

        let count = stored_objects::Entity::find().all(&db).await.unwrap().len();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_tampered_signature_rejected() {
        let reconciler = reconciler(setup_db().await);
        let body = event_body("shops/abc/logo.png", None);
        let sig = sign_completion(&body, "secret");

        // Flip one nibble in every position; all must fail verification
        for i in 0..sig.len() {
            let mut tampered: Vec<char> = sig.chars().collect();
            tampered[i] = if tampered[i] == '0' { '1' } else { '0' };
            let tampered: String = tampered.into_iter().collect();

            let err = reconciler.reconcile(&body, &tampered).await.unwrap_err();
            assert!(matches!(err, ReconcileError::AuthenticityFailure));
        }
    }

    #[tokio::test]
    async fn test_wrong_provider_secret_rejected() {
        let reconciler = reconciler(setup_db().await);
        let body = event_body("shops/abc/logo.png", None);
        let sig = sign_completion(&body, "not_the_provider_secret");

        let err = reconciler.reconcile(&body, &sig).await.unwrap_err();
        assert!(matches!(err, ReconcileError::AuthenticityFailure));
    }

    #[tokio::test]
    async fn test_malformed_context_rejected() {
        let reconciler = reconciler(setup_db().await);
        let body = serde_json::to_vec(&serde_json::json!({
            "locator": "shops/abc/logo.png",
            "context": {"unexpected": true}
        }))
        .unwrap();
        let sig = sign_completion(&body, "secret");

        let err = reconciler.reconcile(&body, &sig).await.unwrap_err();
        assert!(matches!(err, ReconcileError::MalformedContext(_)));
    }

    #[tokio::test]
    async fn test_token_binding_enforced() {
        let config = BrokerConfig::default();
        let reconciler = reconciler(setup_db().await);

        let context = UploadContext {
            uploaded_by: "user_123".to_string(),
            metadata: serde_json::Value::Null,
        };
        let grant = token::issue(
            &AcceptedUpload {
                pathname: "shops/abc/logo.png".to_string(),
                content_type: "image/png".to_string(),
                size: None,
            },
            context,
            &config,
        )
        .unwrap();

        // Token scoped to logo.png confirming a different locator
        let body = event_body("shops/abc/other.png", Some(grant.token.clone()));
        let sig = sign_completion(&body, "secret");
        let err = reconciler.reconcile(&body, &sig).await.unwrap_err();
        assert!(matches!(err, ReconcileError::AuthenticityFailure));

        // Matching locator is accepted
        let body = event_body("shops/abc/logo.png", Some(grant.token));
        let sig = sign_completion(&body, "secret");
        let outcome = reconciler.reconcile(&body, &sig).await.unwrap();
        assert_eq!(outcome.reference.locator, "shops/abc/logo.png");
    }

    #[tokio::test]
    async fn test_token_binding_covers_content_type() {
        let config = BrokerConfig::default();
        let reconciler = reconciler(setup_db().await);

        let grant = token::issue(
            &AcceptedUpload {
                pathname: "shops/abc/logo.png".to_string(),
                content_type: "image/jpeg".to_string(),
                size: None,
            },
            UploadContext {
                uploaded_by: "user_123".to_string(),
                metadata: serde_json::Value::Null,
            },
            &config,
        )
        .unwrap();

        // Event claims image/png against a token scoped to image/jpeg
        let body = event_body("shops/abc/logo.png", Some(grant.token));
        let sig = sign_completion(&body, "secret");
        let err = reconciler.reconcile(&body, &sig).await.unwrap_err();
        assert!(matches!(err, ReconcileError::AuthenticityFailure));
    }
}
