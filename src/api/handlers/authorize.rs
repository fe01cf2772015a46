use crate::api::error::AppError;
use crate::services::policy::{self, UploadRequest};
use crate::services::token::{self, UploadContext};
use crate::utils::auth::Claims;
use axum::{Extension, Json, extract::State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct AuthorizeRequest {
    pub pathname: String,
    pub content_type: Option<String>,
    pub size: Option<i64>,
    /// Opaque caller metadata echoed back by the completion callback
    pub metadata: Option<serde_json::Value>,
}

#[derive(Serialize, ToSchema)]
pub struct AuthorizeResponse {
    pub token: String,
    pub pathname: String,
    pub expires_at: DateTime<Utc>,
    /// Presigned direct-write URL for the storage provider
    pub upload_url: String,
}

#[utoipa::path(
    post,
    path = "/uploads/authorize",
    request_body = AuthorizeRequest,
    responses(
        (status = 200, description = "Upload authorized", body = AuthorizeResponse),
        (status = 400, description = "Request rejected by upload policy"),
        (status = 401, description = "Unauthorized"),
        (status = 413, description = "Declared size exceeds policy maximum")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "uploads"
)]
pub async fn authorize_upload(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AuthorizeRequest>,
) -> Result<Json<AuthorizeResponse>, AppError> {
    let accepted = policy::validate(
        &UploadRequest {
            pathname: req.pathname,
            content_type: req.content_type,
            size: req.size,
        },
        &state.config,
    )
    .map_err(AppError::Policy)?;

    let context = UploadContext {
        uploaded_by: claims.sub,
        metadata: req.metadata.unwrap_or(serde_json::Value::Null),
    };

    let grant = token::issue(&accepted, context, &state.config)?;

    let upload_url = state
        .storage
        .presigned_put_url(
            &accepted.pathname,
            &accepted.content_type,
            Duration::from_secs(state.config.token_ttl_secs.max(0) as u64),
        )
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    tracing::info!(
        "Authorized upload to '{}' ({}) expiring at {}",
        grant.pathname,
        accepted.content_type,
        grant.expires_at
    );

    Ok(Json(AuthorizeResponse {
        token: grant.token,
        pathname: grant.pathname,
        expires_at: grant.expires_at,
        upload_url,
    }))
}
