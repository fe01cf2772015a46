use crate::api::error::AppError;
use crate::services::reconcile::ReconcileError;
use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use serde::Serialize;
use utoipa::ToSchema;

/// Header the storage provider signs completion callbacks with
pub const SIGNATURE_HEADER: &str = "x-storage-signature";

#[derive(Serialize, ToSchema)]
pub struct CallbackResponse {
    pub id: String,
    pub locator: String,
    pub url: String,
    /// True when this delivery matched an already-recorded reference
    pub duplicate: bool,
}

#[utoipa::path(
    post,
    path = "/uploads/callback",
    request_body(content = Vec<u8>, description = "Signed completion event", content_type = "application/json"),
    responses(
        (status = 200, description = "Completion acknowledged, or forged/malformed event discarded", body = CallbackResponse),
        (status = 503, description = "Persistence failed, provider should redeliver")
    ),
    tag = "uploads"
)]
pub async fn completion_callback(
    State(state): State<crate::AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CallbackResponse>, AppError> {
    // An unsigned event is as unverifiable as a badly-signed one
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Completion event arrived without a signature header");
            AppError::Reconcile(ReconcileError::AuthenticityFailure)
        })?;

    // Any 2xx acknowledges and stops provider retries, including the
    // discard of forged or malformed events; only persistence failures
    // surface as 503 so the event is redelivered against the idempotent write
    let outcome = state.reconciler.reconcile(&body, signature).await?;

    Ok(Json(CallbackResponse {
        id: outcome.reference.id,
        locator: outcome.reference.locator,
        url: outcome.reference.url,
        duplicate: outcome.duplicate,
    }))
}
