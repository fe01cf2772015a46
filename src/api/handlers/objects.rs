use crate::api::error::AppError;
use crate::entities::{prelude::*, stored_objects};
use crate::utils::auth::Claims;
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use sea_orm::{ColumnTrait, EntityTrait, ModelTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct DeleteObjectRequest {
    pub locator: String,
}

#[derive(Serialize, ToSchema)]
pub struct ObjectReferenceResponse {
    pub id: String,
    pub locator: String,
    pub url: String,
    pub content_type: Option<String>,
    pub size: Option<i64>,
    pub uploaded_by: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<stored_objects::Model> for ObjectReferenceResponse {
    fn from(model: stored_objects::Model) -> Self {
        Self {
            id: model.id,
            locator: model.locator,
            url: model.url,
            content_type: model.content_type,
            size: model.size,
            uploaded_by: model.uploaded_by,
            created_at: model.created_at,
        }
    }
}

#[utoipa::path(
    get,
    path = "/objects/{id}",
    params(
        ("id" = String, Path, description = "Stored object reference ID")
    ),
    responses(
        (status = 200, description = "Stored object reference", body = ObjectReferenceResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Unknown reference")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "objects"
)]
pub async fn get_object(
    State(state): State<crate::AppState>,
    Extension(_claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<ObjectReferenceResponse>, AppError> {
    let reference = StoredObjects::find_by_id(&id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No stored object with id '{}'", id)))?;

    Ok(Json(reference.into()))
}

#[utoipa::path(
    delete,
    path = "/objects",
    request_body = DeleteObjectRequest,
    responses(
        (status = 204, description = "Object deleted (or already absent)"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "objects"
)]
pub async fn delete_object(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<DeleteObjectRequest>,
) -> Result<StatusCode, AppError> {
    // Idempotent: deleting an unknown locator is not an error
    state
        .storage
        .delete_object(&req.locator)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let existing = StoredObjects::find()
        .filter(stored_objects::Column::Locator.eq(&req.locator))
        .one(&state.db)
        .await?;

    if let Some(reference) = existing {
        tracing::info!(
            "Deleting object '{}' on behalf of '{}'",
            req.locator,
            claims.sub
        );
        reference.delete(&state.db).await?;
    }

    Ok(StatusCode::NO_CONTENT)
}
