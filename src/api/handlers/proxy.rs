use crate::api::error::AppError;
use crate::utils::auth::Claims;
use axum::{Extension, Json, extract::Multipart, extract::State};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct ProxyUploadResponse {
    pub id: String,
    pub locator: String,
    pub url: String,
    pub content_type: Option<String>,
    pub size: Option<i64>,
}

#[utoipa::path(
    post,
    path = "/uploads/direct",
    request_body(content = Vec<u8>, description = "Multipart form with 'pathname' and 'file' fields", content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Object uploaded and recorded", body = ProxyUploadResponse),
        (status = 400, description = "Payload rejected by upload policy"),
        (status = 401, description = "Unauthorized"),
        (status = 413, description = "Payload exceeds policy maximum")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "uploads"
)]
pub async fn proxy_upload(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> Result<Json<ProxyUploadResponse>, AppError> {
    let mut pathname: Option<String> = None;
    let mut payload: Option<(Option<String>, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        match field.name() {
            Some("pathname") => {
                pathname = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?,
                );
            }
            Some("file") => {
                let declared = field.content_type().map(|s| s.to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::PayloadTooLarge(e.to_string()))?;
                payload = Some((declared, data.to_vec()));
            }
            _ => {}
        }
    }

    let pathname =
        pathname.ok_or_else(|| AppError::BadRequest("Missing 'pathname' field".to_string()))?;
    let (declared, data) =
        payload.ok_or_else(|| AppError::BadRequest("Missing 'file' field".to_string()))?;

    let reference = state
        .proxy
        .upload(&claims.sub, &pathname, declared.as_deref(), data)
        .await?;

    Ok(Json(ProxyUploadResponse {
        id: reference.id,
        locator: reference.locator,
        url: reference.url,
        content_type: reference.content_type,
        size: reference.size,
    }))
}
