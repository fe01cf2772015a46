use crate::services::policy::PolicyRejection;
use crate::services::reconcile::ReconcileError;
use crate::services::token::TokenError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Policy rejection: {0}")]
    Policy(PolicyRejection),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    None,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, None, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, None, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, None, msg),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    None,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, None, msg),
            AppError::Policy(rejection) => {
                let status = if rejection.code == "OBJECT_TOO_LARGE" {
                    StatusCode::PAYLOAD_TOO_LARGE
                } else {
                    StatusCode::BAD_REQUEST
                };
                (status, Some(rejection.code), rejection.message)
            }
            AppError::Token(e) => match e {
                // A token issued without a valid signature would be
                // indistinguishable from a forged one downstream
                TokenError::SigningUnavailable => {
                    tracing::error!("Upload token signing key unavailable");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Some("SIGNING_UNAVAILABLE"),
                        "Upload credential signing is unavailable".to_string(),
                    )
                }
                TokenError::Expired => (
                    StatusCode::UNAUTHORIZED,
                    Some("TOKEN_EXPIRED"),
                    e.to_string(),
                ),
                TokenError::Invalid(_) => (
                    StatusCode::UNAUTHORIZED,
                    Some("TOKEN_INVALID"),
                    "Upload token invalid".to_string(),
                ),
            },
            AppError::Reconcile(e) => match &e {
                // Forged or corrupt events never self-correct, so they are
                // logged and discarded: a 2xx acknowledges the delivery and
                // stops the provider from redelivering. Nothing was
                // persisted; reconciliation rejects before any write.
                ReconcileError::AuthenticityFailure | ReconcileError::MalformedContext(_) => {
                    tracing::warn!("Discarding completion event: {}", e);
                    let code = match &e {
                        ReconcileError::AuthenticityFailure => "AUTHENTICITY_FAILURE",
                        _ => "MALFORMED_CONTEXT",
                    };
                    return (
                        StatusCode::OK,
                        Json(json!({ "status": "discarded", "code": code })),
                    )
                        .into_response();
                }
                // Retryable: a non-2xx makes the provider redeliver and the
                // reference write is idempotent
                ReconcileError::DownstreamPersistenceFailure(msg) => {
                    tracing::error!("Completion persistence failed: {}", msg);
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        Some("PERSISTENCE_FAILURE"),
                        "Failed to persist object reference".to_string(),
                    )
                }
            },
            AppError::Anyhow(e) => {
                if let Some(rejection) = e.downcast_ref::<PolicyRejection>() {
                    let status = if rejection.code == "OBJECT_TOO_LARGE" {
                        StatusCode::PAYLOAD_TOO_LARGE
                    } else {
                        StatusCode::BAD_REQUEST
                    };
                    (status, Some(rejection.code), rejection.message.clone())
                } else {
                    tracing::error!("Anyhow error: {:?}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        None,
                        "Internal Server Error".to_string(),
                    )
                }
            }
        };

        let body = match code {
            Some(code) => Json(json!({ "error": message, "code": code })),
            None => Json(json!({ "error": message })),
        };

        (status, body).into_response()
    }
}
