use crate::AppState;
use crate::utils::auth::validate_session_jwt;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

/// Verifies the caller's bearer session token and injects its claims.
///
/// Session issuance and user management live in the external auth system;
/// the broker only checks the signature and expiry.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|s| s.to_string());

    if let Some(token) = token {
        if let Ok(claims) = validate_session_jwt(&token, &state.config.session_secret) {
            req.extensions_mut().insert(claims);
            return Ok(next.run(req).await);
        }
    }

    Err(StatusCode::UNAUTHORIZED)
}
