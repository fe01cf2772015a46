use crate::config::BrokerConfig;
use crate::services::policy::AcceptedUpload;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Context payload embedded in every scoped token and echoed back by the
/// storage provider's completion callback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadContext {
    pub uploaded_by: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Claim set of a scoped upload token.
///
/// The token is valid only for the exact pathname and content-type set it was
/// minted for; `exp` is the sole containment mechanism since nothing is
/// persisted server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopedClaims {
    /// Canonical target pathname
    pub sub: String,
    /// Content types the credential authorizes
    pub cts: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    /// Opaque caller context, carried through to reconciliation
    pub ctx: UploadContext,
}

/// Result of issuance: the signed token plus the fields the caller needs to
/// perform the direct write.
#[derive(Debug, Clone)]
pub struct IssuedGrant {
    pub token: String,
    pub pathname: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum TokenError {
    /// Signing material is missing; fatal to the request, never skipped
    #[error("Upload token signing key is unavailable")]
    SigningUnavailable,

    #[error("Upload token expired")]
    Expired,

    #[error("Upload token invalid: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

/// Mints a signed, scoped, time-boxed upload credential.
///
/// Stateless on purpose: nothing is persisted between issuance and
/// completion, so any number of instances can issue in parallel.
pub fn issue(
    accepted: &AcceptedUpload,
    context: UploadContext,
    config: &BrokerConfig,
) -> Result<IssuedGrant, TokenError> {
    if config.token_secret.is_empty() {
        return Err(TokenError::SigningUnavailable);
    }

    let issued_at = Utc::now();
    let expires_at = issued_at + Duration::seconds(config.token_ttl_secs);

    let claims = ScopedClaims {
        sub: accepted.pathname.clone(),
        cts: vec![accepted.content_type.clone()],
        iat: issued_at.timestamp(),
        exp: expires_at.timestamp(),
        ctx: context,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.token_secret.as_ref()),
    )?;

    Ok(IssuedGrant {
        token,
        pathname: accepted.pathname.clone(),
        expires_at,
    })
}

/// Verifies a scoped token's signature and expiry, returning its claims.
pub fn verify(token: &str, secret: &str) -> Result<ScopedClaims, TokenError> {
    let mut validation = Validation::default();
    validation.leeway = 0;

    match decode::<ScopedClaims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &validation,
    ) {
        Ok(data) => Ok(data.claims),
        Err(e) => match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(TokenError::Expired),
            _ => Err(TokenError::Invalid(e)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted() -> AcceptedUpload {
        AcceptedUpload {
            pathname: "shops/abc/logo.png".to_string(),
            content_type: "image/png".to_string(),
            size: Some(2048),
        }
    }

    fn context() -> UploadContext {
        UploadContext {
            uploaded_by: "user_123".to_string(),
            metadata: serde_json::json!({"shop": "abc"}),
        }
    }

    #[test]
    fn test_issue_then_verify() {
        let config = BrokerConfig::default();
        let grant = issue(&accepted(), context(), &config).unwrap();

        let claims = verify(&grant.token, &config.token_secret).unwrap();
        assert_eq!(claims.sub, "shops/abc/logo.png");
        assert_eq!(claims.cts, vec!["image/png".to_string()]);
        assert_eq!(claims.exp - claims.iat, config.token_ttl_secs);
        assert_eq!(claims.ctx.uploaded_by, "user_123");
        assert_eq!(grant.expires_at.timestamp(), claims.exp);
    }

    #[test]
    fn test_expired_token_rejected() {
        // Mint a token whose lifetime already ended
        let config = BrokerConfig {
            token_ttl_secs: -120,
            ..BrokerConfig::default()
        };
        let grant = issue(&accepted(), context(), &config).unwrap();

        let err = verify(&grant.token, &config.token_secret).unwrap_err();
        assert!(matches!(err, TokenError::Expired));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let config = BrokerConfig::default();
        let grant = issue(&accepted(), context(), &config).unwrap();
        assert!(matches!(
            verify(&grant.token, "other_secret").unwrap_err(),
            TokenError::Invalid(_)
        ));
    }

    #[test]
    fn test_missing_signing_key_is_fatal() {
        let config = BrokerConfig {
            token_secret: String::new(),
            ..BrokerConfig::default()
        };
        assert!(matches!(
            issue(&accepted(), context(), &config).unwrap_err(),
            TokenError::SigningUnavailable
        ));
    }
}
