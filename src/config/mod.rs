use std::env;

/// Broker configuration: upload policy plus signing material.
///
/// Loaded once at startup and passed by value to each component so the
/// validator, issuer and reconciler stay independently testable.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Content types a caller may declare (exact MIME strings, lowercase)
    pub allowed_content_types: Vec<String>,

    /// Accept requests that declare no content type (default: false)
    pub allow_unknown_content_type: bool,

    /// Maximum object size in bytes (default: 10 MB)
    pub max_object_size: i64,

    /// Scoped upload token time-to-live in seconds (default: 600)
    pub token_ttl_secs: i64,

    /// Maximum pathname length in bytes (default: 512)
    pub max_pathname_len: usize,

    /// Maximum number of pathname segments (default: 8)
    pub max_path_segments: usize,

    /// HS256 secret for scoped upload tokens (Required in production)
    pub token_secret: String,

    /// Shared secret the storage provider signs completion callbacks with
    pub provider_secret: String,

    /// Secret for validating caller session tokens issued by the auth system
    pub session_secret: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            allowed_content_types: vec![
                "image/png".to_string(),
                "image/jpeg".to_string(),
                "image/webp".to_string(),
                "image/gif".to_string(),
            ],
            allow_unknown_content_type: false,
            max_object_size: 10 * 1024 * 1024, // 10 MB
            token_ttl_secs: 600,               // 10 minutes
            max_pathname_len: 512,
            max_path_segments: 8,
            token_secret: "secret".to_string(),
            provider_secret: "secret".to_string(),
            session_secret: "secret".to_string(),
        }
    }
}

impl BrokerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            allowed_content_types: env::var("ALLOWED_CONTENT_TYPES")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_lowercase())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(default.allowed_content_types),

            allow_unknown_content_type: env::var("ALLOW_UNKNOWN_CONTENT_TYPE")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(default.allow_unknown_content_type),

            max_object_size: env::var("MAX_OBJECT_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_object_size),

            token_ttl_secs: env::var("TOKEN_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.token_ttl_secs),

            max_pathname_len: env::var("MAX_PATHNAME_LENGTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_pathname_len),

            max_path_segments: env::var("MAX_PATH_SEGMENTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_path_segments),

            token_secret: env::var("UPLOAD_TOKEN_SECRET")
                .unwrap_or_else(|_| "secret".to_string()), // Fallback for dev convenience, strictly enforced in production method

            provider_secret: env::var("STORAGE_CALLBACK_SECRET")
                .unwrap_or_else(|_| "secret".to_string()),

            session_secret: env::var("SESSION_JWT_SECRET").unwrap_or_else(|_| "secret".to_string()),
        }
    }

    /// Create config for development (relaxed limits, fixed secrets)
    pub fn development() -> Self {
        Self {
            max_object_size: 100 * 1024 * 1024,
            allow_unknown_content_type: true,
            ..Self::default()
        }
    }

    /// Create config for production (secrets must be set)
    pub fn production() -> Self {
        let from_env = Self::from_env();
        Self {
            token_secret: env::var("UPLOAD_TOKEN_SECRET")
                .expect("CRITICAL: UPLOAD_TOKEN_SECRET must be set"),
            provider_secret: env::var("STORAGE_CALLBACK_SECRET")
                .expect("CRITICAL: STORAGE_CALLBACK_SECRET must be set"),
            session_secret: env::var("SESSION_JWT_SECRET")
                .expect("CRITICAL: SESSION_JWT_SECRET must be set"),
            ..from_env
        }
    }
}
