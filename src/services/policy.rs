use crate::config::BrokerConfig;
use crate::utils::validation::normalize_content_type;
use serde::Serialize;
use utoipa::ToSchema;

/// Caller-declared upload request. Ephemeral; exists only through validation.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub pathname: String,
    pub content_type: Option<String>,
    pub size: Option<i64>,
}

/// A request that passed every policy check: canonical pathname, single
/// normalized content type.
#[derive(Debug, Clone)]
pub struct AcceptedUpload {
    pub pathname: String,
    pub content_type: String,
    pub size: Option<i64>,
}

/// Structured rejection reported back to the caller. Never fatal.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PolicyRejection {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for PolicyRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for PolicyRejection {}

/// Validates an upload request against the process-wide policy.
///
/// Pure function of (request, policy); checks run in order and the first
/// failure short-circuits.
pub fn validate(
    request: &UploadRequest,
    policy: &BrokerConfig,
) -> Result<AcceptedUpload, PolicyRejection> {
    let pathname = canonical_pathname(&request.pathname, policy)?;
    let content_type = check_content_type(request.content_type.as_deref(), policy)?;

    if let Some(size) = request.size {
        if size > policy.max_object_size {
            return Err(PolicyRejection {
                code: "OBJECT_TOO_LARGE",
                message: format!(
                    "Declared size {} bytes exceeds maximum allowed {} bytes ({} MB)",
                    size,
                    policy.max_object_size,
                    policy.max_object_size / 1024 / 1024
                ),
            });
        }
    }

    Ok(AcceptedUpload {
        pathname,
        content_type,
        size: request.size,
    })
}

/// Canonicalizes a target pathname, rejecting anything that could escape the
/// configured namespace.
pub fn canonical_pathname(
    pathname: &str,
    policy: &BrokerConfig,
) -> Result<String, PolicyRejection> {
    if pathname.is_empty() {
        return Err(PolicyRejection {
            code: "EMPTY_PATHNAME",
            message: "Target pathname cannot be empty".to_string(),
        });
    }

    if pathname.len() > policy.max_pathname_len {
        return Err(PolicyRejection {
            code: "PATHNAME_TOO_LONG",
            message: format!(
                "Pathname exceeds maximum length of {} bytes",
                policy.max_pathname_len
            ),
        });
    }

    if pathname.starts_with('/') {
        return Err(PolicyRejection {
            code: "ABSOLUTE_PATHNAME",
            message: "Pathname must be relative to the upload namespace".to_string(),
        });
    }

    if pathname.contains('\\') {
        return Err(PolicyRejection {
            code: "INVALID_PATHNAME",
            message: "Backslash separators are not allowed".to_string(),
        });
    }

    if pathname.chars().any(|c| c.is_control()) {
        return Err(PolicyRejection {
            code: "INVALID_PATHNAME",
            message: "Pathname contains control characters".to_string(),
        });
    }

    let segments: Vec<&str> = pathname.split('/').collect();

    if segments.len() > policy.max_path_segments {
        return Err(PolicyRejection {
            code: "PATHNAME_TOO_DEEP",
            message: format!(
                "Pathname exceeds maximum of {} segments",
                policy.max_path_segments
            ),
        });
    }

    for segment in &segments {
        if segment.is_empty() {
            return Err(PolicyRejection {
                code: "INVALID_PATHNAME",
                message: "Pathname contains an empty segment".to_string(),
            });
        }
        if *segment == "." || *segment == ".." {
            tracing::warn!("Path traversal attempt detected: {}", pathname);
            return Err(PolicyRejection {
                code: "PATH_TRAVERSAL",
                message: "Pathname must not contain relative segments".to_string(),
            });
        }
    }

    // Segments are already clean; the canonical form is the joined segments
    Ok(segments.join("/"))
}

fn check_content_type(
    declared: Option<&str>,
    policy: &BrokerConfig,
) -> Result<String, PolicyRejection> {
    let declared = match declared {
        Some(ct) if !ct.trim().is_empty() => ct,
        _ => {
            if policy.allow_unknown_content_type {
                return Ok(mime::APPLICATION_OCTET_STREAM.to_string());
            }
            return Err(PolicyRejection {
                code: "UNKNOWN_CONTENT_TYPE",
                message: "No content type declared and unknown types are not allowed"
                    .to_string(),
            });
        }
    };

    let normalized = normalize_content_type(declared);

    if policy
        .allowed_content_types
        .iter()
        .any(|allowed| allowed == &normalized)
    {
        return Ok(normalized);
    }

    Err(PolicyRejection {
        code: "DISALLOWED_CONTENT_TYPE",
        message: format!("Content type '{}' is not allowed", declared),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_policy() -> BrokerConfig {
        BrokerConfig {
            allowed_content_types: vec!["image/png".to_string(), "image/jpeg".to_string()],
            max_object_size: 5_000_000,
            ..BrokerConfig::default()
        }
    }

    fn request(pathname: &str, content_type: &str, size: i64) -> UploadRequest {
        UploadRequest {
            pathname: pathname.to_string(),
            content_type: Some(content_type.to_string()),
            size: Some(size),
        }
    }

    #[test]
    fn test_accepts_valid_request() {
        let policy = test_policy();
        let accepted = validate(&request("shops/abc/logo.png", "image/png", 2048), &policy)
            .expect("request should pass policy");
        assert_eq!(accepted.pathname, "shops/abc/logo.png");
        assert_eq!(accepted.content_type, "image/png");
        assert_eq!(accepted.size, Some(2048));
    }

    #[test]
    fn test_rejects_traversal_segments() {
        let policy = test_policy();
        for pathname in [
            "../etc/passwd",
            "shops/../../secrets",
            "shops/./logo.png",
            "..",
        ] {
            let rejection = validate(&request(pathname, "image/png", 10), &policy)
                .expect_err("traversal must be rejected");
            assert_eq!(rejection.code, "PATH_TRAVERSAL", "pathname: {}", pathname);
        }
    }

    #[test]
    fn test_rejects_absolute_and_empty_pathnames() {
        let policy = test_policy();
        assert_eq!(
            validate(&request("/etc/passwd", "image/png", 10), &policy)
                .unwrap_err()
                .code,
            "ABSOLUTE_PATHNAME"
        );
        assert_eq!(
            validate(&request("", "image/png", 10), &policy)
                .unwrap_err()
                .code,
            "EMPTY_PATHNAME"
        );
        assert_eq!(
            validate(&request("shops//logo.png", "image/png", 10), &policy)
                .unwrap_err()
                .code,
            "INVALID_PATHNAME"
        );
    }

    #[test]
    fn test_content_type_allowlist() {
        let policy = test_policy();

        assert!(validate(&request("a/logo.png", "image/png", 10), &policy).is_ok());
        assert!(validate(&request("a/logo.jpg", "IMAGE/JPEG; q=1", 10), &policy).is_ok());

        let rejection =
            validate(&request("a/tool.bin", "application/x-executable", 10), &policy)
                .unwrap_err();
        assert_eq!(rejection.code, "DISALLOWED_CONTENT_TYPE");
    }

    #[test]
    fn test_missing_content_type() {
        let policy = test_policy();
        let req = UploadRequest {
            pathname: "a/file".to_string(),
            content_type: None,
            size: None,
        };
        assert_eq!(
            validate(&req, &policy).unwrap_err().code,
            "UNKNOWN_CONTENT_TYPE"
        );

        let relaxed = BrokerConfig {
            allow_unknown_content_type: true,
            ..test_policy()
        };
        let accepted = validate(&req, &relaxed).unwrap();
        assert_eq!(accepted.content_type, "application/octet-stream");
    }

    #[test]
    fn test_size_limit() {
        let policy = test_policy();
        assert!(validate(&request("a/b.png", "image/png", 5_000_000), &policy).is_ok());
        assert_eq!(
            validate(&request("a/b.png", "image/png", 5_000_001), &policy)
                .unwrap_err()
                .code,
            "OBJECT_TOO_LARGE"
        );
        // Only the maximum is policed; a zero declared size passes through
        assert!(validate(&request("a/b.png", "image/png", 0), &policy).is_ok());
    }

    #[test]
    fn test_check_order_pathname_first() {
        // A request failing every check reports the pathname failure
        let policy = test_policy();
        let rejection = validate(
            &request("../escape", "application/x-executable", 999_999_999),
            &policy,
        )
        .unwrap_err();
        assert_eq!(rejection.code, "PATH_TRAVERSAL");
    }
}
