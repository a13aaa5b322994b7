//! API Middleware
//!
//! API key authentication, person identity and request logging.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::routes::AppState;

/// Header carrying the caller's API key
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Header carrying the authenticated person id
pub const PERSON_HEADER: &str = "X-Request-User-Id";

/// Header carrying the caller's correlation id
pub const CORRELATION_HEADER: &str = "X-Correlation-Id";

/// API Key authentication result
#[derive(Debug, Clone)]
pub struct AuthenticatedApiKey {
    pub id: Uuid,
    pub name: String,
}

/// Person the request acts for, from the X-Request-User-Id header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPerson {
    pub person_id: i64,
}

fn reject(status: StatusCode, error: &str, error_code: &str) -> Response {
    (
        status,
        Json(json!({
            "error": error,
            "error_code": error_code
        })),
    )
        .into_response()
}

/// Digest under which API keys are stored
pub fn api_key_digest(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

// =========================================================================
// API Key Authentication Middleware
// =========================================================================

/// Extract and validate API key from X-API-Key header
pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    let api_key = match headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        Some(key) => key,
        None => {
            return Err(reject(
                StatusCode::UNAUTHORIZED,
                "Missing X-API-Key header",
                "missing_api_key",
            ));
        }
    };

    let api_key_record: Option<(Uuid, String, bool)> = match sqlx::query_as(
        r#"
        SELECT id, name, is_active
        FROM api_keys
        WHERE key_hash = $1
        "#,
    )
    .bind(api_key_digest(api_key))
    .fetch_optional(&state.pool)
    .await
    {
        Ok(record) => record,
        Err(e) => {
            tracing::error!("Database error during API key validation: {}", e);
            return Err(reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                "database_error",
            ));
        }
    };

    let (api_key_id, name, is_active) = match api_key_record {
        Some(record) => record,
        None => {
            return Err(reject(
                StatusCode::UNAUTHORIZED,
                "Invalid API key",
                "invalid_api_key",
            ));
        }
    };

    if !is_active {
        return Err(reject(
            StatusCode::UNAUTHORIZED,
            "API key is disabled",
            "api_key_disabled",
        ));
    }

    request.extensions_mut().insert(AuthenticatedApiKey {
        id: api_key_id,
        name,
    });

    // Endpoints acting for a person check for the RequestPerson extension
    if let Some(raw) = headers.get(PERSON_HEADER).and_then(|v| v.to_str().ok()) {
        match raw.trim().parse::<i64>() {
            Ok(person_id) if person_id > 0 => {
                request.extensions_mut().insert(RequestPerson { person_id });
            }
            _ => {
                return Err(reject(
                    StatusCode::BAD_REQUEST,
                    "Invalid X-Request-User-Id header format",
                    "invalid_user_id",
                ));
            }
        }
    }

    Ok(next.run(request).await)
}

// =========================================================================
// mask_headers_for_logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["x-api-key", "authorization", "cookie", "set-cookie"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

// =========================================================================
// Request Logging Middleware
// =========================================================================

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let version = request.version();

    let headers = mask_headers_for_logging(request.headers());

    let correlation_id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        version = ?version,
        correlation_id = %correlation_id,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status,
        duration_ms = %duration.as_millis(),
        correlation_id = %correlation_id,
        "Request completed"
    );

    response
}
