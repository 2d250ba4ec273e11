//! API Middleware
//!
//! Service authentication, caller identification and request logging.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{AccountId, OperationContext};
use crate::error::AppError;

pub const USER_ID_HEADER: &str = "x-request-user-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const API_KEY_HEADER: &str = "x-api-key";

// =========================================================================
// Service authentication
// =========================================================================

/// Shared secret presented by the user subsystem in X-API-Key
#[derive(Clone)]
pub struct ServiceKey(Arc<str>);

impl ServiceKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    /// Compares every byte, so timing does not reveal the matching prefix
    pub fn matches(&self, presented: &str) -> bool {
        let expected = self.0.as_bytes();
        let presented = presented.as_bytes();
        expected.len() == presented.len()
            && expected
                .iter()
                .zip(presented)
                .fold(0u8, |diff, (a, b)| diff | (a ^ b))
                == 0
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServiceKey([REDACTED])")
    }
}

/// Require a valid X-API-Key on service-only routes
pub async fn require_service_key(
    State(key): State<ServiceKey>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(presented) = request.headers().get(API_KEY_HEADER) else {
        return AppError::MissingHeader(API_KEY_HEADER.to_string()).into_response();
    };

    if !key.matches(presented.to_str().unwrap_or_default()) {
        tracing::warn!(uri = %request.uri(), "Rejected request with invalid service key");
        return AppError::InvalidApiKey.into_response();
    }

    next.run(request).await
}

/// Caller identified by the X-Request-User-Id header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestUser {
    pub user_id: AccountId,
}

/// Parse the caller id: missing is unauthorized, malformed is a bad request
pub fn request_user_from_headers(headers: &HeaderMap) -> Result<RequestUser, AppError> {
    let raw = headers
        .get(USER_ID_HEADER)
        .ok_or_else(|| AppError::MissingHeader(USER_ID_HEADER.to_string()))?;

    let user_id = raw
        .to_str()
        .ok()
        .and_then(|value| value.trim().parse::<AccountId>().ok())
        .ok_or_else(|| AppError::InvalidHeader(format!("{USER_ID_HEADER} must be a numeric id")))?;

    Ok(RequestUser { user_id })
}

// =========================================================================
// Caller identification
// =========================================================================

/// Require X-Request-User-Id and record the caller in the operation context
pub async fn require_user(mut request: Request<Body>, next: Next) -> Response {
    let user = match request_user_from_headers(request.headers()) {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };

    let context = request
        .extensions()
        .get::<OperationContext>()
        .copied()
        .unwrap_or_else(OperationContext::detached)
        .with_request_user(user.user_id);

    request.extensions_mut().insert(user);
    request.extensions_mut().insert(context);

    next.run(request).await
}

// =========================================================================
// Request logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie", API_KEY_HEADER];

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

/// Log every request and its outcome, tagging it with a correlation id
pub async fn logging_middleware(mut request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = mask_headers_for_logging(request.headers());

    // Extract correlation ID or generate new one
    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);
    request
        .extensions_mut()
        .insert(OperationContext::new(correlation_id));

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        correlation_id = %correlation_id,
        headers = ?headers,
        "Incoming request"
    );

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = %start.elapsed().as_millis(),
        correlation_id = %correlation_id,
        "Request completed"
    );

    response
}
