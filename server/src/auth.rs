//! Pre-shared API key authentication.
//!
//! REST endpoints other than `/api/health` take an `Authorization: Bearer <key>`
//! header. The WebSocket upgrade carries the key in `?token=` instead, since
//! browsers can't set headers on WebSocket upgrades.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Extension type carrying the expected API key, injected into the router
/// layer so [`require_api_key`] can access it without touching `AppState`.
#[derive(Clone)]
pub struct ApiKey(pub String);

impl ApiKey {
    /// Constant-time check of a client-supplied key.
    pub fn matches(&self, provided: &str) -> bool {
        constant_time_eq(self.0.as_bytes(), provided.as_bytes())
    }
}

/// Axum middleware that rejects requests without a valid `Authorization: Bearer`
/// header.
///
/// # Error responses
///
/// - `401 Unauthorized` — header missing or malformed
/// - `403 Forbidden` — key present but invalid
/// - `500 Internal Server Error` — [`ApiKey`] extension not found
pub async fn require_api_key(request: Request, next: Next) -> Response {
    let Some(api_key) = request.extensions().get::<ApiKey>().cloned() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Server configuration error"})),
        )
            .into_response();
    };

    let provided = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match provided {
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Missing or invalid Authorization header"})),
        )
            .into_response(),
        Some(key) if !api_key.matches(key) => (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "Invalid API key"})),
        )
            .into_response(),
        Some(_) => next.run(request).await,
    }
}

/// Constant-time byte comparison.
///
/// Always iterates over the full length of `expected` regardless of `provided`
/// length, so response time doesn't reveal the key length.
pub fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    let mut diff = u8::from(expected.len() != provided.len());
    for (i, e) in expected.iter().enumerate() {
        diff |= e ^ provided.get(i).copied().unwrap_or(0xff);
    }
    diff == 0
}
