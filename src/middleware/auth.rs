use axum::Json;
use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, StatusCode, request::Parts};
use axum::response::{IntoResponse, Response};
use headers::authorization::Bearer;
use headers::{Authorization, HeaderMapExt};
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::router::BridgeState;

/// Ensure the inbound request carries the admin key.
/// Accepts either:
/// - Header: `x-api-key: ...`
/// - Header: `Authorization: Bearer ...`
///
/// An empty configured key rejects everything.
pub fn ensure_authorized(headers: &HeaderMap, expected: &str) -> Result<(), Response> {
    if !expected.is_empty() {
        let matches = |candidate: &str| bool::from(candidate.as_bytes().ct_eq(expected.as_bytes()));

        if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok())
            && matches(key.trim())
        {
            return Ok(());
        }

        if let Some(Authorization(bearer)) = headers.typed_get::<Authorization<Bearer>>()
            && matches(bearer.token())
        {
            return Ok(());
        }
    } else {
        warn!("admin route called but BRIDGE_ADMIN_KEY is not set");
    }

    Err((
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "unauthorized", "reason": "invalid or missing key"})),
    )
        .into_response())
}

#[derive(Debug, Clone, Copy)]
pub struct RequireAdminKey;

impl FromRequestParts<BridgeState> for RequireAdminKey {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &BridgeState,
    ) -> Result<Self, Self::Rejection> {
        ensure_authorized(&parts.headers, &state.admin_key)?;
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(name: &'static str, value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(name, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn accepts_api_key_header() {
        assert!(ensure_authorized(&headers("x-api-key", "k3y"), "k3y").is_ok());
        assert!(ensure_authorized(&headers("x-api-key", "nope"), "k3y").is_err());
    }

    #[test]
    fn accepts_bearer_token() {
        assert!(ensure_authorized(&headers("authorization", "Bearer k3y"), "k3y").is_ok());
        assert!(ensure_authorized(&headers("authorization", "Basic k3y"), "k3y").is_err());
    }

    #[test]
    fn empty_key_rejects_everything() {
        assert!(ensure_authorized(&headers("x-api-key", ""), "").is_err());
        assert!(ensure_authorized(&HeaderMap::new(), "k3y").is_err());
    }
}
