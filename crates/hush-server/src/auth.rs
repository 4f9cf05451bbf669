use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use constant_time_eq::constant_time_eq;
use serde_json::json;
use tracing::warn;

use crate::AppState;

/// Guards admin routes (`/api/prune`). Redemption and creation stay public;
/// possession of the id is the only credential for those.
/// With no key configured (HUSH_API_KEY unset) every request passes.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };

    if key_matches(request.headers(), expected) {
        return next.run(request).await;
    }

    warn!(path = %request.uri().path(), "audit: admin.unauthorized");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "unauthorized: a valid HUSH_API_KEY bearer token is required"})),
    )
        .into_response()
}

fn key_matches(headers: &HeaderMap, expected: &str) -> bool {
    bearer_token(headers).is_some_and(|t| constant_time_eq(t.as_bytes(), expected.as_bytes()))
}

/// The credential of an `Authorization: Bearer <token>` header. The scheme
/// name is matched case-insensitively.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
