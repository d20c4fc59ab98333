use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};

use super::{AppState, ErrorResponse};

fn constant_time_str_eq(left: &str, right: &str) -> bool {
    let left_bytes = left.as_bytes();
    let right_bytes = right.as_bytes();
    let max_len = left_bytes.len().max(right_bytes.len());
    let mut diff = left_bytes.len() ^ right_bytes.len();

    for i in 0..max_len {
        let l = left_bytes.get(i).copied().unwrap_or(0);
        let r = right_bytes.get(i).copied().unwrap_or(0);
        diff |= (l ^ r) as usize;
    }

    diff == 0
}

fn bearer_value(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer ").or(Some(s)))
        .or_else(|| {
            request
                .headers()
                .get("x-api-key")
                .and_then(|h| h.to_str().ok())
        })
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Name attached to the request once its issued token validated.
#[derive(Clone, Debug)]
pub struct TokenIdentity {
    pub name: String,
}

/// Downstream data routes: a valid issued token is required; its
/// `last_used` is touched on the way through.
pub async fn bearer_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(value) = bearer_value(&request) else {
        return unauthorized("missing bearer token");
    };
    if !state.token_store.validate(value) {
        tracing::warn!("Rejected request with invalid downstream token");
        return unauthorized("invalid bearer token");
    }
    if let Err(e) = state.token_store.touch(value) {
        tracing::warn!("Failed to touch token last_used: {}", e);
    }

    let identity = state
        .token_store
        .list()
        .into_iter()
        .find(|t| t.value == value)
        .map(|t| TokenIdentity { name: t.name });
    let (mut parts, body) = request.into_parts();
    if let Some(identity) = identity {
        parts.extensions.insert(identity);
    }
    next.run(Request::from_parts(parts, body)).await
}

/// Admin routes: the operator password, presented as a bearer or via
/// `x-admin-password`. No configured password means no admin surface.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.admin_password.as_deref().filter(|p| !p.is_empty()) else {
        tracing::error!("Admin request rejected: ADMIN_PASSWORD is not configured");
        return unauthorized("admin access is not configured");
    };
    let provided = bearer_value(&request).or_else(|| {
        request
            .headers()
            .get("x-admin-password")
            .and_then(|h| h.to_str().ok())
    });
    match provided {
        Some(candidate) if constant_time_str_eq(candidate, expected) => next.run(request).await,
        _ => unauthorized("invalid admin credentials"),
    }
}
