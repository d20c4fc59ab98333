pub mod admin;
pub mod middleware;
pub mod routes;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use serde::Serialize;

use crate::api::ScraperApi;
use crate::error::GatewayError;
use crate::pool::AccountPool;
use crate::store::{AccountStore, IssuedTokenStore};

#[derive(Clone)]
pub struct AppState {
    pub api: ScraperApi,
    pub pool: Arc<AccountPool>,
    pub account_store: Arc<AccountStore>,
    pub token_store: Arc<IssuedTokenStore>,
    pub admin_password: Option<String>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Maps a core error onto the downstream surface. The internal rotation
/// signals never reach here in practice; they fall back to 500 so a bug is
/// at least visible.
pub fn error_response(e: &GatewayError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match e {
        GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        GatewayError::ExhaustedAccounts { .. } => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

pub fn build_router(state: AppState) -> Router {
    use axum::middleware::from_fn_with_state;

    let data_routes = Router::new()
        .route("/api/tweets/:id", get(routes::get_tweet))
        .route("/api/users/:handle", get(routes::get_profile))
        .route(
            "/api/users/:id_or_handle/tweets-and-replies",
            get(routes::get_tweets_and_replies),
        )
        .route(
            "/api/users/:id_or_handle/following",
            get(routes::get_following),
        )
        .route(
            "/api/users/:id_or_handle/followers",
            get(routes::get_followers),
        )
        .route(
            "/api/users/:id_or_handle/all-tweets",
            get(routes::get_all_tweets),
        )
        .route("/api/search/people/:query", get(routes::search_people))
        .route("/api/search/tweets/:query", get(routes::search_tweets))
        .route(
            "/api/communities/:id/members",
            get(routes::get_community_members),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::bearer_auth_middleware,
        ));

    let admin_routes = Router::new()
        .route("/api/accounts", get(admin::list_accounts))
        .route("/api/accounts/import", post(admin::import_accounts))
        .route("/api/accounts/login", post(admin::force_login))
        .route("/api/accounts/reset-failed", post(admin::reset_failed))
        .route("/api/accounts/:username", delete(admin::delete_account))
        .route(
            "/api/tokens",
            get(admin::list_tokens).post(admin::create_token),
        )
        .route("/api/tokens/:id", delete(admin::revoke_token))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::admin_auth_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(data_routes)
        .merge(admin_routes)
        .layer(axum::middleware::from_fn(request_timeout_middleware))
        .with_state(state)
}

/// Top-level request deadline. Listing walks can legitimately take a while;
/// anything past this is considered stuck.
async fn request_timeout_middleware(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let deadline =
        std::time::Duration::from_secs(crate::constants::REQUEST_IDLE_TIMEOUT_SECS);
    match tokio::time::timeout(deadline, next.run(request)).await {
        Ok(response) => response,
        Err(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(ErrorResponse {
                error: "request timed out".to_string(),
            }),
        )
            .into_response(),
    }
}

async fn health() -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
    .into_response()
}
