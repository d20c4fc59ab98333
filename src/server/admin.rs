use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::{error_response, AppState};
use crate::models::account::AccountState;
use crate::store::import;

#[derive(Deserialize)]
pub struct ImportRequest {
    pub format: String,
    /// Newline-separated records in the given format.
    pub accounts: String,
}

pub async fn import_accounts(
    State(state): State<AppState>,
    Json(payload): Json<ImportRequest>,
) -> Response {
    let records = match import::parse_accounts(&payload.format, &payload.accounts) {
        Ok(records) => records,
        Err(e) => return error_response(&e).into_response(),
    };
    let parsed = records.len();
    let added = match state.account_store.add(records) {
        Ok(added) => added,
        Err(e) => return error_response(&e).into_response(),
    };
    info!("Imported {} accounts ({} parsed)", added, parsed);
    if added > 0 {
        state.pool.spawn_replenish();
    }
    Json(json!({
        "message": format!("imported {added} of {parsed} parsed accounts"),
        "count": added
    }))
    .into_response()
}

/// Forces the pool to drop its sessions and log in again.
pub async fn force_login(State(state): State<AppState>) -> Response {
    state.pool.force_rotation();
    Json(json!({ "message": "pool reinitialization started" })).into_response()
}

pub async fn reset_failed(State(state): State<AppState>) -> Response {
    match state.pool.reset_failed().await {
        Ok(()) => Json(json!({ "message": "account failure state cleared" })).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn delete_account(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Response {
    match state.pool.delete(&username) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no account named {username}") })),
        )
            .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// Operator view of an account: runtime state only, no secrets.
#[derive(Serialize)]
struct AccountView {
    username: String,
    token_state: crate::models::TokenState,
    failed_login: bool,
    last_used: Option<i64>,
    last_failed_at: Option<i64>,
    rate_limited_until: Option<i64>,
    assigned_proxy: Option<String>,
    has_auth_token: bool,
    has_two_factor: bool,
}

impl From<AccountState> for AccountView {
    fn from(account: AccountState) -> Self {
        Self {
            username: account.credential.username.clone(),
            token_state: account.token_state,
            failed_login: account.failed_login,
            last_used: account.last_used,
            last_failed_at: account.last_failed_at,
            rate_limited_until: account.rate_limited_until,
            assigned_proxy: account.assigned_proxy.clone(),
            has_auth_token: account.credential.auth_token.is_some(),
            has_two_factor: account.credential.two_factor_secret.is_some(),
        }
    }
}

pub async fn list_accounts(State(state): State<AppState>) -> Response {
    let accounts: Vec<AccountView> = state
        .account_store
        .snapshot()
        .into_iter()
        .map(AccountView::from)
        .collect();
    Json(json!({
        "active_sessions": state.pool.active_len(),
        "accounts": accounts
    }))
    .into_response()
}

#[derive(Deserialize)]
pub struct CreateTokenRequest {
    pub name: String,
}

pub async fn create_token(
    State(state): State<AppState>,
    Json(payload): Json<CreateTokenRequest>,
) -> Response {
    match state.token_store.create(&payload.name) {
        Ok(token) => (StatusCode::CREATED, Json(token)).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn list_tokens(State(state): State<AppState>) -> Response {
    Json(state.token_store.list()).into_response()
}

pub async fn revoke_token(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.token_store.revoke(&id) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no token with id {id}") })),
        )
            .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}
