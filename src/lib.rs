pub mod api;
pub mod constants;
pub mod error;
pub mod logger;
pub mod models;
pub mod paging;
pub mod pool;
pub mod rotator;
pub mod server;
pub mod store;
#[cfg(test)]
mod test_utils;
pub mod upstream;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::api::ScraperApi;
use crate::models::AppConfig;
use crate::pool::AccountPool;
use crate::rotator::RotatingAuthenticator;
use crate::server::{build_router, AppState};
use crate::store::{AccountStore, IssuedTokenStore};
use crate::upstream::login::{LoginEndpoints, NoMailSource, NoTransactionId};
use crate::upstream::transport::Transport;

pub fn run() {
    logger::init_logger();
    let config = AppConfig::from_env();

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    runtime.block_on(async {
        if let Err(e) = serve(config).await {
            error!("[E-RUNTIME-STARTUP] {}", e);
            std::process::exit(1);
        }
    });
}

async fn serve(config: AppConfig) -> Result<(), String> {
    let account_store = Arc::new(
        AccountStore::open(&config.accounts_state_path)
            .map_err(|e| format!("failed_to_open_account_store: {e}"))?,
    );
    let token_store = Arc::new(
        IssuedTokenStore::open(&config.token_db_path)
            .map_err(|e| format!("failed_to_open_token_store: {e}"))?,
    );
    let transport = Arc::new(
        Transport::new(Duration::from_secs(config.request_timeout_secs))
            .map_err(|e| format!("failed_to_build_transport: {e}"))?,
    );

    let pool = AccountPool::new(
        account_store.clone(),
        transport.clone(),
        &config,
        LoginEndpoints::default(),
        Arc::new(NoTransactionId),
        Arc::new(NoMailSource),
    );
    // Warm the pool eagerly in the background; dispatch gates on it.
    pool.spawn_replenish();

    let rotator = RotatingAuthenticator::new(pool.clone(), transport.clone());
    let api = ScraperApi::new(rotator, transport);
    if config.admin_password.is_none() {
        info!("ADMIN_PASSWORD not set; admin endpoints are disabled");
    }
    let state = AppState {
        api,
        pool,
        account_store,
        token_store,
        admin_password: config.admin_password.clone(),
    };
    let router = build_router(state);

    let addr = format!("127.0.0.1:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("address {addr} binding failed: {e}"))?;
    info!("Gateway listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, router) => {
            result.map_err(|e| format!("server exited: {e}"))
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down gateway");
            Ok(())
        }
    }
}
