use std::path::PathBuf;

use tracing::{info, warn};

use crate::constants::DEFAULT_REQUEST_TIMEOUT_SECS;

/// Runtime configuration, resolved once at boot from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub admin_password: Option<String>,
    pub accounts_state_path: PathBuf,
    pub token_db_path: PathBuf,
    pub proxy_uri: Option<String>,
    pub proxy_list: Vec<String>,
    pub pool_size: usize,
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            admin_password: None,
            accounts_state_path: PathBuf::from("accounts.json"),
            token_db_path: PathBuf::from("tokens.json"),
            proxy_uri: None,
            proxy_list: Vec::new(),
            pool_size: 5,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("PORT") {
            let trimmed = port.trim();
            if !trimmed.is_empty() {
                match trimmed.parse::<u16>() {
                    Ok(p) if p > 0 => {
                        config.port = p;
                        info!("Using port from environment: {}", p);
                    }
                    _ => warn!("[W-PORT-INVALID] ignoring_invalid_port_value: {}", port),
                }
            }
        }

        if let Ok(password) = std::env::var("ADMIN_PASSWORD") {
            if !password.trim().is_empty() {
                info!("Using admin password from environment");
                config.admin_password = Some(password);
            }
        }

        if let Ok(path) = std::env::var("ACCOUNTS_STATE_PATH") {
            if !path.trim().is_empty() {
                config.accounts_state_path = PathBuf::from(path.trim());
            }
        }

        if let Ok(path) = std::env::var("TOKEN_DB_PATH") {
            if !path.trim().is_empty() {
                config.token_db_path = PathBuf::from(path.trim());
            }
        }

        if let Ok(uri) = std::env::var("PROXY_URI") {
            if !uri.trim().is_empty() {
                config.proxy_uri = Some(uri.trim().to_string());
            }
        }

        if let Ok(list) = std::env::var("PROXY_LIST") {
            config.proxy_list = parse_proxy_list(&list);
            if !config.proxy_list.is_empty() {
                info!("Loaded {} proxies from PROXY_LIST", config.proxy_list.len());
            }
        }

        if let Ok(size) = std::env::var("POOL_SIZE") {
            match size.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.pool_size = n,
                _ => warn!("[W-POOL-SIZE-INVALID] ignoring_invalid_pool_size: {}", size),
            }
        }

        if let Ok(secs) = std::env::var("REQUEST_TIMEOUT_SECS") {
            match secs.trim().parse::<u64>() {
                Ok(n) if n > 0 => config.request_timeout_secs = n,
                _ => warn!(
                    "[W-REQUEST-TIMEOUT-INVALID] ignoring_invalid_timeout_value: {}",
                    secs
                ),
            }
        }

        config
    }
}

/// Newline-separated proxy URIs; blank lines and `#` comments are skipped.
pub fn parse_proxy_list(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
