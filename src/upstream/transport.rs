use std::time::Duration;

use dashmap::DashMap;
use reqwest::Client;

use crate::constants::USER_AGENT;
use crate::error::{GatewayError, GatewayResult};

/// Outbound HTTP client factory.
///
/// One `reqwest::Client` per proxy URI, cached so connection pools are
/// reused across sessions bound to the same proxy. Retry policy lives in
/// the rotating authenticator; this layer never retries.
pub struct Transport {
    default_client: Client,
    proxied: DashMap<String, Client>,
    timeout: Duration,
}

impl Transport {
    pub fn new(timeout: Duration) -> GatewayResult<Self> {
        let default_client = Self::build_client(timeout, None)
            .map_err(|e| GatewayError::Config(format!("failed_to_build_http_client: {e}")))?;
        Ok(Self {
            default_client,
            proxied: DashMap::new(),
            timeout,
        })
    }

    /// Client routed through `proxy`, or the direct client when `None`.
    pub fn client_for(&self, proxy: Option<&str>) -> GatewayResult<Client> {
        let Some(proxy_uri) = proxy else {
            return Ok(self.default_client.clone());
        };
        if let Some(client) = self.proxied.get(proxy_uri) {
            return Ok(client.clone());
        }
        let client = Self::build_client(self.timeout, Some(proxy_uri)).map_err(|e| {
            GatewayError::Config(format!("failed_to_build_proxied_client ({proxy_uri}): {e}"))
        })?;
        self.proxied.insert(proxy_uri.to_string(), client.clone());
        tracing::debug!("Built upstream client for proxy {}", proxy_uri);
        Ok(client)
    }

    fn build_client(timeout: Duration, proxy: Option<&str>) -> Result<Client, reqwest::Error> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(timeout)
            .user_agent(USER_AGENT.as_str());
        if let Some(uri) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(uri)?);
        }
        builder.build()
    }
}
