use reqwest::Client;
use tokio::sync::Mutex;
use url::Url;

use crate::constants::{
    BEARER_TOKEN, GUEST_ACTIVATE_TIMEOUT_SECS, GUEST_ACTIVATE_URL, GUEST_TOKEN_TTL_SECS,
};
use crate::error::{GatewayError, GatewayResult};
use crate::upstream::cookies::CookieJar;

#[derive(Debug, Clone)]
pub struct GuestToken {
    pub value: String,
    pub acquired_at: i64,
}

impl GuestToken {
    pub fn is_expired(&self, now_secs: i64) -> bool {
        now_secs - self.acquired_at > GUEST_TOKEN_TTL_SECS
    }
}

/// Anonymous credential used for the login flow and unauthenticated reads.
/// Refreshed lazily: the cached token is reused until it is older than the
/// upstream's 3 hour window, then replaced on next use.
pub struct GuestAuth {
    activate_url: String,
    token: Mutex<Option<GuestToken>>,
}

impl Default for GuestAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl GuestAuth {
    pub fn new() -> Self {
        Self {
            activate_url: GUEST_ACTIVATE_URL.to_string(),
            token: Mutex::new(None),
        }
    }

    pub fn with_activate_url(url: impl Into<String>) -> Self {
        Self {
            activate_url: url.into(),
            token: Mutex::new(None),
        }
    }

    /// Returns a live guest token value, activating a new one if the cached
    /// token is absent or expired.
    pub async fn ensure_fresh(&self, client: &Client) -> GatewayResult<String> {
        let mut slot = self.token.lock().await;
        let now = chrono::Utc::now().timestamp();
        if let Some(token) = slot.as_ref() {
            if !token.is_expired(now) {
                return Ok(token.value.clone());
            }
            tracing::debug!("Guest token expired, reactivating");
        }
        let token = Self::activate(client, &self.activate_url).await?;
        let value = token.value.clone();
        *slot = Some(token);
        Ok(value)
    }

    /// Drops the cached token so the next use activates a fresh one. The
    /// login flow starts from a clean guest identity.
    pub async fn forget(&self) {
        *self.token.lock().await = None;
    }

    async fn activate(client: &Client, activate_url: &str) -> GatewayResult<GuestToken> {
        let response = client
            .post(activate_url)
            .header("authorization", format!("Bearer {BEARER_TOKEN}"))
            .timeout(std::time::Duration::from_secs(GUEST_ACTIVATE_TIMEOUT_SECS))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Upstream(format!(
                "guest activation returned {status}"
            )));
        }
        let body: serde_json::Value = response.json().await?;
        let value = body
            .get("guest_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                GatewayError::Upstream("guest activation response missing guest_token".to_string())
            })?
            .to_string();
        tracing::debug!("Activated guest token");
        Ok(GuestToken {
            value,
            acquired_at: chrono::Utc::now().timestamp(),
        })
    }
}

/// Minimum header set for unauthenticated upstream calls: bearer, guest
/// token, cookies, and csrf when the jar already carries `ct0`.
pub fn install_guest_headers(
    mut req: reqwest::RequestBuilder,
    guest_token: &str,
    jar: &CookieJar,
    url: &Url,
) -> reqwest::RequestBuilder {
    req = req
        .header("authorization", format!("Bearer {BEARER_TOKEN}"))
        .header("x-guest-token", guest_token);
    if let Some(cookie_header) = jar.header_for(url) {
        req = req.header("cookie", cookie_header);
    }
    if let Some(csrf) = jar.get("ct0") {
        req = req.header("x-csrf-token", csrf);
    }
    req
}
