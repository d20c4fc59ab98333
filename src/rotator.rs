use std::collections::HashSet;
use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::constants::RATE_LIMIT_FALLBACK_MS;
use crate::error::{GatewayError, GatewayResult};
use crate::models::account::now_ms;
use crate::pool::AccountPool;
use crate::upstream::transport::Transport;

/// A 200 body whose `errors[]` opens with this is the upstream's way of
/// telling an authenticated session it is no longer welcome.
const ACCESS_DENIED_MARKER: &str = "Authorization: Denied by access control";

/// What one session attempt told us. The first two verdicts are internal
/// rotation signals and never reach the downstream caller; the pool is fed
/// instead and the next session tried.
enum Verdict {
    /// Usable JSON body.
    Success(Value),
    /// 429; skip the session until the advertised reset.
    RateLimited { until_ms: i64 },
    /// 401/403, a network failure, or an access-control denial in the body.
    /// The session is dead; disqualify the account.
    SessionInvalid(String),
    /// Some other upstream status. Rotate, but leave the account alone.
    Rotate(String),
    /// A 2xx body that was not usable JSON. Surfaced as-is (502 downstream)
    /// so "upstream gave us nothing usable" stays distinct from "no account
    /// worked".
    Unusable(String),
}

/// Wraps the pool as a single upstream fetcher: pick a session, install its
/// headers, interpret the response, and rotate to another session on any
/// account-level failure. Success and final errors go back to the caller;
/// rate limits and dead sessions are fed back into the pool instead.
pub struct RotatingAuthenticator {
    pool: Arc<AccountPool>,
    transport: Arc<Transport>,
}

impl RotatingAuthenticator {
    pub fn new(pool: Arc<AccountPool>, transport: Arc<Transport>) -> Arc<Self> {
        Arc::new(Self { pool, transport })
    }

    pub fn pool(&self) -> &Arc<AccountPool> {
        &self.pool
    }

    pub fn is_logged_in(&self) -> bool {
        self.pool.is_logged_in()
    }

    /// Authenticated GET returning the upstream's JSON body.
    pub async fn get_json(&self, url: &Url) -> GatewayResult<Value> {
        let max_retries = self.pool.active_len().max(1);
        let mut tried: HashSet<String> = HashSet::new();
        let mut attempts = 0usize;
        let mut spins = 0usize;

        while attempts < max_retries {
            let Some(session) = self.pool.acquire().await? else {
                break;
            };
            if !tried.insert(session.username.clone()) {
                // Round-robin brought back a session we already used in this
                // call; once that happens the revolution is complete.
                spins += 1;
                if spins > max_retries {
                    break;
                }
                continue;
            }
            attempts += 1;

            match self.try_session(&session, url).await? {
                Verdict::Success(body) => return Ok(body),
                Verdict::RateLimited { until_ms } => {
                    debug!(
                        "429 for {} on {}, limited until {}",
                        session.username, url, until_ms
                    );
                    self.pool
                        .mark_rate_limited(&session.username, Some(until_ms))?;
                }
                Verdict::SessionInvalid(reason) => {
                    warn!("Session {} invalid on {}: {}", session.username, url, reason);
                    self.pool.mark_failed(&session.username)?;
                }
                Verdict::Rotate(reason) => {
                    // Not an account problem; try another session but leave
                    // this one alone.
                    warn!("Upstream trouble on {}: {}", url, reason);
                }
                Verdict::Unusable(reason) => {
                    return Err(GatewayError::Upstream(reason));
                }
            }
        }

        Err(GatewayError::ExhaustedAccounts {
            url: url.to_string(),
            attempts,
        })
    }

    /// One request on one session, classified per the rotation policy table.
    async fn try_session(
        &self,
        session: &crate::upstream::session::ActiveSession,
        url: &Url,
    ) -> GatewayResult<Verdict> {
        let client = self.transport.client_for(session.proxy.as_deref())?;
        let request = session.install_headers(client.get(url.clone()), url);
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Ok(Verdict::SessionInvalid(format!("network failure: {e}"))),
        };
        session.absorb_response(url, &response);

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let until_ms = rate_limit_reset_ms(&response)
                .unwrap_or_else(|| now_ms() + RATE_LIMIT_FALLBACK_MS);
            return Ok(Verdict::RateLimited { until_ms });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(Verdict::SessionInvalid(format!("upstream returned {status}")));
        }
        if !status.is_success() {
            return Ok(Verdict::Rotate(format!("upstream returned {status}")));
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) if e.is_decode() => {
                return Ok(Verdict::Unusable(format!("unparseable body from {url}: {e}")));
            }
            Err(e) => return Ok(Verdict::SessionInvalid(format!("body read failed: {e}"))),
        };

        if body_denies_access(&body) {
            return Ok(Verdict::SessionInvalid(
                "access-control denial in 200 body".to_string(),
            ));
        }
        Ok(Verdict::Success(body))
    }
}

fn rate_limit_reset_ms(response: &reqwest::Response) -> Option<i64> {
    response
        .headers()
        .get("x-rate-limit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(|epoch_secs| epoch_secs * 1000)
}

fn body_denies_access(body: &Value) -> bool {
    crate::api::parse::first_error_message(body)
        .map(|message| message.contains(ACCESS_DENIED_MARKER))
        .unwrap_or(false)
}
