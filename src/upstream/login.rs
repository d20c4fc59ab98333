use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};
use url::Url;

use crate::constants::{GUEST_ACTIVATE_URL, LOGIN_SCRUB_COOKIES, ONBOARDING_TASK_URL, WEB_BASE};
use crate::error::{GatewayResult, LoginError};
use crate::models::account::AccountCredential;
use crate::upstream::cookies::CookieJar;
use crate::upstream::guest::{install_guest_headers, GuestAuth};
use crate::upstream::totp::totp_code;

const TWO_FACTOR_MAX_ATTEMPTS: usize = 3;
const TWO_FACTOR_BACKOFF_BASE_MS: u64 = 2000;
/// Substring the upstream uses to reject a stale TOTP code.
const TWO_FACTOR_INVALID_MARKER: &str = "verification code is invalid";

/// Generates the anti-bot `X-Client-Transaction-Id` header. The algorithm is
/// deliberately external to this crate; login proceeds without the header
/// when the provider has nothing to offer.
#[async_trait]
pub trait TransactionIdProvider: Send + Sync {
    async fn transaction_id(&self, method: &str, path: &str) -> Option<String>;
}

/// Default provider: no header.
pub struct NoTransactionId;

#[async_trait]
impl TransactionIdProvider for NoTransactionId {
    async fn transaction_id(&self, _method: &str, _path: &str) -> Option<String> {
        None
    }
}

/// Fetches an emailed confirmation code during the `LoginAcid` challenge.
/// Backed by an IMAP helper in production deployments.
#[async_trait]
pub trait MailCodeSource: Send + Sync {
    async fn fetch_code(&self, email: &str, email_password: &str) -> GatewayResult<Option<String>>;
}

/// Default source: no mailbox access configured.
pub struct NoMailSource;

#[async_trait]
impl MailCodeSource for NoMailSource {
    async fn fetch_code(&self, _email: &str, _email_password: &str) -> GatewayResult<Option<String>> {
        Ok(None)
    }
}

/// Named steps of the upstream's onboarding flow. Anything the machine does
/// not recognize aborts the flow rather than being guessed at.
#[derive(Debug, Clone, PartialEq)]
pub enum Subtask {
    JsInstrumentation,
    EnterUserIdentifier,
    EnterAlternateIdentifier,
    EnterPassword,
    DuplicationCheck,
    TwoFactorChallenge,
    Acid,
    Success,
    Deny,
    Unknown(String),
}

impl Subtask {
    pub fn from_id(id: &str) -> Self {
        match id {
            "LoginJsInstrumentationSubtask" => Subtask::JsInstrumentation,
            "LoginEnterUserIdentifierSSO" => Subtask::EnterUserIdentifier,
            "LoginEnterAlternateIdentifierSubtask" => Subtask::EnterAlternateIdentifier,
            "LoginEnterPassword" => Subtask::EnterPassword,
            "AccountDuplicationCheck" => Subtask::DuplicationCheck,
            "LoginTwoFactorAuthChallenge" => Subtask::TwoFactorChallenge,
            "LoginAcid" => Subtask::Acid,
            "LoginSuccessSubtask" => Subtask::Success,
            "DenyLoginSubtask" => Subtask::Deny,
            other => Subtask::Unknown(other.to_string()),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Subtask::JsInstrumentation => "LoginJsInstrumentationSubtask",
            Subtask::EnterUserIdentifier => "LoginEnterUserIdentifierSSO",
            Subtask::EnterAlternateIdentifier => "LoginEnterAlternateIdentifierSubtask",
            Subtask::EnterPassword => "LoginEnterPassword",
            Subtask::DuplicationCheck => "AccountDuplicationCheck",
            Subtask::TwoFactorChallenge => "LoginTwoFactorAuthChallenge",
            Subtask::Acid => "LoginAcid",
            Subtask::Success => "LoginSuccessSubtask",
            Subtask::Deny => "DenyLoginSubtask",
            Subtask::Unknown(id) => id,
        }
    }
}

/// Upstream URLs the login path talks to, overridable so tests can script
/// the whole flow against a local server.
#[derive(Debug, Clone)]
pub struct LoginEndpoints {
    pub task_url: String,
    pub guest_activate_url: String,
    pub home_url: String,
    pub probe_url: String,
}

impl Default for LoginEndpoints {
    fn default() -> Self {
        Self {
            task_url: ONBOARDING_TASK_URL.to_string(),
            guest_activate_url: GUEST_ACTIVATE_URL.to_string(),
            home_url: format!("{WEB_BASE}/home"),
            probe_url: crate::api::graphql::viewer_probe_url(),
        }
    }
}

/// Drives one login attempt for one account. Holds the collaborators and the
/// per-proxy HTTP client; the jar being populated belongs to the caller.
pub struct LoginContext<'a> {
    pub client: &'a Client,
    pub endpoints: &'a LoginEndpoints,
    pub tx_provider: &'a dyn TransactionIdProvider,
    pub mail_source: &'a dyn MailCodeSource,
}

struct FlowState {
    flow_token: String,
    guest_token: String,
}

impl<'a> LoginContext<'a> {
    /// Runs the interactive onboarding flow until a terminal subtask.
    pub async fn login(
        &self,
        jar: &mut CookieJar,
        credential: &AccountCredential,
    ) -> Result<(), LoginError> {
        jar.scrub(LOGIN_SCRUB_COOKIES);

        let guest = GuestAuth::with_activate_url(self.endpoints.guest_activate_url.clone());
        let guest_token = guest
            .ensure_fresh(self.client)
            .await
            .map_err(|e| LoginError::Transient(format!("guest activation failed: {e}")))?;

        info!("Starting login flow for {}", credential.username);
        let mut flow = FlowState {
            flow_token: String::new(),
            guest_token,
        };

        let init_payload = json!({
            "input_flow_data": {
                "flow_context": {
                    "debug_overrides": {},
                    "start_location": { "location": "splash_screen" }
                }
            },
            "subtask_versions": {}
        });
        let mut body = self
            .exec_task(jar, &mut flow, init_payload, Some("login"))
            .await?;

        loop {
            let Some((subtask, subtask_body)) = next_subtask(&body) else {
                return Err(LoginError::Protocol(
                    "flow response carried no subtask".to_string(),
                ));
            };
            debug!(
                "Login flow for {}: subtask {}",
                credential.username,
                subtask.id()
            );

            let payload = match &subtask {
                Subtask::Success => {
                    info!("Login flow for {} succeeded", credential.username);
                    return Ok(());
                }
                Subtask::Deny => {
                    return Err(LoginError::Fatal("login denied by upstream".to_string()));
                }
                Subtask::Unknown(id) => {
                    return Err(LoginError::Fatal(format!("unknown_subtask: {id}")));
                }
                Subtask::JsInstrumentation => json!({
                    "subtask_id": subtask.id(),
                    "js_instrumentation": { "response": "{}", "link": "next_link" }
                }),
                Subtask::EnterUserIdentifier => json!({
                    "subtask_id": subtask.id(),
                    "settings_list": {
                        "setting_responses": [{
                            "key": "user_identifier",
                            "response_data": {
                                "text_data": { "result": credential.username }
                            }
                        }],
                        "link": "next_link"
                    }
                }),
                Subtask::EnterAlternateIdentifier => {
                    if credential.email.is_empty() {
                        return Err(LoginError::Protocol(
                            "upstream asked for an alternate identifier but the account has no email"
                                .to_string(),
                        ));
                    }
                    json!({
                        "subtask_id": subtask.id(),
                        "enter_text": { "text": credential.email, "link": "next_link" }
                    })
                }
                Subtask::EnterPassword => json!({
                    "subtask_id": subtask.id(),
                    "enter_password": { "password": credential.password, "link": "next_link" }
                }),
                Subtask::DuplicationCheck => json!({
                    "subtask_id": subtask.id(),
                    "check_logged_in_account": { "link": "AccountDuplicationCheck_false" }
                }),
                Subtask::TwoFactorChallenge => {
                    body = self
                        .handle_two_factor(jar, &mut flow, credential)
                        .await?;
                    continue;
                }
                Subtask::Acid => self.acid_payload(credential, &subtask_body).await?,
            };

            body = self.exec_task(jar, &mut flow, payload, None).await?;
        }
    }

    /// Fast path for accounts imported with a pre-seeded session cookie:
    /// install it, pull the home page to pick up a csrf cookie, then probe an
    /// authenticated endpoint.
    pub async fn login_with_token(
        &self,
        jar: &mut CookieJar,
        auth_token: &str,
    ) -> Result<(), LoginError> {
        jar.set("auth_token", auth_token, Some(".twitter.com"));

        let home_url = Url::parse(&self.endpoints.home_url)
            .map_err(|e| LoginError::Protocol(format!("bad home url: {e}")))?;
        let mut req = self.client.get(home_url.clone());
        if let Some(cookie_header) = jar.header_for(&home_url) {
            req = req.header("cookie", cookie_header);
        }
        let response = req
            .send()
            .await
            .map_err(|e| LoginError::Transient(format!("home page fetch failed: {e}")))?;
        jar.absorb(&home_url, &response);

        let probe_url = Url::parse(&self.endpoints.probe_url)
            .map_err(|e| LoginError::Protocol(format!("bad probe url: {e}")))?;
        let mut req = self
            .client
            .get(probe_url.clone())
            .header(
                "authorization",
                format!("Bearer {}", crate::constants::BEARER_TOKEN),
            )
            .header("x-twitter-auth-type", "OAuth2Session");
        if let Some(cookie_header) = jar.header_for(&probe_url) {
            req = req.header("cookie", cookie_header);
        }
        if let Some(csrf) = jar.get("ct0") {
            req = req.header("x-csrf-token", csrf);
        }
        let response = req
            .send()
            .await
            .map_err(|e| LoginError::Transient(format!("session probe failed: {e}")))?;
        jar.absorb(&probe_url, &response);

        let status = response.status();
        if !status.is_success() {
            return Err(LoginError::Protocol(format!(
                "session probe returned {status}"
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| LoginError::Protocol(format!("session probe body unreadable: {e}")))?;
        if let Some(message) = first_error_message(&body) {
            return Err(LoginError::Protocol(format!(
                "session probe rejected: {message}"
            )));
        }
        debug!("Seeded session cookie verified");
        Ok(())
    }

    async fn handle_two_factor(
        &self,
        jar: &mut CookieJar,
        flow: &mut FlowState,
        credential: &AccountCredential,
    ) -> Result<Value, LoginError> {
        let Some(secret) = credential.two_factor_secret.as_deref() else {
            return Err(LoginError::Fatal(
                "upstream demanded a TOTP code but the account has no two-factor secret"
                    .to_string(),
            ));
        };

        for attempt in 1..=TWO_FACTOR_MAX_ATTEMPTS {
            let now = chrono::Utc::now().timestamp() as u64;
            let code = totp_code(secret, now)
                .map_err(|e| LoginError::Fatal(format!("TOTP generation failed: {e}")))?;
            let payload = json!({
                "subtask_id": Subtask::TwoFactorChallenge.id(),
                "enter_text": { "text": code, "link": "next_link" }
            });
            match self.exec_task(jar, flow, payload, None).await {
                Ok(body) => return Ok(body),
                Err(LoginError::Protocol(message))
                    if message.to_lowercase().contains(TWO_FACTOR_INVALID_MARKER)
                        && attempt < TWO_FACTOR_MAX_ATTEMPTS =>
                {
                    let delay_ms = TWO_FACTOR_BACKOFF_BASE_MS * attempt as u64;
                    warn!(
                        "TOTP code rejected for {} (attempt {}/{}), retrying in {}ms",
                        credential.username, attempt, TWO_FACTOR_MAX_ATTEMPTS, delay_ms
                    );
                    sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(LoginError::Protocol(message))
                    if message.to_lowercase().contains(TWO_FACTOR_INVALID_MARKER) =>
                {
                    return Err(LoginError::Fatal(format!(
                        "two-factor retries exhausted: {message}"
                    )));
                }
                Err(e) => return Err(e),
            }
        }
        Err(LoginError::Fatal("two-factor retries exhausted".to_string()))
    }

    async fn acid_payload(
        &self,
        credential: &AccountCredential,
        subtask_body: &Value,
    ) -> Result<Value, LoginError> {
        let prompt = primary_text(subtask_body).unwrap_or_default().to_lowercase();
        let wants_code = prompt.contains("code") || prompt.contains("verification");
        let text = if wants_code {
            match self
                .mail_source
                .fetch_code(&credential.email, &credential.email_password)
                .await
            {
                Ok(Some(code)) => code,
                Ok(None) => {
                    return Err(LoginError::Protocol(
                        "upstream demanded an emailed code but no mail source is configured"
                            .to_string(),
                    ))
                }
                Err(e) => {
                    return Err(LoginError::Transient(format!(
                        "mail code fetch failed: {e}"
                    )))
                }
            }
        } else {
            credential.email.clone()
        };
        Ok(json!({
            "subtask_id": Subtask::Acid.id(),
            "enter_text": { "text": text, "link": "next_link" }
        }))
    }

    /// One round-trip of the task protocol: send either the flow-open payload
    /// or a single subtask response, absorb cookies, check `errors[]`, and
    /// roll the flow token forward.
    async fn exec_task(
        &self,
        jar: &mut CookieJar,
        flow: &mut FlowState,
        payload: Value,
        flow_name: Option<&str>,
    ) -> Result<Value, LoginError> {
        let mut url = Url::parse(&self.endpoints.task_url)
            .map_err(|e| LoginError::Protocol(format!("bad task url: {e}")))?;
        if let Some(name) = flow_name {
            url.query_pairs_mut().append_pair("flow_name", name);
        }

        let body = if flow.flow_token.is_empty() {
            payload
        } else {
            json!({
                "flow_token": flow.flow_token,
                "subtask_inputs": [payload]
            })
        };

        let mut req = install_guest_headers(
            self.client.post(url.clone()),
            &flow.guest_token,
            jar,
            &url,
        )
        .json(&body);
        if let Some(txid) = self
            .tx_provider
            .transaction_id("POST", "/1.1/onboarding/task.json")
            .await
        {
            req = req.header("x-client-transaction-id", txid);
        }

        let response = req
            .send()
            .await
            .map_err(|e| LoginError::Transient(format!("task request failed: {e}")))?;
        jar.absorb(&url, &response);

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| LoginError::Protocol(format!("task response unreadable: {e}")))?;

        if let Some(message) = first_error_message(&body) {
            return Err(LoginError::Protocol(message));
        }
        if !status.is_success() {
            return Err(LoginError::Protocol(format!(
                "task endpoint returned {status}"
            )));
        }

        if let Some(token) = body.get("flow_token").and_then(Value::as_str) {
            flow.flow_token = token.to_string();
        }
        Ok(body)
    }
}

fn next_subtask(body: &Value) -> Option<(Subtask, Value)> {
    let subtask = body.get("subtasks")?.as_array()?.first()?;
    let id = subtask.get("subtask_id")?.as_str()?;
    Some((Subtask::from_id(id), subtask.clone()))
}

/// First message of a response's `errors[]`, if any.
pub fn first_error_message(body: &Value) -> Option<String> {
    body.get("errors")?
        .as_array()?
        .first()?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

/// Finds the first `primary_text` anywhere in a subtask body. The nesting
/// varies between subtask kinds, so this walks instead of hardcoding paths.
fn primary_text(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            if let Some(primary) = map.get("primary_text") {
                if let Some(text) = primary.as_str() {
                    return Some(text.to_string());
                }
                if let Some(text) = primary.get("text").and_then(Value::as_str) {
                    return Some(text.to_string());
                }
            }
            map.values().find_map(primary_text)
        }
        Value::Array(items) => items.iter().find_map(primary_text),
        _ => None,
    }
}
