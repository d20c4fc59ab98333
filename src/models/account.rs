use serde::{Deserialize, Serialize};

/// Operator-supplied login material for one upstream account. Immutable
/// after import; runtime bookkeeping lives on [`AccountState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountCredential {
    pub username: String,
    pub password: String,
    pub email: String,
    pub email_password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub two_factor_secret: Option<String>,
}

/// Last observed liveness of the account's session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenState {
    #[default]
    Unknown,
    Working,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountState {
    #[serde(flatten)]
    pub credential: AccountCredential,
    #[serde(default)]
    pub token_state: TokenState,
    #[serde(default)]
    pub failed_login: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limited_until: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_proxy: Option<String>,
}

impl AccountState {
    pub fn new(credential: AccountCredential) -> Self {
        Self {
            credential,
            token_state: TokenState::Unknown,
            failed_login: false,
            last_used: None,
            last_failed_at: None,
            rate_limited_until: None,
            assigned_proxy: None,
        }
    }

    pub fn username(&self) -> &str {
        &self.credential.username
    }

    /// Eligible as a warm-up candidate.
    pub fn loginable(&self) -> bool {
        !self.failed_login
    }

    pub fn mark_login_failed(&mut self, now_ms: i64) {
        self.failed_login = true;
        self.token_state = TokenState::Failed;
        self.last_failed_at = Some(now_ms);
    }

    pub fn mark_working(&mut self, now_ms: i64) {
        self.failed_login = false;
        self.token_state = TokenState::Working;
        self.last_used = Some(now_ms);
    }

    /// Clears every failure marker; used by the operator reset.
    pub fn reset_runtime_state(&mut self) {
        self.failed_login = false;
        self.token_state = TokenState::Unknown;
        self.rate_limited_until = None;
        self.last_failed_at = None;
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
