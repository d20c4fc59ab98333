use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("All accounts exhausted after {attempts} attempts for {url}")]
    ExhaustedAccounts { url: String, attempts: usize },

    #[error("Login failed: {0}")]
    Login(#[from] LoginError),

    /// The upstream answered but the body was not usable JSON, or was
    /// missing the structure every response of that endpoint carries.
    #[error("Upstream response unusable: {0}")]
    Upstream(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Upstream(e.to_string())
    }
}

impl Serialize for GatewayError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failure taxonomy of the interactive login flow.
///
/// `Transient` failures may be retried by a later warm-up pass; `Fatal`
/// failures mark the account as failed until an operator reset.
#[derive(Error, Debug)]
pub enum LoginError {
    #[error("transient login failure: {0}")]
    Transient(String),

    #[error("login protocol error: {0}")]
    Protocol(String),

    #[error("fatal login failure: {0}")]
    Fatal(String),
}

impl LoginError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, LoginError::Fatal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(LoginError::Fatal("denied".into()).is_fatal());
        assert!(!LoginError::Transient("socket".into()).is_fatal());
        assert!(!LoginError::Protocol("errors[]".into()).is_fatal());
    }

    #[test]
    fn exhausted_error_names_url_and_attempts() {
        let e = GatewayError::ExhaustedAccounts {
            url: "https://api.twitter.com/x".into(),
            attempts: 3,
        };
        let msg = e.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("https://api.twitter.com/x"));
    }
}
