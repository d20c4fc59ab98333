use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};
use crate::models::account::now_ms;

/// A bearer token this gateway hands to a downstream client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    pub id: String,
    pub name: String,
    pub value: String,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<i64>,
}

/// Single-document JSON store for downstream tokens. Same persistence
/// contract as the account store: serialized writes, temp file + rename.
pub struct IssuedTokenStore {
    path: PathBuf,
    inner: Mutex<Vec<IssuedToken>>,
}

impl IssuedTokenStore {
    pub fn open(path: impl Into<PathBuf>) -> GatewayResult<Self> {
        let path = path.into();
        let tokens = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str::<Vec<IssuedToken>>(&content)
                .map_err(|e| GatewayError::Store(format!("failed_to_parse_token_db: {e}")))?
        } else {
            Vec::new()
        };
        info!(
            "Issued-token store opened: {} ({} tokens)",
            path.display(),
            tokens.len()
        );
        Ok(Self {
            path,
            inner: Mutex::new(tokens),
        })
    }

    pub fn create(&self, name: &str) -> GatewayResult<IssuedToken> {
        let token = IssuedToken {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            value: random_token_value(),
            created_at: now_ms(),
            last_used: None,
        };
        let mut tokens = self.lock();
        tokens.push(token.clone());
        Self::persist(&self.path, &tokens)?;
        Ok(token)
    }

    pub fn list(&self) -> Vec<IssuedToken> {
        self.lock().clone()
    }

    pub fn validate(&self, value: &str) -> bool {
        self.lock().iter().any(|t| t.value == value)
    }

    /// Stamps `last_used` on the matching token. Silent when unknown.
    pub fn touch(&self, value: &str) -> GatewayResult<()> {
        let mut tokens = self.lock();
        let Some(token) = tokens.iter_mut().find(|t| t.value == value) else {
            return Ok(());
        };
        token.last_used = Some(now_ms());
        Self::persist(&self.path, &tokens)
    }

    pub fn revoke(&self, id: &str) -> GatewayResult<bool> {
        let mut tokens = self.lock();
        let before = tokens.len();
        tokens.retain(|t| t.id != id);
        let removed = tokens.len() != before;
        if removed {
            Self::persist(&self.path, &tokens)?;
        }
        Ok(removed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<IssuedToken>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(path: &Path, tokens: &[IssuedToken]) -> GatewayResult<()> {
        let content = serde_json::to_string_pretty(tokens)
            .map_err(|e| GatewayError::Store(format!("failed_to_serialize_tokens: {e}")))?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, content)
            .map_err(|e| GatewayError::Store(format!("failed_to_write_temp_token_file: {e}")))?;
        fs::rename(&temp_path, path)
            .map_err(|e| GatewayError::Store(format!("failed_to_replace_token_file: {e}")))
    }
}

fn random_token_value() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}
