use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::models::account::{now_ms, AccountCredential, AccountState};

/// Durable list of account records with mutable runtime state.
///
/// The whole list is one JSON document, rewritten on every mutation via a
/// temp file and rename so a crash can lose at most the latest update but
/// never corrupt the list. Writes are serialized by the inner mutex.
pub struct AccountStore {
    path: PathBuf,
    inner: Mutex<Vec<AccountState>>,
}

impl AccountStore {
    pub fn open(path: impl Into<PathBuf>) -> GatewayResult<Self> {
        let path = path.into();
        let accounts = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str::<Vec<AccountState>>(&content)
                .map_err(|e| GatewayError::Store(format!("failed_to_parse_account_state: {e}")))?
        } else {
            Vec::new()
        };
        info!(
            "Account store opened: {} ({} accounts)",
            path.display(),
            accounts.len()
        );
        Ok(Self {
            path,
            inner: Mutex::new(accounts),
        })
    }

    /// Adds records, idempotent by username. Returns how many were new.
    pub fn add(&self, records: Vec<AccountCredential>) -> GatewayResult<usize> {
        let mut accounts = self.lock();
        let mut added = 0;
        for credential in records {
            if accounts
                .iter()
                .any(|a| a.username() == credential.username)
            {
                warn!(
                    "Skipping duplicate account on import: {}",
                    credential.username
                );
                continue;
            }
            accounts.push(AccountState::new(credential));
            added += 1;
        }
        if added > 0 {
            Self::persist(&self.path, &accounts)?;
        }
        Ok(added)
    }

    pub fn delete(&self, username: &str) -> GatewayResult<bool> {
        let mut accounts = self.lock();
        let before = accounts.len();
        accounts.retain(|a| a.username() != username);
        let removed = accounts.len() != before;
        if removed {
            Self::persist(&self.path, &accounts)?;
        }
        Ok(removed)
    }

    pub fn snapshot(&self) -> Vec<AccountState> {
        self.lock().clone()
    }

    pub fn get(&self, username: &str) -> Option<AccountState> {
        self.lock()
            .iter()
            .find(|a| a.username() == username)
            .cloned()
    }

    /// Load-mutate-persist for a single account. Returns false when the
    /// username is unknown.
    pub fn update<F>(&self, username: &str, mutator: F) -> GatewayResult<bool>
    where
        F: FnOnce(&mut AccountState),
    {
        let mut accounts = self.lock();
        let Some(account) = accounts.iter_mut().find(|a| a.username() == username) else {
            return Ok(false);
        };
        mutator(account);
        Self::persist(&self.path, &accounts)?;
        Ok(true)
    }

    /// Applies a mutation to every account, persisting once.
    pub fn update_all<F>(&self, mut mutator: F) -> GatewayResult<()>
    where
        F: FnMut(&mut AccountState),
    {
        let mut accounts = self.lock();
        for account in accounts.iter_mut() {
            mutator(account);
        }
        Self::persist(&self.path, &accounts)
    }

    /// Warm-up candidates: not failed, least-recently-used first with
    /// never-used accounts ahead of everything.
    pub fn login_candidates(&self) -> Vec<AccountState> {
        let mut candidates: Vec<AccountState> = self
            .lock()
            .iter()
            .filter(|a| a.loginable())
            .cloned()
            .collect();
        candidates.sort_by_key(|a| a.last_used.unwrap_or(i64::MIN));
        candidates
    }

    pub fn mark_used(&self, username: &str) -> GatewayResult<bool> {
        self.update(username, |a| a.last_used = Some(now_ms()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<AccountState>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(path: &Path, accounts: &[AccountState]) -> GatewayResult<()> {
        let content = serde_json::to_string_pretty(accounts)
            .map_err(|e| GatewayError::Store(format!("failed_to_serialize_accounts: {e}")))?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, content)
            .map_err(|e| GatewayError::Store(format!("failed_to_write_temp_account_file: {e}")))?;
        fs::rename(&temp_path, path)
            .map_err(|e| GatewayError::Store(format!("failed_to_replace_account_file: {e}")))
    }
}
