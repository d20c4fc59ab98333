pub mod proxies;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::GatewayResult;
use crate::models::account::{now_ms, AccountState};
use crate::models::AppConfig;
use crate::store::AccountStore;
use crate::upstream::cookies::CookieJar;
use crate::upstream::login::{
    LoginContext, LoginEndpoints, MailCodeSource, TransactionIdProvider,
};
use crate::upstream::session::ActiveSession;
use crate::upstream::transport::Transport;

/// Some login rejections come from the upstream's Arkose challenge wall;
/// hammering the next candidate immediately tends to trip it too.
const ARKOSE_PAUSE_SECS: u64 = 5;

struct PoolInner {
    sessions: Vec<Arc<ActiveSession>>,
    next_idx: usize,
}

/// The warm pool of logged-in sessions.
///
/// Holds up to `target_size` sessions built from store candidates, hands them
/// out round-robin, and reacts to feedback from the rotating authenticator.
/// The inner mutex guards only the session list and the round-robin index;
/// logins and HTTP never run under it.
pub struct AccountPool {
    store: Arc<AccountStore>,
    transport: Arc<Transport>,
    endpoints: LoginEndpoints,
    tx_provider: Arc<dyn TransactionIdProvider>,
    mail_source: Arc<dyn MailCodeSource>,
    target_size: usize,
    proxy_list: Vec<String>,
    proxy_uri: Option<String>,
    inner: Mutex<PoolInner>,
    warmup_lock: tokio::sync::Mutex<()>,
    replenishing: AtomicBool,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

impl AccountPool {
    pub fn new(
        store: Arc<AccountStore>,
        transport: Arc<Transport>,
        config: &AppConfig,
        endpoints: LoginEndpoints,
        tx_provider: Arc<dyn TransactionIdProvider>,
        mail_source: Arc<dyn MailCodeSource>,
    ) -> Arc<Self> {
        let (ready_tx, ready_rx) = watch::channel(false);
        Arc::new(Self {
            store,
            transport,
            endpoints,
            tx_provider,
            mail_source,
            target_size: config.pool_size,
            proxy_list: config.proxy_list.clone(),
            proxy_uri: config.proxy_uri.clone(),
            inner: Mutex::new(PoolInner {
                sessions: Vec::new(),
                next_idx: 0,
            }),
            warmup_lock: tokio::sync::Mutex::new(()),
            replenishing: AtomicBool::new(false),
            ready_tx,
            ready_rx,
        })
    }

    pub fn active_len(&self) -> usize {
        self.lock_inner().sessions.len()
    }

    pub fn is_logged_in(&self) -> bool {
        self.active_len() > 0
    }

    /// Blocks until the first warm-up has completed (successfully or not).
    /// Idempotent; concurrent callers coalesce onto one in-flight warm-up.
    pub async fn ensure_initialized(self: &Arc<Self>) {
        if *self.ready_rx.borrow() {
            return;
        }
        match self.warmup_lock.try_lock() {
            Ok(_guard) => {
                self.warm_up().await;
                let _ = self.ready_tx.send(true);
            }
            Err(_) => {
                let mut rx = self.ready_rx.clone();
                // The in-flight warm-up flips the gate when it finishes.
                let _ = rx.wait_for(|ready| *ready).await;
            }
        }
    }

    /// Round-robin dispatch. Skips sessions whose account is inside a
    /// rate-limit window (clearing the field once the window has passed) and
    /// returns `None` only after a full revolution found nothing usable.
    pub async fn acquire(self: &Arc<Self>) -> GatewayResult<Option<Arc<ActiveSession>>> {
        self.ensure_initialized().await;

        let candidates: Vec<Arc<ActiveSession>> = {
            let mut inner = self.lock_inner();
            let n = inner.sessions.len();
            if n == 0 {
                return Ok(None);
            }
            let start = inner.next_idx % n;
            inner.next_idx = (start + 1) % n;
            (0..n)
                .map(|i| inner.sessions[(start + i) % n].clone())
                .collect()
        };

        let now = now_ms();
        for session in candidates {
            let mut usable = true;
            self.store.update(&session.username, |account| {
                if let Some(until) = account.rate_limited_until {
                    if until > now {
                        usable = false;
                    } else {
                        account.rate_limited_until = None;
                    }
                }
                if usable {
                    account.last_used = Some(now);
                }
            })?;
            if usable {
                return Ok(Some(session));
            }
            debug!("Session {} is rate limited, skipping", session.username);
        }
        Ok(None)
    }

    /// Sets (or clears, with `None`) the account's rate-limit window. The
    /// session stays in the active set and is merely skipped until expiry.
    pub fn mark_rate_limited(&self, username: &str, until_ms: Option<i64>) -> GatewayResult<()> {
        self.store.update(username, |account| {
            account.rate_limited_until = until_ms;
        })?;
        if let Some(until) = until_ms {
            info!("Account {} rate limited until {}", username, until);
        }
        Ok(())
    }

    /// Disqualifies the account and drops its session; replenishment runs in
    /// the background.
    pub fn mark_failed(self: &Arc<Self>, username: &str) -> GatewayResult<()> {
        self.store.update(username, |account| {
            account.mark_login_failed(now_ms());
        })?;
        self.remove_session(username);
        warn!("Account {} marked failed and dropped from pool", username);
        self.spawn_replenish();
        Ok(())
    }

    /// Removes the account from the store and the active set.
    pub fn delete(self: &Arc<Self>, username: &str) -> GatewayResult<bool> {
        let removed = self.store.delete(username)?;
        self.remove_session(username);
        if removed {
            info!("Account {} deleted", username);
            self.spawn_replenish();
        }
        Ok(removed)
    }

    /// Operator reset: clears every failure marker, reassigns proxies when a
    /// list is configured, and rebuilds the pool from scratch.
    pub async fn reset_failed(self: &Arc<Self>) -> GatewayResult<()> {
        let proxy_list = self.proxy_list.clone();
        self.store.update_all(|account| {
            account.reset_runtime_state();
            if !proxy_list.is_empty() {
                account.assigned_proxy = proxies::pick_proxy(&proxy_list);
            }
        })?;
        {
            let mut inner = self.lock_inner();
            inner.sessions.clear();
            inner.next_idx = 0;
        }
        info!("Account failure state reset, reinitializing pool");
        self.spawn_replenish();
        Ok(())
    }

    /// Forces a pool rebuild without clearing failure markers.
    pub fn force_rotation(self: &Arc<Self>) {
        {
            let mut inner = self.lock_inner();
            inner.sessions.clear();
            inner.next_idx = 0;
        }
        self.spawn_replenish();
    }

    /// At most one replenishment is in flight; further triggers while it
    /// runs are absorbed.
    pub fn spawn_replenish(self: &Arc<Self>) {
        if self.replenishing.swap(true, Ordering::SeqCst) {
            return;
        }
        let pool = self.clone();
        tokio::spawn(async move {
            let _guard = pool.warmup_lock.lock().await;
            pool.warm_up().await;
            pool.replenishing.store(false, Ordering::SeqCst);
            let _ = pool.ready_tx.send(true);
        });
    }

    /// Fills the pool toward `target_size` from store candidates: not failed,
    /// least recently used first, unused accounts ahead of everything.
    async fn warm_up(self: &Arc<Self>) {
        let candidates = self.store.login_candidates();
        let mut attempted = 0usize;
        for candidate in candidates {
            if self.active_len() >= self.target_size {
                break;
            }
            let username = candidate.username().to_string();
            if self.has_session(&username) {
                continue;
            }
            attempted += 1;
            match self.warm_one(&candidate).await {
                Ok(session) => {
                    let mut inner = self.lock_inner();
                    inner.sessions.push(session);
                    info!(
                        "Session for {} is warm ({}/{})",
                        username,
                        inner.sessions.len(),
                        self.target_size
                    );
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!("Login failed for {}: {}", username, message);
                    if let Err(store_err) = self.store.update(&username, |account| {
                        account.mark_login_failed(now_ms());
                    }) {
                        warn!("Failed to persist login failure for {}: {}", username, store_err);
                    }
                    if message.to_lowercase().contains("arkose") {
                        warn!(
                            "Arkose rejection for {}, pausing {}s before next candidate",
                            username, ARKOSE_PAUSE_SECS
                        );
                        tokio::time::sleep(std::time::Duration::from_secs(ARKOSE_PAUSE_SECS)).await;
                    }
                }
            }
        }
        info!(
            "Pool warm-up finished: {} active of {} target ({} candidates tried)",
            self.active_len(),
            self.target_size,
            attempted
        );
    }

    /// Logs one candidate in: seeded-cookie fast path first, interactive
    /// flow otherwise. On success the refreshed session cookie and runtime
    /// state are written back to the store.
    async fn warm_one(
        self: &Arc<Self>,
        candidate: &AccountState,
    ) -> GatewayResult<Arc<ActiveSession>> {
        let username = candidate.username().to_string();
        let proxy = self.assigned_proxy_for(candidate)?;
        let client = self.transport.client_for(proxy.as_deref())?;
        let ctx = LoginContext {
            client: &client,
            endpoints: &self.endpoints,
            tx_provider: self.tx_provider.as_ref(),
            mail_source: self.mail_source.as_ref(),
        };

        let mut jar = CookieJar::new();
        let mut logged_in = false;
        if let Some(token) = candidate.credential.auth_token.as_deref() {
            match ctx.login_with_token(&mut jar, token).await {
                Ok(()) => {
                    debug!("Seeded token accepted for {}", username);
                    logged_in = true;
                }
                Err(e) => {
                    warn!(
                        "Seeded token rejected for {} ({}), falling back to interactive login",
                        username, e
                    );
                    self.store.update(&username, |account| {
                        account.credential.auth_token = None;
                    })?;
                    jar = CookieJar::new();
                }
            }
        }
        if !logged_in {
            ctx.login(&mut jar, &candidate.credential).await?;
        }

        let refreshed_token = jar.get("auth_token").map(str::to_string);
        self.store.update(&username, |account| {
            account.mark_working(now_ms());
            if refreshed_token.is_some() {
                account.credential.auth_token = refreshed_token.clone();
            }
        })?;
        Ok(Arc::new(ActiveSession::new(username, jar, proxy)))
    }

    /// Sticky proxy for the account: keep an existing assignment, otherwise
    /// draw one from the list and persist it, otherwise the single PROXY_URI.
    fn assigned_proxy_for(&self, candidate: &AccountState) -> GatewayResult<Option<String>> {
        if let Some(proxy) = candidate.assigned_proxy.as_ref() {
            return Ok(Some(proxy.clone()));
        }
        if !self.proxy_list.is_empty() {
            let picked = proxies::pick_proxy(&self.proxy_list);
            if let Some(proxy) = picked.clone() {
                self.store.update(candidate.username(), |account| {
                    account.assigned_proxy = Some(proxy.clone());
                })?;
            }
            return Ok(picked);
        }
        Ok(self.proxy_uri.clone())
    }

    fn has_session(&self, username: &str) -> bool {
        self.lock_inner()
            .sessions
            .iter()
            .any(|s| s.username == username)
    }

    fn remove_session(&self, username: &str) {
        let mut inner = self.lock_inner();
        inner.sessions.retain(|s| s.username != username);
        if !inner.sessions.is_empty() {
            inner.next_idx %= inner.sessions.len();
        } else {
            inner.next_idx = 0;
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
