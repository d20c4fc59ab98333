use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock};

static ENV_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();

/// Exclusive access to the process environment for one test.
///
/// Tests that read `AppConfig::from_env` would otherwise race through the
/// shared environment; holding a sandbox serializes them, and every variable
/// touched through it is restored to its pre-test value on drop.
pub(crate) struct EnvSandbox {
    _serialized: MutexGuard<'static, ()>,
    touched: HashMap<&'static str, Option<String>>,
}

impl EnvSandbox {
    pub(crate) fn acquire() -> Self {
        let guard = ENV_MUTEX
            .get_or_init(Mutex::default)
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Self {
            _serialized: guard,
            touched: HashMap::new(),
        }
    }

    pub(crate) fn set(&mut self, key: &'static str, value: &str) {
        self.snapshot(key);
        std::env::set_var(key, value);
    }

    #[allow(dead_code)]
    pub(crate) fn unset(&mut self, key: &'static str) {
        self.snapshot(key);
        std::env::remove_var(key);
    }

    /// Only the first touch of a key records its original value, so repeated
    /// writes within one test still restore the true pre-test state.
    fn snapshot(&mut self, key: &'static str) {
        self.touched
            .entry(key)
            .or_insert_with(|| std::env::var(key).ok());
    }
}

impl Drop for EnvSandbox {
    fn drop(&mut self) {
        for (key, original) in self.touched.drain() {
            match original {
                Some(value) => std::env::set_var(key, value),
                None => std::env::remove_var(key),
            }
        }
    }
}

/// Shared scaffolding for tests that need a warm pool talking to a scripted
/// upstream: a wiremock server with seeded-token logins pre-mounted, the
/// stores on a temp dir, and a `ScraperApi` pointed at the mock.
#[cfg(test)]
pub(crate) mod harness {
    use std::sync::Arc;

    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::api::ScraperApi;
    use crate::models::account::AccountCredential;
    use crate::models::AppConfig;
    use crate::pool::AccountPool;
    use crate::rotator::RotatingAuthenticator;
    use crate::store::{AccountStore, IssuedTokenStore};
    use crate::upstream::login::{LoginEndpoints, NoMailSource, NoTransactionId};
    use crate::upstream::transport::Transport;

    pub(crate) struct TestUpstream {
        pub server: MockServer,
        pub store: Arc<AccountStore>,
        pub tokens: Arc<IssuedTokenStore>,
        pub pool: Arc<AccountPool>,
        pub rotator: Arc<RotatingAuthenticator>,
        pub api: ScraperApi,
        pub dir: TempDir,
    }

    pub(crate) fn seeded_credential(name: &str) -> AccountCredential {
        AccountCredential {
            username: name.to_string(),
            password: "pw".to_string(),
            email: format!("{name}@example.com"),
            email_password: "ep".to_string(),
            auth_token: Some(format!("tok-{name}")),
            two_factor_secret: None,
        }
    }

    pub(crate) fn login_endpoints(server: &MockServer) -> LoginEndpoints {
        LoginEndpoints {
            task_url: format!("{}/1.1/onboarding/task.json", server.uri()),
            guest_activate_url: format!("{}/1.1/guest/activate.json", server.uri()),
            home_url: format!("{}/home", server.uri()),
            probe_url: format!("{}/graphql/viewer", server.uri()),
        }
    }

    pub(crate) async fn mount_token_login(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/home"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("set-cookie", "ct0=csrf; Path=/"),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/graphql/viewer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
            .mount(server)
            .await;
    }

    pub(crate) async fn upstream_with_accounts(names: &[&str]) -> TestUpstream {
        let server = MockServer::start().await;
        mount_token_login(&server).await;

        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(
            AccountStore::open(dir.path().join("accounts.json")).expect("open account store"),
        );
        store
            .add(names.iter().map(|n| seeded_credential(n)).collect())
            .expect("seed accounts");
        let tokens = Arc::new(
            IssuedTokenStore::open(dir.path().join("tokens.json")).expect("open token store"),
        );

        let transport =
            Arc::new(Transport::new(std::time::Duration::from_secs(5)).expect("transport"));
        let pool = AccountPool::new(
            store.clone(),
            transport.clone(),
            &AppConfig::default(),
            login_endpoints(&server),
            Arc::new(NoTransactionId),
            Arc::new(NoMailSource),
        );
        if !names.is_empty() {
            pool.ensure_initialized().await;
            assert_eq!(pool.active_len(), names.len(), "warm-up should fill the pool");
        }
        let rotator = RotatingAuthenticator::new(pool.clone(), transport.clone());
        let api = ScraperApi::with_bases(
            rotator.clone(),
            transport,
            format!("{}/i/api/graphql", server.uri()),
            format!("{}/1.1/guest/activate.json", server.uri()),
        );
        TestUpstream {
            server,
            store,
            tokens,
            pool,
            rotator,
            api,
            dir,
        }
    }
}
