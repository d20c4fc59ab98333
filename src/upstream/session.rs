use std::sync::Mutex;

use url::Url;

use crate::constants::BEARER_TOKEN;
use crate::upstream::cookies::CookieJar;

/// A live, logged-in upstream identity: the jar produced by a successful
/// login plus the proxy the account is pinned to.
///
/// Sessions are shared across concurrent downstream requests (`Arc` in the
/// pool); the jar has its own lock so two requests drawing the same session
/// serialize only around cookie access.
pub struct ActiveSession {
    pub username: String,
    pub proxy: Option<String>,
    jar: Mutex<CookieJar>,
}

impl ActiveSession {
    pub fn new(username: impl Into<String>, jar: CookieJar, proxy: Option<String>) -> Self {
        Self {
            username: username.into(),
            proxy,
            jar: Mutex::new(jar),
        }
    }

    pub fn csrf_token(&self) -> Option<String> {
        self.lock_jar().get("ct0").map(str::to_string)
    }

    pub fn auth_token(&self) -> Option<String> {
        self.lock_jar().get("auth_token").map(str::to_string)
    }

    /// Installs the authenticated header set: fixed bearer, cookies filtered
    /// to the destination domain, csrf echo of `ct0`, and the web client's
    /// active-user and language markers.
    pub fn install_headers(&self, mut req: reqwest::RequestBuilder, url: &Url) -> reqwest::RequestBuilder {
        let jar = self.lock_jar();
        req = req
            .header("authorization", format!("Bearer {BEARER_TOKEN}"))
            .header("x-twitter-auth-type", "OAuth2Session")
            .header("x-twitter-active-user", "yes")
            .header("x-twitter-client-language", "en");
        if let Some(cookie_header) = jar.header_for(url) {
            req = req.header("cookie", cookie_header);
        }
        if let Some(csrf) = jar.get("ct0") {
            req = req.header("x-csrf-token", csrf);
        }
        req
    }

    /// Folds a response's Set-Cookie headers back into the session jar.
    pub fn absorb_response(&self, url: &Url, response: &reqwest::Response) {
        self.lock_jar().absorb(url, response);
    }

    pub fn with_jar<R>(&self, f: impl FnOnce(&CookieJar) -> R) -> R {
        f(&self.lock_jar())
    }

    fn lock_jar(&self) -> std::sync::MutexGuard<'_, CookieJar> {
        self.jar
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
