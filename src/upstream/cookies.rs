use std::collections::BTreeMap;

use reqwest::header::SET_COOKIE;
use url::Url;

/// One stored cookie. Only the attributes this gateway acts on are kept;
/// everything else from the Set-Cookie line is dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
}

/// Per-session cookie store keyed by cookie name, with RFC 6265 style
/// domain matching on serialization.
///
/// The HTTP clients themselves are shared across sessions (one per proxy),
/// so cookies are never attached at the client level; each request gets its
/// header from the owning session's jar.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: BTreeMap<String, Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: &str, domain: Option<&str>) {
        self.cookies.insert(
            name.to_string(),
            Cookie {
                name: name.to_string(),
                value: value.to_string(),
                domain: domain.map(normalize_domain),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(|c| c.value.as_str())
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.cookies.remove(name).is_some()
    }

    pub fn scrub(&mut self, names: &[&str]) {
        for name in names {
            self.cookies.remove(*name);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Absorbs every Set-Cookie header of a response. Cookies cleared by the
    /// server (empty value or `Max-Age=0`) are removed from the jar.
    pub fn absorb(&mut self, url: &Url, response: &reqwest::Response) {
        let fallback_domain = url.host_str().map(str::to_string);
        for header in response.headers().get_all(SET_COOKIE) {
            let Ok(raw) = header.to_str() else { continue };
            self.absorb_set_cookie(raw, fallback_domain.as_deref());
        }
    }

    /// Parses a single Set-Cookie line.
    pub fn absorb_set_cookie(&mut self, raw: &str, fallback_domain: Option<&str>) {
        let mut segments = raw.split(';');
        let Some(pair) = segments.next() else { return };
        let Some((name, value)) = pair.split_once('=') else {
            return;
        };
        let name = name.trim();
        let value = value.trim().trim_matches('"');
        if name.is_empty() {
            return;
        }

        let mut domain = fallback_domain.map(str::to_string);
        let mut expired = value.is_empty();
        for attr in segments {
            let attr = attr.trim();
            if let Some((key, attr_value)) = attr.split_once('=') {
                match key.trim().to_ascii_lowercase().as_str() {
                    "domain" => domain = Some(attr_value.trim().to_string()),
                    "max-age" => {
                        if attr_value.trim().parse::<i64>().map_or(false, |n| n <= 0) {
                            expired = true;
                        }
                    }
                    _ => {}
                }
            }
        }

        if expired {
            self.cookies.remove(name);
        } else {
            self.set(name, value, domain.as_deref());
        }
    }

    /// Serializes the cookies applicable to `url` as a Cookie header value,
    /// or `None` when nothing matches.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?;
        let serialized: Vec<String> = self
            .cookies
            .values()
            .filter(|c| domain_matches(c.domain.as_deref(), host))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        if serialized.is_empty() {
            None
        } else {
            Some(serialized.join("; "))
        }
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.trim_start_matches('.').to_ascii_lowercase()
}

/// A cookie with no domain is sent everywhere (it can only have come from a
/// host this session talked to); otherwise the host must equal the cookie
/// domain or be a subdomain of it.
fn domain_matches(cookie_domain: Option<&str>, host: &str) -> bool {
    let Some(domain) = cookie_domain else {
        return true;
    };
    let host = host.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}
