pub mod communities;
pub mod graphql;
pub mod parse;
pub mod search;
pub mod tweets;
pub mod users;

use std::sync::Arc;

use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::paging::{BoxPageFetcher, BoxPageStream, PageStream};
use crate::rotator::RotatingAuthenticator;
use crate::upstream::guest::GuestAuth;
use crate::upstream::transport::Transport;

/// Downstream identifier for a user: numeric id as-is, `@handle` resolved
/// via screen-name lookup, anything else rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum HandleRef {
    Id(String),
    ScreenName(String),
}

pub fn parse_handle(raw: &str) -> GatewayResult<HandleRef> {
    if let Some(name) = raw.strip_prefix('@') {
        if name.is_empty() {
            return Err(GatewayError::InvalidInput("empty handle".to_string()));
        }
        return Ok(HandleRef::ScreenName(name.to_string()));
    }
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        return Ok(HandleRef::Id(raw.to_string()));
    }
    Err(GatewayError::InvalidInput(format!(
        "expected a numeric id or @handle, got {raw:?}"
    )))
}

/// The per-endpoint request builders and parsers, sharing one rotating
/// authenticator. Cheap to clone; handlers hold it in the router state.
#[derive(Clone)]
pub struct ScraperApi {
    pub rotator: Arc<RotatingAuthenticator>,
    pub transport: Arc<Transport>,
    pub guest: Arc<GuestAuth>,
    gql_base: String,
}

impl ScraperApi {
    pub fn new(rotator: Arc<RotatingAuthenticator>, transport: Arc<Transport>) -> Self {
        Self {
            rotator,
            transport,
            guest: Arc::new(GuestAuth::new()),
            gql_base: graphql::default_gql_base(),
        }
    }

    /// Test hook: point the GraphQL surface (and guest activation) at a
    /// scripted server.
    pub fn with_bases(
        rotator: Arc<RotatingAuthenticator>,
        transport: Arc<Transport>,
        gql_base: impl Into<String>,
        guest_activate_url: impl Into<String>,
    ) -> Self {
        Self {
            rotator,
            transport,
            guest: Arc::new(GuestAuth::with_activate_url(guest_activate_url)),
            gql_base: gql_base.into(),
        }
    }

    pub fn gql_base(&self) -> &str {
        &self.gql_base
    }

    /// Builds a bounded stream over any timeline-shaped GraphQL listing.
    /// `variables` receives the current cursor ("" on the first page).
    pub(crate) fn timeline_stream(
        &self,
        max_items: usize,
        op: (&'static str, &'static str),
        variables: impl Fn(&str) -> Value + Send + 'static,
        parse: fn(&Value) -> GatewayResult<crate::paging::Page>,
    ) -> BoxPageStream {
        let rotator = self.rotator.clone();
        let base = self.gql_base.clone();
        let fetch: BoxPageFetcher = Box::new(move |cursor: String| {
            let rotator = rotator.clone();
            let url = graphql::build_url(&base, op, &variables(&cursor), &graphql::DEFAULT_FEATURES);
            Box::pin(async move {
                let body = rotator.get_json(&url).await?;
                parse(&body)
            })
        });
        PageStream::new(max_items, fetch)
    }
}
