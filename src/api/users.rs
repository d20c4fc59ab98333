use serde_json::{json, Value};

use crate::api::{graphql, parse, HandleRef, ScraperApi};
use crate::constants::{
    GQL_FOLLOWERS, GQL_FOLLOWING, GQL_USER_BY_REST_ID, GQL_USER_BY_SCREEN_NAME, PAGE_SIZE,
};
use crate::error::{GatewayError, GatewayResult};
use crate::paging::BoxPageStream;

impl ScraperApi {
    pub async fn profile_by_screen_name(&self, screen_name: &str) -> GatewayResult<Value> {
        let variables = json!({
            "screen_name": screen_name,
            "withSafetyModeUserFields": true
        });
        let url = graphql::build_url(
            self.gql_base(),
            GQL_USER_BY_SCREEN_NAME,
            &variables,
            &graphql::DEFAULT_FEATURES,
        );
        let body = self.rotator.get_json(&url).await?;
        parse::profile_from_lookup(&body, screen_name)
    }

    pub async fn profile_by_rest_id(&self, user_id: &str) -> GatewayResult<Value> {
        let variables = json!({ "userId": user_id, "withSafetyModeUserFields": true });
        let url = graphql::build_url(
            self.gql_base(),
            GQL_USER_BY_REST_ID,
            &variables,
            &graphql::DEFAULT_FEATURES,
        );
        let body = self.rotator.get_json(&url).await?;
        parse::profile_from_lookup(&body, user_id)
    }

    /// Numeric id for a downstream identifier, resolving `@handle`s through
    /// the screen-name lookup.
    pub async fn resolve_user_id(&self, handle: &HandleRef) -> GatewayResult<String> {
        match handle {
            HandleRef::Id(id) => Ok(id.clone()),
            HandleRef::ScreenName(name) => {
                let profile = self.profile_by_screen_name(name).await?;
                parse::rest_id(&profile).ok_or_else(|| {
                    GatewayError::Upstream(format!("profile of {name} carries no rest_id"))
                })
            }
        }
    }

    /// Screen name for a downstream identifier; the deep-search walk builds
    /// `from:` queries and needs the handle rather than the id.
    pub async fn resolve_screen_name(&self, handle: &HandleRef) -> GatewayResult<String> {
        match handle {
            HandleRef::ScreenName(name) => Ok(name.clone()),
            HandleRef::Id(id) => {
                let profile = self.profile_by_rest_id(id).await?;
                profile
                    .pointer("/legacy/screen_name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        GatewayError::Upstream(format!(
                            "profile of {id} carries no screen_name"
                        ))
                    })
            }
        }
    }

    pub fn following(&self, user_id: &str, max_items: usize) -> BoxPageStream {
        self.social_graph_stream(GQL_FOLLOWING, user_id, max_items)
    }

    pub fn followers(&self, user_id: &str, max_items: usize) -> BoxPageStream {
        self.social_graph_stream(GQL_FOLLOWERS, user_id, max_items)
    }

    fn social_graph_stream(
        &self,
        op: (&'static str, &'static str),
        user_id: &str,
        max_items: usize,
    ) -> BoxPageStream {
        let user_id = user_id.to_string();
        self.timeline_stream(
            max_items,
            op,
            move |cursor| {
                let mut variables = json!({
                    "userId": user_id,
                    "count": PAGE_SIZE,
                    "includePromotedContent": false
                });
                if !cursor.is_empty() {
                    variables["cursor"] = Value::String(cursor.to_string());
                }
                variables
            },
            parse::timeline_page,
        )
    }
}
