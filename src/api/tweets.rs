use serde_json::{json, Value};

use crate::api::{graphql, parse, ScraperApi};
use crate::constants::{GQL_TWEET_RESULT_BY_REST_ID, GQL_USER_TWEETS_AND_REPLIES, PAGE_SIZE};
use crate::error::{GatewayError, GatewayResult};
use crate::paging::BoxPageStream;
use crate::upstream::cookies::CookieJar;
use crate::upstream::guest::install_guest_headers;

impl ScraperApi {
    /// Single tweet lookup. `use_account` routes through the warm pool;
    /// otherwise a guest token is enough for public tweets.
    pub async fn tweet_by_id(&self, tweet_id: &str, use_account: bool) -> GatewayResult<Value> {
        if !tweet_id.chars().all(|c| c.is_ascii_digit()) || tweet_id.is_empty() {
            return Err(GatewayError::InvalidInput(format!(
                "tweet id must be numeric, got {tweet_id:?}"
            )));
        }
        let variables = json!({
            "tweetId": tweet_id,
            "withCommunity": false,
            "includePromotedContent": false,
            "withVoice": false
        });
        let url = graphql::build_url(
            self.gql_base(),
            GQL_TWEET_RESULT_BY_REST_ID,
            &variables,
            &graphql::DEFAULT_FEATURES,
        );

        let body = if use_account {
            self.rotator.get_json(&url).await?
        } else {
            self.guest_get_json(&url).await?
        };
        parse::tweet_from_lookup(&body, tweet_id)
    }

    /// Cursor-paginated tweets-and-replies timeline for a numeric user id.
    pub fn tweets_and_replies(&self, user_id: &str, max_items: usize) -> BoxPageStream {
        let user_id = user_id.to_string();
        self.timeline_stream(
            max_items,
            GQL_USER_TWEETS_AND_REPLIES,
            move |cursor| {
                let mut variables = json!({
                    "userId": user_id,
                    "count": PAGE_SIZE,
                    "includePromotedContent": false,
                    "withCommunity": true,
                    "withVoice": false
                });
                if !cursor.is_empty() {
                    variables["cursor"] = Value::String(cursor.to_string());
                }
                variables
            },
            parse::timeline_page,
        )
    }

    /// Anonymous GET with the guest header dance.
    pub(crate) async fn guest_get_json(&self, url: &url::Url) -> GatewayResult<Value> {
        let client = self.transport.client_for(None)?;
        let guest_token = self.guest.ensure_fresh(&client).await?;
        let jar = CookieJar::new();
        let response = install_guest_headers(client.get(url.clone()), &guest_token, &jar, url)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Upstream(format!(
                "guest fetch of {url} returned {status}"
            )));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::harness::upstream_with_accounts;
    use serde_json::json;
    use wiremock::matchers::{method, path_regex, query_param_contains};
    use wiremock::{Mock, ResponseTemplate};

    #[tokio::test]
    async fn tweet_by_id_via_account() {
        let h = upstream_with_accounts(&["alice"]).await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/i/api/graphql/.*/TweetResultByRestId$"))
            .and(query_param_contains("variables", "\"tweetId\":\"123\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "tweetResult": { "result": { "rest_id": "123", "legacy": { "full_text": "hello" } } } }
            })))
            .mount(&h.server)
            .await;

        let tweet = h.api.tweet_by_id("123", true).await.unwrap();
        assert_eq!(tweet["rest_id"], "123");
    }

    #[tokio::test]
    async fn tweet_by_id_via_guest_token() {
        let h = upstream_with_accounts(&[]).await;
        Mock::given(method("POST"))
            .and(wiremock::matchers::path("/1.1/guest/activate.json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "guest_token": "gt" })),
            )
            .mount(&h.server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/i/api/graphql/.*/TweetResultByRestId$"))
            .and(wiremock::matchers::header("x-guest-token", "gt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "tweetResult": { "result": { "rest_id": "9" } } }
            })))
            .mount(&h.server)
            .await;

        let tweet = h.api.tweet_by_id("9", false).await.unwrap();
        assert_eq!(tweet["rest_id"], "9");
    }

    #[tokio::test]
    async fn missing_tweet_is_not_found() {
        let h = upstream_with_accounts(&["alice"]).await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/i/api/graphql/.*/TweetResultByRestId$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "tweetResult": { "result": null } }
            })))
            .mount(&h.server)
            .await;

        let err = h.api.tweet_by_id("404404", true).await.unwrap_err();
        assert!(matches!(err, crate::error::GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn non_numeric_tweet_id_is_invalid_input() {
        let h = upstream_with_accounts(&[]).await;
        let err = h.api.tweet_by_id("abc", true).await.unwrap_err();
        assert!(matches!(err, crate::error::GatewayError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn tweets_and_replies_pages_until_budget() {
        let h = upstream_with_accounts(&["alice"]).await;
        let page =
            |ids: &[u64], cursor: Option<&str>| -> serde_json::Value {
                let mut entries: Vec<serde_json::Value> = ids
                    .iter()
                    .map(|id| crate::api::parse::tests::tweet_entry(&id.to_string()))
                    .collect();
                if let Some(c) = cursor {
                    entries.push(crate::api::parse::tests::cursor_entry(c));
                }
                crate::api::parse::tests::timeline_body(entries)
            };

        Mock::given(method("GET"))
            .and(path_regex(r"^/i/api/graphql/.*/UserTweetsAndReplies$"))
            .and(query_param_contains("variables", "\"cursor\":\"c1\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(&[3, 4], None)))
            .mount(&h.server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/i/api/graphql/.*/UserTweetsAndReplies$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(&[1, 2], Some("c1"))))
            .mount(&h.server)
            .await;

        let items = h
            .api
            .tweets_and_replies("777", 3)
            .collect_all()
            .await
            .unwrap();
        let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }
}
