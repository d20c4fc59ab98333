use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::{graphql, parse, ScraperApi};
use crate::constants::{GQL_SEARCH_TIMELINE, PAGE_SIZE};
use crate::error::GatewayResult;
use crate::paging::{BoxPageStream, PagedItem};

/// Result tab of the upstream search surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Top,
    Latest,
    Photos,
    Videos,
    Users,
}

impl SearchMode {
    fn product(self) -> &'static str {
        match self {
            SearchMode::Top => "Top",
            SearchMode::Latest => "Latest",
            SearchMode::Photos => "Photos",
            SearchMode::Videos => "Videos",
            SearchMode::Users => "People",
        }
    }
}

impl ScraperApi {
    pub fn search(&self, query: &str, mode: SearchMode, max_items: usize) -> BoxPageStream {
        let query = query.to_string();
        self.timeline_stream(
            max_items,
            GQL_SEARCH_TIMELINE,
            move |cursor| {
                let mut variables = json!({
                    "rawQuery": query,
                    "count": PAGE_SIZE,
                    "querySource": "typed_query",
                    "product": mode.product()
                });
                if !cursor.is_empty() {
                    variables["cursor"] = Value::String(cursor.to_string());
                }
                variables
            },
            parse::timeline_page,
        )
    }

    pub fn search_tweets(&self, query: &str, max_items: usize) -> BoxPageStream {
        self.search(query, SearchMode::Latest, max_items)
    }

    pub fn search_people(&self, query: &str, max_items: usize) -> BoxPageStream {
        self.search(query, SearchMode::Users, max_items)
    }

    /// Everything a user ever tweeted, walked through search passes with a
    /// decreasing `max_id` window: once a pass exhausts its cursors, the next
    /// pass restarts below the smallest status id seen so far, until a pass
    /// yields nothing new. Items arrive on the channel as they are found.
    pub fn all_tweets(&self, screen_name: &str) -> mpsc::Receiver<GatewayResult<PagedItem>> {
        let (tx, rx) = mpsc::channel(64);
        let api = self.clone();
        let screen_name = screen_name.to_string();
        tokio::spawn(async move {
            let mut max_id: Option<u64> = None;
            let mut seen_total = 0usize;
            loop {
                let query = match max_id {
                    None => format!("from:{screen_name}"),
                    Some(bound) => format!("from:{screen_name} max_id:{bound}"),
                };
                debug!("Deep search pass: {}", query);

                let mut pass_items: Vec<PagedItem> = Vec::new();
                let mut stream = api.search(&query, SearchMode::Latest, usize::MAX);
                let mut failed = false;
                while let Some(result) = stream.next().await {
                    match result {
                        Ok(item) => {
                            pass_items.push(item.clone());
                            if tx.send(Ok(item)).await.is_err() {
                                return; // consumer hung up
                            }
                        }
                        Err(e) => {
                            warn!("Deep search pass failed: {}", e);
                            let _ = tx.send(Err(e)).await;
                            failed = true;
                            break;
                        }
                    }
                }
                if failed || pass_items.is_empty() {
                    break;
                }
                seen_total += pass_items.len();
                let Some(smallest) = parse::min_numeric_id(&pass_items) else {
                    break;
                };
                max_id = Some(smallest.saturating_sub(1));
            }
            debug!(
                "Deep search for {} finished with {} items",
                screen_name, seen_total
            );
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::parse::tests::{cursor_entry, timeline_body, tweet_entry};
    use crate::test_utils::harness::upstream_with_accounts;
    use wiremock::matchers::{method, path_regex, query_param_contains};
    use wiremock::{Mock, ResponseTemplate};

    #[test]
    fn search_modes_map_to_products() {
        assert_eq!(SearchMode::Top.product(), "Top");
        assert_eq!(SearchMode::Users.product(), "People");
        assert_eq!(SearchMode::Latest.product(), "Latest");
    }

    #[tokio::test]
    async fn search_requests_carry_query_and_page_cap() {
        let h = upstream_with_accounts(&["alice"]).await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/i/api/graphql/.*/SearchTimeline$"))
            .and(query_param_contains("variables", "\"rawQuery\":\"rust\""))
            .and(query_param_contains("variables", "\"count\":50"))
            .and(query_param_contains("variables", "\"product\":\"Latest\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(timeline_body(vec![
                tweet_entry("11"),
                tweet_entry("12"),
            ])))
            .mount(&h.server)
            .await;

        let items = h.api.search_tweets("rust", 10).collect_all().await.unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn all_tweets_walks_max_id_windows_until_dry() {
        let h = upstream_with_accounts(&["alice"]).await;
        // Pass 2: everything below 10. One older tweet, then silence.
        Mock::given(method("GET"))
            .and(path_regex(r"^/i/api/graphql/.*/SearchTimeline$"))
            .and(query_param_contains("variables", "max_id:9"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(timeline_body(vec![tweet_entry("5")])),
            )
            .mount(&h.server)
            .await;
        // Pass 3: below 4 is empty, which ends the walk.
        Mock::given(method("GET"))
            .and(path_regex(r"^/i/api/graphql/.*/SearchTimeline$"))
            .and(query_param_contains("variables", "max_id:4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(timeline_body(vec![])))
            .mount(&h.server)
            .await;
        // Pass 1: the unbounded query.
        Mock::given(method("GET"))
            .and(path_regex(r"^/i/api/graphql/.*/SearchTimeline$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(timeline_body(vec![
                tweet_entry("20"),
                tweet_entry("10"),
                cursor_entry("ignored-dead-end"),
            ])))
            .mount(&h.server)
            .await;

        let mut rx = h.api.all_tweets("alice");
        let mut ids = Vec::new();
        while let Some(result) = rx.recv().await {
            ids.push(result.unwrap().id);
        }
        assert_eq!(ids, vec!["20", "10", "5"]);
    }
}
