use serde_json::{json, Value};

use crate::api::{graphql, parse, ScraperApi};
use crate::constants::{GQL_COMMUNITY_MEMBERS, PAGE_SIZE};
use crate::error::GatewayResult;
use crate::paging::{BoxPageStream, Page, PagedItem};

impl ScraperApi {
    /// Cursor-paginated member listing of a community.
    pub fn community_members(&self, community_id: &str, max_items: usize) -> BoxPageStream {
        let community_id = community_id.to_string();
        self.timeline_stream(
            max_items,
            GQL_COMMUNITY_MEMBERS,
            move |cursor| {
                let mut variables = json!({
                    "communityId": community_id,
                    "count": PAGE_SIZE
                });
                if !cursor.is_empty() {
                    variables["cursor"] = Value::String(cursor.to_string());
                }
                variables
            },
            members_page,
        )
    }
}

/// The community endpoint answers with a member slice rather than a timeline:
/// `items_results` next to a `slice_info.next_cursor`. Fall back to the
/// generic timeline walk in case the upstream moves it back in line with the
/// other listings.
fn members_page(body: &Value) -> GatewayResult<Page> {
    if let Some(slice) = find_slice(body) {
        let mut items = Vec::new();
        if let Some(results) = slice.get("items_results").and_then(Value::as_array) {
            for wrapper in results {
                let Some(result) = wrapper.get("result").filter(|v| !v.is_null()) else {
                    continue;
                };
                let Some(id) = parse::rest_id(result) else {
                    continue;
                };
                items.push(PagedItem {
                    id,
                    json: result.clone(),
                });
            }
        }
        let next_cursor = slice
            .pointer("/slice_info/next_cursor")
            .and_then(Value::as_str)
            .map(str::to_string);
        return Ok(Page { items, next_cursor });
    }
    parse::timeline_page(body)
}

fn find_slice(value: &Value) -> Option<&Value> {
    match value {
        Value::Object(map) => {
            if map.contains_key("items_results") && map.contains_key("slice_info") {
                return Some(value);
            }
            map.values().find_map(find_slice)
        }
        Value::Array(values) => values.iter().find_map(find_slice),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::harness::upstream_with_accounts;
    use serde_json::json;
    use wiremock::matchers::{method, path_regex, query_param_contains};
    use wiremock::{Mock, ResponseTemplate};

    fn slice_body(ids: &[&str], next_cursor: Option<&str>) -> Value {
        json!({
            "data": {
                "communityResults": {
                    "result": {
                        "members_slice": {
                            "items_results": ids
                                .iter()
                                .map(|id| json!({ "result": { "rest_id": id, "legacy": {} } }))
                                .collect::<Vec<_>>(),
                            "slice_info": match next_cursor {
                                Some(c) => json!({ "next_cursor": c }),
                                None => json!({}),
                            }
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn slice_shape_is_parsed() {
        let page = members_page(&slice_body(&["1", "2"], Some("c1"))).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_cursor.as_deref(), Some("c1"));

        let page = members_page(&slice_body(&[], None)).unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn members_stream_pages_through_slices() {
        let h = upstream_with_accounts(&["alice"]).await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/i/api/graphql/.*/membersSliceTimeline_Query$"))
            .and(query_param_contains("variables", "\"cursor\":\"c1\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(slice_body(&["3"], None)))
            .mount(&h.server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/i/api/graphql/.*/membersSliceTimeline_Query$"))
            .and(query_param_contains("variables", "\"communityId\":\"900\""))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(slice_body(&["1", "2"], Some("c1"))),
            )
            .mount(&h.server)
            .await;

        let items = h
            .api
            .community_members("900", 40)
            .collect_all()
            .await
            .unwrap();
        let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }
}
