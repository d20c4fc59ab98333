use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::paging::{Page, PagedItem};

/// First message of an `errors[]` array in an otherwise parseable body.
pub fn first_error_message(body: &Value) -> Option<String> {
    body.get("errors")?
        .as_array()?
        .first()?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

/// The single tweet payload of a TweetResultByRestId response. A null or
/// missing result means the tweet does not exist (or is gone).
pub fn tweet_from_lookup(body: &Value, tweet_id: &str) -> GatewayResult<Value> {
    let result = body
        .pointer("/data/tweetResult/result")
        .filter(|v| !v.is_null());
    match result {
        Some(tweet) => Ok(tweet.clone()),
        None => Err(GatewayError::NotFound(format!("tweet {tweet_id} not found"))),
    }
}

/// The user payload of a UserByScreenName response.
pub fn profile_from_lookup(body: &Value, handle: &str) -> GatewayResult<Value> {
    if let Some(message) = first_error_message(body) {
        if message.contains("User not found.") {
            return Err(GatewayError::NotFound(format!("user {handle} not found")));
        }
    }
    let result = body
        .pointer("/data/user/result")
        .filter(|v| !v.is_null());
    match result {
        Some(user) => Ok(user.clone()),
        None => Err(GatewayError::NotFound(format!("user {handle} not found"))),
    }
}

/// Numeric account id of a profile payload.
pub fn rest_id(result: &Value) -> Option<String> {
    result
        .get("rest_id")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Parses one page of any timeline-shaped GraphQL response (user tweets,
/// followers, search, community members).
///
/// The upstream nests its `instructions` differently per endpoint and moves
/// them between deploys, so rather than hardcoding paths this walks the body
/// for timeline entries: objects carrying an `entryId` plus `content`.
/// Tweets and users are recognized by their `tweet_results` / `user_results`
/// wrappers; the bottom cursor by its `cursorType`.
pub fn timeline_page(body: &Value) -> GatewayResult<Page> {
    if body.pointer("/data").is_none() {
        return Err(GatewayError::Upstream(
            "timeline response carried no data object".to_string(),
        ));
    }

    let mut entries = Vec::new();
    collect_entries(body, &mut entries);

    let mut items = Vec::new();
    let mut next_cursor = None;
    for entry in entries {
        let entry_id = entry
            .get("entryId")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if let Some(cursor) = bottom_cursor(entry) {
            next_cursor = Some(cursor);
            continue;
        }
        let Some(result) = item_result(entry) else {
            continue;
        };
        let Some(id) = rest_id(&result) else {
            tracing::debug!("Timeline entry {} carries no rest_id, skipping", entry_id);
            continue;
        };
        items.push(PagedItem { id, json: result });
    }

    Ok(Page { items, next_cursor })
}

fn collect_entries<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            if map.contains_key("entryId") && map.contains_key("content") {
                out.push(value);
                // Module entries (e.g. profile conversations) nest items.
            }
            for child in map.values() {
                collect_entries(child, out);
            }
        }
        Value::Array(values) => {
            for child in values {
                collect_entries(child, out);
            }
        }
        _ => {}
    }
}

fn bottom_cursor(entry: &Value) -> Option<String> {
    let content = entry.get("content")?;
    let cursor_content = if content.get("cursorType").is_some() {
        content
    } else {
        content.get("itemContent")?
    };
    let cursor_type = cursor_content.get("cursorType")?.as_str()?;
    if !cursor_type.eq_ignore_ascii_case("bottom") {
        return None;
    }
    cursor_content
        .get("value")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn item_result(entry: &Value) -> Option<Value> {
    let content = entry.get("content")?;
    let item_content = content.get("itemContent").unwrap_or(content);
    for wrapper in ["tweet_results", "user_results"] {
        if let Some(result) = item_content
            .get(wrapper)
            .and_then(|w| w.get("result"))
            .filter(|v| !v.is_null())
        {
            return Some(result.clone());
        }
    }
    None
}

/// Smallest numeric status id in a batch of tweets; drives the deep-search
/// `max_id` walk.
pub fn min_numeric_id(items: &[PagedItem]) -> Option<u64> {
    items.iter().filter_map(|i| i.id.parse::<u64>().ok()).min()
}
