use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{error_response, AppState};
use crate::api::parse_handle;
use crate::constants::DEFAULT_LISTING_LIMIT;
use crate::error::{GatewayError, GatewayResult};
use crate::paging::{BoxPageStream, PagedItem};

fn fail(e: &GatewayError) -> Response {
    error_response(e).into_response()
}

#[derive(Deserialize, Default)]
pub struct TweetQuery {
    #[serde(default)]
    pub use_account: Option<bool>,
}

#[derive(Deserialize, Default)]
pub struct UntilQuery {
    #[serde(default)]
    pub until: Option<usize>,
}

impl UntilQuery {
    fn limit(&self) -> usize {
        self.until.unwrap_or(DEFAULT_LISTING_LIMIT).max(1)
    }
}

async fn collect_json(stream: BoxPageStream) -> GatewayResult<Vec<Value>> {
    Ok(stream
        .collect_all()
        .await?
        .into_iter()
        .map(|item| item.json)
        .collect())
}

pub async fn get_tweet(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<TweetQuery>,
) -> Response {
    let use_account = params.use_account.unwrap_or(false);
    let fetched_with = if use_account { "account" } else { "guest" };
    match state.api.tweet_by_id(&id, use_account).await {
        Ok(tweet) => Json(json!({
            "tweet": tweet,
            "metadata": { "tweetId": id, "fetchedWith": fetched_with }
        }))
        .into_response(),
        Err(GatewayError::NotFound(message)) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": message,
                "metadata": { "tweetId": id, "fetchedWith": fetched_with }
            })),
        )
            .into_response(),
        Err(e) => fail(&e),
    }
}

pub async fn get_profile(State(state): State<AppState>, Path(handle): Path<String>) -> Response {
    // The profile route takes handles only; numeric ids are not accepted.
    let Some(screen_name) = handle.strip_prefix('@').filter(|n| !n.is_empty()) else {
        return fail(&GatewayError::InvalidInput(format!(
            "handle must start with @, got {handle:?}"
        )));
    };
    match state.api.profile_by_screen_name(screen_name).await {
        Ok(profile) => Json(json!({ "profile": profile })).into_response(),
        Err(e) => fail(&e),
    }
}

pub async fn get_tweets_and_replies(
    State(state): State<AppState>,
    Path(id_or_handle): Path<String>,
    Query(params): Query<UntilQuery>,
) -> Response {
    let result = async {
        let handle = parse_handle(&id_or_handle)?;
        let user_id = state.api.resolve_user_id(&handle).await?;
        collect_json(state.api.tweets_and_replies(&user_id, params.limit())).await
    }
    .await;
    match result {
        Ok(tweets) => Json(json!({ "tweets": tweets })).into_response(),
        Err(e) => fail(&e),
    }
}

pub async fn get_following(
    State(state): State<AppState>,
    Path(id_or_handle): Path<String>,
    Query(params): Query<UntilQuery>,
) -> Response {
    social_graph(state, id_or_handle, params, true).await
}

pub async fn get_followers(
    State(state): State<AppState>,
    Path(id_or_handle): Path<String>,
    Query(params): Query<UntilQuery>,
) -> Response {
    social_graph(state, id_or_handle, params, false).await
}

async fn social_graph(
    state: AppState,
    id_or_handle: String,
    params: UntilQuery,
    following: bool,
) -> Response {
    let result = async {
        let handle = parse_handle(&id_or_handle)?;
        let user_id = state.api.resolve_user_id(&handle).await?;
        let stream = if following {
            state.api.following(&user_id, params.limit())
        } else {
            state.api.followers(&user_id, params.limit())
        };
        collect_json(stream).await
    }
    .await;
    match result {
        Ok(profiles) => Json(json!({ "profiles": profiles })).into_response(),
        Err(e) => fail(&e),
    }
}

/// Full archive walk. With `Accept: application/jsonl` the tweets stream
/// out one object per line as the passes progress; otherwise they are
/// buffered into a single JSON body.
pub async fn get_all_tweets(
    State(state): State<AppState>,
    Path(id_or_handle): Path<String>,
    headers: HeaderMap,
) -> Response {
    let screen_name = match async {
        let handle = parse_handle(&id_or_handle)?;
        state.api.resolve_screen_name(&handle).await
    }
    .await
    {
        Ok(name) => name,
        Err(e) => return fail(&e),
    };

    let wants_jsonl = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("application/jsonl"))
        .unwrap_or(false);

    let rx = state.api.all_tweets(&screen_name);
    if wants_jsonl {
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .map(|result| match result {
            Ok(item) => Ok(axum::body::Bytes::from(format!("{}\n", item.json))),
            Err(e) => Err(std::io::Error::other(e.to_string())),
        });
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/jsonl")
            .body(Body::from_stream(stream))
            .expect("jsonl response builds");
    }

    let mut rx = rx;
    let mut tweets: Vec<Value> = Vec::new();
    while let Some(result) = rx.recv().await {
        match result {
            Ok(item) => tweets.push(item.json),
            Err(e) => return fail(&e),
        }
    }
    Json(json!({ "tweets": tweets })).into_response()
}

pub async fn search_people(
    State(state): State<AppState>,
    Path(query): Path<String>,
    Query(params): Query<UntilQuery>,
) -> Response {
    match collect_json(state.api.search_people(&query, params.limit())).await {
        Ok(profiles) => Json(json!({ "profiles": profiles })).into_response(),
        Err(e) => fail(&e),
    }
}

pub async fn search_tweets(
    State(state): State<AppState>,
    Path(query): Path<String>,
    Query(params): Query<UntilQuery>,
) -> Response {
    match collect_json(state.api.search_tweets(&query, params.limit())).await {
        Ok(tweets) => Json(json!({ "tweets": tweets })).into_response(),
        Err(e) => fail(&e),
    }
}

pub async fn get_community_members(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<UntilQuery>,
) -> Response {
    match state
        .api
        .community_members(&id, params.limit())
        .collect_all()
        .await
    {
        Ok(items) => Json(
            items
                .into_iter()
                .map(|item: PagedItem| item.json)
                .collect::<Vec<Value>>(),
        )
        .into_response(),
        Err(e) => fail(&e),
    }
}
