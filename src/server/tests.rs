use serde_json::{json, Value};
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, ResponseTemplate};

use crate::models::account::now_ms;
use crate::server::{build_router, AppState};
use crate::test_utils::harness::{upstream_with_accounts, TestUpstream};

const ADMIN_PASSWORD: &str = "op-secret";

struct TestApp {
    base_url: String,
    client: reqwest::Client,
    bearer: String,
    upstream: TestUpstream,
}

/// Full stack: scripted upstream behind a warm pool behind the real router,
/// served on a loopback port.
async fn spawn_app(account_names: &[&str]) -> TestApp {
    let upstream = upstream_with_accounts(account_names).await;
    let bearer = upstream
        .tokens
        .create("e2e-client")
        .expect("issue downstream token")
        .value;

    let state = AppState {
        api: upstream.api.clone(),
        pool: upstream.pool.clone(),
        account_store: upstream.store.clone(),
        token_store: upstream.tokens.clone(),
        admin_password: Some(ADMIN_PASSWORD.to_string()),
    };
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind app listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve app");
    });

    TestApp {
        base_url: format!("http://{addr}"),
        client: reqwest::Client::new(),
        bearer,
        upstream,
    }
}

impl TestApp {
    async fn get(&self, path_and_query: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base_url, path_and_query))
            .header("authorization", format!("Bearer {}", self.bearer))
            .send()
            .await
            .expect("request")
    }

    async fn admin_post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .header("x-admin-password", ADMIN_PASSWORD)
            .json(&body)
            .send()
            .await
            .expect("admin request")
    }
}

fn profile_body(rest_id: &str, screen_name: &str) -> Value {
    json!({
        "data": { "user": { "result": {
            "rest_id": rest_id,
            "legacy": { "screen_name": screen_name }
        } } }
    })
}

#[tokio::test]
async fn profile_request_round_trips_and_advances_last_used() {
    let app = spawn_app(&["acc1", "acc2"]).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/i/api/graphql/.*/UserByScreenName$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile_body("42", "alice")))
        .mount(&app.upstream.server)
        .await;

    let before = now_ms();
    let response = app.get("/api/users/@alice").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["profile"]["legacy"]["screen_name"], "alice");

    let advanced = app
        .upstream
        .store
        .snapshot()
        .iter()
        .any(|a| a.last_used.map(|t| t >= before).unwrap_or(false));
    assert!(advanced, "some account's last_used should have advanced");
}

#[tokio::test]
async fn rate_limited_account_is_skipped_and_second_serves() {
    let app = spawn_app(&["acc1", "acc2"]).await;
    let reset_epoch = now_ms() / 1000 + 60;
    Mock::given(method("GET"))
        .and(path_regex(r"^/i/api/graphql/.*/UserByScreenName$"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("x-rate-limit-reset", reset_epoch.to_string().as_str()),
        )
        .up_to_n_times(1)
        .mount(&app.upstream.server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/i/api/graphql/.*/UserByScreenName$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile_body("42", "alice")))
        .mount(&app.upstream.server)
        .await;

    let response = app.get("/api/users/@alice").await;
    assert_eq!(response.status(), 200);

    let snapshot = app.upstream.store.snapshot();
    let limited: Vec<_> = snapshot
        .iter()
        .filter(|a| a.rate_limited_until.is_some())
        .collect();
    assert_eq!(limited.len(), 1);
    assert!((limited[0].rate_limited_until.unwrap() - reset_epoch * 1000).abs() < 1500);
    assert!(!limited[0].failed_login);
    assert_eq!(app.upstream.pool.active_len(), 2);
}

#[tokio::test]
async fn dead_account_exhausts_to_503() {
    let app = spawn_app(&["acc1"]).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/i/api/graphql/.*/UserByScreenName$"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&app.upstream.server)
        .await;

    let response = app.get("/api/users/@alice").await;
    assert_eq!(response.status(), 503);
    let body: Value = response.json().await.unwrap();
    let message = body["error"].as_str().unwrap();
    assert!(message.contains("UserByScreenName"));
    assert!(message.contains("1 attempts"));

    // The account was disqualified; the next request fails straight away.
    let response = app.get("/api/users/@alice").await;
    assert_eq!(response.status(), 503);
    assert!(app.upstream.store.get("acc1").unwrap().failed_login);
}

#[tokio::test]
async fn missing_or_invalid_bearer_is_401() {
    let app = spawn_app(&[]).await;
    let response = app
        .client
        .get(format!("{}/api/users/@alice", app.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = app
        .client
        .get(format!("{}/api/users/@alice", app.base_url))
        .header("authorization", "Bearer wrong-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn issued_token_last_used_is_touched() {
    let app = spawn_app(&[]).await;
    let response = app.get("/api/tweets/abc").await; // invalid id, but authenticated
    assert_eq!(response.status(), 400);
    let token = &app.upstream.tokens.list()[0];
    assert!(token.last_used.is_some());
}

#[tokio::test]
async fn handle_without_at_prefix_is_400() {
    let app = spawn_app(&[]).await;
    let response = app.get("/api/users/alice").await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn missing_tweet_is_404_with_metadata() {
    let app = spawn_app(&["acc1"]).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/i/api/graphql/.*/TweetResultByRestId$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "tweetResult": { "result": null } }
        })))
        .mount(&app.upstream.server)
        .await;

    let response = app.get("/api/tweets/123?use_account=true").await;
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["metadata"]["tweetId"], "123");
    assert_eq!(body["metadata"]["fetchedWith"], "account");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn pagination_honors_until_budget() {
    let app = spawn_app(&["acc1"]).await;
    let entries_page = |range: std::ops::Range<u64>, cursor: Option<&str>| {
        let mut entries: Vec<Value> = range
            .map(|id| crate::api::parse::tests::tweet_entry(&id.to_string()))
            .collect();
        if let Some(c) = cursor {
            entries.push(crate::api::parse::tests::cursor_entry(c));
        }
        crate::api::parse::tests::timeline_body(entries)
    };
    Mock::given(method("GET"))
        .and(path_regex(r"^/i/api/graphql/.*/UserTweetsAndReplies$"))
        .and(wiremock::matchers::query_param_contains(
            "variables",
            "\"cursor\":\"c1\"",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(entries_page(20..40, None)))
        .mount(&app.upstream.server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/i/api/graphql/.*/UserTweetsAndReplies$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(entries_page(0..20, Some("c1"))))
        .mount(&app.upstream.server)
        .await;

    let response = app.get("/api/users/777/tweets-and-replies?until=30").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let tweets = body["tweets"].as_array().unwrap();
    assert_eq!(tweets.len(), 30);
    // Upstream order preserved, no duplicates.
    let ids: Vec<&str> = tweets.iter().map(|t| t["rest_id"].as_str().unwrap()).collect();
    let expected: Vec<String> = (0..30).map(|n| n.to_string()).collect();
    assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());
}

#[tokio::test]
async fn all_tweets_streams_jsonl_lines() {
    let app = spawn_app(&["acc1"]).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/i/api/graphql/.*/SearchTimeline$"))
        .and(wiremock::matchers::query_param_contains("variables", "max_id:"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(crate::api::parse::tests::timeline_body(vec![])),
        )
        .mount(&app.upstream.server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/i/api/graphql/.*/SearchTimeline$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            crate::api::parse::tests::timeline_body(vec![
                crate::api::parse::tests::tweet_entry("31"),
                crate::api::parse::tests::tweet_entry("30"),
            ]),
        ))
        .mount(&app.upstream.server)
        .await;

    let response = app
        .client
        .get(format!("{}/api/users/@alice/all-tweets", app.base_url))
        .header("authorization", format!("Bearer {}", app.bearer))
        .header("accept", "application/jsonl")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/jsonl"
    );
    let text = response.text().await.unwrap();
    let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.len(), 2);
    let first: Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["rest_id"], "31");
}

#[tokio::test]
async fn admin_import_is_idempotent_and_gated() {
    let app = spawn_app(&[]).await;

    // No admin credentials: rejected.
    let response = app
        .client
        .post(format!("{}/api/accounts/import", app.base_url))
        .json(&json!({ "format": "username:password", "accounts": "x:y" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let body = json!({
        "format": "username:password:email:emailPassword:authToken:ANY",
        "accounts": "alice:pw:a@x:ep:tok:garbage\nbob:pw2:b@x:ep2:tok2:junk"
    });
    let response = app.admin_post("/api/accounts/import", body.clone()).await;
    assert_eq!(response.status(), 200);
    let result: Value = response.json().await.unwrap();
    assert_eq!(result["count"], 2);

    // Importing the same usernames again adds nothing.
    let response = app.admin_post("/api/accounts/import", body).await;
    let result: Value = response.json().await.unwrap();
    assert_eq!(result["count"], 0);
    assert_eq!(app.upstream.store.snapshot().len(), 2);

    let alice = app.upstream.store.get("alice").unwrap();
    assert_eq!(alice.credential.password, "pw");
    assert_eq!(alice.credential.email, "a@x");
    assert_eq!(alice.credential.auth_token.as_deref(), Some("tok"));
    assert!(alice.credential.two_factor_secret.is_none());
}

#[tokio::test]
async fn admin_reset_failed_clears_state() {
    let app = spawn_app(&["acc1"]).await;
    app.upstream.pool.mark_failed("acc1").unwrap();
    assert!(app.upstream.store.get("acc1").unwrap().failed_login);

    let response = app.admin_post("/api/accounts/reset-failed", json!({})).await;
    assert_eq!(response.status(), 200);
    // Background re-login may already have promoted the account to working;
    // either way the failure markers are gone.
    let account = app.upstream.store.get("acc1").unwrap();
    assert!(!account.failed_login);
    assert_ne!(account.token_state, crate::models::TokenState::Failed);
}

#[tokio::test]
async fn admin_token_lifecycle() {
    let app = spawn_app(&[]).await;
    let response = app
        .admin_post("/api/tokens", json!({ "name": "reader" }))
        .await;
    assert_eq!(response.status(), 201);
    let token: Value = response.json().await.unwrap();
    assert_eq!(token["name"], "reader");
    let value = token["value"].as_str().unwrap();
    assert_eq!(value.len(), 32);

    // The new token authenticates data routes.
    let response = app
        .client
        .get(format!("{}/api/users/alice", app.base_url))
        .header("authorization", format!("Bearer {value}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400); // authenticated, then rejected as input

    let id = token["id"].as_str().unwrap();
    let response = app
        .client
        .delete(format!("{}/api/tokens/{id}", app.base_url))
        .header("x-admin-password", ADMIN_PASSWORD)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
}

#[tokio::test]
async fn health_is_open() {
    let app = spawn_app(&[]).await;
    let response = app
        .client
        .get(format!("{}/health", app.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}
