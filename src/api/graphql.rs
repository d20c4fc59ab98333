use std::sync::LazyLock;

use serde_json::{json, Value};
use url::Url;

use crate::constants::{GQL_VIEWER, WEB_BASE};

/// Base path of the upstream's GraphQL surface as the web client calls it.
pub fn default_gql_base() -> String {
    format!("{WEB_BASE}/i/api/graphql")
}

/// Feature switches the GraphQL endpoints insist on receiving. The upstream
/// rejects requests that omit flags its frontend currently sends; the values
/// themselves matter less than their presence.
pub static DEFAULT_FEATURES: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "responsive_web_graphql_exclude_directive_enabled": true,
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
        "responsive_web_graphql_timeline_navigation_enabled": true,
        "verified_phone_label_enabled": false,
        "creator_subscriptions_tweet_preview_api_enabled": true,
        "longform_notetweets_consumption_enabled": true,
        "longform_notetweets_inline_media_enabled": true,
        "longform_notetweets_rich_text_read_enabled": true,
        "freedom_of_speech_not_reach_fetch_enabled": true,
        "graphql_is_translatable_rweb_tweet_is_translatable_enabled": true,
        "responsive_web_edit_tweet_api_enabled": true,
        "responsive_web_enhance_cards_enabled": false,
        "responsive_web_media_download_video_enabled": false,
        "responsive_web_twitter_article_tweet_consumption_enabled": false,
        "standardized_nudges_misinfo": true,
        "tweet_awards_web_tipping_enabled": false,
        "tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled": true,
        "tweetypie_unmention_optimization_enabled": true,
        "view_counts_everywhere_api_enabled": true,
        "hidden_profile_likes_enabled": false,
        "highlights_tweets_tab_ui_enabled": true,
        "subscriptions_verification_info_verified_since_enabled": true,
        "c9s_tweet_anatomy_moderator_badge_enabled": true,
        "rweb_lists_timeline_redesign_enabled": true
    })
});

/// Builds a GraphQL GET URL: `{base}/{query_id}/{op_name}` with URL-encoded
/// `variables` and `features` JSON parameters.
pub fn build_url(base: &str, op: (&str, &str), variables: &Value, features: &Value) -> Url {
    let (query_id, op_name) = op;
    let mut url = Url::parse(&format!("{base}/{query_id}/{op_name}"))
        .expect("graphql base and op form a valid url");
    url.query_pairs_mut()
        .append_pair("variables", &variables.to_string())
        .append_pair("features", &features.to_string());
    url
}

/// Minimal authenticated query used to verify a seeded session cookie.
pub fn viewer_probe_url() -> String {
    build_url(
        &default_gql_base(),
        GQL_VIEWER,
        &json!({ "withCommunitiesMemberships": false }),
        &DEFAULT_FEATURES,
    )
    .to_string()
}
