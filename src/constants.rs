use std::sync::LazyLock;

/// Public bearer used by the upstream web client for every API call.
/// This is not a secret; it is baked into the upstream's own frontend.
pub const BEARER_TOKEN: &str = "AAAAAAAAAAAAAAAAAAAAANRILgAAAAAAnNwIzUejRCOuH5E6I8xnZz4puTs%3D1Zv7ttfk8LF81IUq16cHjhLTvJu4FA33AGWWjCpTnA";

pub const API_BASE: &str = "https://api.twitter.com";
pub const WEB_BASE: &str = "https://twitter.com";

pub const GUEST_ACTIVATE_URL: &str = "https://api.twitter.com/1.1/guest/activate.json";
pub const ONBOARDING_TASK_URL: &str = "https://api.twitter.com/1.1/onboarding/task.json";

/// Guest tokens are refreshed lazily once they are older than this.
pub const GUEST_TOKEN_TTL_SECS: i64 = 3 * 60 * 60;
/// Guest activation gets a tighter timeout than regular upstream calls.
pub const GUEST_ACTIVATE_TIMEOUT_SECS: u64 = 10;

/// Default per-call upstream timeout. Overridable via REQUEST_TIMEOUT_SECS.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// A downstream request that is still idle after this long is cut off.
pub const REQUEST_IDLE_TIMEOUT_SECS: u64 = 255;

/// When a 429 carries no x-rate-limit-reset header, back off this long.
pub const RATE_LIMIT_FALLBACK_MS: i64 = 5 * 60 * 1000;

/// Items requested per upstream page, independent of the caller's budget.
pub const PAGE_SIZE: usize = 50;

/// Default item budget for listing endpoints when `until` is absent.
pub const DEFAULT_LISTING_LIMIT: usize = 40;

/// Session cookies left over from earlier flows confuse the onboarding
/// endpoint, so the jar is scrubbed of these before starting a login.
pub const LOGIN_SCRUB_COOKIES: &[&str] = &[
    "twitter_ads_id",
    "ads_prefs",
    "_twitter_sess",
    "zipbox_forms_auth_token",
    "lang",
    "bouncer_reset_cookie",
    "twid",
    "twitter_ads_idb",
    "email_uid",
    "external_referer",
    "ct0",
    "aa_u",
    "att",
    "kdt",
    "remember_checked_on",
];

// GraphQL operations used by the endpoint adapters. Query ids rotate with
// upstream frontend deploys; these match the web client this gateway mimics.
pub const GQL_TWEET_RESULT_BY_REST_ID: (&str, &str) = ("DJS3BdhUhcaEpZ7B7irJDg", "TweetResultByRestId");
pub const GQL_USER_BY_SCREEN_NAME: (&str, &str) = ("G3KGOASz96M-Qu0nwmGXNg", "UserByScreenName");
pub const GQL_USER_BY_REST_ID: (&str, &str) = ("tD8zKvQzwY3kdx5yz6YmOw", "UserByRestId");
pub const GQL_USER_TWEETS_AND_REPLIES: (&str, &str) = ("vMkJyzx1wdmvOeeNG0n6Wg", "UserTweetsAndReplies");
pub const GQL_FOLLOWING: (&str, &str) = ("t-BPOrMIduGUJWO_LxcvNQ", "Following");
pub const GQL_FOLLOWERS: (&str, &str) = ("3yX7xr2hKjcZYnXt6cU6lQ", "Followers");
pub const GQL_SEARCH_TIMELINE: (&str, &str) = ("gkjsKepM6gl_HmFWoWKfgg", "SearchTimeline");
pub const GQL_COMMUNITY_MEMBERS: (&str, &str) = ("KDAssJ5lafCy-asH4wm1dw", "membersSliceTimeline_Query");
/// Lightweight authenticated query used to probe whether a seeded session
/// cookie is still alive.
pub const GQL_VIEWER: (&str, &str) = ("k3027HdkVqbuDPpdoniLKA", "Viewer");

pub static USER_AGENT: LazyLock<String> = LazyLock::new(|| {
    format!(
        "magpie/{} {}/{}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
});
