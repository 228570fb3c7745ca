//! Application-wide constants
//!
//! Centralized location for cache keys, durations and remote endpoint
//! identifiers that are used across multiple modules.

use std::time::Duration;

/// How long a persisted membership entry stays valid after it was written.
pub const MEMBERSHIP_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Fewer remaining lookups than this is reported as "near the limit".
pub const NEAR_LIMIT_THRESHOLD: u32 = 5;

/// Page size requested for list timelines.
pub const LIST_PAGE_SIZE: u32 = 100;

/// Default data directory name (under the platform data dir).
pub const DATA_DIR_NAME: &str = "quicklist";

// Persisted store keys
pub mod keys {
    /// Subject id -> container ids (per-entry expiry)
    pub const MEMBERSHIPS: &str = "memberships";
    /// Container id -> last-touched timestamp (no expiry)
    pub const LIST_ACTIVITY: &str = "list_activity";
    /// Unix-ms timestamps of authoritative fetches still inside the window
    pub const RATE_LIMIT_LEDGER: &str = "rate_limit_ledger";
}

// Remote endpoint identifiers
pub mod graphql {
    pub const WEB_ENDPOINT: &str = "https://x.com/i/api/graphql";
    pub const PRO_ENDPOINT: &str = "https://pro.x.com/i/api/graphql";

    /// Public bearer token the web client sends with every GraphQL call
    pub const BEARER_TOKEN: &str = "Bearer AAAAAAAAAAAAAAAAAAAAANRILgAAAAAAnNwIzUejRCOuH5E6I8xnZz4puTs%3D1Zv7ttfk8LF81IUq16cHjhLTvJu4FA33AGWWjCpTnA";

    pub const ADD_MEMBER_QUERY_ID: &str = "EadD8ivrhZhYQr2pDmCpjA";
    pub const REMOVE_MEMBER_QUERY_ID: &str = "B5tMzrMYuFHJex_4EXFTSw";
    pub const LIST_OWNERSHIPS_QUERY_ID: &str = "J25SWJdbyp3MRho1c9NhqQ";
    pub const LISTS_QUERY_ID: &str = "xzVN0C62pNPWVfUjixdzeQ";
    pub const USER_BY_SCREEN_NAME_QUERY_ID: &str = "-oaLodhGbbnzJBACb1kk2Q";

    /// Cookie holding the anti-forgery token
    pub const CSRF_COOKIE: &str = "ct0";
    /// Cookie holding the signed-in viewer id (`u=<id>`, url-encoded)
    pub const VIEWER_COOKIE: &str = "twid";
}
