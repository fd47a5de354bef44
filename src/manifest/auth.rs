//! Authenticator configuration
//!
//! One flat struct covers every auth variant; the `type` field selects which
//! of the other fields apply. `validate::validate_auth` enforces the per-type
//! requirements before a crawl starts.

use serde::Deserialize;

use super::RequestConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    /// basic | bearer | oauth | cookie | jwt | custom
    #[serde(rename = "type")]
    pub kind: String,

    // basic auth, oauth password grant
    pub username: String,
    pub password: String,

    // bearer auth
    pub token: String,

    // oauth
    /// "password" or "client_credentials"
    pub method: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,

    // cookie / jwt / custom login flows
    pub login_request: Option<Box<RequestConfig>>,
    /// cookie | header | body
    pub extract_from: String,
    /// jq for body, name for cookie/header
    pub extract_selector: String,
    /// cookie | header | bearer | query
    pub inject_into: String,
    /// name for header/query injection
    pub inject_key: String,

    // refresh settings
    /// 0 means the credential never expires
    pub max_age_seconds: u64,
    /// Login exactly once per crawl
    pub one_per_run: bool,
}

impl AuthConfig {
    /// Variant types that obtain their credential through a login sub-request
    pub fn needs_login_request(&self) -> bool {
        matches!(
            self.kind.to_ascii_lowercase().as_str(),
            "cookie" | "jwt" | "custom"
        )
    }
}
