//! Login-flow authenticators (cookie, jwt, custom)
//!
//! All three share one engine: POST (or GET) a configured login request,
//! check for 2xx, extract a credential from a cookie / header / the JSON
//! body, cache it, and inject it into outgoing requests. The variants differ
//! only in where they extract from and where they inject to:
//!
//! | type   | extract              | inject                         |
//! |--------|----------------------|--------------------------------|
//! | cookie | cookie by name       | cookie                         |
//! | jwt    | header or body (jq)  | bearer                         |
//! | custom | cookie/header/body   | cookie/header/bearer/query     |
//!
//! Credential state lives behind an async mutex so concurrent iterations
//! serialize their login decisions; with `onePerRun` the login runs exactly
//! once per crawl.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderName, COOKIE, SET_COOKIE};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::crawler::build_plain_request;
use crate::error::{CrawlError, Result};
use crate::expr::ExprEngine;
use crate::manifest::{AuthConfig, RequestConfig};
use crate::profile::{ProfileEventKind, Profiler};

use super::{mask_token, set_header};

/// Where the credential is read from in the login response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractFrom {
    Cookie,
    Header,
    Body,
}

/// Where the credential is placed on outgoing requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InjectInto {
    Cookie,
    Header,
    Bearer,
    Query,
}

#[derive(Debug, Default)]
struct CredentialState {
    authenticated: bool,
    token: Option<String>,
    /// (name, value) pair from a Set-Cookie login response
    cookie: Option<(String, String)>,
    acquired_at: Option<Instant>,
}

/// Credential provider backed by a login sub-request
#[derive(Debug)]
pub struct LoginAuthenticator {
    client: reqwest::Client,
    engine: Arc<ExprEngine>,
    profiler: Profiler,
    auth_type: &'static str,

    login_request: RequestConfig,
    extract_from: ExtractFrom,
    extract_selector: String,
    inject_into: InjectInto,
    inject_key: String,

    /// None when maxAgeSeconds is 0 (credential never expires)
    max_age: Option<Duration>,
    one_per_run: bool,

    state: Mutex<CredentialState>,
}

impl LoginAuthenticator {
    pub fn cookie(
        config: &AuthConfig,
        client: reqwest::Client,
        engine: Arc<ExprEngine>,
        profiler: Profiler,
    ) -> Result<Self> {
        Self::build(
            config,
            client,
            engine,
            profiler,
            "cookie",
            ExtractFrom::Cookie,
            InjectInto::Cookie,
        )
    }

    pub fn jwt(
        config: &AuthConfig,
        client: reqwest::Client,
        engine: Arc<ExprEngine>,
        profiler: Profiler,
    ) -> Result<Self> {
        let extract_from = match config.extract_from.as_str() {
            // The original defaults JWT extraction to the body
            "" | "body" => ExtractFrom::Body,
            "header" => ExtractFrom::Header,
            other => {
                return Err(CrawlError::InvalidAuthConfig {
                    reason: format!("jwt extractFrom must be header or body, got '{other}'"),
                })
            }
        };
        Self::build(
            config,
            client,
            engine,
            profiler,
            "jwt",
            extract_from,
            InjectInto::Bearer,
        )
    }

    pub fn custom(
        config: &AuthConfig,
        client: reqwest::Client,
        engine: Arc<ExprEngine>,
        profiler: Profiler,
    ) -> Result<Self> {
        let extract_from = match config.extract_from.as_str() {
            "cookie" => ExtractFrom::Cookie,
            "header" => ExtractFrom::Header,
            "body" => ExtractFrom::Body,
            other => {
                return Err(CrawlError::InvalidAuthConfig {
                    reason: format!("unsupported extractFrom '{other}'"),
                })
            }
        };
        let inject_into = match config.inject_into.as_str() {
            "cookie" => InjectInto::Cookie,
            "header" => InjectInto::Header,
            "bearer" => InjectInto::Bearer,
            "query" => InjectInto::Query,
            other => {
                return Err(CrawlError::UnsupportedInjection {
                    target: other.to_string(),
                })
            }
        };
        Self::build(
            config,
            client,
            engine,
            profiler,
            "custom",
            extract_from,
            inject_into,
        )
    }

    fn build(
        config: &AuthConfig,
        client: reqwest::Client,
        engine: Arc<ExprEngine>,
        profiler: Profiler,
        auth_type: &'static str,
        extract_from: ExtractFrom,
        inject_into: InjectInto,
    ) -> Result<Self> {
        let login_request = config
            .login_request
            .as_deref()
            .cloned()
            .ok_or_else(|| CrawlError::InvalidAuthConfig {
                reason: format!("{auth_type} auth requires loginRequest"),
            })?;

        Ok(Self {
            client,
            engine,
            profiler,
            auth_type,
            login_request,
            extract_from,
            extract_selector: config.extract_selector.clone(),
            inject_into,
            inject_key: config.inject_key.clone(),
            max_age: (config.max_age_seconds > 0)
                .then(|| Duration::from_secs(config.max_age_seconds)),
            one_per_run: config.one_per_run,
            state: Mutex::new(CredentialState::default()),
        })
    }

    pub async fn prepare_request(
        &self,
        request: &mut reqwest::Request,
        request_id: Option<Uuid>,
    ) -> Result<()> {
        let auth_id = self.profiler.emit(
            ProfileEventKind::AuthStart,
            format!("{} Auth", self.auth_type),
            request_id,
            json!({"authType": self.auth_type}),
        );

        let mut state = self.state.lock().await;

        if self.needs_login(&state) {
            if let Err(e) = self.perform_login(&mut state, auth_id).await {
                self.profiler.emit(
                    ProfileEventKind::AuthEnd,
                    format!("{} Auth Failed", self.auth_type),
                    Some(auth_id),
                    json!({"authType": self.auth_type, "error": e.to_string()}),
                );
                return Err(e);
            }
            state.authenticated = true;
        } else {
            let age = state
                .acquired_at
                .map(|t| format!("{:?}", t.elapsed()))
                .unwrap_or_default();
            self.profiler.emit(
                ProfileEventKind::AuthCached,
                "Using Cached Credential",
                Some(auth_id),
                json!({
                    "authType": self.auth_type,
                    "age": age,
                    "token": state.token.as_deref().map(mask_token),
                }),
            );
        }

        self.inject(&state, request, auth_id)?;

        self.profiler.emit(
            ProfileEventKind::AuthEnd,
            format!("{} Auth Complete", self.auth_type),
            Some(auth_id),
            json!({"authType": self.auth_type}),
        );
        Ok(())
    }

    fn needs_login(&self, state: &CredentialState) -> bool {
        if !state.authenticated {
            return true;
        }
        if self.one_per_run {
            return false;
        }
        let missing = state.token.is_none() && state.cookie.is_none();
        let expired = match (self.max_age, state.acquired_at) {
            (Some(max_age), Some(acquired)) => acquired.elapsed() > max_age,
            _ => false,
        };
        missing || expired
    }

    async fn perform_login(&self, state: &mut CredentialState, auth_id: Uuid) -> Result<()> {
        let login_id = self.profiler.emit(
            ProfileEventKind::AuthLoginStart,
            format!("{} Login Request", self.auth_type),
            Some(auth_id),
            json!({
                "authType": self.auth_type,
                "url": self.login_request.url,
                "method": self.login_request.method,
            }),
        );
        let started = Instant::now();

        let result = self.login_once(state, login_id).await;

        match &result {
            Ok(status) => self.profiler.emit_end(
                ProfileEventKind::AuthLoginEnd,
                format!("{} Login Complete", self.auth_type),
                login_id,
                Some(auth_id),
                started,
                json!({"authType": self.auth_type, "statusCode": status}),
            ),
            Err(e) => self.profiler.emit_end(
                ProfileEventKind::AuthLoginEnd,
                format!("{} Login Failed", self.auth_type),
                login_id,
                Some(auth_id),
                started,
                json!({"authType": self.auth_type, "error": e.to_string()}),
            ),
        }
        result.map(|_| ())
    }

    async fn login_once(&self, state: &mut CredentialState, login_id: Uuid) -> Result<u16> {
        let request = build_plain_request(&self.client, &self.login_request)?;
        let response = self.client.execute(request).await.map_err(|e| {
            CrawlError::LoginFailed {
                status: None,
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::LoginFailed {
                status: Some(status.as_u16()),
                reason: "login response was not 2xx".to_string(),
            });
        }

        match self.extract_from {
            ExtractFrom::Cookie => {
                let (name, value) = extract_cookie(&response, &self.extract_selector)?;
                self.profiler.emit(
                    ProfileEventKind::AuthTokenExtract,
                    "Credential Extracted from Cookie",
                    Some(login_id),
                    json!({"cookieName": name, "cookieValue": mask_token(&value)}),
                );
                // Non-cookie injection uses the raw value as a token
                if self.inject_into != InjectInto::Cookie {
                    state.token = Some(value.clone());
                }
                state.cookie = Some((name, value));
            }
            ExtractFrom::Header => {
                let token = response
                    .headers()
                    .get(&self.extract_selector)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| CrawlError::ExtractionFailed {
                        selector: self.extract_selector.clone(),
                        reason: "header not found in login response".to_string(),
                    })?;
                self.profiler.emit(
                    ProfileEventKind::AuthTokenExtract,
                    "Credential Extracted from Header",
                    Some(login_id),
                    json!({"headerName": self.extract_selector, "token": mask_token(&token)}),
                );
                state.token = Some(token);
            }
            ExtractFrom::Body => {
                let body: Value =
                    response
                        .json()
                        .await
                        .map_err(|e| CrawlError::ExtractionFailed {
                            selector: self.extract_selector.clone(),
                            reason: format!("failed to decode login response: {e}"),
                        })?;
                let token = self.extract_body_token(&body)?;
                self.profiler.emit(
                    ProfileEventKind::AuthTokenExtract,
                    "Credential Extracted from Body",
                    Some(login_id),
                    json!({"jqSelector": self.extract_selector, "token": mask_token(&token)}),
                );
                state.token = Some(token);
            }
        }

        state.acquired_at = Some(Instant::now());
        Ok(status.as_u16())
    }

    fn extract_body_token(&self, body: &Value) -> Result<String> {
        let values = self.engine.eval(&self.extract_selector, body)?;
        let value = values
            .into_iter()
            .next()
            .ok_or_else(|| CrawlError::ExtractionFailed {
                selector: self.extract_selector.clone(),
                reason: "selector yielded no results".to_string(),
            })?;
        match value {
            Value::String(token) if !token.is_empty() => Ok(token),
            Value::Null => Err(CrawlError::ExtractionFailed {
                selector: self.extract_selector.clone(),
                reason: "selector yielded null".to_string(),
            }),
            other => Err(CrawlError::TypeMismatch {
                expected: "string token".to_string(),
                actual: json_type_name(&other).to_string(),
            }),
        }
    }

    fn inject(
        &self,
        state: &CredentialState,
        request: &mut reqwest::Request,
        auth_id: Uuid,
    ) -> Result<()> {
        match self.inject_into {
            InjectInto::Cookie => {
                if let Some((name, value)) = &state.cookie {
                    append_cookie(request, name, value)?;
                    self.profiler.emit(
                        ProfileEventKind::AuthTokenInject,
                        "Credential Injected",
                        Some(auth_id),
                        json!({
                            "location": "Cookie header",
                            "cookieName": name,
                            "cookieValue": mask_token(value),
                        }),
                    );
                }
            }
            InjectInto::Header => {
                if let Some(token) = &state.token {
                    let name = self.inject_key.parse::<HeaderName>().map_err(|e| {
                        CrawlError::InvalidAuthConfig {
                            reason: format!("invalid injectKey header name: {e}"),
                        }
                    })?;
                    set_header(request, name, token)?;
                    self.profiler.emit(
                        ProfileEventKind::AuthTokenInject,
                        "Credential Injected",
                        Some(auth_id),
                        json!({
                            "location": "Header",
                            "headerKey": self.inject_key,
                            "token": mask_token(token),
                        }),
                    );
                }
            }
            InjectInto::Bearer => {
                if let Some(token) = &state.token {
                    set_header(
                        request,
                        reqwest::header::AUTHORIZATION,
                        &format!("Bearer {token}"),
                    )?;
                    self.profiler.emit(
                        ProfileEventKind::AuthTokenInject,
                        "Credential Injected",
                        Some(auth_id),
                        json!({
                            "location": "Authorization header",
                            "format": "Bearer",
                            "token": mask_token(token),
                        }),
                    );
                }
            }
            InjectInto::Query => {
                if let Some(token) = &state.token {
                    request
                        .url_mut()
                        .query_pairs_mut()
                        .append_pair(&self.inject_key, token);
                    self.profiler.emit(
                        ProfileEventKind::AuthTokenInject,
                        "Credential Injected",
                        Some(auth_id),
                        json!({
                            "location": "Query parameter",
                            "queryKey": self.inject_key,
                            "token": mask_token(token),
                        }),
                    );
                }
            }
        }
        Ok(())
    }
}

/// Find a cookie by name among the login response's Set-Cookie headers
fn extract_cookie(response: &reqwest::Response, name: &str) -> Result<(String, String)> {
    for header in response.headers().get_all(SET_COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        // "name=value; Path=/; HttpOnly" - only the first pair matters
        let pair = raw.split(';').next().unwrap_or_default();
        if let Some((cookie_name, value)) = pair.split_once('=') {
            if cookie_name.trim() == name {
                return Ok((name.to_string(), value.trim().to_string()));
            }
        }
    }
    Err(CrawlError::ExtractionFailed {
        selector: name.to_string(),
        reason: "cookie not found in login response".to_string(),
    })
}

/// Append to the Cookie header, preserving cookies already present
fn append_cookie(request: &mut reqwest::Request, name: &str, value: &str) -> Result<()> {
    let pair = format!("{name}={value}");
    let combined = match request.headers().get(COOKIE).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}; {pair}"),
        None => pair,
    };
    set_header(request, COOKIE, &combined)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
