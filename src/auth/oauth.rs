//! OAuth2 token provider
//!
//! Wraps the `oauth2` crate for the password and client-credentials grants.
//! The access token is cached with its expiry; refresh happens lazily on the
//! first request that finds the cache empty or expired. Token fetches are
//! serialized behind the state mutex.

use std::time::{Duration, Instant};

use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, ResourceOwnerPassword, ResourceOwnerUsername, Scope,
    TokenResponse, TokenUrl,
};
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{CrawlError, Result};
use crate::manifest::AuthConfig;
use crate::profile::{ProfileEventKind, Profiler};

use super::{mask_token, set_header};

/// Tokens this close to expiry count as expired
const EXPIRY_LEEWAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
enum Grant {
    Password { username: String, password: String },
    ClientCredentials,
}

#[derive(Debug, Default)]
struct TokenState {
    access_token: Option<String>,
    expires_at: Option<Instant>,
}

/// Cached OAuth2 access-token provider
#[derive(Debug)]
pub struct OAuthProvider {
    client: BasicClient,
    grant: Grant,
    scopes: Vec<Scope>,
    profiler: Profiler,
    state: Mutex<TokenState>,
}

impl OAuthProvider {
    pub fn new(config: &AuthConfig, profiler: Profiler) -> Result<Self> {
        let grant = match config.method.as_str() {
            "password" => Grant::Password {
                username: config.username.clone(),
                password: config.password.clone(),
            },
            "client_credentials" => Grant::ClientCredentials,
            other => {
                return Err(CrawlError::InvalidAuthConfig {
                    reason: format!(
                        "oauth method must be password or client_credentials, got '{other}'"
                    ),
                })
            }
        };

        let token_url =
            TokenUrl::new(config.token_url.clone()).map_err(|e| CrawlError::InvalidAuthConfig {
                reason: format!("invalid tokenUrl: {e}"),
            })?;
        // The authorization endpoint is unused by both grants; the token URL
        // stands in to satisfy the client constructor.
        let auth_url =
            AuthUrl::new(config.token_url.clone()).map_err(|e| CrawlError::InvalidAuthConfig {
                reason: format!("invalid tokenUrl: {e}"),
            })?;

        let client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            (!config.client_secret.is_empty())
                .then(|| ClientSecret::new(config.client_secret.clone())),
            auth_url,
            Some(token_url),
        );

        Ok(Self {
            client,
            grant,
            scopes: config.scopes.iter().cloned().map(Scope::new).collect(),
            profiler,
            state: Mutex::new(TokenState::default()),
        })
    }

    pub async fn prepare_request(
        &self,
        request: &mut reqwest::Request,
        request_id: Option<Uuid>,
    ) -> Result<()> {
        let auth_id = self.profiler.emit(
            ProfileEventKind::AuthStart,
            "OAuth2 Auth",
            request_id,
            json!({"authType": "oauth", "method": self.method_name()}),
        );

        let token = match self.token_with_cache(auth_id).await {
            Ok(token) => token,
            Err(e) => {
                self.profiler.emit(
                    ProfileEventKind::AuthEnd,
                    "OAuth2 Auth Failed",
                    Some(auth_id),
                    json!({"authType": "oauth", "error": e.to_string()}),
                );
                return Err(e);
            }
        };

        set_header(
            request,
            reqwest::header::AUTHORIZATION,
            &format!("Bearer {token}"),
        )?;
        self.profiler.emit(
            ProfileEventKind::AuthTokenInject,
            "OAuth Token Injected",
            Some(auth_id),
            json!({
                "location": "Authorization header",
                "format": "Bearer",
                "token": mask_token(&token),
            }),
        );
        self.profiler.emit(
            ProfileEventKind::AuthEnd,
            "OAuth2 Auth Complete",
            Some(auth_id),
            json!({"authType": "oauth"}),
        );
        Ok(())
    }

    /// Return the cached token, fetching a fresh one when needed
    async fn token_with_cache(&self, auth_id: Uuid) -> Result<String> {
        let mut state = self.state.lock().await;

        if let Some(token) = &state.access_token {
            let valid = match state.expires_at {
                Some(expires_at) => Instant::now() + EXPIRY_LEEWAY < expires_at,
                None => true,
            };
            if valid {
                self.profiler.emit(
                    ProfileEventKind::AuthCached,
                    "Using Cached OAuth Token",
                    Some(auth_id),
                    json!({"token": mask_token(token), "source": "cached"}),
                );
                return Ok(token.clone());
            }
        }

        let login_id = self.profiler.emit(
            ProfileEventKind::AuthLoginStart,
            "OAuth2 Login Request",
            Some(auth_id),
            json!({"authType": "oauth", "method": self.method_name()}),
        );
        let started = Instant::now();

        let result = self.fetch_token().await;

        match &result {
            Ok((token, expires_in)) => self.profiler.emit_end(
                ProfileEventKind::AuthLoginEnd,
                "OAuth2 Login Complete",
                login_id,
                Some(auth_id),
                started,
                json!({
                    "authType": "oauth",
                    "token": mask_token(token),
                    "expiresInSecs": expires_in.map(|d| d.as_secs()),
                }),
            ),
            Err(e) => self.profiler.emit_end(
                ProfileEventKind::AuthLoginEnd,
                "OAuth2 Login Failed",
                login_id,
                Some(auth_id),
                started,
                json!({"authType": "oauth", "error": e.to_string()}),
            ),
        }

        let (token, expires_in) = result?;
        state.expires_at = expires_in.map(|d| Instant::now() + d);
        state.access_token = Some(token.clone());
        Ok(token)
    }

    async fn fetch_token(&self) -> Result<(String, Option<Duration>)> {
        let response = match &self.grant {
            Grant::Password { username, password } => {
                let username = ResourceOwnerUsername::new(username.clone());
                let password = ResourceOwnerPassword::new(password.clone());
                let mut req = self.client.exchange_password(&username, &password);
                for scope in &self.scopes {
                    req = req.add_scope(scope.clone());
                }
                req.request_async(async_http_client).await
            }
            Grant::ClientCredentials => {
                let mut req = self.client.exchange_client_credentials();
                for scope in &self.scopes {
                    req = req.add_scope(scope.clone());
                }
                req.request_async(async_http_client).await
            }
        }
        .map_err(|e| CrawlError::LoginFailed {
            status: None,
            reason: format!("token request failed: {e}"),
        })?;

        Ok((
            response.access_token().secret().clone(),
            response.expires_in(),
        ))
    }

    fn method_name(&self) -> &'static str {
        match self.grant {
            Grant::Password { .. } => "password",
            Grant::ClientCredentials => "client_credentials",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oauth_config(method: &str) -> AuthConfig {
        AuthConfig {
            kind: "oauth".into(),
            method: method.into(),
            token_url: "https://id.example.com/token".into(),
            client_id: "svc".into(),
            client_secret: "secret".into(),
            username: "bob".into(),
            password: "pw".into(),
            ..AuthConfig::default()
        }
    }

    #[test]
    fn builds_both_grants() {
        assert!(OAuthProvider::new(&oauth_config("password"), Profiler::disabled()).is_ok());
        assert!(
            OAuthProvider::new(&oauth_config("client_credentials"), Profiler::disabled()).is_ok()
        );
    }

    #[test]
    fn unknown_method_is_rejected() {
        let err = OAuthProvider::new(&oauth_config("implicit"), Profiler::disabled()).unwrap_err();
        assert!(matches!(err, CrawlError::InvalidAuthConfig { .. }));
    }

    #[test]
    fn invalid_token_url_is_rejected() {
        let mut config = oauth_config("password");
        config.token_url = "not a url".into();
        let err = OAuthProvider::new(&config, Profiler::disabled()).unwrap_err();
        assert!(matches!(err, CrawlError::InvalidAuthConfig { .. }));
    }
}
