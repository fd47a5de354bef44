//! Polymorphic credential providers
//!
//! One operation: [`Authenticator::prepare_request`] mutates an outgoing
//! request to carry authentication. Stateless variants (basic, bearer) just
//! set headers; stateful variants (oauth, cookie, jwt, custom) hold a cached
//! credential behind a mutex and run their login flow when the cache is
//! empty or expired. Login flows reuse the crawl's HTTP client.

mod login;
mod oauth;

pub use login::LoginAuthenticator;
pub use oauth::OAuthProvider;

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::error::{CrawlError, Result};
use crate::expr::ExprEngine;
use crate::manifest::AuthConfig;
use crate::profile::{ProfileEventKind, Profiler};

/// A credential provider selected by the manifest's auth config
#[derive(Debug)]
pub enum Authenticator {
    /// No authentication
    None,
    Basic {
        username: String,
        password: String,
        profiler: Profiler,
    },
    Bearer {
        token: String,
        profiler: Profiler,
    },
    OAuth(OAuthProvider),
    Cookie(LoginAuthenticator),
    Jwt(LoginAuthenticator),
    Custom(LoginAuthenticator),
}

impl Authenticator {
    /// Build an authenticator from an optional config; absent config or an
    /// empty type yields the no-op authenticator.
    pub fn from_config(
        config: Option<&AuthConfig>,
        client: reqwest::Client,
        engine: Arc<ExprEngine>,
        profiler: Profiler,
    ) -> Result<Self> {
        let Some(config) = config else {
            return Ok(Authenticator::None);
        };
        if config.kind.is_empty() {
            return Ok(Authenticator::None);
        }

        match config.kind.to_ascii_lowercase().as_str() {
            "basic" => Ok(Authenticator::Basic {
                username: config.username.clone(),
                password: config.password.clone(),
                profiler,
            }),
            "bearer" => Ok(Authenticator::Bearer {
                token: config.token.clone(),
                profiler,
            }),
            "oauth" => Ok(Authenticator::OAuth(OAuthProvider::new(config, profiler)?)),
            "cookie" => Ok(Authenticator::Cookie(LoginAuthenticator::cookie(
                config, client, engine, profiler,
            )?)),
            "jwt" => Ok(Authenticator::Jwt(LoginAuthenticator::jwt(
                config, client, engine, profiler,
            )?)),
            "custom" => Ok(Authenticator::Custom(LoginAuthenticator::custom(
                config, client, engine, profiler,
            )?)),
            other => Err(CrawlError::InvalidAuthConfig {
                reason: format!("unsupported auth type '{other}'"),
            }),
        }
    }

    /// Mutate the outgoing request to carry authentication
    pub async fn prepare_request(
        &self,
        request: &mut reqwest::Request,
        request_id: Option<Uuid>,
    ) -> Result<()> {
        match self {
            Authenticator::None => Ok(()),
            Authenticator::Basic {
                username,
                password,
                profiler,
            } => {
                let auth_id = profiler.emit(
                    ProfileEventKind::AuthStart,
                    "Basic Auth",
                    request_id,
                    json!({"authType": "basic", "username": username}),
                );

                let value = format!(
                    "Basic {}",
                    basic_credentials(username, password)
                );
                set_header(request, reqwest::header::AUTHORIZATION, &value)?;

                profiler.emit(
                    ProfileEventKind::AuthTokenInject,
                    "Basic Auth Injected",
                    Some(auth_id),
                    json!({"location": "Authorization header", "format": "Basic"}),
                );
                profiler.emit(
                    ProfileEventKind::AuthEnd,
                    "Basic Auth Complete",
                    Some(auth_id),
                    json!({"authType": "basic"}),
                );
                Ok(())
            }
            Authenticator::Bearer { token, profiler } => {
                let auth_id = profiler.emit(
                    ProfileEventKind::AuthStart,
                    "Bearer Auth",
                    request_id,
                    json!({"authType": "bearer"}),
                );
                set_header(
                    request,
                    reqwest::header::AUTHORIZATION,
                    &format!("Bearer {token}"),
                )?;
                profiler.emit(
                    ProfileEventKind::AuthTokenInject,
                    "Bearer Token Injected",
                    Some(auth_id),
                    json!({
                        "location": "Authorization header",
                        "format": "Bearer",
                        "token": mask_token(token),
                    }),
                );
                profiler.emit(
                    ProfileEventKind::AuthEnd,
                    "Bearer Auth Complete",
                    Some(auth_id),
                    json!({"authType": "bearer"}),
                );
                Ok(())
            }
            Authenticator::OAuth(provider) => provider.prepare_request(request, request_id).await,
            Authenticator::Cookie(auth) | Authenticator::Jwt(auth) | Authenticator::Custom(auth) => {
                auth.prepare_request(request, request_id).await
            }
        }
    }
}

/// RFC 7617 basic credentials: base64 of `user:pass`
fn basic_credentials(username: &str, password: &str) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"))
}

/// Set a header on an already-built request
pub(crate) fn set_header(
    request: &mut reqwest::Request,
    name: reqwest::header::HeaderName,
    value: &str,
) -> Result<()> {
    let value = reqwest::header::HeaderValue::from_str(value).map_err(|e| {
        CrawlError::RequestBuildFailed {
            details: format!("invalid header value for '{name}': {e}"),
        }
    })?;
    request.headers_mut().insert(name, value);
    Ok(())
}

/// Mask a credential for profiler payloads: keep first and last 4 chars
pub(crate) fn mask_token(token: &str) -> String {
    if token.len() <= 8 {
        "***".to_string()
    } else {
        format!("{}...{}", &token[..4], &token[token.len() - 4..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_get(url: &str) -> reqwest::Request {
        reqwest::Client::new().get(url).build().unwrap()
    }

    #[tokio::test]
    async fn noop_authenticator_leaves_request_untouched() {
        let auth = Authenticator::None;
        let mut req = build_get("https://example.com/");
        auth.prepare_request(&mut req, None).await.unwrap();
        assert!(req.headers().is_empty());
    }

    #[tokio::test]
    async fn basic_auth_sets_authorization_header() {
        let auth = Authenticator::Basic {
            username: "aladdin".into(),
            password: "opensesame".into(),
            profiler: Profiler::disabled(),
        };
        let mut req = build_get("https://example.com/");
        auth.prepare_request(&mut req, None).await.unwrap();

        // RFC 7617 reference pair
        assert_eq!(
            req.headers()[reqwest::header::AUTHORIZATION],
            "Basic YWxhZGRpbjpvcGVuc2VzYW1l"
        );
    }

    #[tokio::test]
    async fn bearer_auth_sets_authorization_header() {
        let auth = Authenticator::Bearer {
            token: "tok-123".into(),
            profiler: Profiler::disabled(),
        };
        let mut req = build_get("https://example.com/");
        auth.prepare_request(&mut req, None).await.unwrap();
        assert_eq!(req.headers()[reqwest::header::AUTHORIZATION], "Bearer tok-123");
    }

    #[test]
    fn empty_config_is_noop() {
        let auth = Authenticator::from_config(
            None,
            reqwest::Client::new(),
            Arc::new(ExprEngine::new()),
            Profiler::disabled(),
        )
        .unwrap();
        assert!(matches!(auth, Authenticator::None));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let config = AuthConfig {
            kind: "kerberos".into(),
            ..AuthConfig::default()
        };
        let err = Authenticator::from_config(
            Some(&config),
            reqwest::Client::new(),
            Arc::new(ExprEngine::new()),
            Profiler::disabled(),
        )
        .unwrap_err();
        assert!(matches!(err, CrawlError::InvalidAuthConfig { .. }));
    }

    #[test]
    fn token_masking() {
        assert_eq!(mask_token("short"), "***");
        assert_eq!(mask_token("12345678"), "***");
        assert_eq!(mask_token("abcdefghijkl"), "abcd...ijkl");
    }

    #[test]
    fn base64_reference_vectors() {
        assert_eq!(basic_credentials("a", "b"), "YTpi");
        assert_eq!(
            basic_credentials("aladdin", "opensesame"),
            "YWxhZGRpbjpvcGVuc2VzYW1l"
        );
    }
}
