//! Authenticator flows against a wiremock server
//!
//! Login endpoints are mocked with `expect(n)` so credential caching is
//! asserted by wiremock itself: a cookie authenticator with `onePerRun`
//! must hit the login endpoint exactly once no matter how many main
//! requests run.

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use trawl::{ApiCrawler, CrawlError};
use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn run_yaml(yaml: &str) -> Result<Value, CrawlError> {
    let crawler = ApiCrawler::from_yaml(yaml)?;
    crawler.run(CancellationToken::new()).await
}

// =============================================================================
// STATELESS VARIANTS
// =============================================================================

#[tokio::test]
async fn basic_auth_header_on_every_request() {
    let server = MockServer::start().await;
    // "user:pass" in RFC 7617 form
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("Authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
rootContext: {{}}
auth:
  type: basic
  username: user
  password: pass
steps:
  - type: request
    name: data
    request:
      url: {}/data
      method: GET
"#,
        server.uri()
    );

    run_yaml(&yaml).await.unwrap();
}

#[tokio::test]
async fn bearer_auth_header_on_every_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("Authorization", "Bearer static-token-12345"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
rootContext: {{}}
auth:
  type: bearer
  token: static-token-12345
steps:
  - type: request
    name: data
    request:
      url: {}/data
      method: GET
"#,
        server.uri()
    );

    run_yaml(&yaml).await.unwrap();
}

#[tokio::test]
async fn request_level_auth_overrides_global() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/open"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/locked"))
        .and(header("Authorization", "Bearer override-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
rootContext: {{}}
steps:
  - type: request
    name: open
    noopMerge: true
    request:
      url: {uri}/open
      method: GET
  - type: request
    name: locked
    noopMerge: true
    request:
      url: {uri}/locked
      method: GET
      auth:
        type: bearer
        token: override-token
"#,
        uri = server.uri()
    );

    run_yaml(&yaml).await.unwrap();
}

// =============================================================================
// COOKIE LOGIN FLOW
// =============================================================================

#[tokio::test]
async fn cookie_auth_with_one_per_run_logs_in_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Set-Cookie", "session=s3cr3t-cookie; Path=/; HttpOnly")
                .set_body_json(json!({"ok": true})),
        )
        .expect(1)
        .mount(&server)
        .await;
    for name in ["a", "b", "c"] {
        Mock::given(method("GET"))
            .and(path(format!("/{name}")))
            .and(header("Cookie", "session=s3cr3t-cookie"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
    }

    let yaml = format!(
        r#"
rootContext: {{}}
auth:
  type: cookie
  extractSelector: session
  onePerRun: true
  loginRequest:
    url: {uri}/login
    method: POST
    headers:
      Content-Type: application/json
    body:
      user: bob
      pass: pw
steps:
  - type: request
    name: a
    noopMerge: true
    request:
      url: {uri}/a
      method: GET
  - type: request
    name: b
    noopMerge: true
    request:
      url: {uri}/b
      method: GET
  - type: request
    name: c
    noopMerge: true
    request:
      url: {uri}/c
      method: GET
"#,
        uri = server.uri()
    );

    run_yaml(&yaml).await.unwrap();
}

#[tokio::test]
async fn cookie_login_sends_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(header("Content-Type", "application/json"))
        .and(body_json(json!({"user": "bob", "pass": "pw"})))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Set-Cookie", "sid=abc-def-ghi-jkl"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("Cookie", "sid=abc-def-ghi-jkl"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
rootContext: {{}}
auth:
  type: cookie
  extractSelector: sid
  loginRequest:
    url: {uri}/login
    method: POST
    headers:
      Content-Type: application/json
    body:
      user: bob
      pass: pw
steps:
  - type: request
    name: data
    request:
      url: {uri}/data
      method: GET
"#,
        uri = server.uri()
    );

    run_yaml(&yaml).await.unwrap();
}

#[tokio::test]
async fn missing_cookie_in_login_response_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
rootContext: {{}}
auth:
  type: cookie
  extractSelector: session
  loginRequest:
    url: {uri}/login
    method: POST
steps:
  - type: request
    name: data
    request:
      url: {uri}/data
      method: GET
"#,
        uri = server.uri()
    );

    let err = run_yaml(&yaml).await.unwrap_err();
    assert!(matches!(err, CrawlError::ExtractionFailed { .. }));
}

#[tokio::test]
async fn non_2xx_login_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "denied"})))
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
rootContext: {{}}
auth:
  type: cookie
  extractSelector: session
  loginRequest:
    url: {uri}/login
    method: POST
steps:
  - type: request
    name: data
    request:
      url: {uri}/data
      method: GET
"#,
        uri = server.uri()
    );

    let err = run_yaml(&yaml).await.unwrap_err();
    assert!(matches!(
        err,
        CrawlError::LoginFailed {
            status: Some(401),
            ..
        }
    ));
}

// =============================================================================
// JWT LOGIN FLOW
// =============================================================================

#[tokio::test]
async fn jwt_auth_extracts_token_from_login_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"token": "jwt-token-value"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("Authorization", "Bearer jwt-token-value"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rows": []})))
        .expect(1)
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
rootContext: {{}}
auth:
  type: jwt
  extractFrom: body
  extractSelector: ".token"
  loginRequest:
    url: {uri}/login
    method: POST
    headers:
      Content-Type: application/json
    body:
      user: bob
steps:
  - type: request
    name: data
    request:
      url: {uri}/data
      method: GET
"#,
        uri = server.uri()
    );

    let data = run_yaml(&yaml).await.unwrap();
    assert_eq!(data, json!({"rows": []}));
}

#[tokio::test]
async fn jwt_non_string_token_is_a_type_mismatch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": 12345})))
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
rootContext: {{}}
auth:
  type: jwt
  extractSelector: ".token"
  loginRequest:
    url: {uri}/login
    method: POST
steps:
  - type: request
    name: data
    request:
      url: {uri}/data
      method: GET
"#,
        uri = server.uri()
    );

    let err = run_yaml(&yaml).await.unwrap_err();
    assert!(matches!(err, CrawlError::TypeMismatch { .. }));
}

// =============================================================================
// CUSTOM LOGIN FLOW
// =============================================================================

#[tokio::test]
async fn custom_auth_header_to_query_injection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("X-Auth-Token", "tok-from-header"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(query_param("apikey", "tok-from-header"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
rootContext: {{}}
auth:
  type: custom
  extractFrom: header
  extractSelector: X-Auth-Token
  injectInto: query
  injectKey: apikey
  loginRequest:
    url: {uri}/login
    method: POST
steps:
  - type: request
    name: data
    request:
      url: {uri}/data
      method: GET
"#,
        uri = server.uri()
    );

    run_yaml(&yaml).await.unwrap();
}

#[tokio::test]
async fn custom_auth_cookie_to_bearer_injection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Set-Cookie", "access=cookie-token; Path=/"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("Authorization", "Bearer cookie-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
rootContext: {{}}
auth:
  type: custom
  extractFrom: cookie
  extractSelector: access
  injectInto: bearer
  loginRequest:
    url: {uri}/login
    method: POST
steps:
  - type: request
    name: data
    request:
      url: {uri}/data
      method: GET
"#,
        uri = server.uri()
    );

    run_yaml(&yaml).await.unwrap();
}

// =============================================================================
// OAUTH
// =============================================================================

#[tokio::test]
async fn oauth_password_grant_fetches_and_caches_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=bob"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "oauth-access-token",
            "token_type": "bearer",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;
    for name in ["a", "b"] {
        Mock::given(method("GET"))
            .and(path(format!("/{name}")))
            .and(header("Authorization", "Bearer oauth-access-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
    }

    let yaml = format!(
        r#"
rootContext: {{}}
auth:
  type: oauth
  method: password
  username: bob
  password: pw
  tokenUrl: {uri}/token
  clientId: cli
  clientSecret: shh
steps:
  - type: request
    name: a
    noopMerge: true
    request:
      url: {uri}/a
      method: GET
  - type: request
    name: b
    noopMerge: true
    request:
      url: {uri}/b
      method: GET
"#,
        uri = server.uri()
    );

    run_yaml(&yaml).await.unwrap();
}

#[tokio::test]
async fn oauth_client_credentials_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "cc-token",
            "token_type": "bearer",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("Authorization", "Bearer cc-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
rootContext: {{}}
auth:
  type: oauth
  method: client_credentials
  tokenUrl: {uri}/token
  clientId: svc
  clientSecret: shh
steps:
  - type: request
    name: data
    request:
      url: {uri}/data
      method: GET
"#,
        uri = server.uri()
    );

    run_yaml(&yaml).await.unwrap();
}

#[tokio::test]
async fn oauth_token_endpoint_failure_is_login_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
rootContext: {{}}
auth:
  type: oauth
  method: client_credentials
  tokenUrl: {uri}/token
  clientId: svc
  clientSecret: shh
steps:
  - type: request
    name: data
    request:
      url: {uri}/data
      method: GET
"#,
        uri = server.uri()
    );

    let err = run_yaml(&yaml).await.unwrap_err();
    assert!(matches!(err, CrawlError::LoginFailed { .. }));
}
