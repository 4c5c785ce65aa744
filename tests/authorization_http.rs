//! End-to-end tests for the gated HTTP surface.
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot`. Callers
//! are told apart through `X-Forwarded-For`, so every app here trusts proxy
//! headers.

use authgate_backend::{
    auth::{
        api::{subject_for, AuthState},
        models::{Identity, UserRole},
        provider::GoogleTokenInfo,
        IdentityDirectory, JwtHandler, UserStore,
    },
    clock::ManualClock,
    create_router,
    middleware::rate_limit::{RateLimitConfig, SlidingWindowLimiter},
    AppState,
};
use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use httpmock::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const START: i64 = 1_700_000_000;

struct Harness {
    app: Router,
    clock: ManualClock,
    tokens: Arc<JwtHandler>,
}

impl Harness {
    fn new(max_requests: u32) -> Self {
        Self::build(max_requests, |auth| auth)
    }

    fn build(max_requests: u32, configure: impl FnOnce(AuthState) -> AuthState) -> Self {
        let clock = ManualClock::from_unix_secs(START);
        let tokens = Arc::new(JwtHandler::new(
            "integration-secret",
            Duration::from_secs(3600),
            clock.shared(),
        ));
        // Lowest bcrypt cost; registration tests hash passwords.
        let store = Arc::new(UserStore::with_hash_cost(4));
        for seeded in [
            identity("u-plain", UserRole::User, false),
            identity("u-creator", UserRole::User, true),
            identity("u-admin", UserRole::Admin, false),
        ] {
            store.upsert(seeded);
        }

        let auth = configure(AuthState::new(tokens.clone(), store));
        let limiter = Arc::new(SlidingWindowLimiter::new(clock.shared()));
        let mut state = AppState::new(
            auth,
            limiter,
            RateLimitConfig {
                max_requests,
                window: Duration::from_secs(60),
            },
        );
        state.trust_proxy_headers = true;

        Self {
            app: create_router(state),
            clock,
            tokens,
        }
    }

    fn bearer(&self, sub: &str) -> String {
        let (role, is_creator) = match sub {
            "u-creator" => (UserRole::User, true),
            "u-admin" => (UserRole::Admin, false),
            _ => (UserRole::User, false),
        };
        let issued = self
            .tokens
            .issue_session(&identity(sub, role, is_creator))
            .unwrap();
        format!("Bearer {}", issued.token)
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, headers, body)
    }
}

fn identity(sub: &str, role: UserRole, is_creator: bool) -> Identity {
    Identity::new(sub, sub, format!("{sub}@example.com"), role, is_creator)
}

fn request(method: Method, uri: &str, client: &str, authorization: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", client);
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    builder.body(Body::empty()).unwrap()
}

fn json_request(uri: &str, client: &str, authorization: Option<&str>, body: Value) -> Request<Body> {
    json_request_with(Method::POST, uri, client, authorization, body)
}

fn json_request_with(
    method: Method,
    uri: &str,
    client: &str,
    authorization: Option<&str>,
    body: Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", client)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn test_optional_route_serves_anonymous_and_identified_callers() {
    let h = Harness::new(100);

    let (status, _, body) = h
        .send(request(Method::GET, "/api/posts", "198.51.100.1", None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["viewer"].is_null());
    assert_eq!(body["data"]["posts"].as_array().unwrap().len(), 2);

    // A bad token on an optional route is ignored, not rejected.
    let (status, _, body) = h
        .send(request(
            Method::GET,
            "/api/posts",
            "198.51.100.1",
            Some("Bearer not-a-token"),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["viewer"].is_null());

    let bearer = h.bearer("u-plain");
    let (status, _, body) = h
        .send(request(Method::GET, "/api/posts", "198.51.100.1", Some(&bearer)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["viewer"]["id"], "u-plain");
}

#[tokio::test]
async fn test_required_route_rejections() {
    let h = Harness::new(100);
    let client = "198.51.100.2";

    let (status, _, body) = h
        .send(request(Method::GET, "/api/users/me", client, None))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "missing_credential");
    assert_eq!(body["success"], false);

    let (status, _, body) = h
        .send(request(Method::GET, "/api/users/me", client, Some("Token abc")))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "malformed_header");

    let bearer = h.bearer("u-plain");
    let (status, _, body) = h
        .send(request(Method::GET, "/api/users/me", client, Some(&bearer)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], "u-plain");
    assert_eq!(body["data"]["role"], "user");

    h.clock.advance_secs(3600);
    let (status, _, body) = h
        .send(request(Method::GET, "/api/users/me", client, Some(&bearer)))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_credential");
}

#[tokio::test]
async fn test_capability_routes() {
    let h = Harness::new(100);
    let client = "198.51.100.3";
    let product = json!({ "name": "Sticker pack" });

    let (status, _, body) = h
        .send(json_request(
            "/api/products",
            client,
            Some(&h.bearer("u-plain")),
            product.clone(),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "insufficient_capability");

    let (status, _, body) = h
        .send(json_request(
            "/api/products",
            client,
            Some(&h.bearer("u-creator")),
            product.clone(),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["creatorId"], "u-creator");

    // Unauthenticated callers never reach the handler.
    let (status, _, _) = h
        .send(json_request("/api/products", client, None, product))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, body) = h
        .send(request(
            Method::GET,
            "/api/admin/stats",
            client,
            Some(&h.bearer("u-creator")),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Admin access required");

    let (status, _, body) = h
        .send(request(
            Method::GET,
            "/api/admin/stats",
            client,
            Some(&h.bearer("u-admin")),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["requestedBy"], "u-admin");
    assert_eq!(body["data"]["rateLimit"], 100);
}

#[tokio::test]
async fn test_rate_limit_per_client_with_headers() {
    let h = Harness::new(3);
    let client = "203.0.113.7";

    for _ in 0..3 {
        let (status, headers, _) = h.send(request(Method::GET, "/health", client, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["x-ratelimit-limit"], "3");
        assert_eq!(headers["x-ratelimit-window"], "60s");
    }

    let (status, headers, body) = h.send(request(Method::GET, "/health", client, None)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limit_exceeded");
    assert_eq!(headers["x-ratelimit-limit"], "3");

    // Another caller has its own budget.
    let (status, _, _) = h
        .send(request(Method::GET, "/health", "203.0.113.8", None))
        .await;
    assert_eq!(status, StatusCode::OK);

    // The limiter is shared across routes.
    let (status, _, _) = h
        .send(request(Method::GET, "/api/posts", client, None))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    h.clock.advance_secs(60);
    let (status, _, _) = h.send(request(Method::GET, "/health", client, None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_rejected_requests_still_carry_rate_limit_headers() {
    let h = Harness::new(10);

    let (status, headers, _) = h
        .send(request(Method::GET, "/api/users/me", "203.0.113.20", None))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(headers["x-ratelimit-limit"], "10");
    assert_eq!(headers["x-ratelimit-window"], "60s");
}

#[tokio::test]
async fn test_refresh_flow() {
    let h = Harness::new(100);
    let client = "198.51.100.4";
    let renewal = h.tokens.issue_renewal("u-creator").unwrap();

    h.clock.advance_secs(24 * 3600);

    let (status, _, body) = h
        .send(json_request(
            "/api/auth/refresh",
            client,
            None,
            json!({ "refreshToken": renewal.token }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["expiresIn"], 3600);
    assert_eq!(body["data"]["user"]["isCreator"], true);

    let session = format!("Bearer {}", body["data"]["token"].as_str().unwrap());
    let (status, _, body) = h
        .send(request(Method::GET, "/api/users/me", client, Some(&session)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], "u-creator");

    // A session token is not accepted as a renewal token.
    let (status, _, body) = h
        .send(json_request(
            "/api/auth/refresh",
            client,
            None,
            json!({ "refreshToken": session.trim_start_matches("Bearer ") }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_credential");
}

fn registration(username: &str, email: &str) -> Value {
    json!({
        "username": username,
        "email": email,
        "password": "long-enough-pw",
        "confirmPassword": "long-enough-pw",
        "firstName": "Test",
        "lastName": "Person",
        "accountType": "creator"
    })
}

#[tokio::test]
async fn test_password_account_flow() {
    let h = Harness::new(100);
    let client = "198.51.100.20";

    let (status, _, body) = h
        .send(json_request(
            "/api/auth/register",
            client,
            None,
            registration("wanda", "wanda@example.com"),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], "Account created successfully");
    assert_eq!(body["data"]["user"]["isCreator"], true);
    let id = body["data"]["user"]["id"].as_str().unwrap().to_string();

    let (status, _, body) = h
        .send(json_request(
            "/api/auth/login",
            client,
            None,
            json!({ "email": "wanda@example.com", "password": "long-enough-pw" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Login successful");
    assert_eq!(body["data"]["user"]["id"], id.as_str());

    // Password accounts pass capability gates like any other identity.
    let session = format!("Bearer {}", body["data"]["token"].as_str().unwrap());
    let (status, _, _) = h
        .send(json_request(
            "/api/products",
            client,
            Some(&session),
            json!({ "name": "Sketchbook" }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, body) = h
        .send(json_request_with(
            Method::PUT,
            "/api/users/me",
            client,
            Some(&session),
            json!({ "username": "wanda-w" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["username"], "wanda-w");

    let (status, _, _) = h
        .send(json_request_with(
            Method::PUT,
            "/api/users/me",
            client,
            None,
            json!({ "username": "anonymous" }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_password_login_wrong_password_is_unauthorized() {
    let h = Harness::new(100);
    let client = "198.51.100.21";

    h.send(json_request(
        "/api/auth/register",
        client,
        None,
        registration("xena", "xena@example.com"),
    ))
    .await;

    let (status, _, body) = h
        .send(json_request(
            "/api/auth/login",
            client,
            None,
            json!({ "email": "xena@example.com", "password": "not-the-password" }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_credentials");
    assert_eq!(body["success"], false);
    assert!(body.get("data").is_none());
}

#[tokio::test]
async fn test_register_duplicate_is_conflict() {
    let h = Harness::new(100);
    let client = "198.51.100.22";

    let (status, _, _) = h
        .send(json_request(
            "/api/auth/register",
            client,
            None,
            registration("yuri", "yuri@example.com"),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, body) = h
        .send(json_request(
            "/api/auth/register",
            client,
            None,
            registration("yuri", "yuri.other@example.com"),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "username_taken");

    let (status, _, body) = h
        .send(json_request(
            "/api/auth/register",
            client,
            None,
            registration("yuri2", "YURI@example.com"),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "email_taken");

    // Seeded accounts hold their usernames too.
    let (status, _, _) = h
        .send(json_request(
            "/api/auth/register",
            client,
            None,
            registration("u-plain", "someone@example.com"),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_google_sign_in_with_access_token() {
    let server = MockServer::start_async().await;
    let accepted = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/tokeninfo")
                .query_param("access_token", "ya29.token");
            then.status(200)
                .header("content-type", "application/json")
                .body(
                    json!({
                        "sub": "5678",
                        "azp": "client-id",
                        "aud": "client-id",
                        "email": "zoe@example.com",
                        "email_verified": "true"
                    })
                    .to_string(),
                );
        })
        .await;

    let endpoint = server.url("/tokeninfo");
    let h = Harness::build(100, |auth| {
        auth.with_provider(
            Arc::new(GoogleTokenInfo::with_endpoint(
                reqwest::Client::new(),
                "client-id",
                endpoint,
            )),
            Duration::from_secs(5),
        )
    });

    let (status, _, body) = h
        .send(json_request(
            "/api/auth/google",
            "198.51.100.23",
            None,
            json!({ "accessToken": "ya29.token" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["id"], subject_for("google", "5678"));
    assert_eq!(body["data"]["user"]["username"], "zoe");
    accepted.assert_calls_async(1).await;

    let (status, _, body) = h
        .send(json_request("/api/auth/google", "198.51.100.23", None, json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_failed");
}

#[tokio::test]
async fn test_google_sign_in_against_tokeninfo() {
    let server = MockServer::start_async().await;
    let accepted = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/tokeninfo")
                .query_param("id_token", "good-token");
            then.status(200)
                .header("content-type", "application/json")
                .body(
                    json!({
                        "sub": "1234",
                        "aud": "client-id",
                        "email": "ivy@example.com",
                        "email_verified": "true",
                        "name": "Ivy"
                    })
                    .to_string(),
                );
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/tokeninfo")
                .query_param("id_token", "bad-token");
            then.status(400)
                .header("content-type", "application/json")
                .body("{\"error\":\"invalid_token\"}");
        })
        .await;

    let endpoint = server.url("/tokeninfo");
    let h = Harness::build(100, |auth| {
        auth.with_provider(
            Arc::new(GoogleTokenInfo::with_endpoint(
                reqwest::Client::new(),
                "client-id",
                endpoint,
            )),
            Duration::from_secs(5),
        )
    });
    let client = "198.51.100.5";

    let (status, _, body) = h
        .send(json_request(
            "/api/auth/google",
            client,
            None,
            json!({ "idToken": "good-token" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["id"], subject_for("google", "1234"));
    assert_eq!(body["data"]["user"]["email"], "ivy@example.com");
    assert_eq!(body["data"]["user"]["isCreator"], false);
    accepted.assert_calls_async(1).await;

    let session = format!("Bearer {}", body["data"]["token"].as_str().unwrap());
    let (status, _, _) = h
        .send(request(Method::GET, "/api/users/me", client, Some(&session)))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = h
        .send(json_request(
            "/api/auth/google",
            client,
            None,
            json!({ "idToken": "bad-token" }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_credential");
}

#[tokio::test]
async fn test_google_sign_in_rejects_foreign_audience() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/tokeninfo");
            then.status(200)
                .header("content-type", "application/json")
                .body(
                    json!({
                        "sub": "77",
                        "aud": "someone-else",
                        "email": "mallory@example.com",
                        "email_verified": "true"
                    })
                    .to_string(),
                );
        })
        .await;

    let endpoint = server.url("/tokeninfo");
    let h = Harness::build(100, |auth| {
        auth.with_provider(
            Arc::new(GoogleTokenInfo::with_endpoint(
                reqwest::Client::new(),
                "client-id",
                endpoint,
            )),
            Duration::from_secs(5),
        )
    });

    let (status, _, body) = h
        .send(json_request(
            "/api/auth/google",
            "198.51.100.6",
            None,
            json!({ "idToken": "any" }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_credential");
}

#[tokio::test]
async fn test_google_sign_in_unreachable_provider_is_unavailable() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/tokeninfo");
            then.status(502);
        })
        .await;

    let endpoint = server.url("/tokeninfo");
    let h = Harness::build(100, |auth| {
        auth.with_provider(
            Arc::new(GoogleTokenInfo::with_endpoint(
                reqwest::Client::new(),
                "client-id",
                endpoint,
            )),
            Duration::from_secs(5),
        )
    });

    let (status, _, body) = h
        .send(json_request(
            "/api/auth/google",
            "198.51.100.7",
            None,
            json!({ "idToken": "any" }),
        ))
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "provider_unavailable");
}
