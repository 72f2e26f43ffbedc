//! End-to-end auth flow tests driving the full router.

use super::clock::{Clock, ManualClock};
use super::google::{FederatedIdentity, FederatedVerifier};
use super::identity::{IdentityStore, InMemoryIdentityStore, Provider};
use super::issuance::{CredentialIssuer, IssuerConfig};
use super::state::{AuthConfig, AuthState};
use super::store::InMemoryCredentialStore;
use super::token::JwtTokenService;
use crate::api::email::EmailSender;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// Captures outbound mail so flows can read the delivered secrets.
#[derive(Default)]
struct Outbox {
    codes: Mutex<Vec<(String, String)>>,
    links: Mutex<Vec<(String, String)>>,
}

impl Outbox {
    fn last_code(&self) -> Option<String> {
        self.codes
            .lock()
            .ok()
            .and_then(|codes| codes.last().map(|(_, code)| code.clone()))
    }

    fn last_magic_token(&self) -> Option<String> {
        self.links.lock().ok().and_then(|links| {
            links
                .last()
                .and_then(|(_, url)| url.split("#token=").nth(1))
                .map(str::to_string)
        })
    }
}

impl EmailSender for Outbox {
    fn send_code(&self, to_email: &str, code: &str) -> Result<()> {
        if let Ok(mut codes) = self.codes.lock() {
            codes.push((to_email.to_string(), code.to_string()));
        }
        Ok(())
    }

    fn send_link(&self, to_email: &str, url: &str) -> Result<()> {
        if let Ok(mut links) = self.links.lock() {
            links.push((to_email.to_string(), url.to_string()));
        }
        Ok(())
    }
}

/// Fails every dispatch, standing in for a broken mail relay.
struct DeadLetterSender;

impl EmailSender for DeadLetterSender {
    fn send_code(&self, _to_email: &str, _code: &str) -> Result<()> {
        Err(anyhow!("relay down"))
    }

    fn send_link(&self, _to_email: &str, _url: &str) -> Result<()> {
        Err(anyhow!("relay down"))
    }
}

/// Accepts exactly one canned assertion.
struct StubVerifier {
    id_token: String,
    asserted: FederatedIdentity,
}

#[async_trait]
impl FederatedVerifier for StubVerifier {
    async fn verify(&self, id_token: &str) -> Result<FederatedIdentity> {
        if id_token == self.id_token {
            Ok(self.asserted.clone())
        } else {
            Err(anyhow!("unknown assertion"))
        }
    }
}

struct Harness {
    app: Router,
    outbox: Arc<Outbox>,
    clock: Arc<ManualClock>,
    identities: Arc<InMemoryIdentityStore>,
}

fn now_ish() -> i64 {
    // Real base time keeps freshly issued JWTs valid against the wall clock;
    // expiry tests advance the manual clock from here.
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}

fn harness() -> Harness {
    let outbox = Arc::new(Outbox::default());
    harness_with_mailer(Arc::clone(&outbox) as Arc<dyn EmailSender>, outbox)
}

fn harness_with_mailer(mailer: Arc<dyn EmailSender>, outbox: Arc<Outbox>) -> Harness {
    let clock = Arc::new(ManualClock::new(now_ish()));
    let identities = Arc::new(InMemoryIdentityStore::new());
    let config = AuthConfig::new("http://localhost:5173".to_string()).with_token_ttl_seconds(3_600);
    let issuer = CredentialIssuer::new(
        Arc::new(InMemoryCredentialStore::new()),
        Arc::clone(&clock) as Arc<dyn Clock>,
        mailer,
        IssuerConfig::new(config.frontend_base_url().to_string()),
    );
    let tokens = Arc::new(JwtTokenService::new(
        &SecretString::from("0123456789abcdef0123456789abcdef"),
        3_600,
        Arc::clone(&clock) as Arc<dyn Clock>,
    ));
    let verifier = StubVerifier {
        id_token: "google-id-token".to_string(),
        asserted: FederatedIdentity {
            email: "alice@x.com".to_string(),
            name: "Alice".to_string(),
        },
    };
    let state = Arc::new(AuthState::new(
        config,
        issuer,
        tokens,
        Arc::clone(&identities) as Arc<dyn IdentityStore>,
        Arc::new(verifier),
    ));
    Harness {
        app: crate::api::app(state),
        outbox,
        clock,
        identities,
    }
}

async fn stored_provider(h: &Harness, email: &str) -> Provider {
    h.identities
        .find_by_email(email)
        .await
        .expect("lookup")
        .expect("registered")
        .provider
}

fn post(path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(path: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("infallible");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn signup_body(email: &str) -> Value {
    json!({
        "name": "Alice",
        "email": email,
        "password": "hunter22hunter22",
    })
}

async fn signup_and_verify(h: &Harness, email: &str) -> String {
    let (status, _) = send(&h.app, post("/api/auth/signup", signup_body(email))).await;
    assert_eq!(status, StatusCode::CREATED);

    let code = h.outbox.last_code().expect("signup code");
    let (status, body) = send(
        &h.app,
        post("/api/auth/verify-otp", json!({"email": email, "otp": code})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().expect("token").to_string()
}

#[tokio::test]
async fn signup_then_otp_login_then_me() -> Result<()> {
    let h = harness();
    let token = signup_and_verify(&h, "alice@x.com").await;

    let (status, body) = send(&h.app, get("/api/user/me", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"].as_str(), Some("alice@x.com"));
    assert_eq!(body["role"].as_str(), Some("USER"));
    Ok(())
}

#[tokio::test]
async fn duplicate_signup_conflicts() {
    let h = harness();
    let (status, _) = send(&h.app, post("/api/auth/signup", signup_body("alice@x.com"))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(&h.app, post("/api/auth/signup", signup_body("alice@x.com"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn otp_for_unregistered_email_issues_but_never_logs_in() {
    let h = harness();
    let (status, _) = send(
        &h.app,
        post("/api/auth/send-otp", json!({"email": "ghost@x.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let code = h.outbox.last_code().expect("code");
    let (status, _) = send(
        &h.app,
        post(
            "/api/auth/verify-otp",
            json!({"email": "ghost@x.com", "otp": code}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn otp_is_single_use_through_the_api() {
    let h = harness();
    let (status, _) = send(&h.app, post("/api/auth/signup", signup_body("alice@x.com"))).await;
    assert_eq!(status, StatusCode::CREATED);

    let code = h.outbox.last_code().expect("code");
    let body = json!({"email": "alice@x.com", "otp": code});
    let (status, _) = send(&h.app, post("/api/auth/verify-otp", body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&h.app, post("/api/auth/verify-otp", body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expired_otp_is_rejected_through_the_api() {
    let h = harness();
    let (status, _) = send(&h.app, post("/api/auth/signup", signup_body("alice@x.com"))).await;
    assert_eq!(status, StatusCode::CREATED);

    let code = h.outbox.last_code().expect("code");
    h.clock.advance_millis(5 * 60 * 1000 + 1);
    let (status, _) = send(
        &h.app,
        post(
            "/api/auth/verify-otp",
            json!({"email": "alice@x.com", "otp": code}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sixth_otp_request_within_the_hour_is_rejected() {
    let h = harness();
    for _ in 0..5 {
        let (status, _) = send(
            &h.app,
            post("/api/auth/send-otp", json!({"email": "alice@x.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, _) = send(
        &h.app,
        post("/api/auth/send-otp", json!({"email": "alice@x.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    h.clock.advance_millis(60 * 60 * 1000);
    let (status, _) = send(
        &h.app,
        post("/api/auth/send-otp", json!({"email": "alice@x.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn password_login_requires_verification_first() {
    let h = harness();
    let (status, _) = send(&h.app, post("/api/auth/signup", signup_body("alice@x.com"))).await;
    assert_eq!(status, StatusCode::CREATED);

    let login = json!({"email": "alice@x.com", "password": "hunter22hunter22"});
    let (status, _) = send(&h.app, post("/api/auth/login", login.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    signup_and_verify_code(&h, "alice@x.com").await;
    let (status, body) = send(&h.app, post("/api/auth/login", login)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].as_str().is_some());
}

async fn signup_and_verify_code(h: &Harness, email: &str) {
    let (status, _) = send(
        &h.app,
        post("/api/auth/send-otp", json!({"email": email})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let code = h.outbox.last_code().expect("code");
    let (status, _) = send(
        &h.app,
        post("/api/auth/verify-otp", json!({"email": email, "otp": code})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let h = harness();
    signup_and_verify(&h, "alice@x.com").await;

    let (status, _) = send(
        &h.app,
        post(
            "/api/auth/login",
            json!({"email": "alice@x.com", "password": "wrong-password"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn magic_link_for_unregistered_email_is_not_found() {
    let h = harness();
    let (status, _) = send(
        &h.app,
        post("/api/auth/send-magic-link", json!({"email": "ghost@x.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn magic_link_login_returns_role_redirect() {
    let h = harness();
    let (status, _) = send(&h.app, post("/api/auth/signup", signup_body("alice@x.com"))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &h.app,
        post("/api/auth/send-magic-link", json!({"email": "alice@x.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let token = h.outbox.last_magic_token().expect("magic token");
    let (status, body) = send(
        &h.app,
        post("/api/auth/verify-magic-link", json!({"token": token})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["redirect_url"].as_str(), Some("/user/home"));
    assert!(body["token"].as_str().is_some());

    // Single use.
    let token = h.outbox.last_magic_token().expect("magic token");
    let (status, _) = send(
        &h.app,
        post("/api/auth/verify-magic-link", json!({"token": token})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn reset_password_with_otp_changes_the_password() {
    let h = harness();
    signup_and_verify(&h, "alice@x.com").await;

    let (status, _) = send(
        &h.app,
        post("/api/auth/send-otp", json!({"email": "alice@x.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let code = h.outbox.last_code().expect("code");

    let (status, _) = send(
        &h.app,
        post(
            "/api/auth/reset-password",
            json!({"email": "alice@x.com", "otp": code, "new_password": "new-password-1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &h.app,
        post(
            "/api/auth/login",
            json!({"email": "alice@x.com", "password": "hunter22hunter22"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &h.app,
        post(
            "/api/auth/login",
            json!({"email": "alice@x.com", "password": "new-password-1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn google_callback_requires_prior_signup() {
    let h = harness();
    let (status, _) = send(
        &h.app,
        post(
            "/oauth2/google/callback",
            json!({"id_token": "google-id-token"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn google_callback_logs_in_registered_account() {
    let h = harness();
    signup_and_verify(&h, "alice@x.com").await;

    let (status, body) = send(
        &h.app,
        post(
            "/oauth2/google/callback",
            json!({"id_token": "google-id-token"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].as_str().is_some());
    let redirect = body["redirect_url"].as_str().context("redirect").unwrap();
    assert!(redirect.starts_with("http://localhost:5173/auth/callback?token="));
    assert!(redirect.ends_with("&role=USER"));
}

#[tokio::test]
async fn google_callback_rejects_unknown_assertion() {
    let h = harness();
    signup_and_verify(&h, "alice@x.com").await;

    let (status, _) = send(
        &h.app,
        post("/oauth2/google/callback", json!({"id_token": "forged"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn me_without_token_is_unauthorized() {
    let h = harness();
    let (status, _) = send(&h.app, get("/api/user/me", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn me_with_garbage_token_is_unauthorized() {
    let h = harness();
    let (status, body) = send(&h.app, get("/api/user/me", Some("not.a.jwt"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"].as_str(), Some("Unauthorized"));
}

#[tokio::test]
async fn expired_bearer_token_is_unauthorized() {
    let h = harness();
    let token = signup_and_verify(&h, "alice@x.com").await;

    h.clock.advance_millis(3_601_000);
    let (status, _) = send(&h.app, get("/api/user/me", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_is_public_and_reports_ok() {
    let h = harness();
    let (status, body) = send(&h.app, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["identity_store"].as_str(), Some("ok"));
}

#[tokio::test]
async fn provider_tracks_last_login_method() -> Result<()> {
    let h = harness();
    signup_and_verify(&h, "alice@x.com").await;
    assert_eq!(stored_provider(&h, "alice@x.com").await, Provider::EmailOtp);

    let (status, _) = send(
        &h.app,
        post("/api/auth/send-magic-link", json!({"email": "alice@x.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = h.outbox.last_magic_token().context("magic token")?;
    let (status, _) = send(
        &h.app,
        post("/api/auth/verify-magic-link", json!({"token": token})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored_provider(&h, "alice@x.com").await, Provider::MagicLink);

    let (status, _) = send(
        &h.app,
        post(
            "/oauth2/google/callback",
            json!({"id_token": "google-id-token"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored_provider(&h, "alice@x.com").await, Provider::Google);
    Ok(())
}

#[tokio::test]
async fn signup_reports_failed_code_dispatch() {
    let h = harness_with_mailer(Arc::new(DeadLetterSender), Arc::new(Outbox::default()));
    let (status, _) = send(&h.app, post("/api/auth/signup", signup_body("alice@x.com"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    // The account exists despite the failed dispatch; retry goes via send-otp.
    let stored = h
        .identities
        .find_by_email("alice@x.com")
        .await
        .expect("lookup");
    assert!(stored.is_some());
    let (status, _) = send(&h.app, post("/api/auth/signup", signup_body("alice@x.com"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}
