//! Federated Google sign-in callback.
//!
//! The frontend completes the OAuth2 dance and posts the resulting ID token
//! here. Verification happens against Google's tokeninfo endpoint; a verified
//! assertion only proves control of the email and never provisions an
//! account.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

use super::identity::Provider;
use super::state::AuthState;
use super::types::{GoogleCallbackRequest, GoogleLoginResponse, UserSummary};
use super::utils::{build_oauth_callback_url, normalize_email};

/// Claims extracted from a verified federated assertion.
#[derive(Clone, Debug)]
pub struct FederatedIdentity {
    pub email: String,
    pub name: String,
}

/// Verification seam so tests never talk to Google.
#[async_trait]
pub trait FederatedVerifier: Send + Sync {
    /// Verify the ID token and return the asserted identity.
    ///
    /// # Errors
    ///
    /// Any failure (network, signature, audience) rejects the assertion.
    async fn verify(&self, id_token: &str) -> Result<FederatedIdentity>;
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    email: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    aud: Option<String>,
    #[serde(default)]
    email_verified: Option<String>,
}

/// Verifier backed by Google's tokeninfo endpoint.
pub struct GoogleTokenVerifier {
    client: reqwest::Client,
    endpoint: String,
    client_id: Option<String>,
}

impl GoogleTokenVerifier {
    #[must_use]
    pub fn new(client: reqwest::Client, client_id: Option<String>) -> Self {
        Self {
            client,
            endpoint: "https://oauth2.googleapis.com/tokeninfo".to_string(),
            client_id,
        }
    }

}

#[async_trait]
impl FederatedVerifier for GoogleTokenVerifier {
    async fn verify(&self, id_token: &str) -> Result<FederatedIdentity> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .context("tokeninfo request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!("tokeninfo rejected token: {}", response.status()));
        }

        let info: TokenInfo = response
            .json()
            .await
            .context("failed to decode tokeninfo response")?;

        if let Some(expected) = &self.client_id {
            if info.aud.as_deref() != Some(expected.as_str()) {
                return Err(anyhow!("token audience mismatch"));
            }
        }
        if info.email_verified.as_deref() != Some("true") {
            return Err(anyhow!("google account email not verified"));
        }

        Ok(FederatedIdentity {
            email: normalize_email(&info.email),
            name: info.name.unwrap_or_default(),
        })
    }
}

/// Complete a federated login for an already registered account.
#[utoipa::path(
    post,
    path = "/oauth2/google/callback",
    request_body = GoogleCallbackRequest,
    responses(
        (status = 200, description = "Login successful", body = GoogleLoginResponse),
        (status = 401, description = "Assertion rejected or account not registered", body = String)
    ),
    tag = "auth"
)]
pub async fn google_callback(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<GoogleCallbackRequest>>,
) -> impl IntoResponse {
    let request: GoogleCallbackRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let asserted = match auth_state.federated().verify(&request.id_token).await {
        Ok(asserted) => asserted,
        Err(err) => {
            info!("federated assertion rejected: {err}");
            return (
                StatusCode::UNAUTHORIZED,
                "Invalid Google token".to_string(),
            )
                .into_response();
        }
    };

    // Proof of email control is not registration.
    let identity = match auth_state.identities().find_by_email(&asserted.email).await {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                "User account not found. Please sign up again.".to_string(),
            )
                .into_response();
        }
        Err(err) => {
            error!("identity lookup failed during google callback: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    };

    // A Google-backed assertion also counts as email verification.
    let mut identity = identity;
    identity.provider = Provider::Google;
    identity.verified = true;
    let identity = match auth_state.identities().save(identity).await {
        Ok(identity) => identity,
        Err(err) => {
            error!("failed to update provider after google login: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    };

    let token = match auth_state.tokens().issue(&identity.email) {
        Ok(token) => token,
        Err(err) => {
            error!("failed to issue token after google login: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    };

    let redirect_url = build_oauth_callback_url(
        auth_state.config().frontend_base_url(),
        &token,
        identity.role.as_str(),
    );
    let response = GoogleLoginResponse {
        token,
        user: UserSummary::from(&identity),
        redirect_url,
    };
    (StatusCode::OK, Json(response)).into_response()
}
