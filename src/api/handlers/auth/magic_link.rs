//! Magic-link endpoints.
//!
//! Unlike OTP issuance, requesting a link for an unregistered address returns
//! 404 so the frontend can steer the user to signup.

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use tracing::{error, info};

use super::identity::Provider;
use super::issuance::IssueError;
use super::state::AuthState;
use super::types::{
    MagicLinkLoginResponse, MagicLinkRequest, MessageResponse, UserSummary, VerifyMagicLinkRequest,
};
use super::utils::valid_email;

/// Issue a magic link for a registered address.
#[utoipa::path(
    post,
    path = "/api/auth/send-magic-link",
    request_body = MagicLinkRequest,
    responses(
        (status = 200, description = "Link sent", body = MessageResponse),
        (status = 404, description = "Email not registered", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn send_magic_link(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<MagicLinkRequest>>,
) -> impl IntoResponse {
    let request: MagicLinkRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if !valid_email(&request.email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }

    match auth_state.identities().find_by_email(&request.email).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                "No account found for this email".to_string(),
            )
                .into_response();
        }
        Err(err) => {
            error!("identity lookup failed during magic link request: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to send magic link".to_string(),
            )
                .into_response();
        }
    }

    match auth_state.issuer().issue_magic_link(&request.email) {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: "Magic link sent to your email".to_string(),
            }),
        )
            .into_response(),
        Err(IssueError::RateLimited) => (
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests. Please try again later.".to_string(),
        )
            .into_response(),
        Err(IssueError::InvalidEmail) => {
            (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response()
        }
        Err(IssueError::Delivery(err) | IssueError::Internal(err)) => {
            error!("magic link issuance failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to send magic link".to_string(),
            )
                .into_response()
        }
    }
}

/// Consume a magic link and exchange it for a bearer token plus a role-based
/// redirect path.
#[utoipa::path(
    post,
    path = "/api/auth/verify-magic-link",
    request_body = VerifyMagicLinkRequest,
    responses(
        (status = 200, description = "Login successful", body = MagicLinkLoginResponse),
        (status = 401, description = "Invalid or expired link", body = String)
    ),
    tag = "auth"
)]
pub async fn verify_magic_link(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyMagicLinkRequest>>,
) -> impl IntoResponse {
    let request: VerifyMagicLinkRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = match auth_state.issuer().validate_magic_link(&request.token) {
        Ok(email) => email,
        Err(cause) => {
            info!(cause = cause.as_str(), "magic link login rejected");
            return (
                StatusCode::UNAUTHORIZED,
                "Invalid or expired magic link".to_string(),
            )
                .into_response();
        }
    };

    // The link was issued for a registered account, but the account may have
    // vanished between issuance and the click.
    let identity = match auth_state.identities().find_by_email(&email).await {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                "User account not found. Please sign up again.".to_string(),
            )
                .into_response();
        }
        Err(err) => {
            error!("identity lookup failed during magic link login: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    };

    let mut identity = identity;
    identity.verified = true;
    identity.provider = Provider::MagicLink;
    let identity = match auth_state.identities().save(identity).await {
        Ok(identity) => identity,
        Err(err) => {
            error!("failed to update identity after magic link login: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    };

    match auth_state.tokens().issue(&identity.email) {
        Ok(token) => {
            let redirect_url = identity.role.dashboard_path().to_string();
            (
                StatusCode::OK,
                Json(MagicLinkLoginResponse {
                    token,
                    user: UserSummary::from(&identity),
                    redirect_url,
                }),
            )
                .into_response()
        }
        Err(err) => {
            error!("failed to issue token after magic link login: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string()).into_response()
        }
    }
}
