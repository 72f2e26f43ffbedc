//! OTP endpoints: issuance, login, and password reset.

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use tracing::{error, info};

use super::identity::Provider;
use super::issuance::IssueError;
use super::state::AuthState;
use super::types::{
    LoginResponse, MessageResponse, ResetPasswordRequest, SendOtpRequest, UserSummary,
    VerifyOtpRequest,
};
use super::utils::{normalize_email, valid_email};

fn issue_error_response(err: &IssueError) -> (StatusCode, String) {
    match err {
        IssueError::InvalidEmail => (StatusCode::BAD_REQUEST, "Invalid email".to_string()),
        IssueError::RateLimited => (
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests. Please try again later.".to_string(),
        ),
        IssueError::Delivery(err) | IssueError::Internal(err) => {
            error!("credential issuance failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to send email".to_string(),
            )
        }
    }
}

/// Issue a login code to the given address.
#[utoipa::path(
    post,
    path = "/api/auth/send-otp",
    request_body = SendOtpRequest,
    responses(
        (status = 200, description = "Code sent", body = MessageResponse),
        (status = 400, description = "Invalid email", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn send_otp(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SendOtpRequest>>,
) -> impl IntoResponse {
    let request: SendOtpRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if !valid_email(&request.email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }

    match auth_state.issuer().issue_otp(&request.email) {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: "OTP sent to your email".to_string(),
            }),
        )
            .into_response(),
        Err(err) => issue_error_response(&err).into_response(),
    }
}

/// Verify a login code and exchange it for a bearer token.
///
/// Every failure collapses to one opaque 401; the precise cause stays in the
/// logs.
#[utoipa::path(
    post,
    path = "/api/auth/verify-otp",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid or expired OTP", body = String)
    ),
    tag = "auth"
)]
pub async fn verify_otp(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyOtpRequest>>,
) -> impl IntoResponse {
    let request: VerifyOtpRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if let Err(cause) = auth_state
        .issuer()
        .validate_otp(&request.email, &request.otp)
    {
        info!(cause = cause.as_str(), "otp login rejected");
        return (
            StatusCode::UNAUTHORIZED,
            "Invalid or expired OTP".to_string(),
        )
            .into_response();
    }

    // The code only proves email control; the account must already exist.
    let email = normalize_email(&request.email);
    let identity = match auth_state.identities().find_by_email(&email).await {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                "User not registered. Please sign up first.".to_string(),
            )
                .into_response();
        }
        Err(err) => {
            error!("identity lookup failed during otp login: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    };

    let mut identity = identity;
    identity.verified = true;
    identity.provider = Provider::EmailOtp;
    let identity = match auth_state.identities().save(identity).await {
        Ok(identity) => identity,
        Err(err) => {
            error!("failed to mark identity verified: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    };

    match auth_state.tokens().issue(&identity.email) {
        Ok(token) => (
            StatusCode::OK,
            Json(LoginResponse {
                token,
                user: UserSummary::from(&identity),
            }),
        )
            .into_response(),
        Err(err) => {
            error!("failed to issue token after otp login: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string()).into_response()
        }
    }
}

/// Reset the password after proving email control with a fresh code.
#[utoipa::path(
    post,
    path = "/api/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 401, description = "Invalid or expired OTP", body = String)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> impl IntoResponse {
    let request: ResetPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if request.new_password.len() < 8 {
        return (
            StatusCode::BAD_REQUEST,
            "Password must be at least 8 characters".to_string(),
        )
            .into_response();
    }

    if let Err(cause) = auth_state
        .issuer()
        .validate_otp(&request.email, &request.otp)
    {
        info!(cause = cause.as_str(), "password reset rejected");
        return (
            StatusCode::UNAUTHORIZED,
            "Invalid or expired OTP".to_string(),
        )
            .into_response();
    }

    let email = normalize_email(&request.email);
    let identity = match auth_state.identities().find_by_email(&email).await {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                "User not registered. Please sign up first.".to_string(),
            )
                .into_response();
        }
        Err(err) => {
            error!("identity lookup failed during password reset: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Password reset failed".to_string(),
            )
                .into_response();
        }
    };

    let password_hash = match bcrypt::hash(&request.new_password, bcrypt::DEFAULT_COST) {
        Ok(hash) => hash,
        Err(err) => {
            error!("failed to hash new password: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Password reset failed".to_string(),
            )
                .into_response();
        }
    };

    let mut identity = identity;
    identity.password_hash = Some(password_hash);
    if let Err(err) = auth_state.identities().save(identity).await {
        error!("failed to store new password hash: {err}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Password reset failed".to_string(),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        Json(MessageResponse {
            message: "Password reset successful".to_string(),
        }),
    )
        .into_response()
}
