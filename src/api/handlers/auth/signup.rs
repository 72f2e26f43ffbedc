//! Account registration.
//!
//! Signup is the only path that creates an identity. Accounts start
//! unverified; a login code is dispatched immediately so the first OTP
//! verification can flip the flag.

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use super::identity::{Identity, Provider, Role};
use super::state::AuthState;
use super::types::{MessageResponse, SignupRequest};
use super::utils::{normalize_email, valid_email};

#[utoipa::path(
    post,
    path = "/api/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created", body = MessageResponse),
        (status = 400, description = "Invalid input", body = String),
        (status = 409, description = "Email already registered", body = String),
        (status = 500, description = "Account created but the code was not sent", body = String)
    ),
    tag = "auth"
)]
pub async fn signup(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignupRequest>>,
) -> impl IntoResponse {
    let request: SignupRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if !valid_email(&request.email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }
    if request.name.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing name".to_string()).into_response();
    }
    if request.password.len() < 8 {
        return (
            StatusCode::BAD_REQUEST,
            "Password must be at least 8 characters".to_string(),
        )
            .into_response();
    }

    let email = normalize_email(&request.email);
    match auth_state.identities().find_by_email(&email).await {
        Ok(Some(_)) => {
            return (
                StatusCode::CONFLICT,
                "Email already registered".to_string(),
            )
                .into_response();
        }
        Ok(None) => {}
        Err(err) => {
            error!("identity lookup failed during signup: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Signup failed".to_string())
                .into_response();
        }
    }

    let password_hash = match bcrypt::hash(&request.password, bcrypt::DEFAULT_COST) {
        Ok(hash) => hash,
        Err(err) => {
            error!("failed to hash password during signup: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Signup failed".to_string())
                .into_response();
        }
    };

    let identity = Identity {
        id: Uuid::new_v4(),
        email: email.clone(),
        name: request.name.trim().to_string(),
        password_hash: Some(password_hash),
        phone_number: request.phone_number,
        role: request.role.unwrap_or(Role::User),
        provider: Provider::Email,
        verified: false,
    };
    if let Err(err) = auth_state.identities().save(identity).await {
        error!("failed to store new identity: {err}");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Signup failed".to_string()).into_response();
    }

    // The account exists at this point; a failed dispatch is reported so the
    // client knows no code is coming. Retry goes through send-otp.
    if let Err(err) = auth_state.issuer().issue_otp(&email) {
        warn!("failed to send signup verification code: {err}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "User registered, but failed to send OTP".to_string(),
        )
            .into_response();
    }

    (
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "Account created. Verify with the code sent to your email.".to_string(),
        }),
    )
        .into_response()
}
