//! Password login and logout.

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use tracing::error;

use super::state::AuthState;
use super::types::{LoginRequest, LoginResponse, MessageResponse, UserSummary};
use super::utils::normalize_email;

/// Password login. Unknown accounts and wrong passwords get the same 401.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = String),
        (status = 403, description = "Email not verified", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    let identity = match auth_state.identities().find_by_email(&email).await {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                "Invalid email or password".to_string(),
            )
                .into_response();
        }
        Err(err) => {
            error!("identity lookup failed during login: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    };

    // Passwordless accounts have no hash and cannot use this endpoint.
    let Some(password_hash) = identity.password_hash.as_deref() else {
        return (
            StatusCode::UNAUTHORIZED,
            "Invalid email or password".to_string(),
        )
            .into_response();
    };

    match bcrypt::verify(&request.password, password_hash) {
        Ok(true) => {}
        Ok(false) => {
            return (
                StatusCode::UNAUTHORIZED,
                "Invalid email or password".to_string(),
            )
                .into_response();
        }
        Err(err) => {
            error!("password verification failed: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    }

    if !identity.verified {
        return (
            StatusCode::FORBIDDEN,
            "Please verify your email before logging in".to_string(),
        )
            .into_response();
    }

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
            error!("failed to issue token after login: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string()).into_response()
        }
    }
}

/// Tokens are stateless, so logout only tells the client to drop its copy.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Logged out", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn logout() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(MessageResponse {
            message: "Logged out successfully".to_string(),
        }),
    )
}
