//! Current-user endpoint, gated by the request authentication middleware.

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use tracing::error;

use super::gate::Principal;
use super::state::AuthState;
use super::types::UserSummary;

/// Return the authenticated caller's profile.
#[utoipa::path(
    get,
    path = "/api/user/me",
    responses(
        (status = 200, description = "Authenticated user", body = UserSummary),
        (status = 401, description = "Not authenticated", body = String)
    ),
    tag = "user"
)]
pub async fn me(
    auth_state: Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
) -> impl IntoResponse {
    // The gate only attaches a principal for valid tokens; anonymous
    // requests reach here without one.
    let Some(Extension(principal)) = principal else {
        return (StatusCode::UNAUTHORIZED, "Not authenticated".to_string()).into_response();
    };

    match auth_state.identities().find_by_email(&principal.email).await {
        Ok(Some(identity)) => {
            (StatusCode::OK, Json(UserSummary::from(&identity))).into_response()
        }
        Ok(None) => (StatusCode::UNAUTHORIZED, "Not authenticated".to_string()).into_response(),
        Err(err) => {
            error!("identity lookup failed for current user: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Lookup failed".to_string()).into_response()
        }
    }
}
