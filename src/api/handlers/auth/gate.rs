//! Request authentication gate.
//!
//! Every request passes through one linear decision: public paths bypass,
//! requests without a bearer credential continue anonymously, and a presented
//! token must both verify and resolve to a registered identity before a
//! principal is attached. A token whose subject no longer resolves is denied
//! with an explicit message so stale clients re-register instead of retrying.

use axum::{
    extract::Request,
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use super::identity::Role;
use super::state::AuthState;
use super::token::TokenError;
use super::utils::normalize_email;

/// Paths served without authentication. Everything under these prefixes is
/// reachable pre-login (credential issuance, signup, federated callbacks).
const PUBLIC_PREFIXES: &[&str] = &["/api/auth/", "/oauth2/"];
const PUBLIC_PATHS: &[&str] = &["/", "/health", "/error", "/openapi.json"];

/// Authenticated caller context attached as a request extension.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

/// Outcome of the gate's decision sequence.
#[derive(Debug)]
pub(super) enum GateDecision {
    /// Public path, no authentication attempted.
    Public,
    /// No credential presented; the request continues without a principal.
    Anonymous,
    Authenticated(Principal),
    /// Reject with 401 and this message.
    Denied(&'static str),
}

#[must_use]
pub(super) fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path)
        || PUBLIC_PREFIXES
            .iter()
            .any(|prefix| path.starts_with(prefix))
}

/// Pull the token out of `Authorization: Bearer <token>`.
///
/// A missing or differently-schemed header means "no credential", not an
/// error.
fn extract_bearer_token(auth_header: Option<&str>) -> Option<&str> {
    auth_header?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Run the decision sequence for one request.
pub(super) async fn authenticate_request(
    state: &AuthState,
    path: &str,
    auth_header: Option<&str>,
) -> GateDecision {
    if is_public(path) {
        return GateDecision::Public;
    }

    let Some(token) = extract_bearer_token(auth_header) else {
        return GateDecision::Anonymous;
    };

    let claims = match state.tokens().verify(token) {
        Ok(claims) => claims,
        Err(TokenError::Expired) => {
            debug!(path = %path, "bearer token expired");
            return GateDecision::Denied("Invalid or expired token");
        }
        Err(TokenError::Invalid) => {
            debug!(path = %path, "bearer token failed verification");
            return GateDecision::Denied("Invalid or expired token");
        }
    };

    // The token only claims an email; the account must still exist.
    let email = normalize_email(&claims.sub);
    match state.identities().find_by_email(&email).await {
        Ok(Some(identity)) => GateDecision::Authenticated(Principal {
            user_id: identity.id,
            email: identity.email,
            role: identity.role,
        }),
        Ok(None) => {
            debug!(email = %email, "token subject no longer registered");
            GateDecision::Denied("User account not found. Please sign up again.")
        }
        Err(err) => {
            error!("identity lookup failed during authentication: {err}");
            GateDecision::Denied("Invalid or expired token")
        }
    }
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": "Unauthorized",
            "message": message,
        })),
    )
        .into_response()
}

/// Axum middleware wrapping every route with the gate decision.
pub async fn gate(mut request: Request, next: Next) -> Response {
    let Some(state) = request.extensions().get::<Arc<AuthState>>().cloned() else {
        error!("auth state missing from request extensions");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let path = request.uri().path().to_string();
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);

    match authenticate_request(&state, &path, auth_header.as_deref()).await {
        GateDecision::Public | GateDecision::Anonymous => next.run(request).await,
        GateDecision::Authenticated(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        GateDecision::Denied(message) => unauthorized(message),
    }
}
