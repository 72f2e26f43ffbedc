//! Server action: assemble the auth stack and hand it to the API layer.

use crate::api::{
    self,
    email::LogEmailSender,
    handlers::auth::{
        AuthConfig, AuthState, Clock, CredentialIssuer, FederatedVerifier, GoogleTokenVerifier,
        IdentityStore, InMemoryCredentialStore, InMemoryIdentityStore, IssuerConfig,
        JwtTokenService, PgIdentityStore, SystemClock,
    },
    APP_USER_AGENT,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::info;

use super::Action;

/// Validated arguments for the server action.
#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub frontend_url: String,
    pub token_secret: SecretString,
    pub token_ttl_seconds: i64,
    pub google_client_id: Option<String>,
}

/// Handle the server action
///
/// # Errors
/// Returns an error if the identity backend or listener cannot be set up.
pub async fn handle(action: Action) -> Result<()> {
    let Action::Server(args) = action;

    let config =
        AuthConfig::new(args.frontend_url.clone()).with_token_ttl_seconds(args.token_ttl_seconds);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Credential state is in-memory by design; only identities persist.
    let issuer = CredentialIssuer::new(
        Arc::new(InMemoryCredentialStore::new()),
        Arc::clone(&clock),
        Arc::new(LogEmailSender),
        IssuerConfig::new(config.frontend_base_url().to_string()),
    );

    let tokens = Arc::new(JwtTokenService::new(
        &args.token_secret,
        config.token_ttl_seconds(),
        Arc::clone(&clock),
    ));

    let identities: Arc<dyn IdentityStore> = match &args.dsn {
        Some(dsn) => {
            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .max_lifetime(Duration::from_secs(60 * 2))
                .test_before_acquire(true)
                .connect(dsn)
                .await
                .context("Failed to connect to database")?;
            Arc::new(PgIdentityStore::new(pool))
        }
        None => {
            info!("no DSN configured, using in-memory identity store");
            Arc::new(InMemoryIdentityStore::new())
        }
    };

    let http = reqwest::Client::builder()
        .user_agent(APP_USER_AGENT)
        .build()
        .context("Failed to build HTTP client")?;
    let federated: Arc<dyn FederatedVerifier> = Arc::new(GoogleTokenVerifier::new(
        http,
        args.google_client_id.clone(),
    ));

    let auth_state = Arc::new(AuthState::new(
        config, issuer, tokens, identities, federated,
    ));

    api::new(args.port, auth_state).await
}
