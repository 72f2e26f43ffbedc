//! Auth state and configuration shared by handlers and the request gate.

use std::sync::Arc;

use super::google::FederatedVerifier;
use super::identity::IdentityStore;
use super::issuance::CredentialIssuer;
use super::token::TokenService;

const DEFAULT_TOKEN_TTL_SECONDS: i64 = 10 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    token_ttl_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url: frontend_base_url.trim_end_matches('/').to_string(),
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn token_ttl_seconds(&self) -> i64 {
        self.token_ttl_seconds
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }
}

/// Everything the auth handlers and the gate need, shared as one extension.
pub struct AuthState {
    config: AuthConfig,
    issuer: CredentialIssuer,
    tokens: Arc<dyn TokenService>,
    identities: Arc<dyn IdentityStore>,
    federated: Arc<dyn FederatedVerifier>,
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        issuer: CredentialIssuer,
        tokens: Arc<dyn TokenService>,
        identities: Arc<dyn IdentityStore>,
        federated: Arc<dyn FederatedVerifier>,
    ) -> Self {
        Self {
            config,
            issuer,
            tokens,
            identities,
            federated,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn issuer(&self) -> &CredentialIssuer {
        &self.issuer
    }

    #[must_use]
    pub fn tokens(&self) -> &dyn TokenService {
        self.tokens.as_ref()
    }

    #[must_use]
    pub fn identities(&self) -> &dyn IdentityStore {
        self.identities.as_ref()
    }

    pub(super) fn federated(&self) -> &dyn FederatedVerifier {
        self.federated.as_ref()
    }
}
