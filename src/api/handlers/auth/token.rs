//! Signed bearer tokens binding a session to an email subject.
//!
//! Tokens are stateless HS256 JWTs. The gate treats them as a claim, not an
//! authority: a verified token still has to resolve against the identity
//! store before a request is authenticated.

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::clock::Clock;

/// Claims carried by an issued token. Times are unix seconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject email, normalized.
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Why a presented token was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenError {
    Expired,
    /// Malformed, bad signature, or otherwise unverifiable.
    Invalid,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expired => write!(f, "token expired"),
            Self::Invalid => write!(f, "invalid token"),
        }
    }
}

/// Issue and verify bearer tokens.
pub trait TokenService: Send + Sync {
    /// Mint a token bound to `subject`.
    ///
    /// # Errors
    ///
    /// Fails only if signing itself fails.
    fn issue(&self, subject: &str) -> anyhow::Result<String>;

    /// Verify signature and expiry, returning the claims.
    ///
    /// # Errors
    ///
    /// `Expired` when the expiry claim has passed, `Invalid` for everything
    /// else.
    fn verify(&self, token: &str) -> Result<TokenClaims, TokenError>;
}

/// HS256 implementation with an injected clock so expiry is testable.
pub struct JwtTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_seconds: i64,
    clock: Arc<dyn Clock>,
}

impl JwtTokenService {
    #[must_use]
    pub fn new(secret: &SecretString, ttl_seconds: i64, clock: Arc<dyn Clock>) -> Self {
        let secret = secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl_seconds,
            clock,
        }
    }
}

impl TokenService for JwtTokenService {
    fn issue(&self, subject: &str) -> anyhow::Result<String> {
        let iat = self.clock.now_millis() / 1000;
        let claims = TokenClaims {
            sub: subject.to_string(),
            iat,
            exp: iat + self.ttl_seconds,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| anyhow::anyhow!("failed to sign token: {err}"))
    }

    fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        match decode::<TokenClaims>(token, &self.decoding_key, &validation) {
            Ok(data) => {
                // The library validates exp against the wall clock; re-check
                // against the injected clock so tests control expiry too.
                if data.claims.exp <= self.clock.now_millis() / 1000 {
                    return Err(TokenError::Expired);
                }
                Ok(data.claims)
            }
            Err(err) => match err.kind() {
                ErrorKind::ExpiredSignature => Err(TokenError::Expired),
                _ => Err(TokenError::Invalid),
            },
        }
    }
}
