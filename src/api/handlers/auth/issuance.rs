//! Issuance and validation engine for OTP codes and magic links.
//!
//! Consumption is one-shot by construction: every validation attempt removes
//! the stored record before any comparison, so a code or link can succeed at
//! most once no matter how many validators race on it. Expiry is checked
//! lazily at validation time; no background sweep exists.
//!
//! Validation failures collapse to a single opaque outcome at the API
//! boundary. Internal logs keep the precise cause (not found, expired,
//! mismatch) for operability without enabling enumeration.

use rand::{rngs::OsRng, Rng};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::email::EmailSender;

use super::clock::Clock;
use super::store::{CredentialRecord, CredentialStore};
use super::utils::{build_magic_url, generate_magic_token, hash_magic_token, normalize_email};

const DEFAULT_OTP_TTL_MS: i64 = 5 * 60 * 1000;
const DEFAULT_MAGIC_LINK_TTL_MS: i64 = 15 * 60 * 1000;
const DEFAULT_RATE_WINDOW_MS: i64 = 60 * 60 * 1000;
const DEFAULT_MAX_PER_WINDOW: u32 = 5;

/// Why an issuance request was refused.
#[derive(Debug)]
pub enum IssueError {
    /// The address fails the minimal syntactic check.
    InvalidEmail,
    /// The fixed-window budget for this subject is exhausted.
    RateLimited,
    /// The mail collaborator failed after the credential was recorded.
    /// Rate-limit accounting is deliberately not rolled back.
    Delivery(anyhow::Error),
    /// Token generation or another internal step failed.
    Internal(anyhow::Error),
}

impl fmt::Display for IssueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEmail => write!(f, "invalid email address"),
            Self::RateLimited => write!(f, "too many requests, please wait before requesting a new one"),
            Self::Delivery(err) => write!(f, "failed to deliver email: {err}"),
            Self::Internal(err) => write!(f, "internal error: {err}"),
        }
    }
}

/// Internal cause of a failed validation. Never exposed over the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidateError {
    NotFound,
    Expired,
    Mismatch,
}

impl ValidateError {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Expired => "expired",
            Self::Mismatch => "mismatch",
        }
    }
}

/// TTLs and rate-limit knobs for the issuer.
#[derive(Clone, Debug)]
pub struct IssuerConfig {
    otp_ttl_ms: i64,
    magic_link_ttl_ms: i64,
    rate_window_ms: i64,
    max_per_window: u32,
    frontend_base_url: String,
}

impl IssuerConfig {
    /// Defaults: 5 minute OTP TTL, 15 minute magic-link TTL, and at most
    /// 5 issuances per subject per hour.
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            otp_ttl_ms: DEFAULT_OTP_TTL_MS,
            magic_link_ttl_ms: DEFAULT_MAGIC_LINK_TTL_MS,
            rate_window_ms: DEFAULT_RATE_WINDOW_MS,
            max_per_window: DEFAULT_MAX_PER_WINDOW,
            frontend_base_url,
        }
    }

    #[must_use]
    pub fn with_otp_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.otp_ttl_ms = ttl_ms;
        self
    }

    #[must_use]
    pub fn with_magic_link_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.magic_link_ttl_ms = ttl_ms;
        self
    }

    #[must_use]
    pub fn with_rate_window_ms(mut self, window_ms: i64) -> Self {
        self.rate_window_ms = window_ms;
        self
    }

    #[must_use]
    pub fn with_max_per_window(mut self, max: u32) -> Self {
        self.max_per_window = max;
        self
    }

    #[must_use]
    pub fn otp_ttl_ms(&self) -> i64 {
        self.otp_ttl_ms
    }

    #[must_use]
    pub fn magic_link_ttl_ms(&self) -> i64 {
        self.magic_link_ttl_ms
    }

    pub(super) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }
}

/// Issues and consumes ephemeral credentials.
pub struct CredentialIssuer {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    mailer: Arc<dyn EmailSender>,
    config: IssuerConfig,
}

impl CredentialIssuer {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        mailer: Arc<dyn EmailSender>,
        config: IssuerConfig,
    ) -> Self {
        Self {
            store,
            clock,
            mailer,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &IssuerConfig {
        &self.config
    }

    /// Generate, store, and dispatch a 6-digit login code.
    ///
    /// The rate window is consumed before delivery is attempted; a delivery
    /// failure surfaces to the caller but never refunds the budget, so
    /// retry loops cannot bypass the limit.
    ///
    /// # Errors
    ///
    /// `InvalidEmail`, `RateLimited`, or `Delivery` per the taxonomy above.
    pub fn issue_otp(&self, email: &str) -> Result<(), IssueError> {
        let email = normalize_email(email);
        if !email.contains('@') {
            return Err(IssueError::InvalidEmail);
        }

        let now = self.clock.now_millis();
        let count =
            self.store
                .increment_rate_window(&otp_rate_key(&email), now, self.config.rate_window_ms);
        if count > self.config.max_per_window {
            warn!(email = %email, count, "otp issuance rate limited");
            return Err(IssueError::RateLimited);
        }

        // Uniform over 000000..=999999; leading zeros are preserved.
        let code = format!("{:06}", OsRng.gen_range(0..1_000_000u32));
        self.store.put_otp(
            &email,
            CredentialRecord {
                subject: email.clone(),
                secret: code.clone(),
                issued_at_ms: now,
                expires_at_ms: now + self.config.otp_ttl_ms,
            },
        );

        // Dispatch happens after the store mutation, outside any lock.
        self.mailer
            .send_code(&email, &code)
            .map_err(IssueError::Delivery)?;

        debug!(email = %email, "otp issued");
        Ok(())
    }

    /// Consume and check the stored code for `email`.
    ///
    /// The record is removed on the first lookup whether or not the
    /// comparison succeeds.
    ///
    /// # Errors
    ///
    /// Returns the internal cause; callers must collapse it before it
    /// crosses the wire.
    pub fn validate_otp(&self, email: &str, candidate: &str) -> Result<(), ValidateError> {
        let email = normalize_email(email);
        let record = self.store.take_otp(&email).ok_or(ValidateError::NotFound)?;

        if record.is_expired(self.clock.now_millis()) {
            debug!(email = %email, "otp validation failed: expired");
            return Err(ValidateError::Expired);
        }

        // Exact string comparison, never numeric: "042773" != "42773".
        if record.secret != candidate {
            debug!(email = %email, "otp validation failed: mismatch");
            return Err(ValidateError::Mismatch);
        }

        debug!(email = %email, "otp validated");
        Ok(())
    }

    /// Generate, store, and dispatch a single-use magic-link token.
    ///
    /// The store keeps only the token hash; the raw token exists in the
    /// outbound email alone.
    ///
    /// # Errors
    ///
    /// `InvalidEmail`, `RateLimited`, `Internal`, or `Delivery`.
    pub fn issue_magic_link(&self, email: &str) -> Result<(), IssueError> {
        let email = normalize_email(email);
        if !email.contains('@') {
            return Err(IssueError::InvalidEmail);
        }

        let now = self.clock.now_millis();
        let count = self.store.increment_rate_window(
            &magic_rate_key(&email),
            now,
            self.config.rate_window_ms,
        );
        if count > self.config.max_per_window {
            warn!(email = %email, count, "magic link issuance rate limited");
            return Err(IssueError::RateLimited);
        }

        let token = generate_magic_token().map_err(IssueError::Internal)?;
        self.store.put_magic_link(
            hash_magic_token(&token),
            CredentialRecord {
                subject: email.clone(),
                secret: String::new(),
                issued_at_ms: now,
                expires_at_ms: now + self.config.magic_link_ttl_ms,
            },
        );

        let url = build_magic_url(self.config.frontend_base_url(), &token);
        self.mailer
            .send_link(&email, &url)
            .map_err(IssueError::Delivery)?;

        debug!(email = %email, "magic link issued");
        Ok(())
    }

    /// Consume the magic-link token and return the bound email.
    ///
    /// Single-use is structural: removal happens unconditionally on the
    /// first lookup.
    ///
    /// # Errors
    ///
    /// Returns the internal cause; callers must collapse it before it
    /// crosses the wire.
    pub fn validate_magic_link(&self, token: &str) -> Result<String, ValidateError> {
        let record = self
            .store
            .take_magic_link(&hash_magic_token(token))
            .ok_or(ValidateError::NotFound)?;

        if record.is_expired(self.clock.now_millis()) {
            debug!("magic link validation failed: expired");
            return Err(ValidateError::Expired);
        }

        debug!(email = %record.subject, "magic link validated");
        Ok(record.subject)
    }
}

fn otp_rate_key(email: &str) -> String {
    format!("otp:{email}")
}

fn magic_rate_key(email: &str) -> String {
    format!("magic:{email}")
}
