//! Small helpers for auth validation and magic-link token handling.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use sha2::{Digest, Sha256};

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Quick shape check; real validation is delivery.
pub(super) fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email.trim()))
}

/// Create a new magic-link token.
///
/// 32 bytes from the OS RNG, so the token space cannot be enumerated. The raw
/// token is only sent to the user; the store keeps a hash.
pub(super) fn generate_magic_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate magic link token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a magic-link token so the raw value never sits in the store.
pub(super) fn hash_magic_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Build the frontend magic-login link included in outbound emails.
pub(super) fn build_magic_url(frontend_base_url: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/magic-login#token={token}")
}

/// Build the frontend OAuth2 callback URL carrying a freshly issued token.
pub(super) fn build_oauth_callback_url(frontend_base_url: &str, token: &str, role: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/auth/callback?token={token}&role={role}")
}
