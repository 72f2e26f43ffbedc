//! Outbound email delivery abstraction.
//!
//! Issuance flows hand a code or link to an `EmailSender` after the credential
//! store has been updated; delivery happens outside any lock. A returned error
//! propagates to the issuance caller as a delivery failure, distinct from
//! validation failures, and never rolls back rate-limit accounting.
//!
//! The default sender for local dev is `LogEmailSender`, which logs and
//! returns `Ok(())`. Real SMTP/API delivery is a deployment concern behind
//! this trait.

use anyhow::Result;
use tracing::info;

/// Email delivery seam for OTP codes and magic-link URLs.
pub trait EmailSender: Send + Sync {
    /// Deliver a login code or return an error to surface a delivery failure.
    fn send_code(&self, to_email: &str, code: &str) -> Result<()>;

    /// Deliver a magic-link URL or return an error.
    fn send_link(&self, to_email: &str, url: &str) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Clone, Debug, Default)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send_code(&self, to_email: &str, code: &str) -> Result<()> {
        info!(to_email = %to_email, code = %code, "login code email send stub");
        Ok(())
    }

    fn send_link(&self, to_email: &str, url: &str) -> Result<()> {
        info!(to_email = %to_email, url = %url, "magic link email send stub");
        Ok(())
    }
}
