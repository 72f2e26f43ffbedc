//! Auth handlers and supporting modules.
//!
//! Authentication is split into three layers that never blur:
//!
//! - **Credential proof**: OTP codes and magic links are ephemeral, one-shot
//!   secrets held in [`store`] and driven by [`issuance`].
//! - **Identity resolution**: proving control of an email says nothing about
//!   registration; [`identity`] answers that separately, and nothing
//!   auto-provisions accounts.
//! - **Session tokens**: [`token`] mints stateless bearer tokens which the
//!   [`gate`] middleware re-resolves on every request.

pub(crate) mod clock;
pub(crate) mod gate;
pub(crate) mod google;
pub(crate) mod identity;
pub(crate) mod issuance;
pub(crate) mod login;
pub(crate) mod magic_link;
pub(crate) mod me;
pub(crate) mod otp;
pub(crate) mod signup;
mod state;
pub(crate) mod store;
pub(crate) mod token;
pub(crate) mod types;
mod utils;

pub use clock::{Clock, ManualClock, SystemClock};
pub use gate::{gate, Principal};
pub use google::{FederatedIdentity, FederatedVerifier, GoogleTokenVerifier};
pub use identity::{
    Identity, IdentityStore, InMemoryIdentityStore, PgIdentityStore, Provider, Role,
};
pub use issuance::{CredentialIssuer, IssuerConfig};
pub use state::{AuthConfig, AuthState};
pub use store::{CredentialStore, InMemoryCredentialStore};
pub use token::{JwtTokenService, TokenService};

#[cfg(test)]
mod tests;
