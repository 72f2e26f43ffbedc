//! Command-line argument dispatch and server initialization.
//!
//! This module maps validated CLI arguments to the appropriate action, such as
//! starting the API server with its full configuration state.

use crate::cli::actions::{server::Args, Action};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches.get_one::<String>("dsn").cloned();
    let frontend_url = matches
        .get_one::<String>("frontend-url")
        .cloned()
        .context("missing required argument: --frontend-url")?;
    let token_secret = matches
        .get_one::<String>("token-secret")
        .cloned()
        .context("missing required argument: --token-secret")?;
    let token_ttl_seconds = matches
        .get_one::<i64>("token-ttl-seconds")
        .copied()
        .unwrap_or(36_000);
    let google_client_id = matches.get_one::<String>("google-client-id").cloned();

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_url,
        token_secret: SecretString::from(token_secret),
        token_ttl_seconds,
        google_client_id,
    }))
}
