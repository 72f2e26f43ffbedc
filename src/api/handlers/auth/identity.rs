//! Identity records and the lookup seam behind authentication flows.
//!
//! Credential proof and identity resolution are separate steps everywhere:
//! an OTP, magic link, token, or federated assertion only proves control of
//! an email. Whether that email belongs to anyone is answered here, and no
//! flow auto-provisions an account. Registration happens only through
//! explicit signup.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;
use tracing::Instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use super::utils::normalize_email;

/// Coarse role attached to every identity, echoed in login responses so the
/// frontend can route to the right dashboard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Driver,
    Admin,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Driver => "DRIVER",
            Self::Admin => "ADMIN",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "USER" => Some(Self::User),
            "DRIVER" => Some(Self::Driver),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Frontend landing path after a magic-link login.
    #[must_use]
    pub const fn dashboard_path(self) -> &'static str {
        match self {
            Self::Admin => "/admin/dashboard",
            Self::Driver => "/driver/dashboard",
            Self::User => "/user/home",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the identity last authenticated. Updated on first federated login.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provider {
    Email,
    EmailOtp,
    MagicLink,
    Google,
}

impl Provider {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::EmailOtp => "EMAIL_OTP",
            Self::MagicLink => "MAGIC_LINK",
            Self::Google => "GOOGLE",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "EMAIL" => Some(Self::Email),
            "EMAIL_OTP" => Some(Self::EmailOtp),
            "MAGIC_LINK" => Some(Self::MagicLink),
            "GOOGLE" => Some(Self::Google),
            _ => None,
        }
    }
}

/// A registered account. `email` is the unique lookup key, stored normalized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    /// Absent for accounts that only ever log in passwordless or federated.
    pub password_hash: Option<String>,
    pub phone_number: Option<String>,
    pub role: Role,
    pub provider: Provider,
    /// Flipped on the first successful OTP verification.
    pub verified: bool,
}

/// Lookup and persistence seam for identities.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Find by normalized email.
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>>;

    /// Insert or update by email, returning the stored record.
    async fn save(&self, identity: Identity) -> Result<Identity>;

    /// Backend liveness check for the health endpoint.
    async fn ping(&self) -> Result<()>;
}

/// Map-backed store for local dev and tests.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    by_email: RwLock<HashMap<String, Identity>>,
}

impl InMemoryIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>> {
        Ok(self.by_email.read().await.get(&normalize_email(email)).cloned())
    }

    async fn save(&self, mut identity: Identity) -> Result<Identity> {
        identity.email = normalize_email(&identity.email);
        self.by_email
            .write()
            .await
            .insert(identity.email.clone(), identity.clone());
        Ok(identity)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Postgres-backed store used when a DSN is configured.
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn identity_from_row(row: &sqlx::postgres::PgRow) -> Result<Identity> {
    let role: String = row.get("role");
    let provider: String = row.get("provider");
    Ok(Identity {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        password_hash: row.get("password_hash"),
        phone_number: row.get("phone_number"),
        role: Role::parse(&role).with_context(|| format!("unknown role: {role}"))?,
        provider: Provider::parse(&provider)
            .with_context(|| format!("unknown provider: {provider}"))?,
        verified: row.get("verified"),
    })
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>> {
        let query = r"
            SELECT id, email, name, password_hash, phone_number, role, provider, verified
            FROM users
            WHERE email = $1
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup identity by email")?;

        row.as_ref().map(identity_from_row).transpose()
    }

    async fn save(&self, mut identity: Identity) -> Result<Identity> {
        identity.email = normalize_email(&identity.email);
        let query = r"
            INSERT INTO users
                (id, email, name, password_hash, phone_number, role, provider, verified)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (email) DO UPDATE
            SET name = EXCLUDED.name,
                password_hash = EXCLUDED.password_hash,
                phone_number = EXCLUDED.phone_number,
                role = EXCLUDED.role,
                provider = EXCLUDED.provider,
                verified = EXCLUDED.verified,
                updated_at = NOW()
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(identity.id)
            .bind(&identity.email)
            .bind(&identity.name)
            .bind(&identity.password_hash)
            .bind(&identity.phone_number)
            .bind(identity.role.as_str())
            .bind(identity.provider.as_str())
            .bind(identity.verified)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to save identity")?;

        Ok(identity)
    }

    async fn ping(&self) -> Result<()> {
        let query = "SELECT 1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("identity backend unreachable")?;
        Ok(())
    }
}
