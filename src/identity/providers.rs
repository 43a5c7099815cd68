//! # Identity Providers
//!
//! Seams to the external identity system: token verification, user record
//! lookup, and the profile store that maps users to roles. The resolver only
//! talks to these traits, so deployments can plug in a real backend while
//! tests use the static in-memory implementations below.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::core::error::{GuardError, GuardResult};
use crate::core::types::Role;

/// Claims extracted from a verified session token
#[derive(Debug, Clone)]
pub struct TokenClaims {
    /// Unique user identifier
    pub user_id: String,

    /// Role claim, when the token carries one
    pub role: Option<Role>,

    /// Opaque session identifier
    pub session_id: String,

    /// Last recorded activity for staleness checks
    pub last_activity: Option<DateTime<Utc>>,
}

/// Account state looked up from the identity backend
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub email: String,
    pub email_confirmed: bool,
    pub phone_confirmed: bool,
}

impl UserRecord {
    /// An account is verified once either contact channel is confirmed
    pub fn is_verified(&self) -> bool {
        self.email_confirmed || self.phone_confirmed
    }
}

/// Token verification and user record lookup
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify a session token and return its claims. Any failure (bad
    /// signature, revoked, expired at the issuer) is an error.
    async fn verify_token(&self, token: &str) -> GuardResult<TokenClaims>;

    /// Fetch the account record for a verified user id
    async fn get_user_by_id(&self, user_id: &str) -> GuardResult<UserRecord>;
}

/// Role lookup for users whose token carries no role claim
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn role_by_id(&self, user_id: &str) -> GuardResult<Role>;
}

/// In-memory provider backed by a token table, for tests and demos
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    tokens: DashMap<String, TokenClaims>,
    users: DashMap<String, UserRecord>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_token(&self, token: impl Into<String>, claims: TokenClaims) {
        self.tokens.insert(token.into(), claims);
    }

    pub fn insert_user(&self, user_id: impl Into<String>, record: UserRecord) {
        self.users.insert(user_id.into(), record);
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn verify_token(&self, token: &str) -> GuardResult<TokenClaims> {
        self.tokens
            .get(token)
            .map(|claims| claims.clone())
            .ok_or_else(|| GuardError::unauthenticated("invalid session token"))
    }

    async fn get_user_by_id(&self, user_id: &str) -> GuardResult<UserRecord> {
        self.users
            .get(user_id)
            .map(|record| record.clone())
            .ok_or_else(|| GuardError::unauthenticated(format!("unknown user: {}", user_id)))
    }
}

/// In-memory role table, for tests and demos
#[derive(Debug, Default)]
pub struct StaticProfileStore {
    roles: DashMap<String, Role>,
}

impl StaticProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_role(&self, user_id: impl Into<String>, role: Role) {
        self.roles.insert(user_id.into(), role);
    }
}

#[async_trait]
impl ProfileStore for StaticProfileStore {
    async fn role_by_id(&self, user_id: &str) -> GuardResult<Role> {
        self.roles
            .get(user_id)
            .map(|role| *role)
            .ok_or_else(|| GuardError::internal(format!("no profile for user: {}", user_id)))
    }
}
