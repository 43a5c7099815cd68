//! # Identity Resolution
//!
//! Resolves at most one identity per request and never fails the request
//! itself: any verification problem yields `None` (anonymous) and lets the
//! authentication guard decide whether anonymity is acceptable for the route.
//!
//! Token verification is the only default trust source. Header trust
//! (`x-authenticated-*` headers stamped by an upstream authentication proxy)
//! is an explicit opt-in, and enabling it disables the token path entirely so
//! the two sources can never be combined on one deployment.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::config::IdentityConfig;
use crate::core::types::{Identity, ProtectedRequest, Role};
use crate::identity::providers::{IdentityProvider, ProfileStore};

const USER_ID_HEADER: &str = "x-authenticated-user-id";
const ROLE_HEADER: &str = "x-authenticated-role";
const SESSION_COOKIE: &str = "session-token";

pub struct IdentityResolver {
    provider: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    config: IdentityConfig,
}

impl IdentityResolver {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileStore>,
        config: IdentityConfig,
    ) -> Self {
        Self {
            provider,
            profiles,
            config,
        }
    }

    /// Resolve the request's identity, or `None` for anonymous
    pub async fn resolve(&self, request: &ProtectedRequest) -> Option<Identity> {
        if self.config.trust_upstream_headers {
            self.resolve_from_headers(request).await
        } else {
            self.resolve_from_token(request).await
        }
    }

    async fn resolve_from_headers(&self, request: &ProtectedRequest) -> Option<Identity> {
        let user_id = request.header(USER_ID_HEADER)?.to_string();
        if user_id.is_empty() {
            return None;
        }

        let role = match request.header(ROLE_HEADER).and_then(Role::parse) {
            Some(role) => role,
            None => self.lookup_role(&user_id).await,
        };

        // the upstream proxy already authenticated this request
        debug!(user_id = %user_id, %role, "identity resolved from upstream headers");
        Some(Identity::new(user_id.clone(), role, true, user_id))
    }

    async fn resolve_from_token(&self, request: &ProtectedRequest) -> Option<Identity> {
        let token = extract_token(request)?;

        let claims = match self.provider.verify_token(token).await {
            Ok(claims) => claims,
            Err(err) => {
                debug!("token verification failed: {}", err);
                return None;
            }
        };

        let role = match claims.role {
            Some(role) => role,
            None => self.lookup_role(&claims.user_id).await,
        };

        let verified = match self.provider.get_user_by_id(&claims.user_id).await {
            Ok(record) => record.is_verified(),
            Err(err) => {
                debug!(user_id = %claims.user_id, "user record lookup failed: {}", err);
                false
            }
        };

        let mut identity = Identity::new(claims.user_id, role, verified, claims.session_id);
        identity.last_activity = claims.last_activity;
        Some(identity)
    }

    /// Profile-store role lookup, bounded by the configured timeout and
    /// falling back to the least privileged role.
    async fn lookup_role(&self, user_id: &str) -> Role {
        let lookup = self.profiles.role_by_id(user_id);
        match tokio::time::timeout(self.config.lookup_timeout, lookup).await {
            Ok(Ok(role)) => role,
            Ok(Err(err)) => {
                warn!(%user_id, "role lookup failed, defaulting to student: {}", err);
                Role::Student
            }
            Err(_) => {
                warn!(%user_id, "role lookup timed out, defaulting to student");
                Role::Student
            }
        }
    }
}

/// Bearer token from the `authorization` header, else the session cookie
fn extract_token(request: &ProtectedRequest) -> Option<&str> {
    if let Some(auth) = request.header("authorization") {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return Some(token.trim());
        }
    }
    request.cookie(SESSION_COOKIE)
}
