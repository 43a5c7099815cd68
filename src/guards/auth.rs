//! # Authentication and Authorization Guards
//!
//! Authentication answers "who are you" for routes that need an identity;
//! authorization answers "may you" against the policy's role or permission
//! requirements. The split keeps denials distinct: missing identity is 401
//! (or a login redirect for page navigations), insufficient privilege is 403.

use async_trait::async_trait;
use axum::http::StatusCode;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::config::{DefaultProtectionConfig, IdentityConfig};
use crate::core::error::{GuardError, GuardResult};
use crate::core::types::{
    DenialNotice, GuardResponse, Identity, ProtectedRequest, RequestContext, ResolvedPolicy,
    SecurityLevel,
};
use crate::guards::{Guard, GuardDecision};
use crate::observability::metrics::MetricsCollector;
use crate::security::events::{SecurityEvent, SecurityEventKind, SecurityEventTracker};

/// Percent-encode a path for use in a query string value
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

pub struct AuthenticationGuard {
    identity_config: IdentityConfig,
    defaults: DefaultProtectionConfig,
    tracker: Arc<SecurityEventTracker>,
    metrics: Arc<MetricsCollector>,
}

impl AuthenticationGuard {
    pub fn new(
        identity_config: IdentityConfig,
        defaults: DefaultProtectionConfig,
        tracker: Arc<SecurityEventTracker>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            identity_config,
            defaults,
            tracker,
            metrics,
        }
    }

    fn deny_unauthenticated(
        &self,
        request: &ProtectedRequest,
        context: &RequestContext,
        reason: &str,
    ) -> GuardDecision {
        debug!(ip = %context.ip, path = %request.path, reason, "authentication required");
        let promoted = self.tracker.record(SecurityEvent::new(
            SecurityEventKind::AuthenticationFailure,
            context.ip,
            request.path.clone(),
        ));
        if promoted {
            self.metrics.record_suspicious_ip();
        }
        self.metrics.record_auth_failure();

        if request.is_api_shaped() {
            let error = GuardError::unauthenticated(reason.to_string());
            GuardDecision::Deny(GuardResponse::api_error(&error))
        } else {
            // page navigations bounce to the login page and come back
            let location = format!(
                "{}?next={}",
                self.defaults.login_path,
                encode_component(&request.path)
            );
            GuardDecision::Deny(GuardResponse::redirect(location))
        }
    }
}

#[async_trait]
impl Guard for AuthenticationGuard {
    fn name(&self) -> &'static str {
        "authentication"
    }

    async fn evaluate(
        &self,
        request: &ProtectedRequest,
        context: &RequestContext,
        identity: Option<&Identity>,
        policy: &ResolvedPolicy,
    ) -> GuardResult<GuardDecision> {
        if policy.policy.security_level == SecurityLevel::Public {
            return Ok(GuardDecision::Continue);
        }

        let Some(identity) = identity else {
            return Ok(self.deny_unauthenticated(request, context, "authentication required"));
        };

        if identity.is_session_expired(self.identity_config.session_timeout, context.timestamp) {
            return Ok(self.deny_unauthenticated(request, context, "session expired"));
        }

        self.metrics.record_auth_success();
        Ok(GuardDecision::Continue)
    }
}

pub struct AuthorizationGuard {
    tracker: Arc<SecurityEventTracker>,
    metrics: Arc<MetricsCollector>,
}

impl AuthorizationGuard {
    pub fn new(tracker: Arc<SecurityEventTracker>, metrics: Arc<MetricsCollector>) -> Self {
        Self { tracker, metrics }
    }

    fn deny_forbidden(
        &self,
        request: &ProtectedRequest,
        context: &RequestContext,
        identity: &Identity,
        reason: &str,
    ) -> GuardDecision {
        warn!(
            ip = %context.ip,
            user_id = %identity.id,
            path = %request.path,
            reason,
            "authorization denied"
        );
        let promoted = self.tracker.record(
            SecurityEvent::new(
                SecurityEventKind::AuthorizationFailure,
                context.ip,
                request.path.clone(),
            )
            .with_user(identity.id.clone()),
        );
        if promoted {
            self.metrics.record_suspicious_ip();
        }
        self.metrics
            .record_security_event(SecurityEventKind::AuthorizationFailure);

        let error = GuardError::forbidden(reason.to_string());
        if request.is_api_shaped() {
            GuardDecision::Deny(GuardResponse::api_error(&error))
        } else {
            let notice = DenialNotice {
                reason: error.error_type().to_string(),
                message: "You don't have access to this page".to_string(),
                return_path: request.referer().unwrap_or("/").to_string(),
                auto_return_after_secs: 5,
            };
            GuardDecision::Deny(GuardResponse::notice(StatusCode::FORBIDDEN, notice))
        }
    }
}

#[async_trait]
impl Guard for AuthorizationGuard {
    fn name(&self) -> &'static str {
        "authorization"
    }

    async fn evaluate(
        &self,
        request: &ProtectedRequest,
        context: &RequestContext,
        identity: Option<&Identity>,
        policy: &ResolvedPolicy,
    ) -> GuardResult<GuardDecision> {
        let level = policy.policy.security_level;
        if matches!(level, SecurityLevel::Public | SecurityLevel::Authenticated) {
            return Ok(GuardDecision::Continue);
        }

        // the authentication guard runs first; anonymous here means the
        // chain was assembled wrong
        let Some(identity) = identity else {
            return Err(GuardError::internal(
                "authorization reached without an identity",
            ));
        };

        match level {
            SecurityLevel::RoleBased => {
                let allowed = policy.policy.allowed_roles.as_deref().unwrap_or(&[]);
                if allowed.contains(&identity.role) {
                    Ok(GuardDecision::Continue)
                } else {
                    Ok(self.deny_forbidden(request, context, identity, "role not permitted"))
                }
            }
            SecurityLevel::PermissionBased => {
                let required = policy.policy.required_permissions.as_deref().unwrap_or(&[]);
                if required.iter().any(|p| identity.has_permission(*p)) {
                    Ok(GuardDecision::Continue)
                } else {
                    Ok(self.deny_forbidden(request, context, identity, "missing permission"))
                }
            }
            // Custom is authenticated plus a policy-attached check, which
            // the custom guard runs later in the chain
            SecurityLevel::Custom => Ok(GuardDecision::Continue),
            SecurityLevel::Public | SecurityLevel::Authenticated => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::TrackingConfig;
    use crate::core::types::{DenialBody, Permission, PolicySource, Role, RoutePolicy};
    use crate::security::alerts::AlertDispatcher;
    use axum::http::{HeaderMap, HeaderValue, Method};
    use chrono::Utc;

    fn shared() -> (Arc<SecurityEventTracker>, Arc<MetricsCollector>) {
        (
            Arc::new(SecurityEventTracker::new(&TrackingConfig::default())),
            Arc::new(MetricsCollector::new(
                Default::default(),
                AlertDispatcher::disabled(),
            )),
        )
    }

    fn authn_guard() -> AuthenticationGuard {
        let (tracker, metrics) = shared();
        AuthenticationGuard::new(
            IdentityConfig::default(),
            DefaultProtectionConfig::default(),
            tracker,
            metrics,
        )
    }

    fn authz_guard() -> AuthorizationGuard {
        let (tracker, metrics) = shared();
        AuthorizationGuard::new(tracker, metrics)
    }

    fn request(path: &str, accept_html: bool) -> ProtectedRequest {
        let mut headers = HeaderMap::new();
        if accept_html {
            headers.insert("accept", HeaderValue::from_static("text/html"));
        } else {
            headers.insert("accept", HeaderValue::from_static("application/json"));
        }
        ProtectedRequest {
            method: Method::GET,
            path: path.to_string(),
            query: None,
            headers,
            peer_addr: None,
            body: None,
        }
    }

    fn context() -> RequestContext {
        RequestContext {
            ip: "203.0.113.9".parse().unwrap(),
            user_agent: String::new(),
            is_bot: false,
            is_mobile: false,
            country: None,
            city: None,
            timestamp: Utc::now(),
            request_id: "r1".to_string(),
        }
    }

    fn resolved(policy: RoutePolicy) -> ResolvedPolicy {
        ResolvedPolicy {
            source: PolicySource::DefaultProtected,
            policy: Arc::new(policy),
        }
    }

    fn identity(role: Role) -> Identity {
        Identity::new("u1".into(), role, true, "s1".into())
    }

    #[tokio::test]
    async fn test_public_route_skips_authentication() {
        let decision = authn_guard()
            .evaluate(
                &request("/", true),
                &context(),
                None,
                &resolved(RoutePolicy::public()),
            )
            .await
            .unwrap();
        assert!(matches!(decision, GuardDecision::Continue));
    }

    #[tokio::test]
    async fn test_anonymous_api_request_gets_401() {
        let decision = authn_guard()
            .evaluate(
                &request("/api/centers", false),
                &context(),
                None,
                &resolved(RoutePolicy::authenticated()),
            )
            .await
            .unwrap();
        match decision {
            GuardDecision::Deny(resp) => assert_eq!(resp.status, StatusCode::UNAUTHORIZED),
            GuardDecision::Continue => panic!("expected denial"),
        }
    }

    #[tokio::test]
    async fn test_anonymous_page_navigation_redirects_to_login() {
        let decision = authn_guard()
            .evaluate(
                &request("/dashboard", true),
                &context(),
                None,
                &resolved(RoutePolicy::authenticated()),
            )
            .await
            .unwrap();
        match decision {
            GuardDecision::Deny(resp) => {
                assert_eq!(resp.status, StatusCode::SEE_OTHER);
                assert_eq!(
                    resp.headers.get("location").unwrap().to_str().unwrap(),
                    "/login?next=%2Fdashboard"
                );
            }
            GuardDecision::Continue => panic!("expected denial"),
        }
    }

    #[tokio::test]
    async fn test_expired_session_treated_as_unauthenticated() {
        let mut identity = identity(Role::Student);
        identity.last_activity = Some(Utc::now() - chrono::Duration::days(2));

        let decision = authn_guard()
            .evaluate(
                &request("/api/centers", false),
                &context(),
                Some(&identity),
                &resolved(RoutePolicy::authenticated()),
            )
            .await
            .unwrap();
        match decision {
            GuardDecision::Deny(resp) => assert_eq!(resp.status, StatusCode::UNAUTHORIZED),
            GuardDecision::Continue => panic!("expected denial"),
        }
    }

    #[tokio::test]
    async fn test_role_based_allows_member() {
        let mut policy = RoutePolicy::authenticated();
        policy.security_level = SecurityLevel::RoleBased;
        policy.allowed_roles = Some(vec![Role::Admin, Role::SuperAdmin]);

        let decision = authz_guard()
            .evaluate(
                &request("/api/admin/users", false),
                &context(),
                Some(&identity(Role::Admin)),
                &resolved(policy),
            )
            .await
            .unwrap();
        assert!(matches!(decision, GuardDecision::Continue));
    }

    #[tokio::test]
    async fn test_role_based_denies_non_member_with_403() {
        let mut policy = RoutePolicy::authenticated();
        policy.security_level = SecurityLevel::RoleBased;
        policy.allowed_roles = Some(vec![Role::Admin]);

        let decision = authz_guard()
            .evaluate(
                &request("/api/admin/users", false),
                &context(),
                Some(&identity(Role::Student)),
                &resolved(policy),
            )
            .await
            .unwrap();
        match decision {
            GuardDecision::Deny(resp) => assert_eq!(resp.status, StatusCode::FORBIDDEN),
            GuardDecision::Continue => panic!("expected denial"),
        }
    }

    #[tokio::test]
    async fn test_page_denial_carries_notice_with_return_path() {
        let mut policy = RoutePolicy::authenticated();
        policy.security_level = SecurityLevel::RoleBased;
        policy.allowed_roles = Some(vec![Role::Admin]);

        let mut req = request("/admin/users", true);
        req.headers
            .insert("referer", HeaderValue::from_static("/dashboard"));

        let decision = authz_guard()
            .evaluate(&req, &context(), Some(&identity(Role::Teacher)), &resolved(policy))
            .await
            .unwrap();
        match decision {
            GuardDecision::Deny(resp) => match resp.body {
                DenialBody::Page(notice) => {
                    assert_eq!(notice.return_path, "/dashboard");
                    assert_eq!(notice.reason, "insufficient_permissions");
                }
                other => panic!("expected page notice, got {:?}", other),
            },
            GuardDecision::Continue => panic!("expected denial"),
        }
    }

    #[tokio::test]
    async fn test_permission_based_requires_overlap() {
        let mut policy = RoutePolicy::authenticated();
        policy.security_level = SecurityLevel::PermissionBased;
        policy.required_permissions = Some(vec![Permission::Delete, Permission::Admin]);

        // Coach has Delete
        let allowed = authz_guard()
            .evaluate(
                &request("/api/centers/5", false),
                &context(),
                Some(&identity(Role::Coach)),
                &resolved(policy.clone()),
            )
            .await
            .unwrap();
        assert!(matches!(allowed, GuardDecision::Continue));

        // Student only has Read
        let denied = authz_guard()
            .evaluate(
                &request("/api/centers/5", false),
                &context(),
                Some(&identity(Role::Student)),
                &resolved(policy),
            )
            .await
            .unwrap();
        assert!(matches!(denied, GuardDecision::Deny(_)));
    }
}
