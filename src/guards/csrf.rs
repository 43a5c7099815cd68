//! # CSRF Guard
//!
//! Double-submit token scheme: a random token is issued in a cookie, and
//! state-changing requests must echo it back in a header (or the query
//! parameter fallback for form posts). Comparison is constant-time so token
//! bytes cannot be recovered through timing.
//!
//! Safe methods (GET, HEAD, OPTIONS) never carry state changes and skip
//! validation entirely.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::core::config::CsrfConfig;
use crate::core::error::{GuardError, GuardResult};
use crate::core::types::{GuardResponse, Identity, ProtectedRequest, RequestContext, ResolvedPolicy};
use crate::guards::{Guard, GuardDecision};
use crate::observability::metrics::MetricsCollector;
use crate::security::events::{SecurityEvent, SecurityEventKind, SecurityEventTracker};

pub struct CsrfGuard {
    config: CsrfConfig,
    tracker: Arc<SecurityEventTracker>,
    metrics: Arc<MetricsCollector>,
}

impl CsrfGuard {
    pub fn new(
        config: CsrfConfig,
        tracker: Arc<SecurityEventTracker>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            config,
            tracker,
            metrics,
        }
    }

    /// Generate a fresh token for the issuing endpoint to set as a cookie
    pub fn issue_token(&self) -> String {
        let mut bytes = vec![0u8; self.config.token_length];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// `Set-Cookie` value for an issued token
    pub fn cookie_for(&self, token: &str) -> String {
        format!(
            "{}={}; Path=/; SameSite=Strict; HttpOnly",
            self.config.cookie_name, token
        )
    }

    fn submitted_token<'a>(&self, request: &'a ProtectedRequest) -> Option<&'a str> {
        request
            .header(&self.config.header_name)
            .or_else(|| request.query_param(&self.config.query_param))
    }

    fn deny(
        &self,
        request: &ProtectedRequest,
        context: &RequestContext,
        identity: Option<&Identity>,
        reason: &str,
    ) -> GuardDecision {
        warn!(ip = %context.ip, path = %request.path, reason, "CSRF validation failed");
        let mut event = SecurityEvent::new(
            SecurityEventKind::CsrfViolation,
            context.ip,
            request.path.clone(),
        );
        if let Some(identity) = identity {
            event = event.with_user(identity.id.clone());
        }
        if self.tracker.record(event) {
            self.metrics.record_suspicious_ip();
        }
        self.metrics
            .record_security_event(SecurityEventKind::CsrfViolation);

        let error = GuardError::csrf(reason.to_string());
        GuardDecision::Deny(GuardResponse::api_error(&error))
    }
}

/// Constant-time equality over token strings
fn tokens_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[async_trait]
impl Guard for CsrfGuard {
    fn name(&self) -> &'static str {
        "csrf"
    }

    async fn evaluate(
        &self,
        request: &ProtectedRequest,
        context: &RequestContext,
        identity: Option<&Identity>,
        policy: &ResolvedPolicy,
    ) -> GuardResult<GuardDecision> {
        if !policy.policy.requires_csrf || request.is_safe_method() {
            return Ok(GuardDecision::Continue);
        }

        let Some(cookie_token) = request.cookie(&self.config.cookie_name) else {
            return Ok(self.deny(request, context, identity, "missing CSRF cookie"));
        };
        let Some(submitted) = self.submitted_token(request) else {
            return Ok(self.deny(request, context, identity, "missing CSRF token"));
        };

        if !tokens_match(cookie_token, submitted) {
            return Ok(self.deny(request, context, identity, "CSRF token mismatch"));
        }

        Ok(GuardDecision::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::TrackingConfig;
    use crate::core::types::{PolicySource, RoutePolicy};
    use crate::security::alerts::AlertDispatcher;
    use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
    use chrono::Utc;

    fn guard() -> (CsrfGuard, Arc<SecurityEventTracker>) {
        let tracker = Arc::new(SecurityEventTracker::new(&TrackingConfig::default()));
        let metrics = Arc::new(MetricsCollector::new(
            Default::default(),
            AlertDispatcher::disabled(),
        ));
        (
            CsrfGuard::new(CsrfConfig::default(), Arc::clone(&tracker), metrics),
            tracker,
        )
    }

    fn request(method: Method, headers: &[(&str, &str)]) -> ProtectedRequest {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        ProtectedRequest {
            method,
            path: "/api/centers".to_string(),
            query: None,
            headers: map,
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

    fn csrf_policy() -> ResolvedPolicy {
        let mut policy = RoutePolicy::authenticated();
        policy.requires_csrf = true;
        ResolvedPolicy {
            source: PolicySource::DefaultProtected,
            policy: Arc::new(policy),
        }
    }

    #[tokio::test]
    async fn test_issued_token_round_trips() {
        let (guard, _) = guard();
        let token = guard.issue_token();
        assert!(token.len() >= 32);

        let cookie = format!("csrf-token={}", token);
        let req = request(
            Method::POST,
            &[("cookie", cookie.as_str()), ("x-csrf-token", token.as_str())],
        );

        let decision = guard
            .evaluate(&req, &context(), None, &csrf_policy())
            .await
            .unwrap();
        assert!(matches!(decision, GuardDecision::Continue));
    }

    #[tokio::test]
    async fn test_mutated_token_denied_and_tracked() {
        let (guard, tracker) = guard();
        let token = guard.issue_token();
        let mut forged = token.clone();
        let last = forged.pop().unwrap();
        forged.push(if last == 'A' { 'B' } else { 'A' });

        let cookie = format!("csrf-token={}", token);
        let req = request(
            Method::POST,
            &[("cookie", cookie.as_str()), ("x-csrf-token", forged.as_str())],
        );
        let ctx = context();

        let decision = guard.evaluate(&req, &ctx, None, &csrf_policy()).await.unwrap();
        assert!(matches!(decision, GuardDecision::Deny(_)));
        assert_eq!(tracker.event_count(ctx.ip), 1);
    }

    #[tokio::test]
    async fn test_missing_token_denied() {
        let (guard, _) = guard();
        let req = request(Method::POST, &[("cookie", "csrf-token=abc")]);
        let decision = guard
            .evaluate(&req, &context(), None, &csrf_policy())
            .await
            .unwrap();
        assert!(matches!(decision, GuardDecision::Deny(_)));
    }

    #[tokio::test]
    async fn test_query_param_fallback() {
        let (guard, _) = guard();
        let token = guard.issue_token();
        let cookie = format!("csrf-token={}", token);
        let mut req = request(Method::POST, &[("cookie", cookie.as_str())]);
        req.query = Some(format!("csrf_token={}", token));

        let decision = guard
            .evaluate(&req, &context(), None, &csrf_policy())
            .await
            .unwrap();
        assert!(matches!(decision, GuardDecision::Continue));
    }

    #[tokio::test]
    async fn test_safe_methods_skip_validation() {
        let (guard, _) = guard();
        let req = request(Method::GET, &[]);
        let decision = guard
            .evaluate(&req, &context(), None, &csrf_policy())
            .await
            .unwrap();
        assert!(matches!(decision, GuardDecision::Continue));
    }

    #[tokio::test]
    async fn test_routes_without_csrf_requirement_skip() {
        let (guard, _) = guard();
        let req = request(Method::POST, &[]);
        let policy = ResolvedPolicy {
            source: PolicySource::DefaultProtected,
            policy: Arc::new(RoutePolicy::authenticated()),
        };
        let decision = guard.evaluate(&req, &context(), None, &policy).await.unwrap();
        assert!(matches!(decision, GuardDecision::Continue));
    }
}
