//! # IP Restriction Guard
//!
//! Denies in three cases, checked in order: the policy's deny list, a
//! non-empty allow list that excludes the client, and the suspicion tracker.
//! All three produce the same 403 so a blocked client cannot tell which list
//! caught it.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::core::error::{GuardError, GuardResult};
use crate::core::types::{GuardResponse, Identity, ProtectedRequest, RequestContext, ResolvedPolicy};
use crate::guards::{Guard, GuardDecision};
use crate::observability::metrics::MetricsCollector;
use crate::security::events::{SecurityEvent, SecurityEventKind, SecurityEventTracker};

pub struct IpRestrictionGuard {
    tracker: Arc<SecurityEventTracker>,
    metrics: Arc<MetricsCollector>,
}

impl IpRestrictionGuard {
    pub fn new(tracker: Arc<SecurityEventTracker>, metrics: Arc<MetricsCollector>) -> Self {
        Self { tracker, metrics }
    }

    fn deny(&self, context: &RequestContext, request: &ProtectedRequest, reason: &str) -> GuardDecision {
        warn!(ip = %context.ip, path = %request.path, reason, "IP restricted");
        let promoted = self.tracker.record(SecurityEvent::new(
            SecurityEventKind::IpBlocked,
            context.ip,
            request.path.clone(),
        ));
        if promoted {
            self.metrics.record_suspicious_ip();
        }
        self.metrics.record_security_event(SecurityEventKind::IpBlocked);

        let error = GuardError::ip_blocked(context.ip.to_string(), "access denied".to_string());
        GuardDecision::Deny(GuardResponse::api_error(&error))
    }
}

#[async_trait]
impl Guard for IpRestrictionGuard {
    fn name(&self) -> &'static str {
        "ip_restriction"
    }

    async fn evaluate(
        &self,
        request: &ProtectedRequest,
        context: &RequestContext,
        _identity: Option<&Identity>,
        policy: &ResolvedPolicy,
    ) -> GuardResult<GuardDecision> {
        if let Some(deny_list) = &policy.policy.ip_deny_list {
            if deny_list.contains(&context.ip) {
                return Ok(self.deny(context, request, "deny list"));
            }
        }

        if let Some(allow_list) = &policy.policy.ip_allow_list {
            if !allow_list.is_empty() && !allow_list.contains(&context.ip) {
                return Ok(self.deny(context, request, "not on allow list"));
            }
        }

        if self.tracker.is_suspicious(context.ip) {
            return Ok(self.deny(context, request, "suspicious activity"));
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
    use axum::http::{HeaderMap, Method};
    use chrono::Utc;
    use std::net::IpAddr;

    fn guard() -> (IpRestrictionGuard, Arc<SecurityEventTracker>) {
        let tracker = Arc::new(SecurityEventTracker::new(&TrackingConfig::default()));
        let metrics = Arc::new(MetricsCollector::new(
            Default::default(),
            AlertDispatcher::disabled(),
        ));
        (
            IpRestrictionGuard::new(Arc::clone(&tracker), metrics),
            tracker,
        )
    }

    fn request() -> ProtectedRequest {
        ProtectedRequest {
            method: Method::GET,
            path: "/api/centers".to_string(),
            query: None,
            headers: HeaderMap::new(),
            peer_addr: None,
            body: None,
        }
    }

    fn context(ip: &str) -> RequestContext {
        RequestContext {
            ip: ip.parse().unwrap(),
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

    #[tokio::test]
    async fn test_deny_list_blocks() {
        let (guard, _) = guard();
        let mut policy = RoutePolicy::public();
        policy.ip_deny_list = Some(vec!["203.0.113.9".parse::<IpAddr>().unwrap()]);

        let decision = guard
            .evaluate(&request(), &context("203.0.113.9"), None, &resolved(policy))
            .await
            .unwrap();
        assert!(matches!(decision, GuardDecision::Deny(_)));
    }

    #[tokio::test]
    async fn test_allow_list_excludes_everyone_else() {
        let (guard, _) = guard();
        let mut policy = RoutePolicy::public();
        policy.ip_allow_list = Some(vec!["10.0.0.1".parse::<IpAddr>().unwrap()]);

        let denied = guard
            .evaluate(&request(), &context("203.0.113.9"), None, &resolved(policy.clone()))
            .await
            .unwrap();
        assert!(matches!(denied, GuardDecision::Deny(_)));

        let allowed = guard
            .evaluate(&request(), &context("10.0.0.1"), None, &resolved(policy))
            .await
            .unwrap();
        assert!(matches!(allowed, GuardDecision::Continue));
    }

    #[tokio::test]
    async fn test_suspicious_ip_blocked() {
        let (guard, tracker) = guard();
        let ctx = context("203.0.113.50");
        for _ in 0..11 {
            tracker.record(SecurityEvent::new(
                SecurityEventKind::RateLimitExceeded,
                ctx.ip,
                "/api/centers",
            ));
        }
        assert!(tracker.is_suspicious(ctx.ip));

        let decision = guard
            .evaluate(&request(), &ctx, None, &resolved(RoutePolicy::public()))
            .await
            .unwrap();
        assert!(matches!(decision, GuardDecision::Deny(_)));
    }

    #[tokio::test]
    async fn test_clean_ip_continues() {
        let (guard, _) = guard();
        let decision = guard
            .evaluate(
                &request(),
                &context("198.51.100.1"),
                None,
                &resolved(RoutePolicy::public()),
            )
            .await
            .unwrap();
        assert!(matches!(decision, GuardDecision::Continue));
    }
}
