//! # Rate Limit Guard
//!
//! Applies the most specific tier available: the route policy's own tier,
//! else the authenticated tier for requests with an identity, else the
//! global tier. The subject is the user id when an identity resolved,
//! otherwise the client IP, so logging in moves a client onto its own
//! budget.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::core::config::RateLimitTiersConfig;
use crate::core::error::{GuardError, GuardResult};
use crate::core::types::{
    GuardResponse, Identity, ProtectedRequest, RateLimitTier, RequestContext, ResolvedPolicy,
};
use crate::guards::{Guard, GuardDecision};
use crate::observability::metrics::MetricsCollector;
use crate::security::events::{SecurityEvent, SecurityEventKind, SecurityEventTracker};
use crate::store::rate_limit::RateLimiter;

pub struct RateLimitGuard {
    limiter: Arc<RateLimiter>,
    tiers: RateLimitTiersConfig,
    tracker: Arc<SecurityEventTracker>,
    metrics: Arc<MetricsCollector>,
}

impl RateLimitGuard {
    pub fn new(
        limiter: Arc<RateLimiter>,
        tiers: RateLimitTiersConfig,
        tracker: Arc<SecurityEventTracker>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            limiter,
            tiers,
            tracker,
            metrics,
        }
    }

    /// Tier and scope for this request, most specific first
    fn select_tier<'a>(
        &'a self,
        policy: &'a ResolvedPolicy,
        identity: Option<&Identity>,
    ) -> (&'a RateLimitTier, &'static str) {
        if let Some(tier) = &policy.policy.rate_limit {
            return (tier, "route");
        }
        if identity.is_some() {
            if let Some(tier) = &self.tiers.authenticated {
                return (tier, "authenticated");
            }
        }
        (&self.tiers.global, "global")
    }
}

#[async_trait]
impl Guard for RateLimitGuard {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn evaluate(
        &self,
        request: &ProtectedRequest,
        context: &RequestContext,
        identity: Option<&Identity>,
        policy: &ResolvedPolicy,
    ) -> GuardResult<GuardDecision> {
        let (tier, scope_kind) = self.select_tier(policy, identity);

        let subject = match identity {
            Some(identity) => identity.id.clone(),
            None => context.ip.to_string(),
        };
        // route-scoped windows are per path so different routes do not share
        // one budget
        let scope = match scope_kind {
            "route" => format!("route:{}", request.path),
            other => other.to_string(),
        };

        let decision = self.limiter.check(&scope, &subject, tier).await?;
        if !decision.limited {
            return Ok(GuardDecision::Continue);
        }

        warn!(
            ip = %context.ip,
            subject = %subject,
            scope = %scope,
            count = decision.count,
            limit = decision.limit,
            "rate limit exceeded"
        );

        let mut event = SecurityEvent::new(
            SecurityEventKind::RateLimitExceeded,
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
            .record_security_event(SecurityEventKind::RateLimitExceeded);

        let error = GuardError::RateLimitExceeded {
            limit: decision.limit,
            window_secs: tier.window.as_secs(),
        };
        let response = GuardResponse::api_error(&error)
            .with_header("x-ratelimit-limit", decision.limit.to_string())
            .with_header("x-ratelimit-remaining", decision.remaining.to_string())
            .with_header("x-ratelimit-reset", decision.reset_at.timestamp().to_string());
        Ok(GuardDecision::Deny(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::TrackingConfig;
    use crate::core::types::{PolicySource, Role, RoutePolicy};
    use crate::security::alerts::AlertDispatcher;
    use crate::store::InMemoryStore;
    use axum::http::{HeaderMap, Method, StatusCode};
    use chrono::Utc;
    use std::time::Duration;

    fn guard(tiers: RateLimitTiersConfig) -> (RateLimitGuard, Arc<SecurityEventTracker>) {
        let limiter = Arc::new(RateLimiter::new(Arc::new(InMemoryStore::new())));
        let tracker = Arc::new(SecurityEventTracker::new(&TrackingConfig::default()));
        let metrics = Arc::new(MetricsCollector::new(
            Default::default(),
            AlertDispatcher::disabled(),
        ));
        (
            RateLimitGuard::new(limiter, tiers, Arc::clone(&tracker), metrics),
            tracker,
        )
    }

    fn tiny_tiers(requests: u32) -> RateLimitTiersConfig {
        RateLimitTiersConfig {
            global: RateLimitTier {
                requests,
                window: Duration::from_secs(60),
            },
            authenticated: None,
        }
    }

    fn request(path: &str) -> ProtectedRequest {
        ProtectedRequest {
            method: Method::GET,
            path: path.to_string(),
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
    async fn test_denial_carries_rate_limit_headers() {
        let (guard, _) = guard(tiny_tiers(1));
        let req = request("/api/centers");
        let ctx = context("203.0.113.9");
        let policy = resolved(RoutePolicy::public());

        let first = guard.evaluate(&req, &ctx, None, &policy).await.unwrap();
        assert!(matches!(first, GuardDecision::Continue));

        let second = guard.evaluate(&req, &ctx, None, &policy).await.unwrap();
        match second {
            GuardDecision::Deny(resp) => {
                assert_eq!(resp.status, StatusCode::TOO_MANY_REQUESTS);
                assert_eq!(resp.headers.get("x-ratelimit-remaining").unwrap(), "0");
                assert!(resp.headers.contains_key("x-ratelimit-reset"));
            }
            GuardDecision::Continue => panic!("expected denial"),
        }
    }

    #[tokio::test]
    async fn test_route_tier_takes_precedence() {
        let (guard, _) = guard(tiny_tiers(100));
        let mut policy = RoutePolicy::public();
        policy.rate_limit = Some(RateLimitTier {
            requests: 1,
            window: Duration::from_secs(60),
        });
        let policy = resolved(policy);
        let req = request("/api/uploads");
        let ctx = context("203.0.113.9");

        guard.evaluate(&req, &ctx, None, &policy).await.unwrap();
        let second = guard.evaluate(&req, &ctx, None, &policy).await.unwrap();
        assert!(matches!(second, GuardDecision::Deny(_)));
    }

    #[tokio::test]
    async fn test_identity_subject_separates_from_ip() {
        let (guard, _) = guard(tiny_tiers(1));
        let req = request("/api/centers");
        let ctx = context("203.0.113.9");
        let policy = resolved(RoutePolicy::public());
        let identity = Identity::new("u1".into(), Role::Student, true, "s1".into());

        // anonymous burns the IP budget
        guard.evaluate(&req, &ctx, None, &policy).await.unwrap();
        let anon = guard.evaluate(&req, &ctx, None, &policy).await.unwrap();
        assert!(matches!(anon, GuardDecision::Deny(_)));

        // the same IP with an identity has its own budget
        let authed = guard
            .evaluate(&req, &ctx, Some(&identity), &policy)
            .await
            .unwrap();
        assert!(matches!(authed, GuardDecision::Continue));
    }

    #[tokio::test]
    async fn test_denial_recorded_as_security_event() {
        let (guard, tracker) = guard(tiny_tiers(1));
        let req = request("/api/centers");
        let ctx = context("203.0.113.77");
        let policy = resolved(RoutePolicy::public());

        guard.evaluate(&req, &ctx, None, &policy).await.unwrap();
        guard.evaluate(&req, &ctx, None, &policy).await.unwrap();
        assert_eq!(tracker.event_count(ctx.ip), 1);
    }
}
