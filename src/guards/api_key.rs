//! API key guard for routes marked `requires_api_key`.
//!
//! Keys come from the configured allow-set and are compared in constant
//! time. The denial is the same 403 whether the key is absent or wrong.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::core::error::{GuardError, GuardResult};
use crate::core::types::{GuardResponse, Identity, ProtectedRequest, RequestContext, ResolvedPolicy};
use crate::guards::{Guard, GuardDecision};
use crate::observability::metrics::MetricsCollector;
use crate::security::events::{SecurityEvent, SecurityEventKind, SecurityEventTracker};

const API_KEY_HEADER: &str = "x-api-key";

pub struct ApiKeyGuard {
    keys: HashSet<String>,
    tracker: Arc<SecurityEventTracker>,
    metrics: Arc<MetricsCollector>,
}

impl ApiKeyGuard {
    pub fn new(
        keys: HashSet<String>,
        tracker: Arc<SecurityEventTracker>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            keys,
            tracker,
            metrics,
        }
    }

    /// Constant-time membership: every configured key is compared so timing
    /// does not reveal which prefix matched.
    fn key_accepted(&self, presented: &str) -> bool {
        let mut accepted = false;
        for key in &self.keys {
            accepted |= bool::from(key.as_bytes().ct_eq(presented.as_bytes()));
        }
        accepted
    }
}

#[async_trait]
impl Guard for ApiKeyGuard {
    fn name(&self) -> &'static str {
        "api_key"
    }

    async fn evaluate(
        &self,
        request: &ProtectedRequest,
        context: &RequestContext,
        _identity: Option<&Identity>,
        policy: &ResolvedPolicy,
    ) -> GuardResult<GuardDecision> {
        if !policy.policy.requires_api_key {
            return Ok(GuardDecision::Continue);
        }

        let accepted = request
            .header(API_KEY_HEADER)
            .map(|presented| self.key_accepted(presented))
            .unwrap_or(false);

        if accepted {
            return Ok(GuardDecision::Continue);
        }

        warn!(ip = %context.ip, path = %request.path, "API key rejected");
        let promoted = self.tracker.record(SecurityEvent::new(
            SecurityEventKind::ApiKeyRejected,
            context.ip,
            request.path.clone(),
        ));
        if promoted {
            self.metrics.record_suspicious_ip();
        }
        self.metrics
            .record_security_event(SecurityEventKind::ApiKeyRejected);

        let error = GuardError::ApiKeyRejected {
            reason: "invalid or missing API key".to_string(),
        };
        Ok(GuardDecision::Deny(GuardResponse::api_error(&error)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::TrackingConfig;
    use crate::core::types::{PolicySource, RoutePolicy};
    use crate::security::alerts::AlertDispatcher;
    use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
    use chrono::Utc;

    fn guard(keys: &[&str]) -> ApiKeyGuard {
        let tracker = Arc::new(SecurityEventTracker::new(&TrackingConfig::default()));
        let metrics = Arc::new(MetricsCollector::new(
            Default::default(),
            AlertDispatcher::disabled(),
        ));
        ApiKeyGuard::new(
            keys.iter().map(|k| k.to_string()).collect(),
            tracker,
            metrics,
        )
    }

    fn request(key: Option<&str>) -> ProtectedRequest {
        let mut headers = HeaderMap::new();
        if let Some(key) = key {
            headers.insert("x-api-key", HeaderValue::from_str(key).unwrap());
        }
        ProtectedRequest {
            method: Method::POST,
            path: "/api/internal/sync".to_string(),
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

    fn key_policy() -> ResolvedPolicy {
        let mut policy = RoutePolicy::public();
        policy.requires_api_key = true;
        ResolvedPolicy {
            source: PolicySource::DefaultProtected,
            policy: Arc::new(policy),
        }
    }

    #[tokio::test]
    async fn test_valid_key_continues() {
        let guard = guard(&["svc-key-1", "svc-key-2"]);
        let decision = guard
            .evaluate(&request(Some("svc-key-2")), &context(), None, &key_policy())
            .await
            .unwrap();
        assert!(matches!(decision, GuardDecision::Continue));
    }

    #[tokio::test]
    async fn test_wrong_and_missing_keys_get_identical_403() {
        let guard = guard(&["svc-key-1"]);

        let wrong = guard
            .evaluate(&request(Some("forged")), &context(), None, &key_policy())
            .await
            .unwrap();
        let missing = guard
            .evaluate(&request(None), &context(), None, &key_policy())
            .await
            .unwrap();

        for decision in [wrong, missing] {
            match decision {
                GuardDecision::Deny(resp) => assert_eq!(resp.status, StatusCode::FORBIDDEN),
                GuardDecision::Continue => panic!("expected denial"),
            }
        }
    }

    #[tokio::test]
    async fn test_routes_without_requirement_skip() {
        let guard = guard(&["svc-key-1"]);
        let policy = ResolvedPolicy {
            source: PolicySource::DefaultPublic,
            policy: Arc::new(RoutePolicy::public()),
        };
        let decision = guard
            .evaluate(&request(None), &context(), None, &policy)
            .await
            .unwrap();
        assert!(matches!(decision, GuardDecision::Continue));
    }
}
