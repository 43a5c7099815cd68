//! Method allow-list and declared-body-size guards.
//!
//! Both are protocol hygiene rather than attack handling: denials here are
//! not recorded as security events.

use async_trait::async_trait;

use crate::core::error::{GuardError, GuardResult};
use crate::core::types::{GuardResponse, Identity, ProtectedRequest, RequestContext, ResolvedPolicy};
use crate::guards::{Guard, GuardDecision};

/// Denies methods outside the policy's allow-list with 405
pub struct MethodGuard;

#[async_trait]
impl Guard for MethodGuard {
    fn name(&self) -> &'static str {
        "method"
    }

    async fn evaluate(
        &self,
        request: &ProtectedRequest,
        _context: &RequestContext,
        _identity: Option<&Identity>,
        policy: &ResolvedPolicy,
    ) -> GuardResult<GuardDecision> {
        if let Some(allowed) = &policy.policy.allowed_methods {
            if !allowed.contains(&request.method) {
                let error = GuardError::MethodNotAllowed {
                    method: request.method.to_string(),
                };
                let allow = allowed
                    .iter()
                    .map(|m| m.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Ok(GuardDecision::Deny(
                    GuardResponse::api_error(&error).with_header("allow", allow),
                ));
            }
        }
        Ok(GuardDecision::Continue)
    }
}

/// Denies requests whose declared content length exceeds the cap with 413
///
/// The cap comes from the route policy when set, otherwise the global
/// default. Requests without a `content-length` header pass; streaming
/// enforcement belongs to the server in front of the pipeline.
pub struct PayloadSizeGuard {
    default_max_bytes: u64,
}

impl PayloadSizeGuard {
    pub fn new(default_max_bytes: u64) -> Self {
        Self { default_max_bytes }
    }
}

#[async_trait]
impl Guard for PayloadSizeGuard {
    fn name(&self) -> &'static str {
        "payload_size"
    }

    async fn evaluate(
        &self,
        request: &ProtectedRequest,
        _context: &RequestContext,
        _identity: Option<&Identity>,
        policy: &ResolvedPolicy,
    ) -> GuardResult<GuardDecision> {
        let limit = policy.policy.max_body_bytes.unwrap_or(self.default_max_bytes);
        if let Some(declared) = request.content_length() {
            if declared > limit {
                let error = GuardError::PayloadTooLarge { declared, limit };
                return Ok(GuardDecision::Deny(GuardResponse::api_error(&error)));
            }
        }
        Ok(GuardDecision::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{PolicySource, RoutePolicy};
    use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
    use chrono::Utc;
    use std::sync::Arc;

    fn request(method: Method, content_length: Option<u64>) -> ProtectedRequest {
        let mut headers = HeaderMap::new();
        if let Some(len) = content_length {
            headers.insert(
                "content-length",
                HeaderValue::from_str(&len.to_string()).unwrap(),
            );
        }
        ProtectedRequest {
            method,
            path: "/api/centers".to_string(),
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

    #[tokio::test]
    async fn test_method_outside_allow_list_gets_405() {
        let mut policy = RoutePolicy::public();
        policy.allowed_methods = Some(vec![Method::GET, Method::POST]);

        let decision = MethodGuard
            .evaluate(&request(Method::DELETE, None), &context(), None, &resolved(policy))
            .await
            .unwrap();
        match decision {
            GuardDecision::Deny(resp) => {
                assert_eq!(resp.status, StatusCode::METHOD_NOT_ALLOWED);
                assert_eq!(resp.headers.get("allow").unwrap(), "GET, POST");
            }
            GuardDecision::Continue => panic!("expected denial"),
        }
    }

    #[tokio::test]
    async fn test_absent_method_list_allows_all() {
        let decision = MethodGuard
            .evaluate(
                &request(Method::DELETE, None),
                &context(),
                None,
                &resolved(RoutePolicy::public()),
            )
            .await
            .unwrap();
        assert!(matches!(decision, GuardDecision::Continue));
    }

    #[tokio::test]
    async fn test_oversized_body_gets_413() {
        let guard = PayloadSizeGuard::new(1024);
        let decision = guard
            .evaluate(
                &request(Method::POST, Some(4096)),
                &context(),
                None,
                &resolved(RoutePolicy::public()),
            )
            .await
            .unwrap();
        match decision {
            GuardDecision::Deny(resp) => assert_eq!(resp.status, StatusCode::PAYLOAD_TOO_LARGE),
            GuardDecision::Continue => panic!("expected denial"),
        }
    }

    #[tokio::test]
    async fn test_route_cap_overrides_default() {
        let guard = PayloadSizeGuard::new(1024 * 1024);
        let mut policy = RoutePolicy::public();
        policy.max_body_bytes = Some(100);

        let decision = guard
            .evaluate(&request(Method::POST, Some(200)), &context(), None, &resolved(policy))
            .await
            .unwrap();
        assert!(matches!(decision, GuardDecision::Deny(_)));
    }

    #[tokio::test]
    async fn test_missing_content_length_passes() {
        let guard = PayloadSizeGuard::new(1024);
        let decision = guard
            .evaluate(
                &request(Method::POST, None),
                &context(),
                None,
                &resolved(RoutePolicy::public()),
            )
            .await
            .unwrap();
        assert!(matches!(decision, GuardDecision::Continue));
    }
}
