//! Runs the policy-attached custom check, when one exists.
//!
//! Custom checks have a narrower failure contract than built-in guards: an
//! error they return or a panic they raise denies the request as a
//! validation failure (400) rather than surfacing as an internal error, so
//! a buggy or strict check can never take the pipeline down.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::error::{GuardError, GuardResult};
use crate::core::types::{GuardResponse, Identity, ProtectedRequest, RequestContext, ResolvedPolicy};
use crate::guards::{Guard, GuardDecision};
use crate::observability::metrics::MetricsCollector;
use crate::security::events::{SecurityEvent, SecurityEventKind, SecurityEventTracker};

pub struct CustomCheckGuard {
    tracker: Arc<SecurityEventTracker>,
    metrics: Arc<MetricsCollector>,
}

impl CustomCheckGuard {
    pub fn new(tracker: Arc<SecurityEventTracker>, metrics: Arc<MetricsCollector>) -> Self {
        Self { tracker, metrics }
    }

    fn deny(
        &self,
        request: &ProtectedRequest,
        context: &RequestContext,
        identity: Option<&Identity>,
    ) -> GuardDecision {
        let mut event = SecurityEvent::new(
            SecurityEventKind::CustomCheckFailure,
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
            .record_security_event(SecurityEventKind::CustomCheckFailure);

        let error = GuardError::validation("request rejected by route check");
        GuardDecision::Deny(GuardResponse::api_error(&error))
    }
}

#[async_trait]
impl Guard for CustomCheckGuard {
    fn name(&self) -> &'static str {
        "custom_check"
    }

    async fn evaluate(
        &self,
        request: &ProtectedRequest,
        context: &RequestContext,
        identity: Option<&Identity>,
        policy: &ResolvedPolicy,
    ) -> GuardResult<GuardDecision> {
        let Some(check) = &policy.policy.custom else {
            return Ok(GuardDecision::Continue);
        };

        // a panicking check denies the request exactly like a returned
        // error; it never becomes an internal failure
        let outcome = AssertUnwindSafe(check.check(request, context, identity))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => Ok(GuardDecision::Continue),
            Ok(Err(err)) => {
                debug!(ip = %context.ip, path = %request.path, "custom check rejected: {}", err);
                Ok(self.deny(request, context, identity))
            }
            Err(_) => {
                warn!(ip = %context.ip, path = %request.path, "custom check panicked");
                Ok(self.deny(request, context, identity))
            }
        }
    }
}
