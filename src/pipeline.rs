//! # Protection Pipeline
//!
//! The orchestrator: extracts the request context, resolves identity and the
//! route policy once, then runs the guard chain in a fixed order. The first
//! denying guard ends the request; later guards never run, so a request
//! denied for rate limiting is not also charged with a CSRF violation.
//!
//! Guard failures and panics are contained at this boundary: the client sees
//! a generic 500 with the baseline headers, never a stack trace.
//!
//! Chain order:
//!
//! 1. validation (attack signatures, scanner agents)
//! 2. IP restriction (lists and suspicion)
//! 3. method allow-list
//! 4. payload size
//! 5. rate limiting
//! 6. authentication
//! 7. authorization
//! 8. CSRF
//! 9. API key
//! 10. custom check
//!
//! Sanitization runs after the chain, on allowed requests only.

use axum::http::{HeaderMap, HeaderValue};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::core::config::GatekeeperConfig;
use crate::core::context::RequestContextExtractor;
use crate::core::error::GuardError;
use crate::core::types::{
    GuardResponse, Identity, ProtectedRequest, RequestContext, ResolvedPolicy,
};
use crate::guards::{
    sanitize_json, ApiKeyGuard, AuthenticationGuard, AuthorizationGuard, CsrfGuard,
    CustomCheckGuard, Guard, GuardDecision, IpRestrictionGuard, MethodGuard, PayloadSizeGuard,
    RateLimitGuard, ValidationGuard,
};
use crate::identity::providers::{IdentityProvider, ProfileStore};
use crate::identity::resolver::IdentityResolver;
use crate::observability::metrics::MetricsCollector;
use crate::routing::resolver::RouteConfigResolver;
use crate::security::alerts::AlertDispatcher;
use crate::security::events::{SecurityEvent, SecurityEventKind, SecurityEventTracker};
use crate::store::rate_limit::RateLimiter;
use crate::store::KeyValueStore;

/// Terminal outcome of running the pipeline on one request
#[derive(Debug)]
pub enum PipelineVerdict {
    /// Every guard passed; the (possibly sanitized) request may proceed
    Allowed {
        request: ProtectedRequest,
        context: RequestContext,
        identity: Option<Identity>,
        policy: ResolvedPolicy,
    },

    /// A guard denied the request with this terminal response
    Denied {
        context: RequestContext,
        response: GuardResponse,
    },
}

pub struct Pipeline {
    extractor: RequestContextExtractor,
    identity_resolver: IdentityResolver,
    route_resolver: RouteConfigResolver,
    guards: Vec<Arc<dyn Guard>>,
    csrf: Arc<CsrfGuard>,
    tracker: Arc<SecurityEventTracker>,
    metrics: Arc<MetricsCollector>,
    sanitize_all: bool,
}

impl Pipeline {
    /// Assemble the full guard chain from configuration and the pluggable
    /// backends.
    pub fn new(
        config: &GatekeeperConfig,
        provider: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileStore>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let alerts = AlertDispatcher::new(&config.monitoring);
        let metrics = Arc::new(MetricsCollector::new(config.monitoring.clone(), alerts));
        let tracker = Arc::new(SecurityEventTracker::new(&config.tracking));
        let limiter = Arc::new(RateLimiter::new(store));

        let csrf = Arc::new(CsrfGuard::new(
            config.csrf.clone(),
            Arc::clone(&tracker),
            Arc::clone(&metrics),
        ));

        let guards: Vec<Arc<dyn Guard>> = vec![
            Arc::new(ValidationGuard::new(
                Arc::clone(&tracker),
                Arc::clone(&metrics),
            )),
            Arc::new(IpRestrictionGuard::new(
                Arc::clone(&tracker),
                Arc::clone(&metrics),
            )),
            Arc::new(MethodGuard),
            Arc::new(PayloadSizeGuard::new(config.defaults.max_body_bytes)),
            Arc::new(RateLimitGuard::new(
                limiter,
                config.rate_limits.clone(),
                Arc::clone(&tracker),
                Arc::clone(&metrics),
            )),
            Arc::new(AuthenticationGuard::new(
                config.identity.clone(),
                config.defaults.clone(),
                Arc::clone(&tracker),
                Arc::clone(&metrics),
            )),
            Arc::new(AuthorizationGuard::new(
                Arc::clone(&tracker),
                Arc::clone(&metrics),
            )),
            Arc::clone(&csrf) as Arc<dyn Guard>,
            Arc::new(ApiKeyGuard::new(
                config.api_keys.clone(),
                Arc::clone(&tracker),
                Arc::clone(&metrics),
            )),
            Arc::new(CustomCheckGuard::new(
                Arc::clone(&tracker),
                Arc::clone(&metrics),
            )),
        ];

        Self {
            extractor: RequestContextExtractor::new(),
            identity_resolver: IdentityResolver::new(provider, profiles, config.identity.clone()),
            route_resolver: RouteConfigResolver::new(config),
            guards,
            csrf,
            tracker,
            metrics,
            sanitize_all: false,
        }
    }

    pub fn tracker(&self) -> &Arc<SecurityEventTracker> {
        &self.tracker
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// The CSRF guard, for token issuance at login and form render time
    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }

    /// Attach a custom check to a configured policy pattern
    pub fn set_custom_check(
        &mut self,
        pattern: &str,
        check: Arc<dyn crate::core::types::CustomCheck>,
    ) {
        self.route_resolver.set_custom_check(pattern, check);
    }

    /// Sanitize every structured body, not only routes that opt in
    pub fn sanitize_all_bodies(mut self, enabled: bool) -> Self {
        self.sanitize_all = enabled;
        self
    }

    /// Headers stamped on every response that leaves the pipeline
    pub fn baseline_headers(context: &RequestContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&context.request_id) {
            headers.insert("x-request-id", value);
        }
        headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
        headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
        headers
    }

    fn finalize(context: &RequestContext, mut response: GuardResponse) -> GuardResponse {
        for (name, value) in Self::baseline_headers(context).iter() {
            response.headers.entry(name.clone()).or_insert(value.clone());
        }
        response
    }

    /// Denial used when a guard itself failed or panicked
    fn internal_denial(
        &self,
        guard_name: &str,
        context: &RequestContext,
        request: &ProtectedRequest,
    ) -> GuardResponse {
        if self
            .tracker
            .record(SecurityEvent::new(
                SecurityEventKind::MalformedRequest,
                context.ip,
                request.path.clone(),
            ))
        {
            self.metrics.record_suspicious_ip();
        }
        self.metrics.record_error();

        let error = GuardError::internal(format!("guard {} failed", guard_name));
        Self::finalize(context, GuardResponse::api_error(&error))
    }

    /// Run the chain on one request
    pub async fn process(&self, mut request: ProtectedRequest) -> PipelineVerdict {
        let context = self.extractor.extract(&request);
        let identity = self.identity_resolver.resolve(&request).await;
        let policy = self.route_resolver.resolve(&request.path);

        debug!(
            request_id = %context.request_id,
            path = %request.path,
            source = ?policy.source,
            authenticated = identity.is_some(),
            "pipeline start"
        );

        for guard in &self.guards {
            let evaluation = AssertUnwindSafe(guard.evaluate(
                &request,
                &context,
                identity.as_ref(),
                &policy,
            ))
            .catch_unwind()
            .await;

            match evaluation {
                Ok(Ok(GuardDecision::Continue)) => {}
                Ok(Ok(GuardDecision::Deny(response))) => {
                    info!(
                        request_id = %context.request_id,
                        guard = guard.name(),
                        status = response.status.as_u16(),
                        path = %request.path,
                        "request denied"
                    );
                    return PipelineVerdict::Denied {
                        response: Self::finalize(&context, response),
                        context,
                    };
                }
                Ok(Err(err)) => {
                    error!(
                        request_id = %context.request_id,
                        guard = guard.name(),
                        "guard failed: {}",
                        err
                    );
                    return PipelineVerdict::Denied {
                        response: self.internal_denial(guard.name(), &context, &request),
                        context,
                    };
                }
                Err(panic) => {
                    let detail = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic".to_string());
                    error!(
                        request_id = %context.request_id,
                        guard = guard.name(),
                        "guard panicked: {}",
                        detail
                    );
                    return PipelineVerdict::Denied {
                        response: self.internal_denial(guard.name(), &context, &request),
                        context,
                    };
                }
            }
        }

        if policy.policy.sanitize_input || self.sanitize_all {
            if let Some(body) = request.body.as_mut() {
                if sanitize_json(body) {
                    debug!(
                        request_id = %context.request_id,
                        path = %request.path,
                        "request body sanitized"
                    );
                }
            }
        }

        PipelineVerdict::Allowed {
            request,
            context,
            identity,
            policy,
        }
    }
}
