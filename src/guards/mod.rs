//! # Guard Chain
//!
//! Every guard sees the same immutable inputs (request, context, optional
//! identity, resolved policy) and returns either `Continue` or a terminal
//! `Deny` response. Guards never mutate the request; the sanitization step
//! that runs after the chain is the only component allowed to rewrite a body.

use async_trait::async_trait;

use crate::core::error::GuardResult;
use crate::core::types::{GuardResponse, Identity, ProtectedRequest, RequestContext, ResolvedPolicy};

pub mod api_key;
pub mod auth;
pub mod csrf;
pub mod custom;
pub mod ip_restriction;
pub mod method_size;
pub mod rate_limit;
pub mod sanitize;
pub mod validation;

pub use api_key::ApiKeyGuard;
pub use auth::{AuthenticationGuard, AuthorizationGuard};
pub use csrf::CsrfGuard;
pub use custom::CustomCheckGuard;
pub use ip_restriction::IpRestrictionGuard;
pub use method_size::{MethodGuard, PayloadSizeGuard};
pub use rate_limit::RateLimitGuard;
pub use sanitize::sanitize_json;
pub use validation::ValidationGuard;

/// Outcome of one guard evaluation
#[derive(Debug)]
pub enum GuardDecision {
    /// Hand the request to the next guard in the chain
    Continue,

    /// Stop the chain and answer with this response
    Deny(GuardResponse),
}

/// One step in the protection chain
///
/// Returning `Err` means the guard itself failed (not that the request was
/// denied); the orchestrator converts guard failures into generic internal
/// errors without exposing detail.
#[async_trait]
pub trait Guard: Send + Sync {
    /// Stable name for log lines
    fn name(&self) -> &'static str;

    async fn evaluate(
        &self,
        request: &ProtectedRequest,
        context: &RequestContext,
        identity: Option<&Identity>,
        policy: &ResolvedPolicy,
    ) -> GuardResult<GuardDecision>;
}
