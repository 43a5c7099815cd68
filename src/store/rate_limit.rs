//! # Fixed-Window Rate Limiter
//!
//! Counts requests per `{scope}:{subject}` key over a fixed window. The
//! subject is the authenticated user id when present, otherwise the client
//! IP; the scope separates route-level tiers from the global tier so they
//! accumulate independently.
//!
//! The counter increments on every call, including calls that come back
//! limited — hammering a limited key keeps its window hot instead of letting
//! it drain.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::core::error::GuardResult;
use crate::core::types::RateLimitTier;
use crate::store::KeyValueStore;

/// Outcome of one rate-limit check
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    /// The budget was exceeded on this read
    pub limited: bool,

    /// Post-increment count inside the current window
    pub count: u32,

    /// Requests left in the window, clamped at zero
    pub remaining: u32,

    /// When the current window resets
    pub reset_at: DateTime<Utc>,

    /// The budget that applied
    pub limit: u32,
}

/// Windowed counter over a pluggable store
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Rate-limit key for a scope and subject
    pub fn key(scope: &str, subject: &str) -> String {
        format!("{}:{}", scope, subject)
    }

    /// Count this request against the tier and report the window state.
    ///
    /// `limited` is true exactly when the post-increment count exceeds the
    /// tier's budget, so the invariant "count above budget implies limited"
    /// holds on the same read that observed the count.
    pub async fn check(
        &self,
        scope: &str,
        subject: &str,
        tier: &RateLimitTier,
    ) -> GuardResult<RateLimitDecision> {
        let key = Self::key(scope, subject);
        let window = self.store.increment(&key, tier.window).await?;

        let count = u32::try_from(window.count).unwrap_or(u32::MAX);
        Ok(RateLimitDecision {
            limited: count > tier.requests,
            count,
            remaining: tier.requests.saturating_sub(count),
            reset_at: window.reset_at,
            limit: tier.requests,
        })
    }

    /// Operator reset for one subject's window
    pub async fn reset(&self, scope: &str, subject: &str) -> GuardResult<()> {
        self.store.remove(&Self::key(scope, subject)).await
    }
}
