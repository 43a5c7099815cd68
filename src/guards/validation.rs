//! # Request Validation Guard
//!
//! First line of the chain: attack-signature screening of the path, query,
//! and user agent. Patterns are compiled once at first use.
//!
//! Public routes get leniency for scanner user agents (logged and allowed,
//! since crawlers hit public pages constantly), but malformed or
//! signature-matching paths are denied regardless of policy.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::error::{GuardError, GuardResult};
use crate::core::types::{
    GuardResponse, Identity, ProtectedRequest, RequestContext, ResolvedPolicy, SecurityLevel,
};
use crate::guards::{Guard, GuardDecision};
use crate::observability::metrics::MetricsCollector;
use crate::security::events::{SecurityEvent, SecurityEventKind, SecurityEventTracker};

static ATTACK_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // path traversal, raw and percent-encoded
        r"\.\./",
        r"(?i)%2e%2e%2f",
        r"(?i)%2e%2e/",
        // script injection markers
        r"(?i)<script",
        r"(?i)javascript:",
        r"(?i)on\w+\s*=",
        // SQL injection markers
        r"(?i)union\s+select",
        r"(?i)'\s*or\s+'?1'?\s*=\s*'?1",
        r"(?i);\s*drop\s+table",
        // null bytes
        r"%00",
        r"\x00",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("attack pattern must compile"))
    .collect()
});

const SCANNER_AGENTS: &[&str] = &[
    "sqlmap", "nikto", "nmap", "masscan", "nessus", "openvas", "acunetix", "dirbuster", "gobuster",
    "wpscan",
];

pub struct ValidationGuard {
    tracker: Arc<SecurityEventTracker>,
    metrics: Arc<MetricsCollector>,
}

impl ValidationGuard {
    pub fn new(tracker: Arc<SecurityEventTracker>, metrics: Arc<MetricsCollector>) -> Self {
        Self { tracker, metrics }
    }

    fn matches_signature(candidate: &str) -> bool {
        ATTACK_PATTERNS.iter().any(|pattern| pattern.is_match(candidate))
    }

    fn scanner_agent(user_agent: &str) -> Option<&'static str> {
        let lowered = user_agent.to_ascii_lowercase();
        SCANNER_AGENTS
            .iter()
            .find(|agent| lowered.contains(**agent))
            .copied()
    }
}

#[async_trait]
impl Guard for ValidationGuard {
    fn name(&self) -> &'static str {
        "validation"
    }

    async fn evaluate(
        &self,
        request: &ProtectedRequest,
        context: &RequestContext,
        identity: Option<&Identity>,
        policy: &ResolvedPolicy,
    ) -> GuardResult<GuardDecision> {
        let mut candidates = vec![request.path.as_str()];
        if let Some(query) = request.query.as_deref() {
            candidates.push(query);
        }
        let user_agent = request.user_agent();
        if !user_agent.is_empty() {
            candidates.push(user_agent);
        }

        for candidate in candidates {
            if Self::matches_signature(candidate) {
                warn!(
                    ip = %context.ip,
                    path = %request.path,
                    "request matched attack signature"
                );
                let mut event = SecurityEvent::new(
                    SecurityEventKind::MaliciousPayload,
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
                    .record_security_event(SecurityEventKind::MaliciousPayload);

                let error = GuardError::validation("request contains disallowed content");
                return Ok(GuardDecision::Deny(GuardResponse::api_error(&error)));
            }
        }

        if let Some(agent) = Self::scanner_agent(request.user_agent()) {
            let promoted = self.tracker.record(
                SecurityEvent::new(
                    SecurityEventKind::ScannerProbe,
                    context.ip,
                    request.path.clone(),
                )
                .with_details(serde_json::json!({ "scanner": agent })),
            );
            if promoted {
                self.metrics.record_suspicious_ip();
            }
            self.metrics
                .record_security_event(SecurityEventKind::ScannerProbe);

            // scanners crawl public pages constantly; suspicion tracking is
            // enough there, protected routes deny outright
            if policy.policy.security_level == SecurityLevel::Public {
                debug!(ip = %context.ip, scanner = agent, "scanner probe on public route");
            } else {
                let error = GuardError::validation("request rejected");
                return Ok(GuardDecision::Deny(GuardResponse::api_error(&error)));
            }
        }

        Ok(GuardDecision::Continue)
    }
}
