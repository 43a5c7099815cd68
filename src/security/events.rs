//! # Security Event Tracking
//!
//! Append-only per-IP log of denial-worthy occurrences with time decay.
//! Recording an event prunes entries older than the retention horizon and
//! then re-evaluates the IP's suspicion status: more retained events than the
//! threshold marks it suspicious, and falling back under the threshold clears
//! it. Cleanup is lazy — aged events only drop out when that IP records again
//! or when the periodic maintenance sweep runs.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::config::TrackingConfig;

/// Categories of recorded security events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    RateLimitExceeded,
    CsrfViolation,
    AuthenticationFailure,
    AuthorizationFailure,
    MaliciousPayload,
    ScannerProbe,
    IpBlocked,
    ApiKeyRejected,
    CustomCheckFailure,
    MalformedRequest,
}

impl fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::CsrfViolation => "csrf_violation",
            Self::AuthenticationFailure => "authentication_failure",
            Self::AuthorizationFailure => "authorization_failure",
            Self::MaliciousPayload => "malicious_payload",
            Self::ScannerProbe => "scanner_probe",
            Self::IpBlocked => "ip_blocked",
            Self::ApiKeyRejected => "api_key_rejected",
            Self::CustomCheckFailure => "custom_check_failure",
            Self::MalformedRequest => "malformed_request",
        };
        write!(f, "{}", tag)
    }
}

/// Severity attached to each event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// One recorded denial-worthy occurrence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub timestamp: DateTime<Utc>,
    pub ip: IpAddr,
    pub user_id: Option<String>,
    pub route: String,
    pub severity: Severity,
    pub details: serde_json::Value,
}

impl SecurityEvent {
    pub fn new(kind: SecurityEventKind, ip: IpAddr, route: impl Into<String>) -> Self {
        let severity = match kind {
            SecurityEventKind::MaliciousPayload | SecurityEventKind::CsrfViolation => {
                Severity::High
            }
            SecurityEventKind::IpBlocked | SecurityEventKind::ScannerProbe => Severity::Medium,
            SecurityEventKind::MalformedRequest => Severity::Critical,
            _ => Severity::Low,
        };
        Self {
            kind,
            timestamp: Utc::now(),
            ip,
            user_id: None,
            route: route.into(),
            severity,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Per-IP event log with suspicion promotion
pub struct SecurityEventTracker {
    events: DashMap<IpAddr, Vec<SecurityEvent>>,
    suspicious: DashSet<IpAddr>,
    retention: ChronoDuration,
    threshold: usize,
}

impl SecurityEventTracker {
    pub fn new(config: &TrackingConfig) -> Self {
        Self {
            events: DashMap::new(),
            suspicious: DashSet::new(),
            retention: ChronoDuration::from_std(config.retention)
                .unwrap_or_else(|_| ChronoDuration::hours(24)),
            threshold: config.suspicion_threshold,
        }
    }

    /// Append an event, prune aged entries for that IP, and re-evaluate its
    /// suspicion status. Returns whether this record promoted the IP to
    /// suspicious.
    pub fn record(&self, event: SecurityEvent) -> bool {
        let ip = event.ip;
        let horizon = Utc::now() - self.retention;

        let retained = {
            let mut entry = self.events.entry(ip).or_default();
            entry.push(event);
            entry.retain(|e| e.timestamp > horizon);
            entry.len()
        };

        if retained > self.threshold {
            let promoted = self.suspicious.insert(ip);
            if promoted {
                warn!(%ip, retained, "IP promoted to suspicious");
            }
            promoted
        } else {
            if self.suspicious.remove(&ip).is_some() {
                debug!(%ip, retained, "IP suspicion cleared by event aging");
            }
            false
        }
    }

    /// Pure membership check used by the IP restriction guard
    pub fn is_suspicious(&self, ip: IpAddr) -> bool {
        self.suspicious.contains(&ip)
    }

    /// Number of currently suspicious IPs
    pub fn suspicious_count(&self) -> usize {
        self.suspicious.len()
    }

    /// Retained (unpruned) event count for an IP
    pub fn event_count(&self, ip: IpAddr) -> usize {
        self.events.get(&ip).map(|e| e.len()).unwrap_or(0)
    }

    /// Operator clearing: drop the IP's events and its suspicious flag
    pub fn clear(&self, ip: IpAddr) {
        self.events.remove(&ip);
        self.suspicious.remove(&ip);
    }

    /// Prune every IP's aged events and demote IPs that fall under the
    /// threshold. Intended for the periodic maintenance task.
    pub fn maintenance_sweep(&self) {
        let horizon = Utc::now() - self.retention;
        self.events.retain(|ip, events| {
            events.retain(|e| e.timestamp > horizon);
            if events.len() <= self.threshold {
                self.suspicious.remove(ip);
            }
            !events.is_empty()
        });
    }

    /// Spawn the periodic maintenance sweep on the runtime
    pub fn spawn_maintenance(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                tracker.maintenance_sweep();
            }
        })
    }
}
