//! # Metrics Collection
//!
//! Process-wide aggregate counters for the protection pipeline: request
//! volumes keyed by status, route, and method; authentication outcomes;
//! security counters; and a rolling average of response time over the last N
//! samples. The aggregate only resets on explicit operator action.
//!
//! Threshold alerting is one-shot: each configured threshold fires a single
//! alert when first crossed and re-arms on reset, so a sustained incident
//! does not flood the webhook.

use axum::http::{Method, StatusCode};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::core::config::MonitoringConfig;
use crate::security::alerts::{Alert, AlertDispatcher};
use crate::security::events::SecurityEventKind;

/// Aggregated pipeline metrics
pub struct MetricsCollector {
    // request counters
    requests_total: AtomicU64,
    by_status: DashMap<u16, u64>,
    by_route: DashMap<String, u64>,
    by_method: DashMap<String, u64>,

    // authentication counters
    auth_success: AtomicU64,
    auth_failure: AtomicU64,
    auth_refresh: AtomicU64,

    // security counters
    rate_limit_violations: AtomicU64,
    suspicious_ips: AtomicU64,
    blocked_ips: AtomicU64,
    csrf_violations: AtomicU64,

    // performance
    latency_samples: Mutex<VecDeque<f64>>,
    slow_requests: AtomicU64,
    errors: AtomicU64,

    // one-shot alert arming
    auth_alert_fired: AtomicBool,
    rate_limit_alert_fired: AtomicBool,
    suspicious_alert_fired: AtomicBool,

    config: MonitoringConfig,
    alerts: AlertDispatcher,
}

impl MetricsCollector {
    pub fn new(config: MonitoringConfig, alerts: AlertDispatcher) -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            by_status: DashMap::new(),
            by_route: DashMap::new(),
            by_method: DashMap::new(),
            auth_success: AtomicU64::new(0),
            auth_failure: AtomicU64::new(0),
            auth_refresh: AtomicU64::new(0),
            rate_limit_violations: AtomicU64::new(0),
            suspicious_ips: AtomicU64::new(0),
            blocked_ips: AtomicU64::new(0),
            csrf_violations: AtomicU64::new(0),
            latency_samples: Mutex::new(VecDeque::new()),
            slow_requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            auth_alert_fired: AtomicBool::new(false),
            rate_limit_alert_fired: AtomicBool::new(false),
            suspicious_alert_fired: AtomicBool::new(false),
            config,
            alerts,
        }
    }

    /// Record one completed request
    pub fn record_request(
        &self,
        status: StatusCode,
        route: &str,
        method: &Method,
        elapsed: Duration,
    ) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        *self.by_status.entry(status.as_u16()).or_insert(0) += 1;
        *self.by_route.entry(route.to_string()).or_insert(0) += 1;
        *self.by_method.entry(method.to_string()).or_insert(0) += 1;

        let millis = elapsed.as_secs_f64() * 1000.0;
        {
            let mut samples = self.latency_samples.lock();
            samples.push_back(millis);
            while samples.len() > self.config.latency_samples.max(1) {
                samples.pop_front();
            }
        }
        if elapsed > self.config.slow_request_threshold {
            self.slow_requests.fetch_add(1, Ordering::Relaxed);
        }
        if status.is_server_error() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_auth_success(&self) {
        self.auth_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auth_failure(&self) {
        let count = self.auth_failure.fetch_add(1, Ordering::Relaxed) + 1;
        self.maybe_alert(
            &self.auth_alert_fired,
            count,
            self.config.auth_failure_threshold,
            "auth_failures",
            "authentication failure count crossed threshold",
        );
    }

    pub fn record_auth_refresh(&self) {
        self.auth_refresh.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the typed counter for a recorded security event
    pub fn record_security_event(&self, kind: SecurityEventKind) {
        match kind {
            SecurityEventKind::RateLimitExceeded => {
                let count = self.rate_limit_violations.fetch_add(1, Ordering::Relaxed) + 1;
                self.maybe_alert(
                    &self.rate_limit_alert_fired,
                    count,
                    self.config.rate_limit_violation_threshold,
                    "rate_limit_violations",
                    "rate limit violation count crossed threshold",
                );
            }
            SecurityEventKind::CsrfViolation => {
                self.csrf_violations.fetch_add(1, Ordering::Relaxed);
            }
            SecurityEventKind::AuthenticationFailure => self.record_auth_failure(),
            SecurityEventKind::IpBlocked => {
                self.blocked_ips.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                // remaining kinds only feed the event tracker
            }
        }
    }

    /// Note an IP promotion to suspicious, with threshold alerting
    pub fn record_suspicious_ip(&self) {
        let count = self.suspicious_ips.fetch_add(1, Ordering::Relaxed) + 1;
        self.maybe_alert(
            &self.suspicious_alert_fired,
            count,
            self.config.suspicious_ip_threshold,
            "suspicious_ips",
            "suspicious IP count crossed threshold",
        );
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn maybe_alert(
        &self,
        fired: &AtomicBool,
        value: u64,
        threshold: u64,
        kind: &str,
        message: &str,
    ) {
        if threshold == 0 || value < threshold {
            return;
        }
        // compare_exchange makes the alert one-shot under concurrency
        if fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.alerts
                .dispatch(Alert::new(kind, message, value, threshold));
        }
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        let samples = self.latency_samples.lock();
        let avg_response_time_ms = if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<f64>() / samples.len() as f64
        };

        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_by_status: self
                .by_status
                .iter()
                .map(|e| (*e.key(), *e.value()))
                .collect(),
            requests_by_route: self
                .by_route
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            requests_by_method: self
                .by_method
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            auth_success: self.auth_success.load(Ordering::Relaxed),
            auth_failure: self.auth_failure.load(Ordering::Relaxed),
            auth_refresh: self.auth_refresh.load(Ordering::Relaxed),
            rate_limit_violations: self.rate_limit_violations.load(Ordering::Relaxed),
            suspicious_ips: self.suspicious_ips.load(Ordering::Relaxed),
            blocked_ips: self.blocked_ips.load(Ordering::Relaxed),
            csrf_violations: self.csrf_violations.load(Ordering::Relaxed),
            avg_response_time_ms,
            slow_requests: self.slow_requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    /// Operator reset: zero every counter and re-arm threshold alerts
    pub fn reset(&self) {
        self.requests_total.store(0, Ordering::Relaxed);
        self.by_status.clear();
        self.by_route.clear();
        self.by_method.clear();
        self.auth_success.store(0, Ordering::Relaxed);
        self.auth_failure.store(0, Ordering::Relaxed);
        self.auth_refresh.store(0, Ordering::Relaxed);
        self.rate_limit_violations.store(0, Ordering::Relaxed);
        self.suspicious_ips.store(0, Ordering::Relaxed);
        self.blocked_ips.store(0, Ordering::Relaxed);
        self.csrf_violations.store(0, Ordering::Relaxed);
        self.latency_samples.lock().clear();
        self.slow_requests.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.auth_alert_fired.store(false, Ordering::SeqCst);
        self.rate_limit_alert_fired.store(false, Ordering::SeqCst);
        self.suspicious_alert_fired.store(false, Ordering::SeqCst);
    }
}

/// Serializable point-in-time metrics view
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_by_status: HashMap<u16, u64>,
    pub requests_by_route: HashMap<String, u64>,
    pub requests_by_method: HashMap<String, u64>,
    pub auth_success: u64,
    pub auth_failure: u64,
    pub auth_refresh: u64,
    pub rate_limit_violations: u64,
    pub suspicious_ips: u64,
    pub blocked_ips: u64,
    pub csrf_violations: u64,
    pub avg_response_time_ms: f64,
    pub slow_requests: u64,
    pub errors: u64,
}
