//! # Configuration Module
//!
//! The full configuration surface for the protection pipeline: the route
//! policy table, rate-limit tiers, CSRF parameters, identity trust settings,
//! logging behavior, monitoring thresholds, and the API-key allow-set.
//!
//! Configuration is loaded once from YAML at startup; every section has a
//! sensible `Default` so a bare config file still yields a working pipeline.
//! Policies are keyed by path pattern in a `BTreeMap` so iteration order (and
//! therefore tie-breaking during pattern resolution) is deterministic.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use crate::core::error::{GuardError, GuardResult};
use crate::core::types::{RateLimitTier, RoutePolicy};

/// Top-level configuration for the protection pipeline
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatekeeperConfig {
    /// Path pattern -> protection policy table
    #[serde(default)]
    pub policies: BTreeMap<String, RoutePolicy>,

    /// Behavior when no policy matches a path
    #[serde(default)]
    pub defaults: DefaultProtectionConfig,

    /// Global and per-subject rate-limit tiers
    #[serde(default)]
    pub rate_limits: RateLimitTiersConfig,

    /// CSRF token parameters
    #[serde(default)]
    pub csrf: CsrfConfig,

    /// Identity resolution trust settings
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Security event tracking parameters
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Logging behavior
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Alerting thresholds and webhook settings
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// Accepted API keys for routes that require one
    #[serde(default)]
    pub api_keys: HashSet<String>,
}

impl GatekeeperConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> GuardResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GuardError::config(format!(
                "failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints that serde cannot express
    pub fn validate(&self) -> GuardResult<()> {
        if self.rate_limits.global.requests == 0 {
            return Err(GuardError::config("global rate limit must allow at least one request"));
        }
        if self.csrf.token_length < 16 {
            return Err(GuardError::config("CSRF token length below 16 bytes is too weak"));
        }
        if self.tracking.suspicion_threshold == 0 {
            return Err(GuardError::config("suspicion threshold must be positive"));
        }
        for pattern in self.policies.keys() {
            if !pattern.starts_with('/') {
                return Err(GuardError::config(format!(
                    "policy pattern must start with '/': {}",
                    pattern
                )));
            }
        }
        Ok(())
    }
}

/// Default protection applied when no policy matches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultProtectionConfig {
    /// Exact paths that are always public
    pub public_paths: Vec<String>,

    /// Path prefixes that are public (assets, auth callbacks)
    pub public_prefixes: Vec<String>,

    /// Where unauthenticated page navigations are redirected
    pub login_path: String,

    /// Global fallback cap on declared body size
    pub max_body_bytes: u64,
}

impl Default for DefaultProtectionConfig {
    fn default() -> Self {
        Self {
            public_paths: vec![
                "/".to_string(),
                "/login".to_string(),
                "/signup".to_string(),
                "/favicon.ico".to_string(),
                "/robots.txt".to_string(),
            ],
            public_prefixes: vec![
                "/assets/".to_string(),
                "/static/".to_string(),
                "/auth/callback".to_string(),
            ],
            login_path: "/login".to_string(),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Rate-limit tiers: the global tier applies to every request; the
/// authenticated tier, when set, replaces it for requests with an identity.
/// Route policies may carry their own tier which takes precedence over both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitTiersConfig {
    pub global: RateLimitTier,
    #[serde(default)]
    pub authenticated: Option<RateLimitTier>,
}

impl Default for RateLimitTiersConfig {
    fn default() -> Self {
        Self {
            global: RateLimitTier {
                requests: 300,
                window: Duration::from_secs(60),
            },
            authenticated: Some(RateLimitTier {
                requests: 600,
                window: Duration::from_secs(60),
            }),
        }
    }
}

/// CSRF token parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfConfig {
    /// Random token length in bytes, before base64 encoding
    pub token_length: usize,

    /// Cookie the issued token is stored in
    pub cookie_name: String,

    /// Header the inbound token is read from
    pub header_name: String,

    /// Query parameter fallback for the inbound token
    pub query_param: String,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            token_length: 32,
            cookie_name: "csrf-token".to_string(),
            header_name: "x-csrf-token".to_string(),
            query_param: "csrf_token".to_string(),
        }
    }
}

/// Identity resolution trust settings
///
/// Token verification is the only default trust source. Header trust is an
/// explicit opt-in for deployments where an upstream authentication proxy is
/// the sole ingress; enabling it disables token verification entirely so the
/// two sources can never be merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Trust `x-authenticated-*` headers instead of verifying tokens
    pub trust_upstream_headers: bool,

    /// Session staleness horizon
    #[serde(with = "humantime_serde")]
    pub session_timeout: Duration,

    /// Bound on the profile-store role lookup
    #[serde(with = "humantime_serde")]
    pub lookup_timeout: Duration,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            trust_upstream_headers: false,
            session_timeout: Duration::from_secs(24 * 3600),
            lookup_timeout: Duration::from_secs(2),
        }
    }
}

/// Security event tracking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// How long events count toward suspicion
    #[serde(with = "humantime_serde")]
    pub retention: Duration,

    /// Retained events above this count mark an IP suspicious
    pub suspicion_threshold: usize,

    /// Interval for the background maintenance sweep
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 3600),
            suspicion_threshold: 10,
            sweep_interval: Duration::from_secs(600),
        }
    }
}

/// Logging behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (tracing env-filter syntax)
    pub level: String,

    /// Emit JSON log lines instead of human-readable ones
    pub json: bool,

    /// Paths excluded from request logging (health checks and the like)
    pub exclude_paths: Vec<String>,

    /// Zero the host part of logged IPs for privacy-compliant environments
    pub anonymize_ips: bool,

    /// Headers redacted before any log emission
    pub redact_headers: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            exclude_paths: vec!["/health".to_string(), "/ready".to_string()],
            anonymize_ips: false,
            redact_headers: vec![
                "authorization".to_string(),
                "cookie".to_string(),
                "x-api-key".to_string(),
                "x-csrf-token".to_string(),
            ],
        }
    }
}

/// Alerting thresholds and webhook settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Alert sink URL; alerts are dropped (with a log line) when unset
    pub webhook_url: Option<String>,

    /// One-shot alert when failed auth count crosses this value
    pub auth_failure_threshold: u64,

    /// One-shot alert when rate-limit violations cross this value
    pub rate_limit_violation_threshold: u64,

    /// One-shot alert when the suspicious IP count crosses this value
    pub suspicious_ip_threshold: u64,

    /// Requests slower than this count as "slow"
    #[serde(with = "humantime_serde")]
    pub slow_request_threshold: Duration,

    /// Rolling window size for the average response time
    pub latency_samples: usize,

    /// Bound on each webhook delivery attempt
    #[serde(with = "humantime_serde")]
    pub webhook_timeout: Duration,

    /// Delivery attempts per alert before giving up
    pub webhook_retries: u32,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            auth_failure_threshold: 50,
            rate_limit_violation_threshold: 100,
            suspicious_ip_threshold: 5,
            slow_request_threshold: Duration::from_millis(1500),
            latency_samples: 256,
            webhook_timeout: Duration::from_secs(3),
            webhook_retries: 3,
        }
    }
}
