//! Structured logging setup and the request log line.
//!
//! Sensitive header values never reach a log sink; the redaction list comes
//! from configuration and defaults to the credential-bearing headers.

use axum::http::{HeaderMap, StatusCode};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::core::config::LoggingConfig;
use crate::core::types::RequestContext;

/// Install the global tracing subscriber from config.
///
/// `RUST_LOG` wins over the configured level so operators can raise
/// verbosity without a config change.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Copy headers with configured sensitive values replaced by a placeholder
pub fn redact_headers(headers: &HeaderMap, redact: &[String]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_str = name.as_str().to_string();
            let redacted = redact.iter().any(|r| r.eq_ignore_ascii_case(&name_str));
            let value = if redacted {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[binary]").to_string()
            };
            (name_str, value)
        })
        .collect()
}

/// Zero the host part of an address: the last octet for IPv4, the low 64
/// bits for IPv6.
pub fn anonymize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => {
            let mut octets = v4.octets();
            octets[3] = 0;
            IpAddr::from(octets)
        }
        IpAddr::V6(v6) => {
            let mut segments = v6.segments();
            segments[4] = 0;
            segments[5] = 0;
            segments[6] = 0;
            segments[7] = 0;
            IpAddr::from(segments)
        }
    }
}

/// Per-request log emission honoring the exclusion and anonymization config
pub struct RequestLogger {
    config: LoggingConfig,
}

impl RequestLogger {
    pub fn new(config: LoggingConfig) -> Self {
        Self { config }
    }

    fn display_ip(&self, ip: IpAddr) -> IpAddr {
        if self.config.anonymize_ips {
            anonymize_ip(ip)
        } else {
            ip
        }
    }

    /// Debug-level header dump for denied requests, with sensitive values
    /// redacted
    pub fn log_denied_headers(&self, context: &RequestContext, headers: &HeaderMap) {
        if tracing::enabled!(tracing::Level::DEBUG) {
            let redacted = redact_headers(headers, &self.config.redact_headers);
            tracing::debug!(
                request_id = %context.request_id,
                headers = ?redacted,
                "denied request headers"
            );
        }
    }

    /// One line per completed request, leveled by outcome
    pub fn log_request(
        &self,
        context: &RequestContext,
        method: &str,
        path: &str,
        status: StatusCode,
        elapsed: Duration,
    ) {
        if self.config.exclude_paths.iter().any(|p| p == path) {
            return;
        }
        let ip = self.display_ip(context.ip);
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

        if status.is_server_error() {
            error!(
                request_id = %context.request_id,
                %ip, method, path, status = status.as_u16(), elapsed_ms,
                "request failed"
            );
        } else if status.is_client_error() {
            warn!(
                request_id = %context.request_id,
                %ip, method, path, status = status.as_u16(), elapsed_ms,
                "request denied"
            );
        } else {
            info!(
                request_id = %context.request_id,
                %ip, method, path, status = status.as_u16(), elapsed_ms,
                "request completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_redaction_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Bearer secret"));
        headers.insert("accept", HeaderValue::from_static("application/json"));

        let redact = vec!["authorization".to_string()];
        let logged = redact_headers(&headers, &redact);

        let auth = logged.iter().find(|(n, _)| n == "authorization").unwrap();
        assert_eq!(auth.1, "[REDACTED]");
        let accept = logged.iter().find(|(n, _)| n == "accept").unwrap();
        assert_eq!(accept.1, "application/json");
    }

    #[test]
    fn test_anonymize_v4_zeroes_last_octet() {
        let ip: IpAddr = "203.0.113.77".parse().unwrap();
        assert_eq!(anonymize_ip(ip), "203.0.113.0".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_anonymize_v6_zeroes_low_bits() {
        let ip: IpAddr = "2001:db8:1:2:3:4:5:6".parse().unwrap();
        assert_eq!(
            anonymize_ip(ip),
            "2001:db8:1:2::".parse::<IpAddr>().unwrap()
        );
    }
}
