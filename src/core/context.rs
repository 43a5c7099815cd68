//! # Request Context Extraction
//!
//! Derives the per-request [`RequestContext`] from a raw inbound request:
//! best-effort client IP, user-agent classification, and a unique request id.
//! Extraction never fails — a context is always produced, with geo fields
//! absent when no lookup source is wired in.

use chrono::Utc;
use std::net::IpAddr;
use uuid::Uuid;

use crate::core::types::{ProtectedRequest, RequestContext};

/// Client IP header precedence, most trusted first. The edge header is set
/// by the CDN and cannot be spoofed past it; forwarded-for is last because
/// clients can prepend arbitrary entries.
const IP_HEADERS: &[&str] = &["cf-connecting-ip", "x-real-ip", "x-forwarded-for"];

/// User-agent substrings identifying automated clients
const BOT_PATTERNS: &[&str] = &[
    "bot", "crawler", "spider", "scraper", "curl", "wget", "python-requests", "httpclient",
    "headless",
];

/// User-agent substrings identifying mobile browsers
const MOBILE_PATTERNS: &[&str] = &[
    "mobile", "android", "iphone", "ipad", "ipod", "windows phone", "opera mini",
];

/// Derives a [`RequestContext`] from the raw request
#[derive(Debug, Clone, Default)]
pub struct RequestContextExtractor;

impl RequestContextExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Build the context for one request. Infallible by contract.
    pub fn extract(&self, request: &ProtectedRequest) -> RequestContext {
        let user_agent = request.user_agent().to_string();
        let ua_lower = user_agent.to_lowercase();

        RequestContext {
            ip: self.client_ip(request),
            is_bot: BOT_PATTERNS.iter().any(|p| ua_lower.contains(p)),
            is_mobile: MOBILE_PATTERNS.iter().any(|p| ua_lower.contains(p)),
            user_agent,
            country: None,
            city: None,
            timestamp: Utc::now(),
            request_id: Uuid::new_v4().to_string(),
        }
    }

    /// Resolve the client IP: trusted edge header, then real-ip, then the
    /// first forwarded-for entry, then the transport peer address.
    fn client_ip(&self, request: &ProtectedRequest) -> IpAddr {
        for header in IP_HEADERS {
            if let Some(value) = request.header(header) {
                // forwarded-for may be a comma-separated chain; the first
                // entry is the original client
                let candidate = value.split(',').next().unwrap_or(value).trim();
                if let Ok(ip) = candidate.parse::<IpAddr>() {
                    return ip;
                }
            }
        }
        request
            .peer_addr
            .map(|addr| addr.ip())
            .unwrap_or(IpAddr::from([0, 0, 0, 0]))
    }
}
