//! # Error Handling Module
//!
//! This module defines the error taxonomy for the protection pipeline using the
//! `thiserror` crate. Every guard denial and internal failure maps onto one of
//! these variants, and each variant carries a fixed HTTP status code so that
//! the response a client sees is determined by the error type alone.
//!
//! A denial is not an exceptional condition here — it is the normal output of
//! a guard that found something wrong with a request. The pipeline converts
//! these errors into terminal responses; unexpected errors are caught at the
//! orchestrator boundary and collapsed into a generic internal error that
//! never leaks details to the caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::convert::Infallible;
use thiserror::Error;

/// Main result type used throughout the pipeline
pub type GuardResult<T> = Result<T, GuardError>;

/// Error taxonomy for the protection pipeline
///
/// Each variant represents a distinct denial category with a fixed HTTP
/// status mapping. The `#[error("...")]` attribute from `thiserror`
/// implements `Display` with the given message.
#[derive(Debug, Error, Clone)]
pub enum GuardError {
    /// Request matched an attack signature or failed input validation (400)
    #[error("Request validation failed: {reason}")]
    Validation { reason: String },

    /// No identity could be resolved for a route that requires one (401)
    #[error("Authentication required: {reason}")]
    AuthenticationRequired { reason: String },

    /// Resolved identity lacks the role or permission the route demands (403)
    #[error("Insufficient permissions: {reason}")]
    InsufficientPermissions { reason: String },

    /// CSRF token missing or mismatched on a state-changing request (403)
    #[error("CSRF validation failed: {reason}")]
    CsrfViolation { reason: String },

    /// IP address blocked by policy lists or suspicion tracking (403)
    #[error("Access denied for {ip}: {reason}")]
    IpBlocked { ip: String, reason: String },

    /// API key missing or not in the configured allow-set (403)
    #[error("API key rejected: {reason}")]
    ApiKeyRejected { reason: String },

    /// HTTP method not in the route's allow-list (405)
    #[error("Method {method} not allowed")]
    MethodNotAllowed { method: String },

    /// Declared content length exceeds the route's body cap (413)
    #[error("Payload of {declared} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { declared: u64, limit: u64 },

    /// Fixed-window rate limit exhausted for the request's subject (429)
    #[error("Rate limit exceeded: {limit} requests per {window_secs}s")]
    RateLimitExceeded { limit: u32, window_secs: u64 },

    /// Configuration errors (invalid policy table, bad YAML, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Unexpected internal failures; never shown verbatim to clients (500)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GuardError {
    /// Create a validation error with a custom reason
    pub fn validation<S: Into<String>>(reason: S) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Create an authentication-required error
    pub fn unauthenticated<S: Into<String>>(reason: S) -> Self {
        Self::AuthenticationRequired {
            reason: reason.into(),
        }
    }

    /// Create an insufficient-permissions error
    pub fn forbidden<S: Into<String>>(reason: S) -> Self {
        Self::InsufficientPermissions {
            reason: reason.into(),
        }
    }

    /// Create a CSRF violation error
    pub fn csrf<S: Into<String>>(reason: S) -> Self {
        Self::CsrfViolation {
            reason: reason.into(),
        }
    }

    /// Create an IP-blocked error
    pub fn ip_blocked<S: Into<String>>(ip: S, reason: S) -> Self {
        Self::IpBlocked {
            ip: ip.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::AuthenticationRequired { .. } => StatusCode::UNAUTHORIZED,
            Self::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            Self::CsrfViolation { .. } => StatusCode::FORBIDDEN,
            Self::IpBlocked { .. } => StatusCode::FORBIDDEN,
            Self::ApiKeyRejected { .. } => StatusCode::FORBIDDEN,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a stable string tag for API error bodies
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::AuthenticationRequired { .. } => "authentication_required",
            Self::InsufficientPermissions { .. } => "insufficient_permissions",
            Self::CsrfViolation { .. } => "csrf_violation",
            Self::IpBlocked { .. } => "access_denied",
            Self::ApiKeyRejected { .. } => "api_key_rejected",
            Self::MethodNotAllowed { .. } => "method_not_allowed",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::Configuration { .. } => "configuration_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Whether this error is worth a security event on top of the denial
    ///
    /// Method and size rejections are routine protocol hygiene; the rest
    /// indicate a client doing something denial-worthy.
    pub fn is_security_relevant(&self) -> bool {
        !matches!(
            self,
            Self::MethodNotAllowed { .. } | Self::PayloadTooLarge { .. }
        )
    }

    /// Client-facing message; internal errors are replaced with a fixed
    /// string so stack traces and implementation details never escape.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal { .. } | Self::Configuration { .. } => {
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<Infallible> for GuardError {
    fn from(infallible: Infallible) -> Self {
        match infallible {}
    }
}

impl From<std::io::Error> for GuardError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation {
            reason: format!("invalid JSON body: {}", err),
        }
    }
}

impl From<serde_yaml::Error> for GuardError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

/// Convert a `GuardError` directly into a structured HTTP response
///
/// This is the API-shaped error body. Page-shaped denials go through the
/// `DenialNotice` contract instead; see `core::types`.
impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_response = json!({
            "error": {
                "code": status.as_u16(),
                "type": self.error_type(),
                "message": self.public_message(),
            }
        });
        (status, Json(error_response)).into_response()
    }
}
