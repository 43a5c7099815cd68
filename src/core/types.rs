//! # Core Types Module
//!
//! This module defines the foundational data structures used throughout the
//! protection pipeline: the unified inbound request type, the per-request
//! context, the identity and role/permission model, route policies, and the
//! denial response contract.
//!
//! ## Ownership notes
//!
//! - `RequestContext` is created once per request and never mutated afterwards
//! - `RoutePolicy` values are immutable configuration shared via `Arc<T>`
//! - Denial responses are plain data; rendering (HTML, redirects with markup)
//!   belongs to the presentation layer, not this crate

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crate::core::error::{GuardError, GuardResult};

/// Unified inbound request as seen by the protection pipeline
///
/// This is a protocol-neutral snapshot of the parts of a request the guards
/// care about. The structured body is optional; only JSON bodies participate
/// in sanitization.
#[derive(Debug, Clone)]
pub struct ProtectedRequest {
    /// HTTP method
    pub method: Method,

    /// Request path without query parameters
    pub path: String,

    /// Raw query string, if any
    pub query: Option<String>,

    /// Request headers
    pub headers: HeaderMap,

    /// Transport-level peer address, when known
    pub peer_addr: Option<SocketAddr>,

    /// Structured request body, when the request carried one
    pub body: Option<serde_json::Value>,
}

impl ProtectedRequest {
    /// Get a header value by name, as a string
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Declared content length from the `content-length` header
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|v| v.parse().ok())
    }

    /// Look up a single cookie value by name
    pub fn cookie(&self, name: &str) -> Option<&str> {
        let raw = self.header("cookie")?;
        raw.split(';').find_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            (k == name).then_some(v)
        })
    }

    /// Extract a single query parameter value by name
    pub fn query_param(&self, name: &str) -> Option<&str> {
        let query = self.query.as_deref()?;
        query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == name).then_some(v)
        })
    }

    /// User agent header, or empty string
    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }

    /// The `referer` path the user came from, for page-shaped denials
    pub fn referer(&self) -> Option<&str> {
        self.header("referer")
    }

    /// Whether this request is "API-shaped": responses should be structured
    /// JSON rather than redirects or human-readable notices.
    pub fn is_api_shaped(&self) -> bool {
        self.path.starts_with("/api/")
            || self
                .header("accept")
                .map(|a| a.contains("application/json"))
                .unwrap_or(false)
    }

    /// Safe methods never carry state changes and skip CSRF validation
    pub fn is_safe_method(&self) -> bool {
        matches!(self.method, Method::GET | Method::HEAD | Method::OPTIONS)
    }
}

/// Per-request context derived once by the extractor
///
/// Immutable after creation; discarded at response time.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Best-effort client IP (trusted edge header, forwarded headers, peer)
    pub ip: IpAddr,

    /// Raw user-agent string
    pub user_agent: String,

    /// User agent matched a known bot pattern
    pub is_bot: bool,

    /// User agent matched a known mobile pattern
    pub is_mobile: bool,

    /// Geo lookup results, when available (stubbed absent otherwise)
    pub country: Option<String>,
    pub city: Option<String>,

    /// When the request entered the pipeline
    pub timestamp: DateTime<Utc>,

    /// Unique request id, echoed back as `X-Request-Id`
    pub request_id: String,
}

/// Closed role enumeration
///
/// Variant order defines the privilege hierarchy: `Student` is the least
/// privileged and `SuperAdmin` the most, so `Ord` comparisons express
/// hierarchy checks directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Teacher,
    Coach,
    Admin,
    SuperAdmin,
}

impl Role {
    /// Fixed role-to-permission table; there are no per-user overrides
    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            Role::Student => &[Permission::Read],
            Role::Teacher => &[Permission::Read, Permission::Write],
            Role::Coach => &[Permission::Read, Permission::Write, Permission::Delete],
            Role::Admin => &[
                Permission::Read,
                Permission::Write,
                Permission::Delete,
                Permission::Admin,
            ],
            Role::SuperAdmin => &[
                Permission::Read,
                Permission::Write,
                Permission::Delete,
                Permission::Admin,
                Permission::SuperAdmin,
            ],
        }
    }

    /// Parse a role from a trusted claim or header value
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "student" => Some(Role::Student),
            "teacher" => Some(Role::Teacher),
            "coach" => Some(Role::Coach),
            "admin" => Some(Role::Admin),
            "super_admin" | "superadmin" => Some(Role::SuperAdmin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Student => write!(f, "student"),
            Role::Teacher => write!(f, "teacher"),
            Role::Coach => write!(f, "coach"),
            Role::Admin => write!(f, "admin"),
            Role::SuperAdmin => write!(f, "super_admin"),
        }
    }
}

/// Permission set members granted through the role table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Delete,
    Admin,
    SuperAdmin,
}

/// Resolved authenticated identity
///
/// Resolved at most once per request; `None` anywhere downstream means
/// "anonymous". The permission set is always exactly the table-driven set
/// for the role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Unique user identifier from the identity provider
    pub id: String,

    /// Role resolved from a trusted claim or the profile store
    pub role: Role,

    /// Table-driven permission set for the role
    pub permissions: HashSet<Permission>,

    /// Whether the account's email/phone is confirmed
    pub verified: bool,

    /// Opaque session identifier
    pub session_id: String,

    /// Last recorded activity, used for staleness checks
    pub last_activity: Option<DateTime<Utc>>,
}

impl Identity {
    /// Build an identity with the permission set implied by the role
    pub fn new(id: String, role: Role, verified: bool, session_id: String) -> Self {
        Self {
            id,
            role,
            permissions: role.permissions().iter().copied().collect(),
            verified,
            session_id,
            last_activity: None,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// A session is stale once `now > last_activity + timeout`. Identities
    /// without a recorded activity timestamp are treated as fresh.
    pub fn is_session_expired(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        match self.last_activity {
            Some(last) => {
                now > last + chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::zero())
            }
            None => false,
        }
    }
}

/// Protection level attached to a route policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Anyone may pass; identity is optional
    Public,
    /// Any resolved, non-expired identity may pass
    Authenticated,
    /// Identity's role must be in the policy's allowed set
    RoleBased,
    /// Identity's permissions must intersect the policy's required set
    PermissionBased,
    /// Authenticated plus a policy-attached custom check
    Custom,
}

/// One rate-limiting tier: a request budget over a fixed window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitTier {
    /// Maximum requests per window
    pub requests: u32,

    /// Fixed window duration
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

/// Capability for policy-attached custom validators
///
/// Custom checks compose the same way as built-in guards but with a narrower
/// contract: any error they return (or panic they raise) is treated as a
/// validation denial, never an internal error.
#[async_trait]
pub trait CustomCheck: Send + Sync + fmt::Debug {
    async fn check(
        &self,
        request: &ProtectedRequest,
        context: &RequestContext,
        identity: Option<&Identity>,
    ) -> GuardResult<()>;
}

/// Immutable protection rules attached to a path pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePolicy {
    /// Protection level for this route
    pub security_level: SecurityLevel,

    /// Roles allowed through when `security_level` is `RoleBased`
    #[serde(default)]
    pub allowed_roles: Option<Vec<Role>>,

    /// Permissions required when `security_level` is `PermissionBased`
    #[serde(default)]
    pub required_permissions: Option<Vec<Permission>>,

    /// Route-scoped rate limit; the global tier still applies when absent
    #[serde(default)]
    pub rate_limit: Option<RateLimitTier>,

    /// Explicit IP allow list; non-empty means everything else is denied
    #[serde(default)]
    pub ip_allow_list: Option<Vec<IpAddr>>,

    /// Explicit IP deny list
    #[serde(default)]
    pub ip_deny_list: Option<Vec<IpAddr>>,

    /// Whether state-changing requests must carry a valid CSRF token
    #[serde(default)]
    pub requires_csrf: bool,

    /// Whether requests must present a configured API key
    #[serde(default)]
    pub requires_api_key: bool,

    /// Allowed HTTP methods; absent means all methods pass the method guard
    #[serde(default, with = "opt_method_serde")]
    pub allowed_methods: Option<Vec<Method>>,

    /// Per-route body size cap; the global cap applies when absent
    #[serde(default)]
    pub max_body_bytes: Option<u64>,

    /// Whether structured bodies are rewritten by the sanitization step
    #[serde(default)]
    pub sanitize_input: bool,

    /// Policy-attached custom check; configured in code, not in YAML
    #[serde(skip)]
    pub custom: Option<Arc<dyn CustomCheck>>,
}

impl RoutePolicy {
    /// A fully open policy for public routes
    pub fn public() -> Self {
        Self {
            security_level: SecurityLevel::Public,
            allowed_roles: None,
            required_permissions: None,
            rate_limit: None,
            ip_allow_list: None,
            ip_deny_list: None,
            requires_csrf: false,
            requires_api_key: false,
            allowed_methods: None,
            max_body_bytes: None,
            sanitize_input: false,
            custom: None,
        }
    }

    /// A baseline policy requiring any authenticated identity
    pub fn authenticated() -> Self {
        Self {
            security_level: SecurityLevel::Authenticated,
            ..Self::public()
        }
    }
}

/// Serde support for optional HTTP method lists, stored as strings
mod opt_method_serde {
    use axum::http::Method;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;

    pub fn serialize<S>(methods: &Option<Vec<Method>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        methods
            .as_ref()
            .map(|m| m.iter().map(|m| m.to_string()).collect::<Vec<_>>())
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<Method>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let strings: Option<Vec<String>> = Option::deserialize(deserializer)?;
        strings
            .map(|list| {
                list.into_iter()
                    .map(|s| Method::from_str(&s).map_err(serde::de::Error::custom))
                    .collect()
            })
            .transpose()
    }
}

/// Where a resolved policy came from, for logging and determinism checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySource {
    /// Exact path match in the policy table
    Exact(String),
    /// Most specific pattern match in the policy table
    Pattern(String),
    /// No table entry; default protection decided the path is public
    DefaultPublic,
    /// No table entry; default protection requires authentication
    DefaultProtected,
}

/// The policy chosen for a request, plus its provenance
#[derive(Debug, Clone)]
pub struct ResolvedPolicy {
    pub source: PolicySource,
    pub policy: Arc<RoutePolicy>,
}

/// Human-readable denial contract for page-shaped paths
///
/// The core never generates markup; the presentation layer renders this
/// notice, typically with an auto-return countdown to `return_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenialNotice {
    /// Stable reason tag (mirrors `GuardError::error_type`)
    pub reason: String,

    /// Short human-readable message
    pub message: String,

    /// Where the user should be returned, usually the referring page
    pub return_path: String,

    /// Suggested countdown before auto-returning
    pub auto_return_after_secs: u32,
}

/// Body variants a denial response can carry
#[derive(Debug, Clone)]
pub enum DenialBody {
    /// Structured JSON error for API-shaped paths
    Api(serde_json::Value),
    /// Data contract for page-shaped authorization failures
    Page(DenialNotice),
    /// Redirect (e.g. unauthenticated page navigation to the login page)
    Redirect { location: String },
    /// No body
    Empty,
}

/// Terminal response produced by a denying guard
#[derive(Debug, Clone)]
pub struct GuardResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: DenialBody,
}

impl GuardResponse {
    /// Structured API error from a `GuardError`
    pub fn api_error(error: &GuardError) -> Self {
        let status = error.status_code();
        let body = serde_json::json!({
            "error": {
                "code": status.as_u16(),
                "type": error.error_type(),
                "message": error.public_message(),
            }
        });
        Self {
            status,
            headers: HeaderMap::new(),
            body: DenialBody::Api(body),
        }
    }

    /// Redirect response for page-shaped navigations
    pub fn redirect(location: impl Into<String>) -> Self {
        let location = location.into();
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&location) {
            headers.insert("location", value);
        }
        Self {
            status: StatusCode::SEE_OTHER,
            headers,
            body: DenialBody::Redirect { location },
        }
    }

    /// Page-shaped denial carrying the notice data contract
    pub fn notice(status: StatusCode, notice: DenialNotice) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: DenialBody::Page(notice),
        }
    }

    /// Attach a header, ignoring values that are not valid header text
    pub fn with_header(mut self, name: &'static str, value: String) -> Self {
        if let Ok(value) = HeaderValue::from_str(&value) {
            self.headers.insert(name, value);
        }
        self
    }
}

impl IntoResponse for GuardResponse {
    fn into_response(self) -> Response {
        let mut response = match self.body {
            DenialBody::Api(value) => (self.status, Json(value)).into_response(),
            DenialBody::Page(notice) => (self.status, Json(notice)).into_response(),
            DenialBody::Redirect { .. } => StatusCode::SEE_OTHER.into_response(),
            DenialBody::Empty => self.status.into_response(),
        };
        for (name, value) in self.headers.iter() {
            response.headers_mut().insert(name, value.clone());
        }
        response
    }
}
