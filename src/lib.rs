//! # Gatekeeper
//!
//! An inbound request protection pipeline: every request passes through a
//! fixed chain of security guards before any application handler runs.
//!
//! ## Features
//!
//! - **Guard chain**: validation, IP restriction, method and size limits,
//!   rate limiting, authentication, authorization, CSRF, API keys, and
//!   policy-attached custom checks, short-circuiting on the first denial
//! - **Route policies**: a YAML policy table keyed by path patterns with
//!   single-segment (`*`) and catch-all (`**`) wildcards, resolved by
//!   specificity
//! - **Identity resolution**: token verification against a pluggable
//!   provider, with opt-in trust of upstream proxy headers
//! - **Security-event tracking**: per-IP event logs with time decay and
//!   automatic suspicion promotion
//! - **Observability**: structured logging, aggregate metrics, and one-shot
//!   threshold alerts delivered to a webhook
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use gatekeeper::{GatekeeperConfig, Pipeline, PipelineVerdict};
//! use gatekeeper::identity::providers::{StaticIdentityProvider, StaticProfileStore};
//! use gatekeeper::store::InMemoryStore;
//!
//! # async fn run() {
//! let config = GatekeeperConfig::from_yaml_file("gatekeeper.yaml").unwrap();
//! let pipeline = Pipeline::new(
//!     &config,
//!     Arc::new(StaticIdentityProvider::new()),
//!     Arc::new(StaticProfileStore::new()),
//!     Arc::new(InMemoryStore::new()),
//! );
//! # }
//! ```

pub mod core;
pub mod guards;
pub mod identity;
pub mod observability;
pub mod pipeline;
pub mod routing;
pub mod security;
pub mod store;

pub use crate::core::config::GatekeeperConfig;
pub use crate::core::error::{GuardError, GuardResult};
pub use crate::core::types::{
    DenialBody, DenialNotice, GuardResponse, Identity, Permission, ProtectedRequest,
    RequestContext, ResolvedPolicy, Role, RoutePolicy, SecurityLevel,
};
pub use pipeline::{Pipeline, PipelineVerdict};
