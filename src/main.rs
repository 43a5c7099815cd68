//! Demo server wiring the protection pipeline in front of a few handlers.
//!
//! Every inbound request is converted to a [`ProtectedRequest`], run through
//! the guard chain, and either answered with the denial the chain produced
//! or forwarded to the matched handler with the (possibly sanitized) body.

use anyhow::Context;
use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use gatekeeper::identity::providers::{StaticIdentityProvider, StaticProfileStore};
use gatekeeper::observability::logging::{self, RequestLogger};
use gatekeeper::store::InMemoryStore;
use gatekeeper::{GatekeeperConfig, Identity, Pipeline, PipelineVerdict, ProtectedRequest};

const MAX_BUFFERED_BODY: usize = 4 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    logger: Arc<RequestLogger>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GATEKEEPER_CONFIG").ok());
    let config = match config_path {
        Some(path) => {
            GatekeeperConfig::from_yaml_file(&path).with_context(|| format!("loading {}", path))?
        }
        None => GatekeeperConfig::default(),
    };

    logging::init(&config.logging);

    let pipeline = Arc::new(Pipeline::new(
        &config,
        Arc::new(StaticIdentityProvider::new()),
        Arc::new(StaticProfileStore::new()),
        Arc::new(InMemoryStore::new()),
    ));
    pipeline
        .tracker()
        .spawn_maintenance(config.tracking.sweep_interval);

    let state = AppState {
        pipeline,
        logger: Arc::new(RequestLogger::new(config.logging.clone())),
    };

    let app = Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/api/centers", get(list_centers))
        .route("/api/metrics", get(metrics_snapshot))
        .layer(middleware::from_fn_with_state(state.clone(), protect))
        .with_state(state);

    let addr: SocketAddr = std::env::var("GATEKEEPER_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()
        .context("parsing listen address")?;

    info!(%addr, "gatekeeper listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}

/// Run the guard chain on an inbound request and forward it when allowed
async fn protect(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let (parts, body) = req.into_parts();

    let method = parts.method.clone();
    let path = parts.uri.path().to_string();
    let query = parts.uri.query().map(str::to_string);
    let peer_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    let is_json = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("application/json"))
        .unwrap_or(false);

    let bytes = match axum::body::to_bytes(body, MAX_BUFFERED_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };
    let parsed_body = if is_json && !bytes.is_empty() {
        serde_json::from_slice(&bytes).ok()
    } else {
        None
    };

    let protected = ProtectedRequest {
        method: method.clone(),
        path: path.clone(),
        query,
        headers: parts.headers.clone(),
        peer_addr,
        body: parsed_body,
    };

    match state.pipeline.process(protected).await {
        PipelineVerdict::Denied { context, response } => {
            let status = response.status;
            state.logger.log_denied_headers(&context, &parts.headers);
            state
                .logger
                .log_request(&context, method.as_str(), &path, status, start.elapsed());
            state
                .pipeline
                .metrics()
                .record_request(status, &path, &method, start.elapsed());
            response.into_response()
        }
        PipelineVerdict::Allowed {
            request, context, identity, ..
        } => {
            // forward the sanitized body when the pipeline rewrote it
            let body_bytes = match &request.body {
                Some(value) => serde_json::to_vec(value).map(Bytes::from).unwrap_or(bytes),
                None => bytes,
            };
            let mut forwarded = Request::from_parts(parts, Body::from(body_bytes));
            forwarded.extensions_mut().insert(context.clone());
            if let Some(identity) = identity {
                forwarded.extensions_mut().insert(identity);
            }

            let mut response = next.run(forwarded).await;
            for (name, value) in Pipeline::baseline_headers(&context).iter() {
                response
                    .headers_mut()
                    .entry(name.clone())
                    .or_insert(value.clone());
            }
            let status = response.status();
            state
                .logger
                .log_request(&context, method.as_str(), &path, status, start.elapsed());
            state
                .pipeline
                .metrics()
                .record_request(status, &path, &method, start.elapsed());
            response
        }
    }
}

async fn home() -> &'static str {
    "gatekeeper demo"
}

async fn health() -> &'static str {
    "ok"
}

async fn list_centers(identity: Option<axum::Extension<Identity>>) -> Response {
    let user = identity.map(|axum::Extension(i)| i.id);
    Json(serde_json::json!({
        "centers": ["north-court", "riverside", "downtown"],
        "requested_by": user,
    }))
    .into_response()
}

async fn metrics_snapshot(State(state): State<AppState>) -> Response {
    let mut response = Json(state.pipeline.metrics().snapshot()).into_response();
    response.headers_mut().insert(
        "cache-control",
        HeaderValue::from_static("no-store"),
    );
    response
}
