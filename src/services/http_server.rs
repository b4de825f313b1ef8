//! HTTP server for the assignment API.
//!
//! Wraps the axum router with request-id and access-log middleware and runs
//! it until the shutdown token fires. In-flight requests get
//! `shutdown_timeout` to finish; after that the abort token is cancelled so
//! running operations roll back and return.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::services::assignment::AssignmentEngine;
use crate::services::http_api::api_routes;

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Shared state for the axum routes.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AssignmentEngine>,
    /// Cancelled when in-flight operations must give up.
    pub abort: CancellationToken,
}

impl AppState {
    pub fn new(engine: AssignmentEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            abort: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Build the full router: health check, API routes, middleware.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api_routes())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(assign_request_id))
                .layer(middleware::from_fn(log_request))
                .layer(CorsLayer::permissive()),
        )
}

/// GET /health: liveness probe.
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Reuse the caller's `X-Request-ID` or mint one, and echo it back.
async fn assign_request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(&REQUEST_ID_HEADER)
        .filter(|v| !v.is_empty())
        .cloned()
        .or_else(|| HeaderValue::from_str(&Uuid::new_v4().to_string()).ok());

    let Some(id) = id else {
        return next.run(req).await;
    };

    req.headers_mut().insert(REQUEST_ID_HEADER, id.clone());
    let mut res = next.run(req).await;
    res.headers_mut().insert(REQUEST_ID_HEADER, id);
    res
}

/// One access-log line per request.
async fn log_request(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let request_id = req
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let started = Instant::now();

    let res = next.run(req).await;

    log::info!(
        "[http] {} {} status={} latency_ms={} request_id={}",
        method,
        path,
        res.status().as_u16(),
        started.elapsed().as_millis(),
        request_id
    );
    res
}

/// Bind the listener on all interfaces.
pub async fn bind(port: u16) -> Result<TcpListener, ServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { port, source })
}

/// Serve until `shutdown` is cancelled, then drain for at most
/// `shutdown_timeout` before aborting in-flight operations.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
    shutdown_timeout: Duration,
) -> Result<(), ServerError> {
    let abort = state.abort.clone();
    let app = build_router(state);

    if let Ok(addr) = listener.local_addr() {
        log::info!("[http] Server listening on http://{}", addr);
    }

    let watchdog = {
        let shutdown = shutdown.clone();
        let abort = abort.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            tokio::time::sleep(shutdown_timeout).await;
            log::warn!(
                "[http] Shutdown timeout of {:?} elapsed, aborting in-flight operations",
                shutdown_timeout
            );
            abort.cancel();
        })
    };

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await;

    watchdog.abort();
    abort.cancel();

    result?;
    log::info!("[http] Server stopped");
    Ok(())
}

/// Bind `port` and serve until `shutdown` is cancelled.
pub async fn run_server(
    port: u16,
    state: AppState,
    shutdown: CancellationToken,
    shutdown_timeout: Duration,
) -> Result<(), ServerError> {
    let listener = bind(port).await?;
    serve(listener, state, shutdown, shutdown_timeout).await
}
