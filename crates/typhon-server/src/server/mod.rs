//! HTTP serving: application state, router assembly, the admission
//! middleware, and the two serving paths (single-process and
//! handoff-capable).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use typhon_gate::{Admission, AdmissionController, CaptchaClient};
use typhon_handoff::{
    bind_shared, DrainCoordinator, ExitReason, Orchestrator, SelfSpawner,
};

use crate::config::{AppConfig, BuildMode};

mod routes;

/// Shared application state. Handlers and middleware receive it as
/// `Arc<AppState>`.
pub struct AppState {
    pub admission: AdmissionController,
    pub captcha: CaptchaClient,
    pub system_key: Option<String>,
    pub drain: DrainCoordinator,
    /// Present only in handoff mode; `None` while serving single-process.
    pub orchestrator: Option<Arc<Orchestrator<SelfSpawner>>>,
}

impl AppState {
    /// Lifecycle label for the system endpoints.
    fn lifecycle(&self) -> &'static str {
        self.orchestrator
            .as_ref()
            .map(|o| o.state().as_str())
            .unwrap_or("serving")
    }
}

/// Start serving with the given configuration. Returns after drain; a bind
/// failure propagates out and terminates the process non-zero.
pub async fn start(config: AppConfig) -> Result<()> {
    let admission = AdmissionController::new(config.admission_config());
    let captcha = CaptchaClient::new(config.captcha_config())
        .context("failed to construct captcha client")?;
    let drain = DrainCoordinator::new(config.drain_timeout);

    match config.build_mode {
        BuildMode::Dev => serve_single(config, admission, captcha, drain).await,
        BuildMode::Release => serve_with_handoff(config, admission, captcha, drain).await,
    }
}

/// Single-process serving: plain bind, ctrl-c drains and exits.
async fn serve_single(
    config: AppConfig,
    admission: AdmissionController,
    captcha: CaptchaClient,
    drain: DrainCoordinator,
) -> Result<()> {
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let state = Arc::new(AppState {
        admission,
        captcha,
        system_key: config.system_key.clone(),
        drain: drain.clone(),
        orchestrator: None,
    });
    let sweeper = spawn_eviction_sweep(Arc::clone(&state));
    let app = build_router(state);

    info!(%addr, "serving in single-process mode");

    let stop = drain.stop_token();
    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(stop.cancelled_owned())
        .await
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested, draining");
    drain.stop_accepting();
    drain.drain().await;

    sweeper.abort();
    server.abort();
    Ok(())
}

/// Handoff-capable serving: port-shared bind, SIGHUP spawns a successor and
/// this process drains behind it.
async fn serve_with_handoff(
    config: AppConfig,
    admission: AdmissionController,
    captcha: CaptchaClient,
    drain: DrainCoordinator,
) -> Result<()> {
    let addr = config.bind_addr();
    let listener = bind_shared(addr)?;

    let orchestrator = Arc::new(Orchestrator::new(drain.clone(), SelfSpawner));
    let state = Arc::new(AppState {
        admission,
        captcha,
        system_key: config.system_key.clone(),
        drain: drain.clone(),
        orchestrator: Some(Arc::clone(&orchestrator)),
    });
    let sweeper = spawn_eviction_sweep(Arc::clone(&state));
    let app = build_router(state);

    info!(%addr, pid = std::process::id(), "serving in handoff mode");

    let stop = drain.stop_token();
    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(stop.cancelled_owned())
        .await
    });
    let watcher = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.watch_signals().await }
    });

    match orchestrator.run().await {
        ExitReason::HandedOff(outcome) => {
            info!(clean = outcome.is_clean(), "handoff complete, exiting")
        }
        ExitReason::ShutDown(outcome) => {
            info!(clean = outcome.is_clean(), "shutdown complete, exiting")
        }
    }

    watcher.abort();
    sweeper.abort();
    server.abort();
    Ok(())
}

/// Assemble the router: API routes behind the admission middleware,
/// in-flight tracking for drain, CORS and request tracing.
fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(routes::healthz))
        .nest("/api/v1", routes::api_routes())
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            track_in_flight,
        ))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), admit))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Every request holds a drain guard for its lifetime, so the orchestrator
/// can wait for in-flight work instead of counting raw sockets.
async fn track_in_flight(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let _guard = state.drain.guard();
    next.run(request).await
}

/// Fixed-window admission check, keyed by client address.
async fn admit(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let key = client_key(request.headers(), peer);

    match state.admission.admit(&key) {
        Admission::Allowed => next.run(request).await,
        Admission::Throttled => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "too many requests" })),
        )
            .into_response(),
    }
}

/// Client identity for rate limiting: the proxy-provided `X-Real-Ip` when
/// present, else the peer address.
pub(crate) fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(ip) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return ip.to_string();
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::PUT,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ORIGIN,
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("apifoxtoken"),
        ])
        .max_age(Duration::from_secs(864000))
}

/// Periodically drop expired rate windows so idle keys do not accumulate.
fn spawn_eviction_sweep(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    let period = state.admission.config().window.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            state.admission.evict_stale();
        }
    })
}
