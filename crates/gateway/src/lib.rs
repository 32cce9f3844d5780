//! HTTP run server for Dexter.
//!
//! - `GET  /health`                    liveness probe
//! - `POST /api/run`                   submit a run, returns its id at once
//! - `GET  /api/run/{run_id}/events`   the run's events as Server-Sent Events
//!
//! Each run executes on the blocking pool; its events reach the stream in
//! emission order and the stream ends after the run's terminal event.

pub mod dispatch;
pub mod registry;
pub mod session;
pub mod sse;

pub use dispatch::{Dispatcher, RunRequest};
pub use registry::{RunId, SessionRegistry};
pub use session::{RunEmitter, RunSession, SessionStream};

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use dexter_agent::{ExecutorFactory, StepLimits};
use dexter_config::AppConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared state for all handlers.
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(factory: Arc<dyn ExecutorFactory>, defaults: StepLimits) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let dispatcher =
            Dispatcher::new(registry.clone(), factory).with_default_limits(defaults);
        Self {
            registry,
            dispatcher,
        }
    }
}

type SharedState = Arc<AppState>;

/// Build the router with all routes, permissive CORS and request tracing.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/run", post(run_handler))
        .route("/api/run/{run_id}/events", get(events_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the HTTP server on the configured address.
pub async fn start(
    config: AppConfig,
    factory: Arc<dyn ExecutorFactory>,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let defaults = StepLimits::resolve_with(
        Some(config.runs.max_steps),
        Some(config.runs.max_steps_per_task),
        StepLimits::default(),
    );

    let state = Arc::new(AppState::new(factory, defaults));
    let app = build_router(state);

    info!(addr = %addr, model = %config.model, "Dexter server starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Dexter server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub run_id: RunId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn run_handler(
    State(state): State<SharedState>,
    Json(request): Json<RunRequest>,
) -> Json<RunResponse> {
    info!(query_len = request.query.len(), "Run requested");
    let run_id = state.dispatcher.submit(request);
    Json(RunResponse { run_id })
}

async fn events_handler(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<sse::RunSse, (StatusCode, Json<ErrorResponse>)> {
    let run_id = RunId::from(run_id);
    let session = state
        .registry
        .get(&run_id)
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "Run not found"))?;

    let stream = session
        .stream()
        .ok_or_else(|| error_response(StatusCode::CONFLICT, "Run is already being streamed"))?;

    info!(run_id = %run_id, "Streaming run events");
    Ok(sse::into_response(stream, state.registry.clone()))
}
