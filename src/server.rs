//! HTTP front door for the run coordinator.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/question` | Validate a question payload and start a run (`202 {"runId"}`) |
//! | `GET`  | `/runs/{id}` | Current run record |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid question payload: question is required", "details": ["question is required"] } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use compliance_harness_core::models::RunRecord;

use crate::app::Engine;
use crate::config::Config;
use crate::run::{RunCoordinator, RunError};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RunCoordinator>,
}

/// Build the router; used by [`run_server`] and directly by tests.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/question", post(handle_question))
        .route("/runs/{id}", get(handle_run_status))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Bind `[server].bind` and serve until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = Engine::open(config).await?;
    let app = router(AppState {
        coordinator: engine.coordinator.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, strategy = engine.retriever.strategy(), "server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<String>,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Vec<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
                details: self.details,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
        details: Vec::new(),
    }
}

impl From<RunError> for AppError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Validation(v) => AppError {
                details: v.errors.clone(),
                ..bad_request(v.to_string())
            },
            RunError::NotFound(id) => AppError {
                status: StatusCode::NOT_FOUND,
                code: "not_found",
                message: format!("run {} not found", id),
                details: Vec::new(),
            },
            RunError::Store(e) => {
                error!(error = %format!("{:#}", e), "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message: "internal error".to_string(),
                    details: Vec::new(),
                }
            }
        }
    }
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcceptedResponse {
    run_id: String,
}

async fn handle_question(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| bad_request(format!("request body must be valid JSON: {}", e)))?;
    let record = state.coordinator.submit(&value).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse { run_id: record.id }),
    ))
}

async fn handle_run_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunRecord>, AppError> {
    Ok(Json(state.coordinator.status(&id).await?))
}
