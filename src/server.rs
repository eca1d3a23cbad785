//! HTTP server exposing the scrape pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Liveness and version |
//! | `GET` | `/sites` | Registered sites |
//! | `POST` | `/sites?format=xlsx\|csv` | Replace the site list from a raw spreadsheet body |
//! | `POST` | `/scrape` | Run the pipeline and return the report |
//! | `POST` | `/command` | Route a chat-style message, `{"text": "/scrape"}` |
//!
//! Errors use a uniform body: `{"error": {"code": "...", "message": "..."}}`.
//! CORS is open so browser tools on other origins can call the server.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::commands::{dispatch, Command};
use crate::config::Config;
use crate::models::{LoadSummary, SiteRecord};
use crate::pipeline::{Pipeline, RunOutcome};
use crate::progress::NoProgress;
use crate::tabular::{parse_sites, TabularFormat};

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

/// Routes over an existing pipeline. Separate from [`run_server`] so tests
/// can serve it on an ephemeral port.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sites", get(handle_list_sites).post(handle_load_sites))
        .route("/scrape", post(handle_scrape))
        .route("/command", post(handle_command))
        .layer(cors)
        .with_state(AppState { pipeline })
}

pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(config).await?);
    let app = router(pipeline);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server started");
    println!("price harness listening on http://{}", config.server.bind);
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
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
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
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: format!("{:#}", err),
    }
}

// ============ GET /health ============

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

// ============ /sites ============

#[derive(Serialize)]
struct SiteListResponse {
    sites: Vec<SiteRecord>,
}

async fn handle_list_sites(
    State(state): State<AppState>,
) -> Result<Json<SiteListResponse>, AppError> {
    let sites = state.pipeline.sites().await.map_err(internal)?;
    Ok(Json(SiteListResponse { sites }))
}

#[derive(Deserialize)]
struct LoadParams {
    format: Option<String>,
}

async fn handle_load_sites(
    State(state): State<AppState>,
    Query(params): Query<LoadParams>,
    body: Bytes,
) -> Result<Json<LoadSummary>, AppError> {
    let format = params
        .format
        .ok_or_else(|| bad_request("missing query parameter: format (xlsx or csv)"))?;
    let format = TabularFormat::from_name(&format).map_err(|e| bad_request(e.to_string()))?;
    let rows = parse_sites(&body, format).map_err(|e| bad_request(e.to_string()))?;

    let summary = state.pipeline.replace_sites(&rows).await.map_err(internal)?;
    Ok(Json(summary))
}

// ============ POST /scrape ============

async fn handle_scrape(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let outcome = state.pipeline.run(&NoProgress).await.map_err(internal)?;
    let body = match outcome {
        RunOutcome::NothingToScrape => serde_json::json!({ "status": "nothing_to_scrape" }),
        RunOutcome::Completed(report) => serde_json::json!({
            "status": "completed",
            "report": report,
        }),
    };
    Ok(Json(body))
}

// ============ POST /command ============

#[derive(Deserialize)]
struct CommandRequest {
    text: String,
}

#[derive(Serialize)]
struct CommandResponse {
    reply: String,
}

async fn handle_command(
    State(state): State<AppState>,
    Json(req): Json<CommandRequest>,
) -> Result<Json<CommandResponse>, AppError> {
    let command = Command::parse(&req.text)
        .ok_or_else(|| not_found(format!("unknown command: {}", req.text.trim())))?;
    let reply = dispatch(command, &state.pipeline).await.map_err(internal)?;
    Ok(Json(CommandResponse { reply }))
}
