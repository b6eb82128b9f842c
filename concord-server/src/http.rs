// HTTP server with API routes for run submission and artifact retrieval

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use std::path::Path as FsPath;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use concord_vision::Stroke;

use crate::jobs::{JobRegistry, JobStatus};
use crate::pipeline::{self, PipelineContext, RunInput, RunMetrics};

// Uploads larger than this are rejected outright.
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

// API state
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<JobRegistry>,
    pub pipeline: Arc<PipelineContext>,
}

// Statistics tracking
use std::sync::atomic::{AtomicU64, Ordering};
pub static TOTAL_SUBMISSIONS: AtomicU64 = AtomicU64::new(0);
pub static TOTAL_REJECTED_SUBMISSIONS: AtomicU64 = AtomicU64::new(0);
pub static TOTAL_STATUS_POLLS: AtomicU64 = AtomicU64::new(0);

// Response types
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Single-slot status view kept for older clients that poll the service as
/// a whole instead of one job.
#[derive(Debug, Serialize)]
pub struct LegacyStatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

/// Artifacts are inlined as base64 PNG so browser clients can render them
/// without a second round trip.
#[derive(Debug, Serialize)]
pub struct ResultsResponse {
    pub job_id: Uuid,
    pub auto_overlay: String,
    pub auto_cutout: String,
    pub instance_overlay: String,
    pub instance_cutout: String,
    pub trend: String,
    pub metrics: RunMetrics,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// API failures mapped onto status codes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        };
        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });
        (status, body).into_response()
    }
}

/// Create HTTP router with all API routes
pub fn create_router(state: ApiState) -> Router {
    // The browser UI is served from another origin during development.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/runs", post(submit_run_handler))
        .route("/api/v1/runs/:id/status", get(run_status_handler))
        .route("/api/v1/runs/:id/results", get(run_results_handler))
        .route("/api/v1/status", get(legacy_status_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Accepts a multipart submission with an `image` part and a `strokes` part.
///
/// The whole submission is validated before anything is registered: a
/// missing part, an undecodable image or malformed strokes JSON answer 400
/// and the pipeline never starts.
async fn submit_run_handler(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut image_bytes: Option<Vec<u8>> = None;
    let mut strokes_text: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| reject(format!("malformed multipart body: {}", e)))?
    {
        // Owned copy of the part name; reading the field consumes it.
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| reject(format!("failed to read image part: {}", e)))?;
                image_bytes = Some(bytes.to_vec());
            }
            Some("strokes") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| reject(format!("failed to read strokes part: {}", e)))?;
                strokes_text = Some(text);
            }
            other => {
                warn!(part = ?other, "ignoring unexpected multipart part");
            }
        }
    }

    let image_bytes = image_bytes
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| reject("no image uploaded".to_string()))?;
    let strokes_text = strokes_text.ok_or_else(|| reject("no strokes provided".to_string()))?;
    let strokes: Vec<Stroke> = serde_json::from_str(&strokes_text)
        .map_err(|e| reject(format!("invalid strokes JSON: {}", e)))?;
    image::load_from_memory(&image_bytes)
        .map_err(|e| reject(format!("image could not be decoded: {}", e)))?;

    let entry = state.registry.create(&state.pipeline.data_dir.join("runs"));

    TOTAL_SUBMISSIONS.fetch_add(1, Ordering::Relaxed);
    info!(job_id = %entry.id, bytes = image_bytes.len(), strokes = strokes.len(), "run accepted");

    pipeline::spawn_run(
        Arc::clone(&state.pipeline),
        Arc::clone(&state.registry),
        RunInput {
            job_id: entry.id,
            image_bytes,
            strokes,
            artifact_dir: entry.artifact_dir,
        },
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: entry.id,
            message: "Processing started".to_string(),
        }),
    ))
}

/// Per-job status endpoint
async fn run_status_handler(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    TOTAL_STATUS_POLLS.fetch_add(1, Ordering::Relaxed);
    let entry = state
        .registry
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("unknown job {}", id)))?;
    Ok(Json(StatusResponse {
        job_id: id,
        status: entry.status,
        error: entry.error,
    }))
}

/// Returns the finished run's artifacts and metrics.
///
/// A job still processing answers 409 so pollers can tell "not yet" from
/// "never existed"; a failed job answers 409 with the failure text.
async fn run_results_handler(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ResultsResponse>, ApiError> {
    let entry = state
        .registry
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("unknown job {}", id)))?;
    match entry.status {
        JobStatus::Processing => {
            return Err(ApiError::Conflict(format!("job {} is still processing", id)));
        }
        JobStatus::Error => {
            let detail = entry.error.unwrap_or_else(|| "unknown error".to_string());
            return Err(ApiError::Conflict(format!("job {} failed: {}", id, detail)));
        }
        JobStatus::Done => {}
    }

    let dir = entry.artifact_dir;
    let metrics_raw = tokio::fs::read(dir.join("metrics.json"))
        .await
        .map_err(|_| ApiError::NotFound("metrics artifact missing".to_string()))?;
    let metrics: RunMetrics = serde_json::from_slice(&metrics_raw)
        .map_err(|e| ApiError::Internal(format!("metrics artifact unreadable: {}", e)))?;

    Ok(Json(ResultsResponse {
        job_id: id,
        auto_overlay: read_artifact_base64(&dir, "auto_overlay.png").await?,
        auto_cutout: read_artifact_base64(&dir, "auto_cutout.png").await?,
        instance_overlay: read_artifact_base64(&dir, "instance_overlay.png").await?,
        instance_cutout: read_artifact_base64(&dir, "instance_cutout.png").await?,
        trend: read_artifact_base64(&state.pipeline.data_dir, "trend.png").await?,
        metrics,
    }))
}

/// Whole-service status endpoint for older clients
async fn legacy_status_handler(State(state): State<ApiState>) -> Json<LegacyStatusResponse> {
    match state.registry.latest() {
        Some(entry) => Json(LegacyStatusResponse {
            status: entry.status.as_str().to_string(),
            job_id: Some(entry.id),
        }),
        None => Json(LegacyStatusResponse {
            status: "idle".to_string(),
            job_id: None,
        }),
    }
}

async fn read_artifact_base64(dir: &FsPath, name: &str) -> Result<String, ApiError> {
    let bytes = tokio::fs::read(dir.join(name))
        .await
        .map_err(|_| ApiError::NotFound(format!("artifact missing: {}", name)))?;
    Ok(BASE64.encode(bytes))
}

fn reject(message: String) -> ApiError {
    TOTAL_REJECTED_SUBMISSIONS.fetch_add(1, Ordering::Relaxed);
    ApiError::BadRequest(message)
}
