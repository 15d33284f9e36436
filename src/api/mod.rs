//! REST + WebSocket control surface for the review loop.

pub mod ws;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::error::{GenerationError, IngestionError, SendError, WorkflowError};
use crate::records::RawRow;
use crate::workflow::{BatchController, WorkflowSnapshot};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<BatchController>,
}

/// Build the Axum router.
pub fn workflow_routes(controller: Arc<BatchController>) -> Router {
    let state = AppState { controller };

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health))
        .route("/api/workflow", get(get_workflow))
        .route("/api/batch", post(load_batch))
        .route("/api/batch/start", post(start_batch))
        .route("/api/single", post(start_single))
        .route("/api/draft/edit", post(edit_draft))
        .route("/api/draft/edit/submit", post(submit_edit))
        .route("/api/draft/edit/cancel", post(cancel_edit))
        .route("/api/draft/send", post(send_draft))
        .route("/api/draft/retry", post(retry_draft))
        .route("/api/draft/cancel", post(cancel_in_flight))
        .route("/api/reset", post(reset))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// A workflow error rendered as JSON.
pub struct ApiError(pub WorkflowError);

impl From<WorkflowError> for ApiError {
    fn from(e: WorkflowError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            WorkflowError::Busy => StatusCode::CONFLICT,
            WorkflowError::InvalidStep { .. }
            | WorkflowError::EditRejected
            | WorkflowError::EmptyDraft
            | WorkflowError::NoActiveRecord
            | WorkflowError::NothingInFlight => StatusCode::BAD_REQUEST,
            WorkflowError::Ingestion(_) => StatusCode::UNPROCESSABLE_ENTITY,
            WorkflowError::Generation(GenerationError::Cancelled)
            | WorkflowError::Send(SendError::Cancelled) => StatusCode::CONFLICT,
            WorkflowError::Generation(GenerationError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            WorkflowError::Send(SendError::InvalidAddress { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            WorkflowError::Generation(_) | WorkflowError::Send(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        debug!(status = status.as_u16(), error = %self.0, "Request failed");

        let mut body = serde_json::json!({ "error": self.0.to_string() });
        if let WorkflowError::Ingestion(IngestionError::InvalidRows(issues)) = &self.0 {
            body["issues"] = serde_json::json!(issues);
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<WorkflowSnapshot>, ApiError>;

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "lead-reactivator"
    }))
}

// ── Batch ───────────────────────────────────────────────────────────────

async fn get_workflow(State(state): State<AppState>) -> Json<WorkflowSnapshot> {
    Json(state.controller.snapshot().await)
}

#[derive(Deserialize)]
struct LoadBatchRequest {
    rows: Vec<RawRow>,
    #[serde(default)]
    template: Option<String>,
}

async fn load_batch(State(state): State<AppState>, Json(body): Json<LoadBatchRequest>) -> ApiResult {
    info!(rows = body.rows.len(), "Batch upload received");
    let snapshot = state.controller.load_batch(&body.rows, body.template).await?;
    Ok(Json(snapshot))
}

async fn start_batch(State(state): State<AppState>) -> ApiResult {
    Ok(Json(state.controller.start_batch().await?))
}

#[derive(Deserialize)]
struct SingleRequest {
    email: String,
    website: String,
    #[serde(default)]
    template: Option<String>,
}

async fn start_single(State(state): State<AppState>, Json(body): Json<SingleRequest>) -> ApiResult {
    let snapshot = state
        .controller
        .start_single(&body.email, &body.website, body.template)
        .await?;
    Ok(Json(snapshot))
}

// ── Draft ───────────────────────────────────────────────────────────────

async fn edit_draft(State(state): State<AppState>) -> ApiResult {
    Ok(Json(state.controller.edit().await?))
}

#[derive(Deserialize)]
struct SubmitEditRequest {
    /// Replaces any instructions already set on the draft.
    #[serde(default)]
    instructions: Option<String>,
}

async fn submit_edit(
    State(state): State<AppState>,
    Json(body): Json<SubmitEditRequest>,
) -> ApiResult {
    if let Some(instructions) = body.instructions {
        state.controller.set_edit_instructions(instructions).await?;
    }
    Ok(Json(state.controller.submit_edit().await?))
}

async fn cancel_edit(State(state): State<AppState>) -> ApiResult {
    Ok(Json(state.controller.cancel_edit().await?))
}

async fn send_draft(State(state): State<AppState>) -> ApiResult {
    Ok(Json(state.controller.send().await?))
}

async fn retry_draft(State(state): State<AppState>) -> ApiResult {
    Ok(Json(state.controller.retry().await?))
}

async fn cancel_in_flight(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state.controller.cancel_in_flight().await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"status": "cancelling"})),
    ))
}

async fn reset(State(state): State<AppState>) -> ApiResult {
    Ok(Json(state.controller.reset().await?))
}
