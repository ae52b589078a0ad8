//! HTTP handlers for the review surface

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use crate::error::PipelineError;
use crate::pipeline::{summarize, ReviewProgress, ReviewStage};
use crate::server::ServerState;

/// Review submission: either a human score and rationale, or `accept`
#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub id: String,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub accept: bool,
}

/// Pipeline errors mapped onto HTTP statuses
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            PipelineError::InvalidReview(_) => (StatusCode::BAD_REQUEST, "invalid_review"),
            PipelineError::ArticleNotFound { .. } => (StatusCode::NOT_FOUND, "article_not_found"),
            PipelineError::BatchNotFound(_) => (StatusCode::NOT_FOUND, "batch_not_found"),
            PipelineError::AlreadyReviewed { .. } => (StatusCode::CONFLICT, "already_reviewed"),
            PipelineError::NotScored { .. } => (StatusCode::CONFLICT, "not_scored"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            error!("Review request failed: {}", self.0);
        } else {
            warn!("Review request rejected: {}", self.0);
        }
        (status, Json(json!({ "error": kind, "message": self.0.to_string() }))).into_response()
    }
}

/// All archived batches with their review counts, newest first
pub async fn list_batches_handler(State(state): State<ServerState>) -> Result<Response, ApiError> {
    let mut batches = Vec::new();
    for date in state.store.list_batches()? {
        match state.store.load_batch(date) {
            Ok(batch) => batches.push(ReviewProgress::of(&batch)),
            Err(e) => warn!("Skipping unreadable batch {}: {}", date, e),
        }
    }
    Ok(Json(batches).into_response())
}

pub async fn progress_handler(
    State(state): State<ServerState>,
    Path(date): Path<NaiveDate>,
) -> Result<Response, ApiError> {
    let progress = ReviewStage::new(&state.store).progress(date)?;
    Ok(Json(progress).into_response())
}

/// Next record awaiting review, or 204 once the batch is done
pub async fn next_handler(
    State(state): State<ServerState>,
    Path(date): Path<NaiveDate>,
) -> Result<Response, ApiError> {
    match ReviewStage::new(&state.store).next_pending(date)? {
        Some(record) => Ok(Json(record).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

pub async fn pending_handler(
    State(state): State<ServerState>,
    Path(date): Path<NaiveDate>,
) -> Result<Response, ApiError> {
    let pending = ReviewStage::new(&state.store).pending(date)?;
    Ok(Json(pending).into_response())
}

pub async fn review_handler(
    State(state): State<ServerState>,
    Path(date): Path<NaiveDate>,
    Json(req): Json<ReviewRequest>,
) -> Result<Response, ApiError> {
    let stage = ReviewStage::new(&state.store);
    let record = if req.accept {
        stage.accept_automated(date, &req.id)?
    } else {
        let score = req
            .score
            .ok_or_else(|| PipelineError::InvalidReview("score is required unless accepting".to_string()))?;
        stage.submit_review(date, &req.id, score, req.rationale.as_deref().unwrap_or(""))?
    };
    Ok(Json(record).into_response())
}

/// The batch's output set as it stands now
pub async fn summary_handler(
    State(state): State<ServerState>,
    Path(date): Path<NaiveDate>,
) -> Result<Response, ApiError> {
    let batch = state.store.load_batch(date)?;
    Ok(Json(summarize(&batch, &state.summary_options)).into_response())
}
