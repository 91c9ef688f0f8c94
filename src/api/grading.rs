use axum::{
    extract::{Path, Query, State},
    routing::{get, patch, post},
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentGrader;
use crate::api::sessions::session_response;
use crate::core::state::AppState;
use crate::schemas::session::{FeedbackRequest, GradeRequest, PendingQuery, SessionResponse};

/// Grader actions on a single session, mounted under `/sessions`.
pub(crate) fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/:session_id/grade", post(grade_session))
        .route("/:session_id/return", post(return_session))
        .route("/:session_id/feedback", patch(amend_feedback))
}

pub(crate) fn router() -> Router<AppState> {
    Router::new().route("/pending", get(pending_grading))
}

async fn grade_session(
    Path(session_id): Path<String>,
    CurrentGrader(grader): CurrentGrader,
    State(state): State<AppState>,
    Json(payload): Json<GradeRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let session =
        state.engine().grade(&session_id, &grader.id, payload.score, payload.feedback).await?;
    Ok(Json(session_response(&state, session)))
}

async fn return_session(
    Path(session_id): Path<String>,
    CurrentGrader(grader): CurrentGrader,
    State(state): State<AppState>,
    Json(payload): Json<FeedbackRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let session =
        state.engine().return_for_revision(&session_id, &grader.id, payload.feedback).await?;
    Ok(Json(session_response(&state, session)))
}

async fn amend_feedback(
    Path(session_id): Path<String>,
    CurrentGrader(grader): CurrentGrader,
    State(state): State<AppState>,
    Json(payload): Json<FeedbackRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let session = state.engine().amend_feedback(&session_id, &grader.id, payload.feedback).await?;
    Ok(Json(session_response(&state, session)))
}

async fn pending_grading(
    CurrentGrader(_grader): CurrentGrader,
    State(state): State<AppState>,
    Query(query): Query<PendingQuery>,
) -> Result<Json<Vec<SessionResponse>>, ApiError> {
    let sessions =
        state.engine().pending_grading(query.definition_id.as_deref(), query.limit).await?;
    Ok(Json(sessions.into_iter().map(|session| session_response(&state, session)).collect()))
}
