use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::grading;
use crate::api::guards::{ensure_can_view, ensure_owner, CurrentIdentity, CurrentLearner};
use crate::core::{config::Settings, state::AppState};
use crate::db::models::{AnswerValue, EvaluationSession};
use crate::db::types::SubmitTrigger;
use crate::schemas::session::{
    AnswerResponse, AnswerWriteResponse, OpenSessionRequest, RemainingTimeResponse,
    SessionResponse, WriteAnswerRequest,
};
use crate::services::answer_store::FileUpload;
use crate::services::engine::EngineError;
use crate::services::session_clock::remaining_seconds;
use crate::services::storage::sanitized_filename;

/// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub(crate) fn router(settings: &Settings) -> Router<AppState> {
    let max_upload_bytes = upload_limit_bytes(settings);

    Router::new()
        .route("/", post(open_session))
        .route("/:session_id", get(get_session))
        .route("/:session_id/remaining", get(get_remaining))
        .route("/:session_id/answers", get(list_answers))
        .route("/:session_id/answers/:slot_id", put(write_answer))
        .route(
            "/:session_id/files/:slot_id",
            post(upload_file)
                .get(download_file)
                .layer(DefaultBodyLimit::max(max_upload_bytes + MULTIPART_OVERHEAD_BYTES)),
        )
        .route("/:session_id/submit", post(submit_session))
        .merge(grading::session_routes())
}

fn upload_limit_bytes(settings: &Settings) -> usize {
    usize::try_from(settings.storage().max_upload_size_mb.saturating_mul(1024 * 1024))
        .unwrap_or(usize::MAX - MULTIPART_OVERHEAD_BYTES)
}

pub(crate) fn session_response(state: &AppState, session: EvaluationSession) -> SessionResponse {
    let remaining = remaining_seconds(&session, state.engine().clock().now());
    SessionResponse::new(session, remaining)
}

async fn open_session(
    CurrentLearner(learner): CurrentLearner,
    State(state): State<AppState>,
    Json(payload): Json<OpenSessionRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let session = state.engine().open_session(&payload.definition_id, &learner.id).await?;
    Ok(Json(session_response(&state, session)))
}

/// Resume: a session found past its deadline is finalized and answered with 423.
async fn get_session(
    Path(session_id): Path<String>,
    identity: CurrentIdentity,
    State(state): State<AppState>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.engine().get_session(&session_id).await?;
    ensure_can_view(&identity, &session)?;

    let session = state.engine().resume_session(&session_id).await?;
    Ok(Json(session_response(&state, session)))
}

async fn get_remaining(
    Path(session_id): Path<String>,
    identity: CurrentIdentity,
    State(state): State<AppState>,
) -> Result<Json<RemainingTimeResponse>, ApiError> {
    let session = state.engine().get_session(&session_id).await?;
    ensure_can_view(&identity, &session)?;

    let remaining = state.engine().remaining_time(&session_id).await?;
    Ok(Json(remaining.into()))
}

async fn list_answers(
    Path(session_id): Path<String>,
    identity: CurrentIdentity,
    State(state): State<AppState>,
) -> Result<Json<Vec<AnswerResponse>>, ApiError> {
    let session = state.engine().get_session(&session_id).await?;
    ensure_can_view(&identity, &session)?;

    let answers = state.engine().read_answers(&session_id).await?;
    Ok(Json(answers.into_iter().map(AnswerResponse::from).collect()))
}

async fn write_answer(
    Path((session_id, slot_id)): Path<(String, String)>,
    learner: CurrentLearner,
    State(state): State<AppState>,
    Json(payload): Json<WriteAnswerRequest>,
) -> Result<Json<AnswerWriteResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let session = state.engine().get_session(&session_id).await?;
    ensure_owner(&learner, &session)?;

    let write = state
        .engine()
        .write_answer(&session_id, &slot_id, payload.value, payload.revision)
        .await?;
    Ok(Json(write.into()))
}

async fn upload_file(
    Path((session_id, slot_id)): Path<(String, String)>,
    learner: CurrentLearner,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AnswerWriteResponse>, ApiError> {
    let session = state.engine().get_session(&session_id).await?;
    ensure_owner(&learner, &session)?;

    let max_bytes = upload_limit_bytes(state.settings());
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut revision: Option<i64> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::BadRequest("Invalid multipart data".to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" {
            filename = field.file_name().map(|s| s.to_string());
            content_type = field.content_type().map(|s| s.to_string());
            let mut bytes = Vec::new();
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|_| ApiError::BadRequest("Failed to read file".to_string()))?
            {
                if bytes.len() + chunk.len() > max_bytes {
                    let limit_bytes = i64::try_from(max_bytes).unwrap_or(i64::MAX);
                    return Err(EngineError::FileTooLarge { limit_bytes }.into());
                }
                bytes.extend_from_slice(&chunk);
            }
            file_bytes = Some(bytes);
        } else if name == "revision" {
            let text = field
                .text()
                .await
                .map_err(|_| ApiError::BadRequest("Invalid revision".to_string()))?;
            revision = Some(text.trim().parse::<i64>().map_err(|_| {
                ApiError::BadRequest("revision must be a valid integer".to_string())
            })?);
        }
    }

    let bytes = file_bytes.ok_or_else(|| ApiError::BadRequest("File is required".to_string()))?;
    let revision =
        revision.ok_or_else(|| ApiError::BadRequest("revision is required".to_string()))?;
    let upload = FileUpload {
        filename: filename.unwrap_or_else(|| "upload".to_string()),
        mime_type: content_type.unwrap_or_else(|| "application/octet-stream".to_string()),
        bytes,
    };

    let write = state.engine().upload_file(&session_id, &slot_id, upload, revision).await?;
    Ok(Json(write.into()))
}

async fn download_file(
    Path((session_id, slot_id)): Path<(String, String)>,
    identity: CurrentIdentity,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let session = state.engine().get_session(&session_id).await?;
    ensure_can_view(&identity, &session)?;

    let (answer, bytes) = state.engine().read_file(&session_id, &slot_id).await?;
    let AnswerValue::File { filename, mime_type, .. } = answer.value.0 else {
        return Err(ApiError::NotFound("File not found".to_string()));
    };

    let mut response = bytes.into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&mime_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    let disposition = format!("attachment; filename=\"{}\"", sanitized_filename(&filename));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

async fn submit_session(
    Path(session_id): Path<String>,
    learner: CurrentLearner,
    State(state): State<AppState>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.engine().get_session(&session_id).await?;
    ensure_owner(&learner, &session)?;

    let session = state.engine().submit(&session_id, SubmitTrigger::Learner).await?;
    Ok(Json(session_response(&state, session)))
}
