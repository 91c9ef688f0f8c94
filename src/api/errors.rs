use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::db::types::SessionState;
use crate::schemas::session::SessionResponse;
use crate::services::engine::EngineError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_revision: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<SessionResponse>,
}

impl ErrorResponse {
    fn new(status: StatusCode, detail: String) -> Self {
        Self { status: status.as_u16(), detail, current_revision: None, session: None }
    }
}

#[derive(Debug)]
pub(crate) enum ApiError {
    Unauthorized(&'static str),
    Forbidden(&'static str),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    StaleRevision { current_revision: i64 },
    /// 423: the session no longer accepts work. Carries the finalized session
    /// when the request itself triggered finalization.
    Locked { detail: String, session: Option<Box<SessionResponse>> },
    ServiceUnavailable(String),
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let detail = err.to_string();
        match err {
            EngineError::OutOfWindow
            | EngineError::AttemptsExhausted { .. }
            | EngineError::FileTooLarge { .. }
            | EngineError::UnsupportedType(_)
            | EngineError::ScoreOutOfRange { .. }
            | EngineError::RevisionNotSupported
            | EngineError::InvalidAnswer(_) => Self::BadRequest(detail),
            EngineError::SessionNotFound | EngineError::DefinitionNotFound => {
                Self::NotFound(detail)
            }
            EngineError::SessionNotActive(_) | EngineError::DeadlinePassed => {
                Self::Locked { detail, session: None }
            }
            EngineError::Expired(session) => Self::Locked {
                detail,
                session: Some(Box::new(SessionResponse::closed(*session))),
            },
            EngineError::StaleRevision { current_revision } => {
                Self::StaleRevision { current_revision }
            }
            EngineError::NotSubmitted(state) => match state {
                SessionState::NotStarted | SessionState::InProgress => Self::Conflict(detail),
                _ => Self::Conflict("session is not awaiting grading".to_string()),
            },
            EngineError::NotGraded(_) => Self::Conflict(detail),
            EngineError::Transient(_) | EngineError::BlobStoreUnavailable => {
                Self::ServiceUnavailable(detail)
            }
            EngineError::InvalidDefinition(_) | EngineError::Fatal(_) => {
                Self::internal(detail, "Evaluation engine failure")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(message) => {
                let status = StatusCode::UNAUTHORIZED;
                let mut response =
                    (status, Json(ErrorResponse::new(status, message.to_string()))).into_response();
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                response
            }
            ApiError::Forbidden(message) => {
                let status = StatusCode::FORBIDDEN;
                (status, Json(ErrorResponse::new(status, message.to_string()))).into_response()
            }
            ApiError::BadRequest(message) => {
                let status = StatusCode::BAD_REQUEST;
                (status, Json(ErrorResponse::new(status, message))).into_response()
            }
            ApiError::NotFound(message) => {
                let status = StatusCode::NOT_FOUND;
                (status, Json(ErrorResponse::new(status, message))).into_response()
            }
            ApiError::Conflict(message) => {
                let status = StatusCode::CONFLICT;
                (status, Json(ErrorResponse::new(status, message))).into_response()
            }
            ApiError::StaleRevision { current_revision } => {
                let status = StatusCode::CONFLICT;
                let body = ErrorResponse {
                    current_revision: Some(current_revision),
                    ..ErrorResponse::new(
                        status,
                        format!("stale revision, current revision is {current_revision}"),
                    )
                };
                (status, Json(body)).into_response()
            }
            ApiError::Locked { detail, session } => {
                let status = StatusCode::LOCKED;
                let body =
                    ErrorResponse { session: session.map(|s| *s), ..ErrorResponse::new(status, detail) };
                (status, Json(body)).into_response()
            }
            ApiError::ServiceUnavailable(message) => {
                tracing::warn!(error = %message, "Service unavailable");
                let status = StatusCode::SERVICE_UNAVAILABLE;
                let mut response =
                    (status, Json(ErrorResponse::new(status, message))).into_response();
                response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
                response
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                let status = StatusCode::INTERNAL_SERVER_ERROR;
                (status, Json(ErrorResponse::new(status, message))).into_response()
            }
        }
    }
}
