use async_trait::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::{header, request::Parts};

use crate::api::errors::ApiError;
use crate::core::security::{self, Role};
use crate::core::state::AppState;
use crate::db::models::EvaluationSession;

/// Caller identity taken from the platform-issued bearer token.
#[derive(Debug, Clone)]
pub(crate) struct CurrentIdentity {
    pub(crate) id: String,
    pub(crate) role: Role,
}

pub(crate) struct CurrentLearner(pub(crate) CurrentIdentity);
pub(crate) struct CurrentGrader(pub(crate) CurrentIdentity);

#[async_trait]
impl FromRequestParts<AppState> for CurrentIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let State(app_state) = State::<AppState>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to access application state"))?;

        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthorized("Invalid authentication credentials"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthorized("Invalid authentication credentials"))?;

        let claims = security::verify_token(token, app_state.settings())
            .map_err(|_| ApiError::Unauthorized("Invalid authentication credentials"))?;

        if claims.sub.trim().is_empty() {
            return Err(ApiError::Unauthorized("Invalid authentication credentials"));
        }

        Ok(CurrentIdentity { id: claims.sub, role: claims.role })
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentLearner {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let identity = CurrentIdentity::from_request_parts(parts, state).await?;

        if identity.role == Role::Learner {
            Ok(CurrentLearner(identity))
        } else {
            Err(ApiError::Forbidden("Learner access required"))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentGrader {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let identity = CurrentIdentity::from_request_parts(parts, state).await?;

        if identity.role == Role::Grader {
            Ok(CurrentGrader(identity))
        } else {
            Err(ApiError::Forbidden("Grader access required"))
        }
    }
}

/// Learners only reach their own sessions; graders reach every session.
pub(crate) fn ensure_can_view(
    identity: &CurrentIdentity,
    session: &EvaluationSession,
) -> Result<(), ApiError> {
    match identity.role {
        Role::Grader => Ok(()),
        Role::Learner if session.learner_id == identity.id => Ok(()),
        Role::Learner => Err(ApiError::Forbidden("Access denied")),
    }
}

/// Work on a session is reserved for the learner who owns it.
pub(crate) fn ensure_owner(
    learner: &CurrentLearner,
    session: &EvaluationSession,
) -> Result<(), ApiError> {
    if session.learner_id == learner.0.id {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Access denied"))
    }
}
