use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::{format_optional, format_primitive};
use crate::db::models::{AnswerValue, EvaluationSession, SessionAnswer};
use crate::db::types::{SessionState, SubmitTrigger};
use crate::services::answer_store::{AnswerWrite, WriteOutcome};
use crate::services::session_controller::RemainingTime;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct OpenSessionRequest {
    #[serde(alias = "definitionId")]
    #[validate(length(min = 1, max = 128, message = "definition_id must not be empty"))]
    pub(crate) definition_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct WriteAnswerRequest {
    pub(crate) value: AnswerValue,
    #[validate(range(min = 1, message = "revision must be at least 1"))]
    pub(crate) revision: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct GradeRequest {
    #[validate(range(min = 0.0, message = "score must be non-negative"))]
    pub(crate) score: f64,
    #[serde(default)]
    #[validate(length(max = 10000, message = "feedback is too long"))]
    pub(crate) feedback: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct FeedbackRequest {
    #[serde(default)]
    #[validate(length(max = 10000, message = "feedback is too long"))]
    pub(crate) feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PendingQuery {
    #[serde(default)]
    pub(crate) definition_id: Option<String>,
    #[serde(default = "default_pending_limit")]
    pub(crate) limit: u32,
}

fn default_pending_limit() -> u32 {
    50
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SessionResponse {
    pub(crate) id: String,
    pub(crate) definition_id: String,
    pub(crate) learner_id: String,
    pub(crate) attempt_number: i32,
    pub(crate) previous_session_id: Option<String>,
    pub(crate) state: SessionState,
    pub(crate) opened_at: Option<String>,
    pub(crate) deadline: Option<String>,
    pub(crate) submitted_at: Option<String>,
    pub(crate) submit_trigger: Option<SubmitTrigger>,
    pub(crate) graded_at: Option<String>,
    pub(crate) auto_score: Option<f64>,
    pub(crate) manual_score: Option<f64>,
    pub(crate) final_score: Option<f64>,
    pub(crate) graded_by: Option<String>,
    pub(crate) feedback: Option<String>,
    /// Advisory countdown computed by the server at response time.
    pub(crate) remaining_seconds: i64,
}

impl SessionResponse {
    pub(crate) fn new(session: EvaluationSession, remaining_seconds: i64) -> Self {
        Self {
            id: session.id,
            definition_id: session.definition_id,
            learner_id: session.learner_id,
            attempt_number: session.attempt_number,
            previous_session_id: session.previous_session_id,
            state: session.state,
            opened_at: format_optional(session.opened_at),
            deadline: format_optional(session.deadline),
            submitted_at: format_optional(session.submitted_at),
            submit_trigger: session.submit_trigger,
            graded_at: format_optional(session.graded_at),
            auto_score: session.auto_score,
            manual_score: session.manual_score,
            final_score: session.final_score,
            graded_by: session.graded_by,
            feedback: session.feedback,
            remaining_seconds,
        }
    }

    /// For sessions that are no longer counting down.
    pub(crate) fn closed(session: EvaluationSession) -> Self {
        Self::new(session, 0)
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct RemainingTimeResponse {
    pub(crate) remaining_seconds: i64,
    pub(crate) deadline: Option<String>,
}

impl From<RemainingTime> for RemainingTimeResponse {
    fn from(remaining: RemainingTime) -> Self {
        Self {
            remaining_seconds: remaining.remaining_seconds,
            deadline: format_optional(remaining.deadline),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AnswerResponse {
    pub(crate) slot_id: String,
    pub(crate) value: AnswerValue,
    pub(crate) revision: i64,
    pub(crate) captured_at: String,
}

impl From<SessionAnswer> for AnswerResponse {
    fn from(answer: SessionAnswer) -> Self {
        Self {
            slot_id: answer.slot_id,
            value: answer.value.0,
            revision: answer.revision,
            captured_at: format_primitive(answer.captured_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AnswerWriteResponse {
    #[serde(flatten)]
    pub(crate) answer: AnswerResponse,
    pub(crate) duplicate: bool,
}

impl From<AnswerWrite> for AnswerWriteResponse {
    fn from(write: AnswerWrite) -> Self {
        Self {
            duplicate: write.outcome == WriteOutcome::Duplicate,
            answer: write.answer.into(),
        }
    }
}
