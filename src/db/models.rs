use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{EvaluationKind, QuestionType, SessionState, SubmitTrigger};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Question {
    pub(crate) id: String,
    #[serde(rename = "type")]
    pub(crate) question_type: QuestionType,
    pub(crate) prompt: String,
    #[serde(default)]
    pub(crate) options: Vec<String>,
    pub(crate) points: f64,
    #[serde(default)]
    pub(crate) correct_answer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct FileSlot {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct FileConstraints {
    pub(crate) max_file_size_bytes: i64,
    /// Empty means any MIME type is accepted.
    #[serde(default)]
    pub(crate) allowed_mime_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct EvaluationDefinition {
    pub(crate) id: String,
    pub(crate) kind: EvaluationKind,
    pub(crate) title: String,
    pub(crate) formation_ref: Option<String>,
    pub(crate) window_start: PrimitiveDateTime,
    pub(crate) window_end: PrimitiveDateTime,
    pub(crate) duration_limit_seconds: Option<i64>,
    pub(crate) max_attempts: i32,
    pub(crate) pass_threshold: Option<f64>,
    pub(crate) questions: Json<Vec<Question>>,
    pub(crate) file_slots: Json<Vec<FileSlot>>,
    pub(crate) file_constraints: Option<Json<FileConstraints>>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct EvaluationSession {
    pub(crate) id: String,
    pub(crate) definition_id: String,
    pub(crate) learner_id: String,
    pub(crate) attempt_number: i32,
    pub(crate) previous_session_id: Option<String>,
    pub(crate) state: SessionState,
    pub(crate) opened_at: Option<PrimitiveDateTime>,
    pub(crate) deadline: Option<PrimitiveDateTime>,
    pub(crate) submitted_at: Option<PrimitiveDateTime>,
    pub(crate) submit_trigger: Option<SubmitTrigger>,
    pub(crate) graded_at: Option<PrimitiveDateTime>,
    pub(crate) auto_score: Option<f64>,
    pub(crate) manual_score: Option<f64>,
    pub(crate) final_score: Option<f64>,
    pub(crate) graded_by: Option<String>,
    pub(crate) feedback: Option<String>,
    pub(crate) version: i64,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

/// Captured value of one slot. File values only ever come from the upload
/// path, which fills in the blob reference and digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnswerValue {
    Choice {
        option: String,
    },
    Text {
        text: String,
    },
    File {
        blob_ref: String,
        filename: String,
        mime_type: String,
        size_bytes: i64,
        sha256: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct SessionAnswer {
    pub(crate) session_id: String,
    pub(crate) slot_id: String,
    pub(crate) value: Json<AnswerValue>,
    pub(crate) revision: i64,
    pub(crate) captured_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct GradedEvent {
    pub(crate) id: String,
    pub(crate) session_id: String,
    pub(crate) learner_id: String,
    pub(crate) definition_id: String,
    pub(crate) final_score: f64,
    pub(crate) passed: Option<bool>,
    pub(crate) graded_at: PrimitiveDateTime,
    pub(crate) attempts: i32,
    pub(crate) last_error: Option<String>,
    pub(crate) next_attempt_at: PrimitiveDateTime,
    pub(crate) delivered_at: Option<PrimitiveDateTime>,
    pub(crate) created_at: PrimitiveDateTime,
}
