use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "evaluationkind", rename_all = "lowercase")]
pub(crate) enum EvaluationKind {
    Exam,
    Assignment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "sessionstate", rename_all = "snake_case")]
pub(crate) enum SessionState {
    NotStarted,
    InProgress,
    Submitted,
    Graded,
    Returned,
}

impl SessionState {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Submitted => "submitted",
            Self::Graded => "graded",
            Self::Returned => "returned",
        }
    }

    /// States an open call resumes instead of starting a new attempt.
    pub(crate) fn is_open(self) -> bool {
        matches!(self, Self::NotStarted | Self::InProgress)
    }

    /// Submission already happened; the finalizer treats these as no-ops.
    pub(crate) fn is_finalized(self) -> bool {
        matches!(self, Self::Submitted | Self::Graded | Self::Returned)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "submittrigger", rename_all = "snake_case")]
pub(crate) enum SubmitTrigger {
    Learner,
    DeadlineSweep,
}

impl SubmitTrigger {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Learner => "learner",
            Self::DeadlineSweep => "deadline_sweep",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum QuestionType {
    SingleChoice,
    FreeText,
    Essay,
}

impl QuestionType {
    pub(crate) fn is_auto_gradable(self) -> bool {
        matches!(self, Self::SingleChoice)
    }
}
