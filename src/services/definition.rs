use std::collections::HashSet;

use thiserror::Error;

use crate::db::models::{AnswerValue, EvaluationDefinition, Question};
use crate::db::types::{EvaluationKind, QuestionType};

#[derive(Debug, Error, PartialEq)]
pub(crate) enum DefinitionError {
    #[error("window_end must be after window_start")]
    EmptyWindow,
    #[error("max_attempts must be at least 1")]
    NoAttempts,
    #[error("pass_threshold must be a non-negative number")]
    InvalidThreshold,
    #[error("exam must contain at least one question")]
    NoQuestions,
    #[error("exam point total must be positive")]
    NoPoints,
    #[error("item {0} has invalid points")]
    InvalidPoints(String),
    #[error("duplicate item id {0}")]
    DuplicateItem(String),
    #[error("single-choice question {0} needs options and a correct answer among them")]
    InvalidChoice(String),
    #[error("duration_limit must be positive and fit inside the window")]
    InvalidDuration,
    #[error("assignments are deadline-bound and cannot carry a duration")]
    DurationOnAssignment,
    #[error("assignment must declare file constraints with a positive max_file_size_bytes")]
    InvalidFileConstraints,
    #[error("assignment must declare at least one file slot")]
    NoFileSlots,
    #[error("{0} items do not belong to this kind of evaluation")]
    MixedItems(&'static str),
}

impl EvaluationDefinition {
    pub(crate) fn validate(&self) -> Result<(), DefinitionError> {
        if self.window_end <= self.window_start {
            return Err(DefinitionError::EmptyWindow);
        }
        if self.max_attempts < 1 {
            return Err(DefinitionError::NoAttempts);
        }
        if let Some(threshold) = self.pass_threshold {
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(DefinitionError::InvalidThreshold);
            }
        }

        match self.kind {
            EvaluationKind::Exam => self.validate_exam(),
            EvaluationKind::Assignment => self.validate_assignment(),
        }
    }

    fn validate_exam(&self) -> Result<(), DefinitionError> {
        if !self.file_slots.0.is_empty() || self.file_constraints.is_some() {
            return Err(DefinitionError::MixedItems("file"));
        }
        if self.questions.0.is_empty() {
            return Err(DefinitionError::NoQuestions);
        }

        if let Some(seconds) = self.duration_limit_seconds {
            let window_seconds = (self.window_end - self.window_start).whole_seconds();
            if seconds <= 0 || seconds > window_seconds {
                return Err(DefinitionError::InvalidDuration);
            }
        }

        let mut seen = HashSet::new();
        for question in &self.questions.0 {
            if !seen.insert(question.id.as_str()) {
                return Err(DefinitionError::DuplicateItem(question.id.clone()));
            }
            check_points(&question.id, question.points)?;
            if question.question_type == QuestionType::SingleChoice && !has_valid_choice(question)
            {
                return Err(DefinitionError::InvalidChoice(question.id.clone()));
            }
        }

        if self.total_points() <= 0.0 {
            return Err(DefinitionError::NoPoints);
        }

        Ok(())
    }

    fn validate_assignment(&self) -> Result<(), DefinitionError> {
        if self.duration_limit_seconds.is_some() {
            return Err(DefinitionError::DurationOnAssignment);
        }
        if !self.questions.0.is_empty() {
            return Err(DefinitionError::MixedItems("question"));
        }
        match &self.file_constraints {
            Some(constraints) if constraints.0.max_file_size_bytes > 0 => {}
            _ => return Err(DefinitionError::InvalidFileConstraints),
        }
        if self.file_slots.0.is_empty() {
            return Err(DefinitionError::NoFileSlots);
        }

        let mut seen = HashSet::new();
        for slot in &self.file_slots.0 {
            if !seen.insert(slot.id.as_str()) {
                return Err(DefinitionError::DuplicateItem(slot.id.clone()));
            }
            check_points(&slot.id, slot.points)?;
        }

        Ok(())
    }

    pub(crate) fn total_points(&self) -> f64 {
        let questions: f64 = self.questions.0.iter().map(|q| q.points).sum();
        let slots: f64 = self.file_slots.0.iter().map(|s| s.points).sum();
        questions + slots
    }

    /// Points that need a human: free-text, essay and every file slot.
    pub(crate) fn manual_points(&self) -> f64 {
        let questions: f64 = self
            .questions
            .0
            .iter()
            .filter(|q| !q.question_type.is_auto_gradable())
            .map(|q| q.points)
            .sum();
        let slots: f64 = self.file_slots.0.iter().map(|s| s.points).sum();
        questions + slots
    }

    pub(crate) fn has_manual_items(&self) -> bool {
        !self.file_slots.0.is_empty()
            || self.questions.0.iter().any(|q| !q.question_type.is_auto_gradable())
    }

    /// Item ids in the order the definition lists them.
    pub(crate) fn slot_order(&self) -> Vec<&str> {
        match self.kind {
            EvaluationKind::Exam => self.questions.0.iter().map(|q| q.id.as_str()).collect(),
            EvaluationKind::Assignment => {
                self.file_slots.0.iter().map(|s| s.id.as_str()).collect()
            }
        }
    }

    pub(crate) fn question(&self, slot_id: &str) -> Option<&Question> {
        self.questions.0.iter().find(|q| q.id == slot_id)
    }

    pub(crate) fn has_file_slot(&self, slot_id: &str) -> bool {
        self.file_slots.0.iter().any(|s| s.id == slot_id)
    }

    /// Checks that `value` fits the slot it targets.
    pub(crate) fn check_answer(&self, slot_id: &str, value: &AnswerValue) -> Result<(), String> {
        match self.kind {
            EvaluationKind::Exam => {
                let question =
                    self.question(slot_id).ok_or_else(|| format!("unknown question {slot_id}"))?;
                match (question.question_type, value) {
                    (QuestionType::SingleChoice, AnswerValue::Choice { option }) => {
                        if question.options.iter().any(|candidate| candidate == option) {
                            Ok(())
                        } else {
                            Err(format!("option {option} is not offered by question {slot_id}"))
                        }
                    }
                    (QuestionType::FreeText | QuestionType::Essay, AnswerValue::Text { .. }) => {
                        Ok(())
                    }
                    _ => Err(format!("answer type does not match question {slot_id}")),
                }
            }
            EvaluationKind::Assignment => {
                if !self.has_file_slot(slot_id) {
                    return Err(format!("unknown file slot {slot_id}"));
                }
                match value {
                    AnswerValue::File { .. } => Ok(()),
                    _ => Err(format!("slot {slot_id} only accepts file uploads")),
                }
            }
        }
    }
}

fn check_points(id: &str, points: f64) -> Result<(), DefinitionError> {
    if points.is_finite() && points >= 0.0 {
        Ok(())
    } else {
        Err(DefinitionError::InvalidPoints(id.to_string()))
    }
}

fn has_valid_choice(question: &Question) -> bool {
    match &question.correct_answer {
        Some(answer) => question.options.iter().any(|option| option == answer),
        None => false,
    }
}
