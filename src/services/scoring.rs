use std::collections::HashMap;

use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::db::models::{
    AnswerValue, EvaluationDefinition, EvaluationSession, GradedEvent, SessionAnswer,
};
use crate::db::types::{QuestionType, SessionState};

pub(crate) const AUTO_GRADER: &str = "auto";

/// Sum of points of single-choice questions answered with the correct option.
pub(crate) fn auto_score(definition: &EvaluationDefinition, answers: &[SessionAnswer]) -> f64 {
    let by_slot: HashMap<&str, &AnswerValue> =
        answers.iter().map(|answer| (answer.slot_id.as_str(), &answer.value.0)).collect();

    definition
        .questions
        .0
        .iter()
        .filter(|question| question.question_type == QuestionType::SingleChoice)
        .filter(|question| match (by_slot.get(question.id.as_str()), &question.correct_answer) {
            (Some(AnswerValue::Choice { option }), Some(correct)) => option == correct,
            _ => false,
        })
        .map(|question| question.points)
        .sum()
}

pub(crate) fn final_score(auto: f64, manual: f64, total_points: f64) -> f64 {
    (auto + manual).clamp(0.0, total_points.max(0.0))
}

pub(crate) fn passed(final_score: f64, threshold: Option<f64>) -> Option<bool> {
    threshold.map(|threshold| final_score >= threshold)
}

/// Moves `session` to `graded` and builds the outbox event that must be
/// committed together with it.
pub(crate) fn complete_grading(
    session: &mut EvaluationSession,
    definition: &EvaluationDefinition,
    manual_score: Option<f64>,
    graded_by: &str,
    feedback: Option<String>,
    now: PrimitiveDateTime,
) -> GradedEvent {
    let auto = session.auto_score.unwrap_or(0.0);
    let total = final_score(auto, manual_score.unwrap_or(0.0), definition.total_points());

    session.manual_score = manual_score;
    session.final_score = Some(total);
    session.graded_by = Some(graded_by.to_string());
    session.feedback = feedback;
    session.graded_at = Some(now);
    session.state = SessionState::Graded;

    GradedEvent {
        id: Uuid::new_v4().to_string(),
        session_id: session.id.clone(),
        learner_id: session.learner_id.clone(),
        definition_id: session.definition_id.clone(),
        final_score: total,
        passed: passed(total, definition.pass_threshold),
        graded_at: now,
        attempts: 0,
        last_error: None,
        next_attempt_at: now,
        delivered_at: None,
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{answer, exam_definition, open_session_at};
    use time::macros::datetime;

    #[test]
    fn auto_score_counts_only_correct_choices() {
        let definition = exam_definition(
            datetime!(2025-05-01 09:00:00),
            datetime!(2025-05-01 18:00:00),
            Some(1800),
        );

        let right = [answer("s", "q1", AnswerValue::Choice { option: "B".into() }, 1)];
        let wrong = [answer("s", "q1", AnswerValue::Choice { option: "C".into() }, 1)];

        assert_eq!(auto_score(&definition, &right), 10.0);
        assert_eq!(auto_score(&definition, &wrong), 0.0);
        assert_eq!(auto_score(&definition, &[]), 0.0);
    }

    #[test]
    fn final_score_is_clamped_to_total() {
        assert_eq!(final_score(10.0, 15.0, 20.0), 20.0);
        assert_eq!(final_score(0.0, 15.0, 20.0), 15.0);
        assert_eq!(final_score(-3.0, 0.0, 20.0), 0.0);
    }

    #[test]
    fn passed_is_undefined_without_threshold() {
        assert_eq!(passed(12.0, None), None);
        assert_eq!(passed(12.0, Some(12.0)), Some(true));
        assert_eq!(passed(11.5, Some(12.0)), Some(false));
    }

    #[test]
    fn complete_grading_builds_matching_event() {
        let definition = exam_definition(
            datetime!(2025-05-01 09:00:00),
            datetime!(2025-05-01 18:00:00),
            Some(1800),
        );
        let mut session =
            open_session_at(datetime!(2025-05-01 10:00:00), datetime!(2025-05-01 10:30:00));
        session.state = SessionState::Submitted;
        session.auto_score = Some(10.0);

        let now = datetime!(2025-05-01 10:31:00);
        let event = complete_grading(&mut session, &definition, None, AUTO_GRADER, None, now);

        assert_eq!(session.state, SessionState::Graded);
        assert_eq!(session.final_score, Some(10.0));
        assert_eq!(session.graded_by.as_deref(), Some("auto"));
        assert_eq!(event.session_id, session.id);
        assert_eq!(event.final_score, 10.0);
        assert_eq!(event.passed, Some(true));
        assert_eq!(event.next_attempt_at, now);
    }
}
