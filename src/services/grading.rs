use time::PrimitiveDateTime;

use crate::db::models::{EvaluationDefinition, EvaluationSession, GradedEvent};
use crate::db::types::{EvaluationKind, SessionState};
use crate::repositories::store::StoreError;
use crate::services::engine::{EngineError, EvaluationEngine};
use crate::services::scoring::complete_grading;

pub(crate) const MAX_PENDING_LIMIT: u32 = 500;

impl EvaluationEngine {
    /// Records the manual part of the score and finishes grading.
    pub(crate) async fn grade(
        &self,
        session_id: &str,
        grader_id: &str,
        manual_score: f64,
        feedback: Option<String>,
    ) -> Result<EvaluationSession, EngineError> {
        let graded = self
            .staff_transition(session_id, "grade", |session, definition, now| {
                if session.state != SessionState::Submitted {
                    return Err(EngineError::NotSubmitted(session.state));
                }
                let max = definition.manual_points();
                if !manual_score.is_finite() || manual_score < 0.0 || manual_score > max {
                    return Err(EngineError::ScoreOutOfRange { max });
                }

                let event = complete_grading(
                    session,
                    definition,
                    Some(manual_score),
                    grader_id,
                    feedback.clone(),
                    now,
                );
                Ok(Some(event))
            })
            .await?;

        tracing::info!(
            session_id,
            grader_id,
            final_score = graded.final_score,
            "Session graded"
        );
        metrics::counter!("gradings_total", "outcome" => "graded").increment(1);
        Ok(graded)
    }

    /// Hands an assignment back to the learner. The next open creates a new
    /// attempt seeded with these answers.
    pub(crate) async fn return_for_revision(
        &self,
        session_id: &str,
        grader_id: &str,
        feedback: Option<String>,
    ) -> Result<EvaluationSession, EngineError> {
        let returned = self
            .staff_transition(session_id, "return", |session, definition, now| {
                if definition.kind != EvaluationKind::Assignment {
                    return Err(EngineError::RevisionNotSupported);
                }
                if session.state != SessionState::Submitted {
                    return Err(EngineError::NotSubmitted(session.state));
                }

                session.state = SessionState::Returned;
                session.graded_by = Some(grader_id.to_string());
                session.feedback = feedback.clone();
                session.updated_at = now;
                Ok(None)
            })
            .await?;

        tracing::info!(session_id, grader_id, "Session returned for revision");
        metrics::counter!("gradings_total", "outcome" => "returned").increment(1);
        Ok(returned)
    }

    pub(crate) async fn amend_feedback(
        &self,
        session_id: &str,
        grader_id: &str,
        feedback: Option<String>,
    ) -> Result<EvaluationSession, EngineError> {
        self.staff_transition(session_id, "amend_feedback", |session, _, now| {
            if session.state != SessionState::Graded {
                return Err(EngineError::NotGraded(session.state));
            }

            session.feedback = feedback.clone();
            session.updated_at = now;
            Ok(None)
        })
        .await
        .inspect(|_| tracing::info!(session_id, grader_id, "Feedback amended"))
    }

    /// Submitted sessions awaiting a grader, oldest submission first.
    pub(crate) async fn pending_grading(
        &self,
        definition_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<EvaluationSession>, EngineError> {
        let limit = limit.clamp(1, MAX_PENDING_LIMIT);
        Ok(self
            .bounded(self.store().list_pending_grading(definition_id, i64::from(limit)))
            .await?)
    }

    /// Loads the session, applies `apply` and commits it with optimistic
    /// retries. `apply` may return the graded event to commit with it.
    async fn staff_transition<F>(
        &self,
        session_id: &str,
        operation: &'static str,
        apply: F,
    ) -> Result<EvaluationSession, EngineError>
    where
        F: Fn(
            &mut EvaluationSession,
            &EvaluationDefinition,
            PrimitiveDateTime,
        ) -> Result<Option<GradedEvent>, EngineError>,
    {
        for attempt in 0..self.commit_attempts() {
            let session = self.get_session(session_id).await?;
            let definition = self.definition(&session.definition_id).await?;

            let mut next = session.clone();
            let event = apply(&mut next, &definition, self.clock().now())?;

            match self
                .bounded(self.store().update_session(session.version, &next, event.as_ref()))
                .await
            {
                Ok(updated) => return Ok(updated),
                Err(StoreError::Conflict) => {
                    tracing::debug!(session_id, operation, attempt, "Grading lost a version race");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(EngineError::Transient(format!("session is busy, retry {operation}")))
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use crate::db::models::AnswerValue;
    use crate::db::types::{SessionState, SubmitTrigger};
    use crate::services::answer_store::FileUpload;
    use crate::services::engine::EngineError;
    use crate::test_support::{choice, EngineHarness};

    fn report() -> FileUpload {
        FileUpload {
            filename: "report.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            bytes: b"%PDF-1.7 draft".to_vec(),
        }
    }

    #[tokio::test]
    async fn assignment_is_graded_by_staff() {
        let harness = EngineHarness::assignment();
        let session =
            harness.engine.open_session("assignment-1", "learner-1").await.expect("open");
        harness.engine.upload_file(&session.id, "report", report(), 1).await.expect("upload");
        let submitted =
            harness.engine.submit(&session.id, SubmitTrigger::Learner).await.expect("submit");
        assert_eq!(submitted.state, SessionState::Submitted);

        let graded = harness
            .engine
            .grade(&session.id, "grader-1", 15.0, Some("solid work".to_string()))
            .await
            .expect("grade");

        assert_eq!(graded.state, SessionState::Graded);
        assert_eq!(graded.manual_score, Some(15.0));
        assert_eq!(graded.final_score, Some(15.0));
        assert_eq!(graded.graded_by.as_deref(), Some("grader-1"));

        let events = harness.store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].final_score, 15.0);
        assert_eq!(events[0].passed, Some(true));
    }

    #[tokio::test]
    async fn grade_rejects_out_of_range_scores() {
        let harness = EngineHarness::assignment();
        let session =
            harness.engine.open_session("assignment-1", "learner-1").await.expect("open");
        harness.engine.submit(&session.id, SubmitTrigger::Learner).await.expect("submit");

        for score in [-1.0, 20.5, f64::NAN] {
            let err = harness.engine.grade(&session.id, "grader-1", score, None).await.unwrap_err();
            assert!(matches!(err, EngineError::ScoreOutOfRange { max } if max == 20.0));
        }
        assert!(harness.store.events().is_empty());
    }

    #[tokio::test]
    async fn grade_requires_submitted_session() {
        let harness = EngineHarness::assignment();
        let session =
            harness.engine.open_session("assignment-1", "learner-1").await.expect("open");

        let err = harness.engine.grade(&session.id, "grader-1", 10.0, None).await.unwrap_err();
        assert!(matches!(err, EngineError::NotSubmitted(SessionState::InProgress)));
        assert_eq!(err.to_string(), "not yet submitted");
    }

    #[tokio::test]
    async fn returned_assignment_seeds_next_attempt() {
        let harness = EngineHarness::assignment();
        let first =
            harness.engine.open_session("assignment-1", "learner-1").await.expect("open");
        harness.engine.upload_file(&first.id, "report", report(), 1).await.expect("upload");
        harness.engine.submit(&first.id, SubmitTrigger::Learner).await.expect("submit");

        let returned = harness
            .engine
            .return_for_revision(&first.id, "grader-1", Some("add references".to_string()))
            .await
            .expect("return");
        assert_eq!(returned.state, SessionState::Returned);
        assert_eq!(returned.feedback.as_deref(), Some("add references"));

        harness.clock.advance(Duration::hours(1));
        let second =
            harness.engine.open_session("assignment-1", "learner-1").await.expect("reopen");

        assert_eq!(second.attempt_number, 2);
        assert_eq!(second.previous_session_id.as_deref(), Some(first.id.as_str()));
        let answers = harness.engine.read_answers(&second.id).await.expect("answers");
        assert_eq!(answers.len(), 1);
        assert!(matches!(answers[0].value.0, AnswerValue::File { .. }));

        // Copied revision 1 is already taken; the learner continues from 2.
        let rewrite = harness.engine.upload_file(&second.id, "report", report(), 1).await;
        assert!(matches!(rewrite, Err(EngineError::StaleRevision { current_revision: 1 })));
        harness.engine.upload_file(&second.id, "report", report(), 2).await.expect("revise");
    }

    #[tokio::test]
    async fn exams_cannot_be_returned() {
        let harness = EngineHarness::exam_with_essay(Some(1800));
        let session = harness.engine.open_session("exam-1", "learner-1").await.expect("open");
        harness.engine.submit(&session.id, SubmitTrigger::Learner).await.expect("submit");

        let err =
            harness.engine.return_for_revision(&session.id, "grader-1", None).await.unwrap_err();
        assert!(matches!(err, EngineError::RevisionNotSupported));
    }

    #[tokio::test]
    async fn feedback_amendment_needs_graded_session() {
        let harness = EngineHarness::exam(Some(1800));
        let session = harness.engine.open_session("exam-1", "learner-1").await.expect("open");
        harness.engine.write_answer(&session.id, "q1", choice("B"), 1).await.expect("write");

        let early = harness.engine.amend_feedback(&session.id, "grader-1", None).await;
        assert!(matches!(early, Err(EngineError::NotGraded(SessionState::InProgress))));

        harness.engine.submit(&session.id, SubmitTrigger::Learner).await.expect("submit");
        let amended = harness
            .engine
            .amend_feedback(&session.id, "grader-1", Some("well done".to_string()))
            .await
            .expect("amend");

        assert_eq!(amended.feedback.as_deref(), Some("well done"));
        assert_eq!(amended.final_score, Some(10.0));
        assert_eq!(harness.store.events().len(), 1);
    }

    #[tokio::test]
    async fn pending_grading_lists_oldest_submission_first() {
        let harness = EngineHarness::assignment();
        let mut ids = Vec::new();
        for learner in ["learner-a", "learner-b"] {
            let session =
                harness.engine.open_session("assignment-1", learner).await.expect("open");
            harness.engine.submit(&session.id, SubmitTrigger::Learner).await.expect("submit");
            harness.clock.advance(Duration::minutes(5));
            ids.push(session.id);
        }
        let open = harness.engine.open_session("assignment-1", "learner-c").await.expect("open");

        let pending =
            harness.engine.pending_grading(Some("assignment-1"), 10).await.expect("pending");
        let pending_ids: Vec<String> = pending.into_iter().map(|s| s.id).collect();

        assert_eq!(pending_ids, ids);
        assert!(!pending_ids.contains(&open.id));
        assert!(harness.engine.pending_grading(Some("other"), 0).await.expect("none").is_empty());
    }
}
