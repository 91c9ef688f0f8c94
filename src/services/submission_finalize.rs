use time::PrimitiveDateTime;

use crate::db::models::EvaluationSession;
use crate::db::types::{SessionState, SubmitTrigger};
use crate::repositories::store::StoreError;
use crate::services::engine::{EngineError, EvaluationEngine};
use crate::services::scoring::{auto_score, complete_grading, AUTO_GRADER};
use crate::services::session_clock::is_past_deadline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinalizeMode {
    OnTime,
    AtDeadline,
}

impl FinalizeMode {
    fn resolve(
        trigger: SubmitTrigger,
        deadline: Option<PrimitiveDateTime>,
        now: PrimitiveDateTime,
    ) -> Self {
        let late = deadline.is_some_and(|deadline| is_past_deadline(deadline, now));
        if late || trigger == SubmitTrigger::DeadlineSweep {
            Self::AtDeadline
        } else {
            Self::OnTime
        }
    }

    fn submitted_at(
        self,
        deadline: Option<PrimitiveDateTime>,
        now: PrimitiveDateTime,
    ) -> PrimitiveDateTime {
        match (self, deadline) {
            (Self::AtDeadline, Some(deadline)) if deadline < now => deadline,
            _ => now,
        }
    }

    fn trigger(self, requested: SubmitTrigger) -> SubmitTrigger {
        match self {
            Self::OnTime => requested,
            Self::AtDeadline => SubmitTrigger::DeadlineSweep,
        }
    }
}

impl EvaluationEngine {
    /// Single path for learner, resume-triggered and sweep-triggered
    /// submission. Finalized sessions are returned unchanged.
    pub(crate) async fn submit(
        &self,
        session_id: &str,
        trigger: SubmitTrigger,
    ) -> Result<EvaluationSession, EngineError> {
        for attempt in 0..self.commit_attempts() {
            let session = self.get_session(session_id).await?;
            match session.state {
                SessionState::NotStarted => {
                    return Err(EngineError::SessionNotActive(session.state));
                }
                SessionState::Submitted | SessionState::Graded | SessionState::Returned => {
                    return Ok(session);
                }
                SessionState::InProgress => {}
            }

            let definition = self.definition(&session.definition_id).await?;
            let answers = self.bounded(self.store().list_answers(session_id)).await?;

            let now = self.clock().now();
            let mode = FinalizeMode::resolve(trigger, session.deadline, now);

            let mut next = session.clone();
            next.state = SessionState::Submitted;
            next.submitted_at = Some(mode.submitted_at(session.deadline, now));
            next.submit_trigger = Some(mode.trigger(trigger));
            next.auto_score = Some(auto_score(&definition, &answers));
            next.updated_at = now;

            let event = (!definition.has_manual_items())
                .then(|| complete_grading(&mut next, &definition, None, AUTO_GRADER, None, now));

            match self
                .bounded(self.store().update_session(session.version, &next, event.as_ref()))
                .await
            {
                Ok(updated) => {
                    let recorded = updated.submit_trigger.unwrap_or(trigger);
                    tracing::info!(
                        session_id,
                        trigger = recorded.as_str(),
                        state = updated.state.as_str(),
                        auto_score = updated.auto_score,
                        "Session submitted"
                    );
                    metrics::counter!("submissions_total", "trigger" => recorded.as_str())
                        .increment(1);
                    return Ok(updated);
                }
                Err(StoreError::Conflict) => {
                    tracing::debug!(session_id, attempt, "Submission lost a version race");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(EngineError::Transient("session is busy, retry the submission".to_string()))
    }
}
