use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::db::models::EvaluationSession;
use crate::db::types::{SessionState, SubmitTrigger};
use crate::repositories::store::NewSession;
use crate::services::engine::{EngineError, EvaluationEngine};
use crate::services::session_clock::{compute_deadline, is_expired, remaining_seconds, within_window};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RemainingTime {
    pub(crate) remaining_seconds: i64,
    pub(crate) deadline: Option<PrimitiveDateTime>,
}

impl EvaluationEngine {
    /// Opens a new attempt or resumes the open one for the pair.
    pub(crate) async fn open_session(
        &self,
        definition_id: &str,
        learner_id: &str,
    ) -> Result<EvaluationSession, EngineError> {
        let definition = self.definition(definition_id).await?;
        let now = self.clock().now();

        if !within_window(&definition, now) {
            return Err(EngineError::OutOfWindow);
        }

        for _ in 0..self.commit_attempts() {
            let latest =
                self.bounded(self.store().latest_for_pair(definition_id, learner_id)).await?;

            if let Some(session) = &latest {
                if is_expired(session, now) {
                    // Close the stale attempt before deciding on a new one.
                    self.submit(&session.id, SubmitTrigger::DeadlineSweep).await?;
                    continue;
                }
                if session.state.is_open() {
                    tracing::debug!(session_id = %session.id, "Resuming open session");
                    return Ok(session.clone());
                }
            }

            let attempts =
                self.bounded(self.store().count_attempts(definition_id, learner_id)).await?;
            if attempts >= i64::from(definition.max_attempts) {
                return Err(EngineError::AttemptsExhausted {
                    max_attempts: definition.max_attempts,
                });
            }

            let previous_session_id = latest
                .filter(|session| session.state == SessionState::Returned)
                .map(|session| session.id);

            let new_session = NewSession {
                id: Uuid::new_v4().to_string(),
                definition_id: definition_id.to_string(),
                learner_id: learner_id.to_string(),
                attempt_number: (attempts + 1) as i32,
                previous_session_id,
                state: SessionState::InProgress,
                opened_at: now,
                deadline: compute_deadline(&definition, now),
                created_at: now,
            };

            // None means a concurrent open won the attempt slot; re-read and resume it.
            if let Some(created) = self.bounded(self.store().insert_session(new_session)).await? {
                tracing::info!(
                    session_id = %created.id,
                    definition_id,
                    learner_id,
                    attempt_number = created.attempt_number,
                    revision_of = created.previous_session_id.as_deref().unwrap_or("-"),
                    "Evaluation session opened"
                );
                metrics::counter!("evaluation_sessions_opened_total").increment(1);
                return Ok(created);
            }
        }

        Err(EngineError::Transient("could not open session under contention, retry".to_string()))
    }

    /// Returns the session for continued work. An in-progress session past its
    /// deadline is finalized on the spot and reported as `Expired`.
    pub(crate) async fn resume_session(
        &self,
        session_id: &str,
    ) -> Result<EvaluationSession, EngineError> {
        let session = self.get_session(session_id).await?;

        if !is_expired(&session, self.clock().now()) {
            return Ok(session);
        }

        match self.submit(session_id, SubmitTrigger::DeadlineSweep).await {
            Ok(submitted) => Err(EngineError::Expired(Box::new(submitted))),
            Err(err) => {
                tracing::warn!(session_id, error = %err, "Auto-submission on resume failed");
                Err(EngineError::Transient(format!("auto-submission failed: {err}")))
            }
        }
    }

    pub(crate) async fn remaining_time(
        &self,
        session_id: &str,
    ) -> Result<RemainingTime, EngineError> {
        let session = self.get_session(session_id).await?;
        Ok(RemainingTime {
            remaining_seconds: remaining_seconds(&session, self.clock().now()),
            deadline: session.deadline,
        })
    }
}
