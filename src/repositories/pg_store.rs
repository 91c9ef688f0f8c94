use async_trait::async_trait;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::core::time::primitive_now_utc;
use crate::db::models::{EvaluationSession, GradedEvent, SessionAnswer};
use crate::repositories::store::{EventOutbox, ExpiredKey, NewSession, SessionStore, StoreError};
use crate::repositories::{answers, events, sessions};

#[derive(Debug, Clone)]
pub(crate) struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn find_session(&self, id: &str) -> Result<Option<EvaluationSession>, StoreError> {
        Ok(sessions::find_by_id(&self.pool, id).await?)
    }

    async fn latest_for_pair(
        &self,
        definition_id: &str,
        learner_id: &str,
    ) -> Result<Option<EvaluationSession>, StoreError> {
        Ok(sessions::find_latest_for_pair(&self.pool, definition_id, learner_id).await?)
    }

    async fn count_attempts(
        &self,
        definition_id: &str,
        learner_id: &str,
    ) -> Result<i64, StoreError> {
        Ok(sessions::count_by_definition_and_learner(&self.pool, definition_id, learner_id).await?)
    }

    async fn insert_session(
        &self,
        session: NewSession,
    ) -> Result<Option<EvaluationSession>, StoreError> {
        let mut tx = self.pool.begin().await?;

        if !sessions::create(&mut *tx, &session).await? {
            return Ok(None);
        }

        if let Some(previous_id) = session.previous_session_id.as_deref() {
            let copied = answers::copy_to_session(&mut *tx, previous_id, &session.id).await?;
            tracing::debug!(
                session_id = %session.id,
                previous_session_id = previous_id,
                copied,
                "Seeded revision attempt with previous answers"
            );
        }

        let created = sessions::find_by_id(&mut *tx, &session.id)
            .await?
            .ok_or_else(|| StoreError::Fatal("session missing after insert".to_string()))?;
        tx.commit().await?;

        Ok(Some(created))
    }

    async fn list_answers(&self, session_id: &str) -> Result<Vec<SessionAnswer>, StoreError> {
        Ok(answers::list_by_session(&self.pool, session_id).await?)
    }

    async fn find_answer(
        &self,
        session_id: &str,
        slot_id: &str,
    ) -> Result<Option<SessionAnswer>, StoreError> {
        Ok(answers::find(&self.pool, session_id, slot_id).await?)
    }

    async fn put_answer(
        &self,
        expected_version: i64,
        answer: SessionAnswer,
    ) -> Result<SessionAnswer, StoreError> {
        let mut tx = self.pool.begin().await?;

        let touched = sessions::touch_in_progress(
            &mut *tx,
            &answer.session_id,
            expected_version,
            primitive_now_utc(),
        )
        .await?;
        if !touched {
            return Err(StoreError::Conflict);
        }

        let stored = answers::upsert(&mut *tx, &answer).await?;
        tx.commit().await?;

        Ok(stored)
    }

    async fn update_session(
        &self,
        expected_version: i64,
        session: &EvaluationSession,
        event: Option<&GradedEvent>,
    ) -> Result<EvaluationSession, StoreError> {
        let mut tx = self.pool.begin().await?;

        let Some(updated) =
            sessions::update_if_version(&mut *tx, expected_version, session, primitive_now_utc())
                .await?
        else {
            return Err(StoreError::Conflict);
        };

        if let Some(event) = event {
            events::insert(&mut *tx, event).await?;
        }

        tx.commit().await?;
        Ok(updated)
    }

    async fn list_expired(
        &self,
        now: PrimitiveDateTime,
        after: Option<&ExpiredKey>,
        limit: i64,
    ) -> Result<Vec<ExpiredKey>, StoreError> {
        Ok(sessions::list_expired_after(&self.pool, now, after, limit).await?)
    }

    async fn list_pending_grading(
        &self,
        definition_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<EvaluationSession>, StoreError> {
        Ok(sessions::list_pending_grading(&self.pool, definition_id, limit).await?)
    }
}

#[async_trait]
impl EventOutbox for PgSessionStore {
    async fn claim_due(
        &self,
        now: PrimitiveDateTime,
        lease_until: PrimitiveDateTime,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<GradedEvent>, StoreError> {
        Ok(events::claim_due(&self.pool, now, lease_until, max_attempts, limit).await?)
    }

    async fn mark_delivered(&self, id: &str, now: PrimitiveDateTime) -> Result<(), StoreError> {
        Ok(events::mark_delivered(&self.pool, id, now).await?)
    }

    async fn mark_failed(
        &self,
        id: &str,
        error: &str,
        next_attempt_at: PrimitiveDateTime,
    ) -> Result<(), StoreError> {
        Ok(events::mark_failed(&self.pool, id, error, next_attempt_at).await?)
    }
}
