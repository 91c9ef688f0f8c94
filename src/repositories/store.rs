use async_trait::async_trait;
use thiserror::Error;
use time::PrimitiveDateTime;

use crate::db::models::{EvaluationSession, GradedEvent, SessionAnswer};
use crate::db::types::SessionState;

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    /// The row changed since it was read; reload and re-evaluate.
    #[error("session version conflict")]
    Conflict,
    #[error("transient store failure: {0}")]
    Transient(String),
    #[error("store failure: {0}")]
    Fatal(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => Self::Transient(err.to_string()),
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // serialization_failure, deadlock_detected, admin_shutdown, cannot_connect_now
                Some("40001" | "40P01" | "57P01" | "57P03") => Self::Transient(err.to_string()),
                _ => Self::Fatal(err.to_string()),
            },
            _ => Self::Fatal(err.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct NewSession {
    pub(crate) id: String,
    pub(crate) definition_id: String,
    pub(crate) learner_id: String,
    pub(crate) attempt_number: i32,
    /// Returned attempt whose answers seed this one.
    pub(crate) previous_session_id: Option<String>,
    pub(crate) state: SessionState,
    pub(crate) opened_at: PrimitiveDateTime,
    pub(crate) deadline: PrimitiveDateTime,
    pub(crate) created_at: PrimitiveDateTime,
}

/// Position of an expired session in the sweep scan, ordered by deadline then id.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub(crate) struct ExpiredKey {
    pub(crate) id: String,
    pub(crate) deadline: PrimitiveDateTime,
}

/// Durable session state. Every mutation is a compare-and-set on the
/// session's `version` and runs as a single transaction.
#[async_trait]
pub(crate) trait SessionStore: Send + Sync {
    async fn find_session(&self, id: &str) -> Result<Option<EvaluationSession>, StoreError>;

    async fn latest_for_pair(
        &self,
        definition_id: &str,
        learner_id: &str,
    ) -> Result<Option<EvaluationSession>, StoreError>;

    async fn count_attempts(&self, definition_id: &str, learner_id: &str)
        -> Result<i64, StoreError>;

    /// `None` when another open already claimed the attempt number.
    async fn insert_session(
        &self,
        session: NewSession,
    ) -> Result<Option<EvaluationSession>, StoreError>;

    async fn list_answers(&self, session_id: &str) -> Result<Vec<SessionAnswer>, StoreError>;

    async fn find_answer(
        &self,
        session_id: &str,
        slot_id: &str,
    ) -> Result<Option<SessionAnswer>, StoreError>;

    /// Upserts the answer while the session is still `in_progress` at
    /// `expected_version`, bumping the version.
    async fn put_answer(
        &self,
        expected_version: i64,
        answer: SessionAnswer,
    ) -> Result<SessionAnswer, StoreError>;

    /// Persists the mutable session fields, plus the graded event when one is
    /// given, if the stored version still equals `expected_version`.
    async fn update_session(
        &self,
        expected_version: i64,
        session: &EvaluationSession,
        event: Option<&GradedEvent>,
    ) -> Result<EvaluationSession, StoreError>;

    /// In-progress sessions past their deadline, strictly after `after` in
    /// `(deadline, id)` order.
    async fn list_expired(
        &self,
        now: PrimitiveDateTime,
        after: Option<&ExpiredKey>,
        limit: i64,
    ) -> Result<Vec<ExpiredKey>, StoreError>;

    async fn list_pending_grading(
        &self,
        definition_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<EvaluationSession>, StoreError>;
}

/// Outbox of graded events awaiting webhook delivery.
#[async_trait]
pub(crate) trait EventOutbox: Send + Sync {
    /// Leases up to `limit` undelivered events that are due and below
    /// `max_attempts` by moving their `next_attempt_at` to `lease_until`.
    async fn claim_due(
        &self,
        now: PrimitiveDateTime,
        lease_until: PrimitiveDateTime,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<GradedEvent>, StoreError>;

    async fn mark_delivered(&self, id: &str, now: PrimitiveDateTime) -> Result<(), StoreError>;

    async fn mark_failed(
        &self,
        id: &str,
        error: &str,
        next_attempt_at: PrimitiveDateTime,
    ) -> Result<(), StoreError>;
}
