use sqlx::{PgPool, Postgres, QueryBuilder};
use time::PrimitiveDateTime;

use crate::db::models::EvaluationSession;
use crate::db::types::SessionState;
use crate::repositories::store::{ExpiredKey, NewSession};

pub(crate) const COLUMNS: &str = "\
    id, definition_id, learner_id, attempt_number, previous_session_id, state, \
    opened_at, deadline, submitted_at, submit_trigger, graded_at, auto_score, \
    manual_score, final_score, graded_by, feedback, version, created_at, updated_at";

pub(crate) async fn find_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<EvaluationSession>, sqlx::Error> {
    sqlx::query_as::<_, EvaluationSession>(&format!(
        "SELECT {COLUMNS} FROM evaluation_sessions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn find_latest_for_pair(
    executor: impl sqlx::PgExecutor<'_>,
    definition_id: &str,
    learner_id: &str,
) -> Result<Option<EvaluationSession>, sqlx::Error> {
    sqlx::query_as::<_, EvaluationSession>(&format!(
        "SELECT {COLUMNS} FROM evaluation_sessions \
         WHERE definition_id = $1 AND learner_id = $2 \
         ORDER BY attempt_number DESC LIMIT 1"
    ))
    .bind(definition_id)
    .bind(learner_id)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn count_by_definition_and_learner(
    executor: impl sqlx::PgExecutor<'_>,
    definition_id: &str,
    learner_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM evaluation_sessions WHERE definition_id = $1 AND learner_id = $2",
    )
    .bind(definition_id)
    .bind(learner_id)
    .fetch_one(executor)
    .await
}

pub(crate) async fn create(
    executor: impl sqlx::PgExecutor<'_>,
    session: &NewSession,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO evaluation_sessions (
            id, definition_id, learner_id, attempt_number, previous_session_id,
            state, opened_at, deadline, version, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,0,$9,$9)
        ON CONFLICT (definition_id, learner_id, attempt_number) DO NOTHING",
    )
    .bind(&session.id)
    .bind(&session.definition_id)
    .bind(&session.learner_id)
    .bind(session.attempt_number)
    .bind(&session.previous_session_id)
    .bind(session.state)
    .bind(session.opened_at)
    .bind(session.deadline)
    .bind(session.created_at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Compare-and-set of every field a transition may touch. `submitted_at` and
/// `submit_trigger` are only written when still unset.
pub(crate) async fn update_if_version(
    executor: impl sqlx::PgExecutor<'_>,
    expected_version: i64,
    session: &EvaluationSession,
    now: PrimitiveDateTime,
) -> Result<Option<EvaluationSession>, sqlx::Error> {
    sqlx::query_as::<_, EvaluationSession>(&format!(
        "UPDATE evaluation_sessions SET
            state = $3,
            submitted_at = COALESCE(submitted_at, $4),
            submit_trigger = COALESCE(submit_trigger, $5),
            graded_at = $6,
            auto_score = $7,
            manual_score = $8,
            final_score = $9,
            graded_by = $10,
            feedback = $11,
            version = version + 1,
            updated_at = $12
         WHERE id = $1 AND version = $2
         RETURNING {COLUMNS}"
    ))
    .bind(&session.id)
    .bind(expected_version)
    .bind(session.state)
    .bind(session.submitted_at)
    .bind(session.submit_trigger)
    .bind(session.graded_at)
    .bind(session.auto_score)
    .bind(session.manual_score)
    .bind(session.final_score)
    .bind(&session.graded_by)
    .bind(&session.feedback)
    .bind(now)
    .fetch_optional(executor)
    .await
}

/// Bumps the version of an in-progress session; false when it moved on.
pub(crate) async fn touch_in_progress(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    expected_version: i64,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE evaluation_sessions SET version = version + 1, updated_at = $3 \
         WHERE id = $1 AND version = $2 AND state = $4",
    )
    .bind(id)
    .bind(expected_version)
    .bind(now)
    .bind(SessionState::InProgress)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn list_expired_after(
    pool: &PgPool,
    now: PrimitiveDateTime,
    after: Option<&ExpiredKey>,
    limit: i64,
) -> Result<Vec<ExpiredKey>, sqlx::Error> {
    sqlx::query_as::<_, ExpiredKey>(
        "SELECT id, deadline FROM evaluation_sessions \
         WHERE state = $1 AND deadline < $2 \
           AND ($3::timestamp IS NULL OR (deadline, id) > ($3::timestamp, $4::text)) \
         ORDER BY deadline ASC, id ASC LIMIT $5",
    )
    .bind(SessionState::InProgress)
    .bind(now)
    .bind(after.map(|key| key.deadline))
    .bind(after.map(|key| key.id.as_str()))
    .bind(limit.clamp(1, 10_000))
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_pending_grading(
    pool: &PgPool,
    definition_id: Option<&str>,
    limit: i64,
) -> Result<Vec<EvaluationSession>, sqlx::Error> {
    let mut builder = QueryBuilder::<Postgres>::new(format!(
        "SELECT {COLUMNS} FROM evaluation_sessions WHERE state = "
    ));
    builder.push_bind(SessionState::Submitted);

    if let Some(definition_id) = definition_id {
        builder.push(" AND definition_id = ");
        builder.push_bind(definition_id);
    }

    builder.push(" ORDER BY submitted_at ASC, id ASC LIMIT ");
    builder.push_bind(limit.clamp(1, 500));

    builder.build_query_as::<EvaluationSession>().fetch_all(pool).await
}
