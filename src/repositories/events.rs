use time::PrimitiveDateTime;

use crate::db::models::GradedEvent;

pub(crate) const COLUMNS: &str = "\
    id, session_id, learner_id, definition_id, final_score, passed, graded_at, \
    attempts, last_error, next_attempt_at, delivered_at, created_at";

pub(crate) async fn insert(
    executor: impl sqlx::PgExecutor<'_>,
    event: &GradedEvent,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO graded_events (
            id, session_id, learner_id, definition_id, final_score, passed, graded_at,
            attempts, last_error, next_attempt_at, delivered_at, created_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)",
    )
    .bind(&event.id)
    .bind(&event.session_id)
    .bind(&event.learner_id)
    .bind(&event.definition_id)
    .bind(event.final_score)
    .bind(event.passed)
    .bind(event.graded_at)
    .bind(event.attempts)
    .bind(&event.last_error)
    .bind(event.next_attempt_at)
    .bind(event.delivered_at)
    .bind(event.created_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Leases due events by pushing `next_attempt_at` forward so concurrent
/// workers skip them until the lease runs out.
pub(crate) async fn claim_due(
    executor: impl sqlx::PgExecutor<'_>,
    now: PrimitiveDateTime,
    lease_until: PrimitiveDateTime,
    max_attempts: i32,
    limit: i64,
) -> Result<Vec<GradedEvent>, sqlx::Error> {
    sqlx::query_as::<_, GradedEvent>(&format!(
        "WITH candidate AS (
            SELECT id FROM graded_events
            WHERE delivered_at IS NULL
              AND attempts < $3
              AND next_attempt_at <= $1
            ORDER BY next_attempt_at, created_at
            FOR UPDATE SKIP LOCKED
            LIMIT $4
        )
        UPDATE graded_events
        SET next_attempt_at = $2
        FROM candidate
        WHERE graded_events.id = candidate.id
        RETURNING {}",
        prefixed_columns()
    ))
    .bind(now)
    .bind(lease_until)
    .bind(max_attempts)
    .bind(limit.clamp(1, 1000))
    .fetch_all(executor)
    .await
}

pub(crate) async fn mark_delivered(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE graded_events SET delivered_at = $2, attempts = attempts + 1, last_error = NULL \
         WHERE id = $1",
    )
    .bind(id)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn mark_failed(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    error: &str,
    next_attempt_at: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE graded_events SET attempts = attempts + 1, last_error = $2, next_attempt_at = $3 \
         WHERE id = $1",
    )
    .bind(id)
    .bind(error)
    .bind(next_attempt_at)
    .execute(executor)
    .await?;
    Ok(())
}

fn prefixed_columns() -> String {
    COLUMNS
        .split(',')
        .map(|column| format!("graded_events.{}", column.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}
