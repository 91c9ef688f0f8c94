use crate::db::models::SessionAnswer;

pub(crate) const COLUMNS: &str = "session_id, slot_id, value, revision, captured_at";

pub(crate) async fn list_by_session(
    executor: impl sqlx::PgExecutor<'_>,
    session_id: &str,
) -> Result<Vec<SessionAnswer>, sqlx::Error> {
    sqlx::query_as::<_, SessionAnswer>(&format!(
        "SELECT {COLUMNS} FROM session_answers WHERE session_id = $1 ORDER BY slot_id"
    ))
    .bind(session_id)
    .fetch_all(executor)
    .await
}

pub(crate) async fn find(
    executor: impl sqlx::PgExecutor<'_>,
    session_id: &str,
    slot_id: &str,
) -> Result<Option<SessionAnswer>, sqlx::Error> {
    sqlx::query_as::<_, SessionAnswer>(&format!(
        "SELECT {COLUMNS} FROM session_answers WHERE session_id = $1 AND slot_id = $2"
    ))
    .bind(session_id)
    .bind(slot_id)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn upsert(
    executor: impl sqlx::PgExecutor<'_>,
    answer: &SessionAnswer,
) -> Result<SessionAnswer, sqlx::Error> {
    sqlx::query_as::<_, SessionAnswer>(&format!(
        "INSERT INTO session_answers (session_id, slot_id, value, revision, captured_at)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (session_id, slot_id) DO UPDATE SET
            value = EXCLUDED.value,
            revision = EXCLUDED.revision,
            captured_at = EXCLUDED.captured_at
         RETURNING {COLUMNS}"
    ))
    .bind(&answer.session_id)
    .bind(&answer.slot_id)
    .bind(&answer.value)
    .bind(answer.revision)
    .bind(answer.captured_at)
    .fetch_one(executor)
    .await
}

/// Seeds a revision attempt with the answers of the attempt it replaces.
pub(crate) async fn copy_to_session(
    executor: impl sqlx::PgExecutor<'_>,
    from_session_id: &str,
    to_session_id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO session_answers (session_id, slot_id, value, revision, captured_at)
         SELECT $2, slot_id, value, revision, captured_at
         FROM session_answers WHERE session_id = $1",
    )
    .bind(from_session_id)
    .bind(to_session_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}
