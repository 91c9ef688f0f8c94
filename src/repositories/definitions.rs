use crate::db::models::EvaluationDefinition;

pub(crate) const COLUMNS: &str = "\
    id, kind, title, formation_ref, window_start, window_end, duration_limit_seconds, \
    max_attempts, pass_threshold, questions, file_slots, file_constraints, created_at, updated_at";

pub(crate) async fn find_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<EvaluationDefinition>, sqlx::Error> {
    sqlx::query_as::<_, EvaluationDefinition>(&format!(
        "SELECT {COLUMNS} FROM evaluation_definitions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await
}
