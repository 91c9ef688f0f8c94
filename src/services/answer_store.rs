use std::collections::HashMap;

use sqlx::types::Json;
use uuid::Uuid;

use crate::db::models::{AnswerValue, EvaluationSession, SessionAnswer};
use crate::db::types::{EvaluationKind, SessionState, SubmitTrigger};
use crate::repositories::store::StoreError;
use crate::services::engine::{EngineError, EvaluationEngine};
use crate::services::session_clock::is_past_deadline;
use crate::services::storage::sanitized_filename;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    Stored,
    /// Same revision and value as already stored; nothing changed.
    Duplicate,
}

impl WriteOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Stored => "stored",
            Self::Duplicate => "duplicate",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AnswerWrite {
    pub(crate) answer: SessionAnswer,
    pub(crate) outcome: WriteOutcome,
}

pub(crate) struct FileUpload {
    pub(crate) filename: String,
    pub(crate) mime_type: String,
    pub(crate) bytes: Vec<u8>,
}

impl EvaluationEngine {
    /// Learner-facing write of a choice or text answer. File values can only
    /// be produced by [`EvaluationEngine::upload_file`].
    pub(crate) async fn write_answer(
        &self,
        session_id: &str,
        slot_id: &str,
        value: AnswerValue,
        client_revision: i64,
    ) -> Result<AnswerWrite, EngineError> {
        if matches!(value, AnswerValue::File { .. }) {
            return Err(EngineError::InvalidAnswer(
                "file answers must be sent through the upload endpoint".to_string(),
            ));
        }

        self.store_answer(session_id, slot_id, value, client_revision).await
    }

    pub(crate) async fn upload_file(
        &self,
        session_id: &str,
        slot_id: &str,
        upload: FileUpload,
        client_revision: i64,
    ) -> Result<AnswerWrite, EngineError> {
        check_revision(client_revision)?;

        let session = self.get_session(session_id).await?;
        self.ensure_writable(&session).await?;

        let definition = self.definition(&session.definition_id).await?;
        if definition.kind != EvaluationKind::Assignment || !definition.has_file_slot(slot_id) {
            return Err(EngineError::InvalidAnswer(format!("unknown file slot {slot_id}")));
        }

        let constraints = definition
            .file_constraints
            .as_ref()
            .map(|constraints| constraints.0.clone())
            .ok_or_else(|| EngineError::Fatal("assignment without file constraints".to_string()))?;

        let size_bytes = upload.bytes.len() as i64;
        if size_bytes > constraints.max_file_size_bytes {
            return Err(EngineError::FileTooLarge { limit_bytes: constraints.max_file_size_bytes });
        }
        if !constraints.allowed_mime_types.is_empty()
            && !constraints
                .allowed_mime_types
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(&upload.mime_type))
        {
            return Err(EngineError::UnsupportedType(upload.mime_type));
        }

        let blobs = self.blobs()?;
        // A file never equals a stored one, so anything but a newer revision is stale.
        let existing = self.bounded(self.store().find_answer(session_id, slot_id)).await?;
        if let Some(existing) = existing {
            if client_revision <= existing.revision {
                metrics::counter!("answer_writes_total", "outcome" => "stale").increment(1);
                return Err(EngineError::StaleRevision { current_revision: existing.revision });
            }
        }

        let key = format!(
            "sessions/{session_id}/{slot_id}/{}_{}",
            Uuid::new_v4(),
            sanitized_filename(&upload.filename)
        );
        let stored = blobs.put(&key, &upload.mime_type, upload.bytes).await.map_err(|err| {
            tracing::warn!(session_id, slot_id, error = %err, "Blob upload failed");
            EngineError::Transient("file storage is unavailable, retry".to_string())
        })?;

        tracing::info!(
            session_id,
            slot_id,
            blob_ref = %stored.key,
            size_bytes = stored.size_bytes,
            "Stored uploaded file"
        );

        let value = AnswerValue::File {
            blob_ref: stored.key.clone(),
            filename: upload.filename,
            mime_type: upload.mime_type,
            size_bytes: stored.size_bytes,
            sha256: stored.sha256,
        };

        let result = self.store_answer(session_id, slot_id, value, client_revision).await;
        if result.is_err() {
            // Nothing references the blob once the answer write is rejected.
            if let Err(err) = blobs.delete(&stored.key).await {
                tracing::warn!(
                    session_id,
                    slot_id,
                    blob_ref = %stored.key,
                    error = %err,
                    "Failed to remove unreferenced upload"
                );
            }
        }
        result
    }

    /// Answers ordered by the definition's item order, unknown slots last.
    pub(crate) async fn read_answers(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionAnswer>, EngineError> {
        let session = self.get_session(session_id).await?;
        let definition = self.definition(&session.definition_id).await?;
        let mut answers = self.bounded(self.store().list_answers(session_id)).await?;

        let positions: HashMap<&str, usize> = definition
            .slot_order()
            .into_iter()
            .enumerate()
            .map(|(index, slot)| (slot, index))
            .collect();
        answers.sort_by(|a, b| {
            let left = positions.get(a.slot_id.as_str()).copied().unwrap_or(usize::MAX);
            let right = positions.get(b.slot_id.as_str()).copied().unwrap_or(usize::MAX);
            left.cmp(&right).then_with(|| a.slot_id.cmp(&b.slot_id))
        });

        Ok(answers)
    }

    /// Fetches the uploaded file behind a slot's `file` answer.
    pub(crate) async fn read_file(
        &self,
        session_id: &str,
        slot_id: &str,
    ) -> Result<(SessionAnswer, Vec<u8>), EngineError> {
        let answer = self
            .bounded(self.store().find_answer(session_id, slot_id))
            .await?
            .ok_or_else(|| EngineError::InvalidAnswer(format!("no file stored for {slot_id}")))?;

        let AnswerValue::File { blob_ref, .. } = &answer.value.0 else {
            return Err(EngineError::InvalidAnswer(format!("slot {slot_id} holds no file")));
        };

        let bytes = self.blobs()?.get(blob_ref).await.map_err(|err| {
            tracing::warn!(session_id, slot_id, error = %err, "Blob download failed");
            EngineError::Transient("file storage is unavailable, retry".to_string())
        })?;

        Ok((answer, bytes))
    }

    async fn store_answer(
        &self,
        session_id: &str,
        slot_id: &str,
        value: AnswerValue,
        client_revision: i64,
    ) -> Result<AnswerWrite, EngineError> {
        check_revision(client_revision)?;

        let mut session = self.get_session(session_id).await?;
        let definition = self.definition(&session.definition_id).await?;
        definition.check_answer(slot_id, &value).map_err(EngineError::InvalidAnswer)?;

        for attempt in 0..self.commit_attempts() {
            if attempt > 0 {
                session = self.get_session(session_id).await?;
            }
            self.ensure_writable(&session).await?;

            let existing = self.bounded(self.store().find_answer(session_id, slot_id)).await?;
            if let Some(existing) = existing {
                if client_revision < existing.revision
                    || (client_revision == existing.revision && existing.value.0 != value)
                {
                    metrics::counter!("answer_writes_total", "outcome" => "stale").increment(1);
                    return Err(EngineError::StaleRevision { current_revision: existing.revision });
                }
                if client_revision == existing.revision {
                    return Ok(record_write(existing, WriteOutcome::Duplicate));
                }
            }

            let answer = SessionAnswer {
                session_id: session_id.to_string(),
                slot_id: slot_id.to_string(),
                value: Json(value.clone()),
                revision: client_revision,
                captured_at: self.clock().now(),
            };

            match self.bounded(self.store().put_answer(session.version, answer)).await {
                Ok(stored) => return Ok(record_write(stored, WriteOutcome::Stored)),
                Err(StoreError::Conflict) => {
                    tracing::debug!(session_id, slot_id, attempt, "Answer write lost a version race");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(EngineError::Transient("session is busy, retry the write".to_string()))
    }

    /// Rejects writes to sessions that are not in progress or past their
    /// deadline. The latter also finalizes the session so the learner-facing
    /// "submission finalized" message is true.
    async fn ensure_writable(&self, session: &EvaluationSession) -> Result<(), EngineError> {
        if session.state != SessionState::InProgress {
            metrics::counter!("answer_writes_total", "outcome" => "inactive").increment(1);
            return Err(EngineError::SessionNotActive(session.state));
        }

        let now = self.clock().now();
        let expired = session.deadline.map_or(true, |deadline| is_past_deadline(deadline, now));
        if !expired {
            return Ok(());
        }

        metrics::counter!("answer_writes_total", "outcome" => "deadline_passed").increment(1);
        if let Err(err) = self.submit(&session.id, SubmitTrigger::DeadlineSweep).await {
            tracing::warn!(
                session_id = %session.id,
                error = %err,
                "Finalizing after late write failed; sweep will retry"
            );
        }
        Err(EngineError::DeadlinePassed)
    }
}

fn check_revision(client_revision: i64) -> Result<(), EngineError> {
    if client_revision < 1 {
        return Err(EngineError::InvalidAnswer("revision must be at least 1".to_string()));
    }
    Ok(())
}

fn record_write(answer: SessionAnswer, outcome: WriteOutcome) -> AnswerWrite {
    metrics::counter!("answer_writes_total", "outcome" => outcome.as_str()).increment(1);
    AnswerWrite { answer, outcome }
}
