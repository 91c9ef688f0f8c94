use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use time::PrimitiveDateTime;

use crate::db::models::{EvaluationSession, GradedEvent, SessionAnswer};
use crate::db::types::SessionState;
use crate::repositories::store::{
    EventOutbox, ExpiredKey, NewSession, SessionStore, StoreError,
};

/// In-process store with the same compare-and-set contract as the Postgres one,
/// plus fault injection for retry paths.
#[derive(Default)]
pub(crate) struct MemorySessionStore {
    inner: Mutex<Inner>,
    conflicts: AtomicU32,
    transient_failures: AtomicU32,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, EvaluationSession>,
    answers: HashMap<(String, String), SessionAnswer>,
    events: Vec<GradedEvent>,
    transitions: u32,
}

impl MemorySessionStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The next `count` mutations fail with a version conflict.
    pub(crate) fn inject_conflicts(&self, count: u32) {
        self.conflicts.store(count, Ordering::SeqCst);
    }

    /// The next `count` mutations fail as transient.
    pub(crate) fn inject_transient_failures(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn events(&self) -> Vec<GradedEvent> {
        self.lock().events.clone()
    }

    /// Number of committed `update_session` calls.
    pub(crate) fn transitions(&self) -> u32 {
        self.lock().transitions
    }

    pub(crate) fn insert_raw(&self, session: EvaluationSession) {
        self.lock().sessions.insert(session.id.clone(), session);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn injected_failure(&self) -> Option<StoreError> {
        if take_one(&self.transient_failures) {
            return Some(StoreError::Transient("injected transient failure".to_string()));
        }
        if take_one(&self.conflicts) {
            return Some(StoreError::Conflict);
        }
        None
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |value| value.checked_sub(1)).is_ok()
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find_session(&self, id: &str) -> Result<Option<EvaluationSession>, StoreError> {
        Ok(self.lock().sessions.get(id).cloned())
    }

    async fn latest_for_pair(
        &self,
        definition_id: &str,
        learner_id: &str,
    ) -> Result<Option<EvaluationSession>, StoreError> {
        Ok(self
            .lock()
            .sessions
            .values()
            .filter(|s| s.definition_id == definition_id && s.learner_id == learner_id)
            .max_by_key(|s| s.attempt_number)
            .cloned())
    }

    async fn count_attempts(
        &self,
        definition_id: &str,
        learner_id: &str,
    ) -> Result<i64, StoreError> {
        Ok(self
            .lock()
            .sessions
            .values()
            .filter(|s| s.definition_id == definition_id && s.learner_id == learner_id)
            .count() as i64)
    }

    async fn insert_session(
        &self,
        session: NewSession,
    ) -> Result<Option<EvaluationSession>, StoreError> {
        let mut inner = self.lock();
        let taken = inner.sessions.values().any(|s| {
            s.definition_id == session.definition_id
                && s.learner_id == session.learner_id
                && s.attempt_number == session.attempt_number
        });
        if taken {
            return Ok(None);
        }

        let created = EvaluationSession {
            id: session.id.clone(),
            definition_id: session.definition_id,
            learner_id: session.learner_id,
            attempt_number: session.attempt_number,
            previous_session_id: session.previous_session_id.clone(),
            state: session.state,
            opened_at: Some(session.opened_at),
            deadline: Some(session.deadline),
            submitted_at: None,
            submit_trigger: None,
            graded_at: None,
            auto_score: None,
            manual_score: None,
            final_score: None,
            graded_by: None,
            feedback: None,
            version: 0,
            created_at: session.created_at,
            updated_at: session.created_at,
        };

        if let Some(previous_id) = session.previous_session_id {
            let copied: Vec<SessionAnswer> = inner
                .answers
                .values()
                .filter(|answer| answer.session_id == previous_id)
                .cloned()
                .collect();
            for mut answer in copied {
                answer.session_id = created.id.clone();
                inner.answers.insert((answer.session_id.clone(), answer.slot_id.clone()), answer);
            }
        }

        inner.sessions.insert(created.id.clone(), created.clone());
        Ok(Some(created))
    }

    async fn list_answers(&self, session_id: &str) -> Result<Vec<SessionAnswer>, StoreError> {
        let mut answers: Vec<SessionAnswer> = self
            .lock()
            .answers
            .values()
            .filter(|answer| answer.session_id == session_id)
            .cloned()
            .collect();
        answers.sort_by(|a, b| a.slot_id.cmp(&b.slot_id));
        Ok(answers)
    }

    async fn find_answer(
        &self,
        session_id: &str,
        slot_id: &str,
    ) -> Result<Option<SessionAnswer>, StoreError> {
        Ok(self.lock().answers.get(&(session_id.to_string(), slot_id.to_string())).cloned())
    }

    async fn put_answer(
        &self,
        expected_version: i64,
        answer: SessionAnswer,
    ) -> Result<SessionAnswer, StoreError> {
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }

        let mut inner = self.lock();
        let session = inner
            .sessions
            .get_mut(&answer.session_id)
            .ok_or_else(|| StoreError::Fatal("unknown session".to_string()))?;
        if session.version != expected_version || session.state != SessionState::InProgress {
            return Err(StoreError::Conflict);
        }
        session.version += 1;

        inner.answers.insert((answer.session_id.clone(), answer.slot_id.clone()), answer.clone());
        Ok(answer)
    }

    async fn update_session(
        &self,
        expected_version: i64,
        session: &EvaluationSession,
        event: Option<&GradedEvent>,
    ) -> Result<EvaluationSession, StoreError> {
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }

        let mut inner = self.lock();
        let stored = inner
            .sessions
            .get_mut(&session.id)
            .ok_or_else(|| StoreError::Fatal("unknown session".to_string()))?;
        if stored.version != expected_version {
            return Err(StoreError::Conflict);
        }

        let submitted_at = stored.submitted_at.or(session.submitted_at);
        let submit_trigger = stored.submit_trigger.or(session.submit_trigger);
        *stored = EvaluationSession {
            submitted_at,
            submit_trigger,
            version: expected_version + 1,
            ..session.clone()
        };
        let updated = stored.clone();

        if let Some(event) = event {
            inner.events.push(event.clone());
        }
        inner.transitions += 1;

        Ok(updated)
    }

    async fn list_expired(
        &self,
        now: PrimitiveDateTime,
        after: Option<&ExpiredKey>,
        limit: i64,
    ) -> Result<Vec<ExpiredKey>, StoreError> {
        let inner = self.lock();
        let mut expired: Vec<ExpiredKey> = inner
            .sessions
            .values()
            .filter(|s| s.state == SessionState::InProgress)
            .filter_map(|s| {
                let deadline = s.deadline.filter(|d| *d < now)?;
                Some(ExpiredKey { id: s.id.clone(), deadline })
            })
            .filter(|key| {
                after.map_or(true, |after| (key.deadline, &key.id) > (after.deadline, &after.id))
            })
            .collect();
        expired.sort_by(|a, b| a.deadline.cmp(&b.deadline).then_with(|| a.id.cmp(&b.id)));
        expired.truncate(limit.max(0) as usize);
        Ok(expired)
    }

    async fn list_pending_grading(
        &self,
        definition_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<EvaluationSession>, StoreError> {
        let inner = self.lock();
        let mut pending: Vec<EvaluationSession> = inner
            .sessions
            .values()
            .filter(|s| s.state == SessionState::Submitted)
            .filter(|s| definition_id.map_or(true, |id| s.definition_id == id))
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then_with(|| a.id.cmp(&b.id)));
        pending.truncate(limit.clamp(1, 500) as usize);
        Ok(pending)
    }
}

#[async_trait]
impl EventOutbox for MemorySessionStore {
    async fn claim_due(
        &self,
        now: PrimitiveDateTime,
        lease_until: PrimitiveDateTime,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<GradedEvent>, StoreError> {
        let mut inner = self.lock();
        let mut due: Vec<&mut GradedEvent> = inner
            .events
            .iter_mut()
            .filter(|e| {
                e.delivered_at.is_none() && e.attempts < max_attempts && e.next_attempt_at <= now
            })
            .collect();
        due.sort_by(|a, b| {
            a.next_attempt_at.cmp(&b.next_attempt_at).then_with(|| a.created_at.cmp(&b.created_at))
        });

        Ok(due
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|event| {
                event.next_attempt_at = lease_until;
                event.clone()
            })
            .collect())
    }

    async fn mark_delivered(&self, id: &str, now: PrimitiveDateTime) -> Result<(), StoreError> {
        if let Some(event) = self.lock().events.iter_mut().find(|e| e.id == id) {
            event.delivered_at = Some(now);
            event.attempts += 1;
            event.last_error = None;
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &str,
        error: &str,
        next_attempt_at: PrimitiveDateTime,
    ) -> Result<(), StoreError> {
        if let Some(event) = self.lock().events.iter_mut().find(|e| e.id == id) {
            event.attempts += 1;
            event.last_error = Some(error.to_string());
            event.next_attempt_at = next_attempt_at;
        }
        Ok(())
    }
}
