use std::fmt;

use time::{Duration, PrimitiveDateTime};

use crate::core::time::{primitive_now_utc, seconds_until};
use crate::db::models::{EvaluationDefinition, EvaluationSession};
use crate::db::types::{EvaluationKind, SessionState};

/// Authoritative time source. Client-reported time never reaches the engine.
pub(crate) trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> PrimitiveDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> PrimitiveDateTime {
        primitive_now_utc()
    }
}

/// `min(window_end, opened_at + duration)` for exams, `window_end` otherwise.
pub(crate) fn compute_deadline(
    definition: &EvaluationDefinition,
    opened_at: PrimitiveDateTime,
) -> PrimitiveDateTime {
    match (definition.kind, definition.duration_limit_seconds) {
        (EvaluationKind::Exam, Some(seconds)) => {
            let duration_deadline = opened_at + Duration::seconds(seconds);
            if duration_deadline < definition.window_end {
                duration_deadline
            } else {
                definition.window_end
            }
        }
        _ => definition.window_end,
    }
}

pub(crate) fn within_window(definition: &EvaluationDefinition, now: PrimitiveDateTime) -> bool {
    definition.window_start <= now && now <= definition.window_end
}

/// A session expires strictly after its deadline; a write at the deadline instant lands.
pub(crate) fn is_past_deadline(deadline: PrimitiveDateTime, now: PrimitiveDateTime) -> bool {
    now > deadline
}

pub(crate) fn is_expired(session: &EvaluationSession, now: PrimitiveDateTime) -> bool {
    session.state == SessionState::InProgress
        && session.deadline.is_some_and(|deadline| is_past_deadline(deadline, now))
}

/// Advisory countdown: zero once the deadline passed or the session is not in progress.
pub(crate) fn remaining_seconds(session: &EvaluationSession, now: PrimitiveDateTime) -> i64 {
    if session.state != SessionState::InProgress {
        return 0;
    }

    session.deadline.map(|deadline| seconds_until(now, deadline).max(0)).unwrap_or(0)
}
