use std::time::Duration;

use anyhow::Result;

use crate::core::config::EngineSettings;
use crate::db::types::SubmitTrigger;
use crate::repositories::store::ExpiredKey;
use crate::services::engine::{EngineError, EvaluationEngine};

const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy)]
pub(crate) struct SweepPolicy {
    pub(crate) batch_size: u32,
    pub(crate) max_retries: u32,
    pub(crate) retry_delay: Duration,
}

impl SweepPolicy {
    pub(crate) fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            batch_size: settings.sweep_batch_size.max(1),
            max_retries: settings.sweep_max_retries,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SweepReport {
    pub(crate) scanned: usize,
    pub(crate) submitted: usize,
    pub(crate) failed: usize,
}

/// Finalizes every in-progress session whose deadline has passed. The scan
/// pages forward in `(deadline, id)` order, so a session that keeps failing
/// is passed over for the rest of the pass and picked up again by the next one.
pub(crate) async fn close_expired_sessions(
    engine: &EvaluationEngine,
    policy: SweepPolicy,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    let mut cursor: Option<ExpiredKey> = None;

    loop {
        let batch = engine.expired_sessions(cursor.as_ref(), policy.batch_size).await?;
        let Some(last) = batch.last().cloned() else {
            break;
        };
        let batch_len = batch.len();

        for key in batch {
            report.scanned += 1;
            match submit_with_retry(engine, &key.id, policy).await {
                Ok(()) => report.submitted += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(
                        session_id = %key.id,
                        error = %err,
                        "Deadline sweep failed for session"
                    );
                    metrics::counter!("deadline_sweep_failures_total").increment(1);
                }
            }
        }

        if batch_len < policy.batch_size as usize {
            break;
        }
        cursor = Some(last);
    }

    if report.scanned > 0 {
        tracing::info!(
            scanned = report.scanned,
            submitted = report.submitted,
            failed = report.failed,
            "Deadline sweep finished"
        );
        metrics::counter!("deadline_sweep_submitted_total").increment(report.submitted as u64);
    }

    Ok(report)
}

async fn submit_with_retry(
    engine: &EvaluationEngine,
    session_id: &str,
    policy: SweepPolicy,
) -> Result<(), EngineError> {
    let mut attempt = 0;
    loop {
        match engine.submit(session_id, SubmitTrigger::DeadlineSweep).await {
            Ok(_) => return Ok(()),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let delay = policy.retry_delay.saturating_mul(2_u32.saturating_pow(attempt));
                tracing::warn!(
                    session_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying deadline submission"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
