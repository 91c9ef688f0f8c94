use anyhow::{Context, Result};
use time::Duration;

use crate::core::config::EventSettings;
use crate::repositories::store::EventOutbox;
use crate::services::event_delivery::{backoff, error_summary, EventSink, SessionGradedPayload};
use crate::services::session_clock::Clock;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DeliveryReport {
    pub(crate) delivered: usize,
    pub(crate) failed: usize,
}

/// Claims due outbox events and hands them to the sink.
pub(crate) async fn deliver_due_events(
    outbox: &dyn EventOutbox,
    sink: &dyn EventSink,
    clock: &dyn Clock,
    settings: &EventSettings,
) -> Result<DeliveryReport> {
    let now = clock.now();
    // The lease outlives one request so a crashed worker's claims come back.
    let lease_until = now + Duration::seconds(settings.request_timeout_seconds as i64 * 3);
    let max_attempts = i32::try_from(settings.max_delivery_attempts).unwrap_or(i32::MAX);

    let claimed = outbox
        .claim_due(now, lease_until, max_attempts, i64::from(settings.batch_size))
        .await
        .context("Failed to claim graded events")?;

    let mut report = DeliveryReport::default();
    for event in claimed {
        let payload = SessionGradedPayload::from(&event);
        match sink.deliver(&payload).await {
            Ok(()) => {
                outbox
                    .mark_delivered(&event.id, clock.now())
                    .await
                    .context("Failed to mark graded event delivered")?;
                report.delivered += 1;
                metrics::counter!("graded_events_delivered_total").increment(1);
            }
            Err(err) => {
                let attempts = event.attempts + 1;
                let retry_at = clock.now() + backoff(event.attempts);
                let summary = error_summary(&err);
                outbox
                    .mark_failed(&event.id, &summary, retry_at)
                    .await
                    .context("Failed to record graded event failure")?;
                report.failed += 1;
                metrics::counter!("graded_events_failed_total").increment(1);

                if attempts >= max_attempts {
                    tracing::error!(
                        event_id = %event.id,
                        session_id = %event.session_id,
                        attempts,
                        error = %summary,
                        "Graded event delivery gave up"
                    );
                } else {
                    tracing::warn!(
                        event_id = %event.id,
                        session_id = %event.session_id,
                        attempts,
                        error = %summary,
                        "Graded event delivery failed; will retry"
                    );
                }
            }
        }
    }

    if report.delivered + report.failed > 0 {
        tracing::info!(
            delivered = report.delivered,
            failed = report.failed,
            "Graded event delivery pass finished"
        );
    }

    Ok(report)
}
