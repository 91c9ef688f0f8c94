use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::core::state::AppState;
use crate::repositories::pg_store::PgSessionStore;
use crate::services::event_delivery::CertificateWebhook;
use crate::tasks::delivery::deliver_due_events;
use crate::tasks::sweep::{close_expired_sessions, SweepPolicy};

pub(crate) async fn run(state: AppState) -> Result<()> {
    let webhook = CertificateWebhook::from_settings(state.settings().events())?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::with_capacity(2);
    handles.push(tokio::spawn(deadline_sweep_loop(state.clone(), shutdown_rx.clone())));

    match webhook {
        Some(webhook) => {
            handles.push(tokio::spawn(event_delivery_loop(
                state.clone(),
                webhook,
                shutdown_rx.clone(),
            )));
        }
        None => tracing::info!("CERTIFICATE_WEBHOOK_URL not set; graded event delivery disabled"),
    }

    crate::core::shutdown::shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to background tasks");
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }

    Ok(())
}

async fn deadline_sweep_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let policy = SweepPolicy::from_settings(state.settings().engine());
    let mut tick = interval(Duration::from_secs(state.settings().engine().sweep_interval_seconds));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = close_expired_sessions(state.engine(), policy).await {
                    tracing::error!(error = %err, "Deadline sweep failed");
                }
            }
        }
    }
}

async fn event_delivery_loop(
    state: AppState,
    webhook: CertificateWebhook,
    mut shutdown: watch::Receiver<bool>,
) {
    let events = state.settings().events().clone();
    let outbox = PgSessionStore::new(state.db().clone());
    let mut tick = interval(Duration::from_secs(events.delivery_interval_seconds));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                let clock = state.engine().clock();
                if let Err(err) = deliver_due_events(&outbox, &webhook, clock, &events).await {
                    tracing::error!(error = %err, "Graded event delivery failed");
                }
            }
        }
    }
}
