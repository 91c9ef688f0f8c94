use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::core::config::EventSettings;
use crate::core::time::format_primitive;
use crate::db::models::GradedEvent;

const MAX_BACKOFF_SECONDS: i64 = 3600;
const MAX_ERROR_LEN: usize = 500;

/// Body POSTed to the certificate webhook for every graded session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct SessionGradedPayload {
    pub(crate) event_id: String,
    pub(crate) session_id: String,
    pub(crate) learner_id: String,
    pub(crate) definition_id: String,
    pub(crate) final_score: f64,
    pub(crate) passed: Option<bool>,
    pub(crate) graded_at: String,
}

impl From<&GradedEvent> for SessionGradedPayload {
    fn from(event: &GradedEvent) -> Self {
        Self {
            event_id: event.id.clone(),
            session_id: event.session_id.clone(),
            learner_id: event.learner_id.clone(),
            definition_id: event.definition_id.clone(),
            final_score: event.final_score,
            passed: event.passed,
            graded_at: format_primitive(event.graded_at),
        }
    }
}

/// Receiver of graded events. `Ok` means the receiver accepted the event.
#[async_trait]
pub(crate) trait EventSink: Send + Sync {
    async fn deliver(&self, payload: &SessionGradedPayload) -> Result<()>;
}

#[derive(Debug, Clone)]
pub(crate) struct CertificateWebhook {
    client: Client,
    url: String,
}

impl CertificateWebhook {
    /// `None` when no webhook is configured; delivery is then disabled.
    pub(crate) fn from_settings(settings: &EventSettings) -> Result<Option<Self>> {
        let Some(url) = settings.webhook_url.clone() else {
            return Ok(None);
        };

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()
            .context("Failed to build certificate webhook client")?;

        Ok(Some(Self { client, url }))
    }
}

#[async_trait]
impl EventSink for CertificateWebhook {
    async fn deliver(&self, payload: &SessionGradedPayload) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", &payload.event_id)
            .json(payload)
            .send()
            .await
            .context("Certificate webhook request failed")?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(anyhow!("certificate webhook answered {status}: {}", truncate(&body, 200)))
    }
}

/// Exponential delay before retry number `attempts`, capped at an hour.
pub(crate) fn backoff(attempts: i32) -> time::Duration {
    let exponent = attempts.clamp(0, 12) as u32;
    let seconds = 30_i64.saturating_mul(2_i64.pow(exponent));
    time::Duration::seconds(seconds.min(MAX_BACKOFF_SECONDS))
}

pub(crate) fn error_summary(err: &anyhow::Error) -> String {
    truncate(&format!("{err:#}"), MAX_ERROR_LEN)
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
