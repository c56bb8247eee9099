//! Outbox relay to financing partners
//!
//! Delivery is at-least-once. Each pass takes the head PENDING event of every
//! loan, so a loan's events leave strictly in enqueue order while different
//! loans are delivered concurrently. A head waiting on backoff holds back the
//! events queued behind it.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::backoff::next_attempt_delay;
use super::model::{DispatchReport, WebhookEvent};
use super::signer::signature_header;
use super::transport::{WebhookRequest, WebhookTransport};
use crate::config::WebhookConfig;
use crate::error::LendingError;
use crate::store::SharedStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Delivered,
    Retried,
    Failed,
    Skipped,
}

pub struct WebhookDispatcher {
    store: SharedStore,
    transport: Arc<dyn WebhookTransport>,
    config: WebhookConfig,
}

impl WebhookDispatcher {
    pub fn new(store: SharedStore, transport: Arc<dyn WebhookTransport>, config: WebhookConfig) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    /// Poll the outbox forever.
    pub async fn run(self: Arc<Self>) {
        info!(
            "Starting webhook dispatcher (poll every {:?})",
            self.config.poll_interval
        );

        loop {
            match self.tick(Utc::now()).await {
                Ok(report) if report.processed() > 0 => {
                    debug!(
                        delivered = report.delivered,
                        retried = report.retried,
                        failed = report.failed,
                        skipped = report.skipped,
                        "Webhook dispatch pass"
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Error polling webhook outbox: {}", e),
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One dispatch pass as of `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<DispatchReport, LendingError> {
        let events = self
            .store
            .deliverable_events(now, self.config.batch_size)
            .await?;

        let results = join_all(events.into_iter().map(|event| self.deliver(event, now))).await;

        let mut report = DispatchReport::default();
        for result in results {
            match result {
                Ok(Outcome::Delivered) => report.delivered += 1,
                Ok(Outcome::Retried) => report.retried += 1,
                Ok(Outcome::Failed) => report.failed += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(e) => error!("Failed to record webhook delivery state: {}", e),
            }
        }
        Ok(report)
    }

    async fn deliver(&self, event: WebhookEvent, now: DateTime<Utc>) -> Result<Outcome, LendingError> {
        let Some(partner_id) = event.partner_id else {
            self.store
                .mark_event_skipped(event.id, "loan has no financing partner")
                .await?;
            return Ok(Outcome::Skipped);
        };

        let attempt = match self.store.partner_webhook(partner_id).await? {
            Some(webhook) => self.attempt(&event, &webhook.url, &webhook.secret).await,
            None => Err(format!("partner {} has no registered webhook", partner_id)),
        };

        let attempts = event.attempts + 1;
        match attempt {
            Ok(()) => {
                self.store.mark_event_delivered(event.id, attempts, now).await?;
                debug!(event_id = event.id, loan_id = %event.loan_id, "Webhook delivered");
                Ok(Outcome::Delivered)
            }
            Err(reason) if attempts >= self.config.max_attempts => {
                self.store.mark_event_failed(event.id, attempts, &reason).await?;
                let exhausted = LendingError::WebhookDeliveryExhausted {
                    event_id: event.id,
                    attempts,
                };
                error!(
                    event_id = event.id,
                    loan_id = %event.loan_id,
                    partner_id = %partner_id,
                    event_type = event.event_type.as_str(),
                    last_error = %reason,
                    "{}",
                    exhausted
                );
                Ok(Outcome::Failed)
            }
            Err(reason) => {
                let next_attempt_at = now + next_attempt_delay(&self.config, attempts);
                self.store
                    .mark_event_retry(event.id, attempts, next_attempt_at, &reason)
                    .await?;
                warn!(
                    event_id = event.id,
                    loan_id = %event.loan_id,
                    attempts,
                    next_attempt_at = %next_attempt_at,
                    error = %reason,
                    "Webhook delivery failed; will retry"
                );
                Ok(Outcome::Retried)
            }
        }
    }

    async fn attempt(&self, event: &WebhookEvent, url: &str, secret: &str) -> Result<(), String> {
        let body = serde_json::to_vec(&event.payload).map_err(|e| e.to_string())?;
        let signature = signature_header(secret, &body).map_err(|e| e.to_string())?;

        let request = WebhookRequest {
            url: url.to_string(),
            headers: vec![
                ("X-Webhook-Event", event.event_type.as_str().to_string()),
                ("X-Webhook-Id", event.id.to_string()),
                ("X-Webhook-Timestamp", Utc::now().timestamp().to_string()),
                ("X-Webhook-Signature", signature),
            ],
            body,
            timeout: self.config.request_timeout,
        };

        match self.transport.post(request).await? {
            status if (200..300).contains(&status) => Ok(()),
            status => Err(format!("partner responded with HTTP {}", status)),
        }
    }
}
