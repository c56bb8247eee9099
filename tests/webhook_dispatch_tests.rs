//! Partner webhook delivery tests with a scripted transport

mod common;

#[cfg(test)]
mod tests {
    use super::common::{at, Harness};
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    use devicelend_server::config::WebhookConfig;
    use devicelend_server::store::LedgerStore;
    use devicelend_server::webhook::{
        signer, PartnerWebhook, WebhookDispatcher, WebhookEventStatus, WebhookEventType,
        WebhookRequest, WebhookTransport,
    };

    const PARTNER_SECRET: &str = "partner-signing-secret";

    /// Records every request and answers from a script, 200 once the script runs out
    #[derive(Default)]
    struct ScriptedTransport {
        requests: Mutex<Vec<WebhookRequest>>,
        script: Mutex<VecDeque<Result<u16, String>>>,
    }

    impl ScriptedTransport {
        fn answering(script: Vec<Result<u16, String>>) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                script: Mutex::new(script.into()),
            })
        }

        async fn header(&self, index: usize, name: &str) -> Option<String> {
            self.requests.lock().await.get(index).and_then(|r| {
                r.headers
                    .iter()
                    .find(|(k, _)| *k == name)
                    .map(|(_, v)| v.clone())
            })
        }
    }

    #[async_trait]
    impl WebhookTransport for ScriptedTransport {
        async fn post(&self, request: WebhookRequest) -> Result<u16, String> {
            self.requests.lock().await.push(request);
            self.script.lock().await.pop_front().unwrap_or(Ok(200))
        }
    }

    fn config(max_attempts: i32) -> WebhookConfig {
        WebhookConfig {
            max_attempts,
            backoff_base: std::time::Duration::from_secs(2),
            backoff_max: std::time::Duration::from_secs(60),
            ..WebhookConfig::default()
        }
    }

    async fn register_partner(h: &Harness) -> Uuid {
        let partner_id = Uuid::new_v4();
        h.store
            .upsert_partner_webhook(&PartnerWebhook {
                partner_id,
                url: "https://partner.example.com/hooks".to_string(),
                secret: PARTNER_SECRET.to_string(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        partner_id
    }

    #[tokio::test]
    async fn test_events_are_delivered_in_order_per_loan() {
        let h = Harness::new();
        let partner_id = register_partner(&h).await;
        let loan = h.active_loan("HW-300", Some(partner_id)).await;

        let transport = ScriptedTransport::answering(vec![]);
        let dispatcher = WebhookDispatcher::new(h.store.clone(), transport.clone(), config(3));

        let first = dispatcher.tick(Utc::now()).await.unwrap();
        assert_eq!(first.delivered, 1);
        let second = dispatcher.tick(Utc::now()).await.unwrap();
        assert_eq!(second.delivered, 1);
        let third = dispatcher.tick(Utc::now()).await.unwrap();
        assert_eq!(third.processed(), 0);

        let events = h.store.events_for_loan(loan.id).await.unwrap();
        assert!(events.iter().all(|e| e.status == WebhookEventStatus::Delivered));

        assert_eq!(transport.header(0, "X-Webhook-Id").await, Some(events[0].id.to_string()));
        assert_eq!(transport.header(1, "X-Webhook-Id").await, Some(events[1].id.to_string()));
        assert_eq!(
            transport.header(1, "X-Webhook-Event").await.as_deref(),
            Some(WebhookEventType::LoanActivated.as_str())
        );
    }

    #[tokio::test]
    async fn test_signature_verifies_with_partner_secret() {
        let h = Harness::new();
        let partner_id = register_partner(&h).await;
        h.active_loan("HW-301", Some(partner_id)).await;

        let transport = ScriptedTransport::answering(vec![]);
        let dispatcher = WebhookDispatcher::new(h.store.clone(), transport.clone(), config(3));
        dispatcher.tick(Utc::now()).await.unwrap();

        let requests = transport.requests.lock().await;
        let request = &requests[0];
        let signature = request
            .headers
            .iter()
            .find(|(k, _)| *k == "X-Webhook-Signature")
            .map(|(_, v)| v.clone())
            .unwrap();

        assert!(signer::verify(PARTNER_SECRET, &request.body, &signature));
        assert!(!signer::verify("another-secret", &request.body, &signature));

        let payload: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(payload["event"], "PAYMENT_RECEIVED");
    }

    #[tokio::test]
    async fn test_failed_delivery_blocks_later_events_until_retry() {
        let h = Harness::new();
        let partner_id = register_partner(&h).await;
        let loan = h.active_loan("HW-302", Some(partner_id)).await;

        let transport = ScriptedTransport::answering(vec![Ok(500)]);
        let dispatcher = WebhookDispatcher::new(h.store.clone(), transport.clone(), config(5));

        let now = Utc::now();
        let report = dispatcher.tick(now).await.unwrap();
        assert_eq!(report.retried, 1);

        let events = h.store.events_for_loan(loan.id).await.unwrap();
        assert_eq!(events[0].status, WebhookEventStatus::Pending);
        assert_eq!(events[0].attempts, 1);
        assert!(events[0].next_attempt_at > now);
        assert!(events[0].last_error.as_deref().unwrap_or_default().contains("500"));

        // The head is backing off, so the second event must wait too
        let report = dispatcher.tick(now).await.unwrap();
        assert_eq!(report.processed(), 0);

        let later = now + Duration::minutes(5);
        assert_eq!(dispatcher.tick(later).await.unwrap().delivered, 1);
        assert_eq!(dispatcher.tick(later).await.unwrap().delivered, 1);

        let events = h.store.events_for_loan(loan.id).await.unwrap();
        assert!(events.iter().all(|e| e.status == WebhookEventStatus::Delivered));
        assert_eq!(events[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_exhausted_event_is_failed_and_can_be_requeued() {
        let h = Harness::new();
        let partner_id = register_partner(&h).await;
        let loan = h.active_loan("HW-303", Some(partner_id)).await;

        let transport =
            ScriptedTransport::answering(vec![Err("connection refused".to_string()), Ok(503)]);
        let dispatcher = WebhookDispatcher::new(h.store.clone(), transport.clone(), config(2));

        let now = Utc::now();
        assert_eq!(dispatcher.tick(now).await.unwrap().retried, 1);
        let report = dispatcher.tick(now + Duration::minutes(5)).await.unwrap();
        assert_eq!(report.failed, 1);

        let failed = h.store.failed_events(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].loan_id, loan.id);
        assert_eq!(failed[0].attempts, 2);

        // A failed head no longer blocks the rest of the loan's events
        let report = dispatcher.tick(now + Duration::minutes(10)).await.unwrap();
        assert_eq!(report.delivered, 1);

        assert!(h.store.requeue_event(failed[0].id, now).await.unwrap());
        assert!(h.store.failed_events(10).await.unwrap().is_empty());
        let report = dispatcher.tick(now + Duration::minutes(15)).await.unwrap();
        assert_eq!(report.delivered, 1);

        assert!(!h.store.requeue_event(failed[0].id, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_loans_without_partner_are_skipped() {
        let h = Harness::new();
        let loan = h.active_loan("HW-304", None).await;

        let transport = ScriptedTransport::answering(vec![]);
        let dispatcher = WebhookDispatcher::new(h.store.clone(), transport.clone(), config(3));

        let report = dispatcher.tick(Utc::now()).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert!(transport.requests.lock().await.is_empty());

        let events = h.store.events_for_loan(loan.id).await.unwrap();
        assert_eq!(events[0].status, WebhookEventStatus::Skipped);
    }

    #[tokio::test]
    async fn test_unregistered_partner_counts_as_failed_attempt() {
        let h = Harness::new();
        let loan = h.active_loan("HW-305", Some(Uuid::new_v4())).await;

        let transport = ScriptedTransport::answering(vec![]);
        let dispatcher = WebhookDispatcher::new(h.store.clone(), transport.clone(), config(3));

        let report = dispatcher.tick(Utc::now()).await.unwrap();
        assert_eq!(report.retried, 1);
        assert!(transport.requests.lock().await.is_empty());

        let events = h.store.events_for_loan(loan.id).await.unwrap();
        assert_eq!(events[0].attempts, 1);
        assert!(events[0]
            .last_error
            .as_deref()
            .unwrap_or_default()
            .contains("no registered webhook"));
    }

    #[tokio::test]
    async fn test_heads_of_different_loans_go_out_in_one_tick() {
        let h = Harness::new();
        let partner_id = register_partner(&h).await;
        h.active_loan("HW-306", Some(partner_id)).await;
        h.active_loan("HW-307", Some(partner_id)).await;
        h.active_loan("HW-308", None).await;

        let transport = ScriptedTransport::answering(vec![]);
        let dispatcher = WebhookDispatcher::new(h.store.clone(), transport.clone(), config(3));

        let report = dispatcher.tick(Utc::now()).await.unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_default_event_reaches_partner() {
        let h = Harness::new();
        let partner_id = register_partner(&h).await;
        let loan = h.active_loan("HW-309", Some(partner_id)).await;
        h.state.sweeper.run_at(at(2024, 2, 25)).await.unwrap();

        let transport = ScriptedTransport::answering(vec![]);
        let dispatcher = WebhookDispatcher::new(h.store.clone(), transport.clone(), config(3));
        for _ in 0..3 {
            dispatcher.tick(Utc::now()).await.unwrap();
        }

        assert_eq!(
            transport.header(2, "X-Webhook-Event").await.as_deref(),
            Some("LOAN_DEFAULTED")
        );
        let events = h.store.events_for_loan(loan.id).await.unwrap();
        assert_eq!(events[2].payload["loan_id"], loan.id.to_string());
    }
}
