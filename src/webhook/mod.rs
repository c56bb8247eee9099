//! Partner webhooks: outbox model, signing and delivery

mod backoff;
mod dispatcher;
mod model;
pub mod signer;
mod transport;

pub use backoff::{backoff_delay, next_attempt_delay};
pub use dispatcher::WebhookDispatcher;
pub use model::{
    DispatchReport, NewWebhookEvent, PartnerWebhook, RegisterWebhookRequest, WebhookEvent,
    WebhookEventStatus, WebhookEventType,
};
pub use transport::{HttpTransport, WebhookRequest, WebhookTransport};
