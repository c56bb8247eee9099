//! Outbound HTTP for webhook delivery

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// One signed delivery attempt
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
    pub timeout: Duration,
}

#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// Returns the response status code, or a description of the transport failure.
    async fn post(&self, request: WebhookRequest) -> Result<u16, String>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Fails when the TLS backend cannot be initialised.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("devicelend-webhooks/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn post(&self, request: WebhookRequest) -> Result<u16, String> {
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(request.timeout)
            .header("Content-Type", "application/json");
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.body(request.body).send().await.map_err(|e| {
            if e.is_timeout() {
                format!("timed out after {:?}", request.timeout)
            } else {
                e.to_string()
            }
        })?;

        Ok(response.status().as_u16())
    }
}
