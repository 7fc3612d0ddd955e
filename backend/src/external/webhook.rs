//! Outbound delivery of domain events
//!
//! Events are POSTed as JSON to a configured webhook. When a secret is set
//! the body is signed with HMAC-SHA256 and sent base64-encoded in
//! `X-Signature`, the same scheme inbound chat webhooks are verified with.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;

use crate::error::{AppError, AppResult};
use crate::services::outbox::OutboxEvent;

type HmacSha256 = Hmac<Sha256>;

/// Sign `body` with `secret`
pub fn sign_body(secret: &str, body: &[u8]) -> AppResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal("Failed to create HMAC".to_string()))?;
    mac.update(body);
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Webhook API client
#[derive(Clone)]
pub struct WebhookClient {
    client: Client,
    url: String,
    secret: Option<String>,
}

impl WebhookClient {
    /// Create a client whose requests give up after `timeout`
    pub fn new(url: String, secret: Option<String>, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, url, secret })
    }

    /// POST one event; any non-2xx answer is a delivery failure
    pub async fn deliver(&self, event: &OutboxEvent) -> AppResult<()> {
        let body = serde_json::to_vec(event)
            .map_err(|e| AppError::Internal(format!("Failed to encode event: {}", e)))?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("X-Event-Id", event.id.to_string())
            .header("X-Event-Type", event.event_type.as_str());

        if let Some(secret) = &self.secret {
            request = request.header("X-Signature", sign_body(secret, &body)?);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Webhook request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(format!(
                "Webhook error: {} - {}",
                status, text
            )));
        }

        Ok(())
    }
}

/// Where dispatched events go
#[derive(Clone)]
pub enum EventSink {
    Webhook(WebhookClient),
    /// Write events to the log only; used when no webhook is configured
    Log,
}

impl EventSink {
    pub fn from_config(url: Option<String>, secret: Option<String>, timeout: Duration) -> AppResult<Self> {
        match url {
            Some(url) if !url.trim().is_empty() => {
                Ok(EventSink::Webhook(WebhookClient::new(url, secret, timeout)?))
            }
            _ => Ok(EventSink::Log),
        }
    }

    pub async fn deliver(&self, event: &OutboxEvent) -> AppResult<()> {
        match self {
            EventSink::Webhook(client) => client.deliver(event).await,
            EventSink::Log => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    aggregate = %event.aggregate_type,
                    aggregate_id = event.aggregate_id,
                    "domain event"
                );
                Ok(())
            }
        }
    }
}
