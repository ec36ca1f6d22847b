//! Webhook notification sink.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::NotifierConfig;

use super::{Notification, NotificationSink, NotifierError};

/// POSTs each notification as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: Client,
    url: String,
    secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(config: NotifierConfig) -> Result<Self, NotifierError> {
        let url = config
            .webhook_url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| NotifierError::NotConfigured("webhook_url is required".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()?;

        Ok(Self {
            client,
            url,
            secret: config.webhook_secret,
        })
    }

    /// Hex SHA-256 of secret followed by body.
    fn signature(secret: &str, body: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hasher.update(body);
        format!("{:x}", hasher.finalize())
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, notification: Notification) -> Result<(), NotifierError> {
        let body = serde_json::to_vec(&notification)
            .map_err(|e| NotifierError::NotConfigured(e.to_string()))?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json");
        if let Some(ref secret) = self.secret {
            request = request.header("X-Mintline-Signature", Self::signature(secret, &body));
        }

        debug!(event_type = %notification.event_type, recipient = %notification.recipient, "Posting webhook");
        let response = request.body(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(NotifierError::Rejected {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_stable_hex() {
        let a = WebhookNotifier::signature("s3cret", b"{}");
        let b = WebhookNotifier::signature("s3cret", b"{}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, WebhookNotifier::signature("other", b"{}"));
    }

    #[test]
    fn test_rejected_client_error_is_permanent() {
        let err = NotifierError::Rejected {
            status: 410,
            message: "gone".to_string(),
        };
        assert_eq!(err.classify(), crate::job::FailureKind::Permanent);
        assert_eq!(NotifierError::Timeout.classify(), crate::job::FailureKind::Transient);
    }
}
