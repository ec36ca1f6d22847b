//! Notify stage: announce the minted asset.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::job::{JobRecord, QueueName};
use crate::metrics;
use crate::notifier::{Notification, NotificationSink};

use super::{IdempotencyClass, NotifyPayload, NotifyResult, Stage, StageError, StageProgress};

/// Event type sent for every completed run.
pub const ASSET_MINTED_EVENT: &str = "asset.minted";

pub struct NotifyStage {
    sink: Arc<dyn NotificationSink>,
}

impl NotifyStage {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Stage for NotifyStage {
    fn queue(&self) -> QueueName {
        QueueName::Notify
    }

    fn idempotency(&self) -> IdempotencyClass {
        // A duplicate message is acceptable
        IdempotencyClass::Safe
    }

    async fn execute(&self, job: &JobRecord, progress: StageProgress) -> Result<Value, StageError> {
        let payload: NotifyPayload = job.payload_as()?;
        let notification = Notification {
            recipient: payload.recipient.clone(),
            event_type: ASSET_MINTED_EVENT.to_string(),
            payload: json!({
                "asset_id": payload.asset_id,
                "token_id": payload.token_id,
                "receipt_id": payload.receipt_id,
                "content_id": payload.content_id,
                "gateway_url": payload.gateway_url,
            }),
        };

        let start = Instant::now();
        let sent = self.sink.send(notification).await;
        metrics::observe_external(
            "notifier",
            "send",
            start.elapsed().as_secs_f64(),
            sent.is_ok(),
        );
        sent?;
        progress.report(100);

        info!(job_id = %job.id, recipient = %payload.recipient, sink = self.sink.name(), "Notification sent");
        Ok(serde_json::to_value(NotifyResult {
            sink: self.sink.name().to_string(),
            recipient: payload.recipient,
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::NotifierError;
    use crate::testing::{fixtures, MockNotifier};

    #[tokio::test]
    async fn test_sends_minted_event() {
        let notifier = Arc::new(MockNotifier::new());
        let stage = NotifyStage::new(notifier.clone());
        let job = fixtures::job(QueueName::Notify, "asset-1", fixtures::notify_payload());

        stage
            .execute(&job, StageProgress::detached())
            .await
            .unwrap();

        let sent = notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event_type, ASSET_MINTED_EVENT);
        assert_eq!(sent[0].payload["token_id"], "42");
        assert_eq!(sent[0].payload["asset_id"], "asset-1");
    }

    #[tokio::test]
    async fn test_send_failure_propagates() {
        let notifier = Arc::new(MockNotifier::new());
        notifier.push_error(NotifierError::Timeout).await;
        let stage = NotifyStage::new(notifier);
        let job = fixtures::job(QueueName::Notify, "asset-1", fixtures::notify_payload());

        assert!(stage
            .execute(&job, StageProgress::detached())
            .await
            .is_err());
    }
}
