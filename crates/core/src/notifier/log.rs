use async_trait::async_trait;
use tracing::info;

use super::{NotificationSink, Notification, NotifierError};

/// Sink that only writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationSink for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notification: Notification) -> Result<(), NotifierError> {
        info!(
            recipient = %notification.recipient,
            event_type = %notification.event_type,
            payload = %notification.payload,
            "Notification"
        );
        Ok(())
    }
}
