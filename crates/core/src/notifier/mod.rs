//! Notification sinks for announcing minted assets.

mod log;
mod types;
mod webhook;

pub use log::LogNotifier;
pub use types::{Notification, NotifierError};
pub use webhook::WebhookNotifier;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{NotifierBackend, NotifierConfig};

/// Destination for pipeline notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Sink name for logging and metrics.
    fn name(&self) -> &str;

    /// Deliver one notification.
    async fn send(&self, notification: Notification) -> Result<(), NotifierError>;
}

/// Create a notification sink from configuration.
pub fn create_notifier(config: &NotifierConfig) -> Result<Arc<dyn NotificationSink>, NotifierError> {
    match config.backend {
        NotifierBackend::Log => Ok(Arc::new(LogNotifier::new())),
        NotifierBackend::Webhook => Ok(Arc::new(WebhookNotifier::new(config.clone())?)),
    }
}
