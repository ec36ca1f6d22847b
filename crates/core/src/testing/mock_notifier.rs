//! Mock notification sink for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::notifier::{Notification, NotificationSink, NotifierError};

/// Mock implementation of the NotificationSink trait.
#[derive(Debug, Clone, Default)]
pub struct MockNotifier {
    sent: Arc<RwLock<Vec<Notification>>>,
    errors: Arc<RwLock<VecDeque<NotifierError>>>,
    fail_all: Arc<RwLock<bool>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications delivered so far.
    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }

    /// Fail the next call with `error`.
    pub async fn push_error(&self, error: NotifierError) {
        self.errors.write().await.push_back(error);
    }

    /// Make every delivery fail with a connection error.
    pub async fn set_fail_all(&self, fail: bool) {
        *self.fail_all.write().await = fail;
    }
}

#[async_trait]
impl NotificationSink for MockNotifier {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, notification: Notification) -> Result<(), NotifierError> {
        if let Some(err) = self.errors.write().await.pop_front() {
            return Err(err);
        }
        if *self.fail_all.read().await {
            return Err(NotifierError::ConnectionFailed(
                "mock sink unreachable".to_string(),
            ));
        }
        self.sent.write().await.push(notification);
        Ok(())
    }
}
