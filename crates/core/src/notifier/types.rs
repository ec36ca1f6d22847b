use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::job::FailureKind;

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Delivery rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Notifier not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for NotifierError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            NotifierError::Timeout
        } else {
            NotifierError::ConnectionFailed(e.to_string())
        }
    }
}

impl NotifierError {
    /// Retry classification. A duplicate notification is harmless.
    pub fn classify(&self) -> FailureKind {
        match self {
            Self::Rejected { status, .. } if (400..500).contains(status) && *status != 429 => {
                FailureKind::Permanent
            }
            Self::NotConfigured(_) => FailureKind::Permanent,
            _ => FailureKind::Transient,
        }
    }
}

/// A notification addressed to one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: String,
    /// Event name, e.g. "asset.minted".
    pub event_type: String,
    pub payload: Value,
}
