//! Content store types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::FailureKind;

/// Errors from the content store.
#[derive(Debug, Error)]
pub enum ContentStoreError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Content not found: {0}")]
    NotFound(String),

    #[error("Content rejected: {0}")]
    Rejected(String),

    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Failed to read rendition: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ContentStoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ContentStoreError::Timeout
        } else if e.is_connect() {
            ContentStoreError::ConnectionFailed(e.to_string())
        } else {
            ContentStoreError::ApiError {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            }
        }
    }
}

impl ContentStoreError {
    /// Retry classification.
    ///
    /// Content addressing makes a repeated put harmless, so an unclear
    /// outcome is treated as transient rather than ambiguous.
    pub fn classify(&self) -> FailureKind {
        match self {
            Self::Rejected(_) | Self::NotFound(_) => FailureKind::Permanent,
            Self::ApiError { status, .. } if (400..500).contains(status) && *status != 429 => {
                FailureKind::Permanent
            }
            Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound => FailureKind::Permanent,
            _ => FailureKind::Transient,
        }
    }
}

/// Descriptive metadata stored alongside the bytes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentMetadata {
    /// File name presented to the store.
    pub file_name: String,
    /// MIME type if known.
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Result of a successful put.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredContent {
    pub content_id: String,
    pub gateway_url: String,
    pub size_bytes: u64,
}
