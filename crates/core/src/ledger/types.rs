//! Ledger types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::FailureKind;

/// Errors from the ledger client.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Request never reached the ledger.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Request was sent but no answer arrived in time.
    #[error("Request timeout")]
    Timeout,

    #[error("Rate limit exceeded")]
    RateLimited,

    /// The ledger refused the transaction; resubmitting will not help.
    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Ledger error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Failed to parse ledger response: {0}")]
    ParseError(String),

    #[error("Ledger client not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for LedgerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LedgerError::Timeout
        } else if e.is_connect() {
            LedgerError::ConnectionFailed(e.to_string())
        } else {
            LedgerError::ServerError {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            }
        }
    }
}

impl LedgerError {
    /// Retry classification for a failed submission.
    ///
    /// Anything that may have happened after the transaction reached the
    /// ledger is ambiguous and must be reconciled before resubmitting.
    pub fn classify(&self) -> FailureKind {
        match self {
            Self::ConnectionFailed(_) | Self::RateLimited => FailureKind::Transient,
            Self::ServerError { status, .. } if matches!(status, 502 | 503) => {
                FailureKind::Transient
            }
            Self::Rejected(_) | Self::NotConfigured(_) => FailureKind::Permanent,
            Self::Timeout | Self::ServerError { .. } | Self::ParseError(_) => {
                FailureKind::Ambiguous
            }
        }
    }
}

/// A mint submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintRequest {
    /// Content id of the pinned primary rendition.
    pub content_id: String,
    /// Creator address that will own the token.
    pub owner: String,
    /// Royalty in basis points (0-10000).
    pub royalty_bps: u16,
    /// Identity signing the transaction.
    pub signer: String,
    /// Metadata URI stored on the token.
    pub metadata_uri: String,
    /// Deduplication key derived from content and creator.
    pub effect_key: String,
}

/// Receipt of a confirmed mint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintReceipt {
    pub asset_token_id: String,
    pub tx_receipt: String,
}
