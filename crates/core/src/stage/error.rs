//! Stage error type.

use thiserror::Error;

use crate::content_store::ContentStoreError;
use crate::job::{FailureKind, FailureReason, JobError};
use crate::ledger::LedgerError;
use crate::notifier::NotifierError;
use crate::transcoder::TranscoderError;

/// Errors raised while executing a stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// The job payload does not match what the stage expects.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Transcoder error: {0}")]
    Transcoder(#[from] TranscoderError),

    #[error("Content store error: {0}")]
    ContentStore(#[from] ContentStoreError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Notifier error: {0}")]
    Notifier(#[from] NotifierError),

    /// Reading or writing the effect ledger failed.
    #[error("Effect ledger error: {0}")]
    Guard(#[from] JobError),
}

impl From<serde_json::Error> for StageError {
    fn from(e: serde_json::Error) -> Self {
        StageError::InvalidPayload(e.to_string())
    }
}

impl StageError {
    pub fn classify(&self) -> FailureKind {
        match self {
            Self::InvalidPayload(_) => FailureKind::Permanent,
            Self::Transcoder(e) => e.classify(),
            Self::ContentStore(e) => e.classify(),
            Self::Ledger(e) => e.classify(),
            Self::Notifier(e) => e.classify(),
            // The external call may already have happened
            Self::Guard(_) => FailureKind::Ambiguous,
        }
    }

    pub fn failure_reason(&self) -> FailureReason {
        FailureReason::new(self.classify(), self.to_string())
    }
}
