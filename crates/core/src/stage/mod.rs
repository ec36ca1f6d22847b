//! Stage processors: one external call per claimed job.
//!
//! Each stage turns the payload of a claimed job into a result value. The
//! worker loop owns claiming, leases, retries and chaining; a stage only
//! executes, and for guarded stages, reconciles after a crash.

mod error;
mod mint;
mod notify;
mod payloads;
mod pin;
mod transcode;

pub use error::StageError;
pub use mint::MintStage;
pub use notify::{NotifyStage, ASSET_MINTED_EVENT};
pub use payloads::{
    AssetMetadata, AssetRequest, MintPayload, MintResult, NotifyPayload, NotifyResult,
    PinPayload, PinResult, PinnedRendition, TranscodePayload,
};
pub use pin::PinStage;
pub use transcode::TranscodeStage;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::job::{JobRecord, QueueName};

/// Whether re-running a stage can repeat an irreversible external effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyClass {
    /// Re-running only repeats work (e.g. transcoding into the same files).
    Safe,
    /// Re-running could repeat an effect; the idempotency guard is consulted.
    Guarded,
}

/// Progress reporting handle given to a running stage.
///
/// Reports are best effort: when the consumer falls behind, intermediate
/// values are dropped rather than blocking the stage.
#[derive(Debug, Clone)]
pub struct StageProgress {
    tx: mpsc::Sender<u8>,
}

impl StageProgress {
    pub fn new(tx: mpsc::Sender<u8>) -> Self {
        Self { tx }
    }

    /// A handle whose reports go nowhere.
    pub fn detached() -> Self {
        let (tx, _) = mpsc::channel(1);
        Self { tx }
    }

    pub fn report(&self, percent: u8) {
        let _ = self.tx.try_send(percent.min(100));
    }
}

/// One pipeline stage.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Queue this stage consumes.
    fn queue(&self) -> QueueName;

    fn idempotency(&self) -> IdempotencyClass;

    /// Run the stage for a claimed job and return its result.
    async fn execute(&self, job: &JobRecord, progress: StageProgress) -> Result<Value, StageError>;

    /// Recover the result of an abandoned attempt without repeating its effect.
    ///
    /// Returns `Ok(None)` when there is no evidence the effect happened and
    /// the job should simply run again.
    async fn reconcile(&self, _job: &JobRecord) -> Result<Option<Value>, StageError> {
        Ok(None)
    }
}
