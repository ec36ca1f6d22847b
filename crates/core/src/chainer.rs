//! Stage-to-stage chaining.
//!
//! A completed job's result plus its payload fully determine the next
//! job. The derivation is pure (`next_job`); `Chainer` only enqueues it,
//! deduplicated per run and queue.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::job::{EnqueueOptions, EnqueueOutcome, JobError, JobRecord, JobState, QueueName};
use crate::metrics;
use crate::queue::{JobQueue, QueueError};
use crate::stage::{
    MintPayload, MintResult, NotifyPayload, PinPayload, PinResult, TranscodePayload,
};
use crate::transcoder::TranscodeOutput;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Job {job_id} is {state}; only completed jobs are chained")]
    NotCompleted { job_id: String, state: JobState },

    #[error("Completed job {0} has no result")]
    MissingResult(String),

    #[error("Malformed {part} of job {job_id}: {message}")]
    Malformed {
        job_id: String,
        part: &'static str,
        message: String,
    },

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] JobError),
}

/// The job that follows a completed one.
#[derive(Debug, Clone, PartialEq)]
pub struct NextJob {
    pub queue: QueueName,
    pub payload: Value,
    pub lane: Option<String>,
}

fn decode<T: DeserializeOwned>(
    job: &JobRecord,
    part: &'static str,
    value: &Value,
) -> Result<T, ChainError> {
    serde_json::from_value(value.clone()).map_err(|e| ChainError::Malformed {
        job_id: job.id.clone(),
        part,
        message: e.to_string(),
    })
}

fn encode<T: serde::Serialize>(job: &JobRecord, value: &T) -> Result<Value, ChainError> {
    serde_json::to_value(value).map_err(|e| ChainError::Malformed {
        job_id: job.id.clone(),
        part: "next payload",
        message: e.to_string(),
    })
}

/// Derive the next stage's job from a completed one.
///
/// Returns `Ok(None)` for the last stage.
pub fn next_job(job: &JobRecord, signing_identity: &str) -> Result<Option<NextJob>, ChainError> {
    if job.state != JobState::Completed {
        return Err(ChainError::NotCompleted {
            job_id: job.id.clone(),
            state: job.state,
        });
    }
    let Some(next_queue) = job.queue.next() else {
        return Ok(None);
    };
    let result = job
        .result
        .as_ref()
        .ok_or_else(|| ChainError::MissingResult(job.id.clone()))?;

    let (payload, lane) = match job.queue {
        QueueName::Transcode => {
            let payload: TranscodePayload = decode(job, "payload", &job.payload)?;
            let output: TranscodeOutput = decode(job, "result", result)?;
            let next = PinPayload {
                request: payload.request,
                renditions: output.renditions,
                duration_seconds: output.duration_seconds,
            };
            (encode(job, &next)?, None)
        }
        QueueName::Pin => {
            let payload: PinPayload = decode(job, "payload", &job.payload)?;
            let pinned: PinResult = decode(job, "result", result)?;
            let next = MintPayload {
                request: payload.request,
                content_id: pinned.content_id,
                gateway_url: pinned.gateway_url,
                metadata_uri: pinned.metadata_uri,
                duration_seconds: payload.duration_seconds,
            };
            // One active mint per signer
            (encode(job, &next)?, Some(signing_identity.to_string()))
        }
        QueueName::Mint => {
            let payload: MintPayload = decode(job, "payload", &job.payload)?;
            let minted: MintResult = decode(job, "result", result)?;
            let next = NotifyPayload {
                asset_id: job.correlation_id.clone(),
                token_id: minted.asset_token_id,
                receipt_id: minted.tx_receipt,
                recipient: payload.request.recipient().to_string(),
                content_id: payload.content_id,
                gateway_url: payload.gateway_url,
            };
            (encode(job, &next)?, None)
        }
        QueueName::Notify => return Ok(None),
    };

    Ok(Some(NextJob {
        queue: next_queue,
        payload,
        lane,
    }))
}

/// Enqueues the next stage of completed jobs.
pub struct Chainer {
    queue: Arc<JobQueue>,
    signing_identity: String,
}

impl Chainer {
    pub fn new(queue: Arc<JobQueue>, signing_identity: impl Into<String>) -> Self {
        Self {
            queue,
            signing_identity: signing_identity.into(),
        }
    }

    /// Enqueue the follow-up of `job` unless the run already has one.
    ///
    /// Returns `Ok(None)` when nothing follows: the last stage, or a run
    /// that has been cancelled.
    pub fn chain(&self, job: &JobRecord) -> Result<Option<EnqueueOutcome>, ChainError> {
        let Some(next) = next_job(job, &self.signing_identity)? else {
            return Ok(None);
        };

        let cancelled = self
            .queue
            .store()
            .list_by_correlation(&job.correlation_id)?
            .iter()
            .any(|j| j.state == JobState::Cancelled);
        if cancelled {
            info!(correlation_id = %job.correlation_id, "Run was cancelled, not chaining");
            return Ok(None);
        }

        let config = self.queue.config(next.queue);
        let mut options = EnqueueOptions::new()
            .with_priority(job.priority)
            .with_max_attempts(config.max_attempts);
        if let Some(lane) = next.lane {
            options = options.with_lane(lane);
        }

        let outcome =
            self.queue
                .enqueue_unique(next.queue, &job.correlation_id, next.payload, options)?;

        if outcome.is_created() {
            metrics::JOBS_CHAINED
                .with_label_values(&[job.queue.as_str(), next.queue.as_str()])
                .inc();
            info!(
                correlation_id = %job.correlation_id,
                from = %job.queue,
                to = %next.queue,
                job_id = %outcome.job().id,
                "Chained next stage"
            );
        } else {
            debug!(
                correlation_id = %job.correlation_id,
                to = %next.queue,
                "Next stage already exists"
            );
        }
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueuesConfig;
    use crate::events::EventBus;
    use crate::job::{JobStore, SqliteJobStore};
    use crate::testing::fixtures;
    use crate::transcoder::{Rendition, RenditionFormat};
    use serde_json::json;
    use std::time::Duration;

    fn completed(queue: QueueName, payload: Value, result: Value) -> JobRecord {
        let mut job = fixtures::job(queue, "asset-1", payload);
        job.state = JobState::Completed;
        job.progress = 100;
        job.result = Some(result);
        job.priority = 3;
        job
    }

    fn transcode_output() -> Value {
        serde_json::to_value(TranscodeOutput {
            renditions: vec![Rendition {
                format: RenditionFormat::Mp4,
                location: "/renditions/asset-1/rendition.mp4".to_string(),
                size_bytes: 1024,
            }],
            duration_seconds: 12.5,
        })
        .unwrap()
    }

    #[test]
    fn test_transcode_to_pin() {
        let job = completed(
            QueueName::Transcode,
            fixtures::transcode_payload(),
            transcode_output(),
        );
        let next = next_job(&job, "signer-1").unwrap().unwrap();
        assert_eq!(next.queue, QueueName::Pin);
        assert!(next.lane.is_none());

        let payload: PinPayload = serde_json::from_value(next.payload).unwrap();
        assert_eq!(payload.renditions[0].location, "/renditions/asset-1/rendition.mp4");
        assert_eq!(payload.duration_seconds, 12.5);
        assert_eq!(payload.request.creator, "0xcreator");
    }

    #[test]
    fn test_pin_to_mint_uses_signer_lane() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = json!({
            "content_id": "cid123",
            "gateway_url": "https://ipfs.io/ipfs/cid123",
            "metadata_uri": "ipfs://cidmeta",
            "renditions": [],
            "effect_key": "k"
        });
        let job = completed(QueueName::Pin, fixtures::pin_payload(dir.path()), result);

        let next = next_job(&job, "signer-1").unwrap().unwrap();
        assert_eq!(next.queue, QueueName::Mint);
        assert_eq!(next.lane.as_deref(), Some("signer-1"));

        let payload: MintPayload = serde_json::from_value(next.payload).unwrap();
        assert_eq!(payload.content_id, "cid123");
        assert_eq!(payload.request.royalty_bps, 500);
    }

    #[test]
    fn test_mint_to_notify() {
        let result = json!({"asset_token_id": "42", "tx_receipt": "0xtx0042", "effect_key": "k"});
        let job = completed(QueueName::Mint, fixtures::mint_payload(), result);

        let next = next_job(&job, "signer-1").unwrap().unwrap();
        let payload: NotifyPayload = serde_json::from_value(next.payload).unwrap();
        assert_eq!(next.queue, QueueName::Notify);
        assert_eq!(payload.asset_id, "asset-1");
        assert_eq!(payload.token_id, "42");
        assert_eq!(payload.receipt_id, "0xtx0042");
        assert_eq!(payload.recipient, "0xcreator");
    }

    #[test]
    fn test_notify_is_last() {
        let job = completed(QueueName::Notify, fixtures::notify_payload(), json!({}));
        assert!(next_job(&job, "signer-1").unwrap().is_none());
    }

    #[test]
    fn test_only_completed_jobs_chain() {
        let mut job = completed(
            QueueName::Transcode,
            fixtures::transcode_payload(),
            transcode_output(),
        );
        job.state = JobState::Failed;
        assert!(matches!(
            next_job(&job, "signer-1"),
            Err(ChainError::NotCompleted { .. })
        ));
    }

    #[test]
    fn test_malformed_result() {
        let job = completed(
            QueueName::Transcode,
            fixtures::transcode_payload(),
            json!({"unexpected": true}),
        );
        assert!(matches!(
            next_job(&job, "signer-1"),
            Err(ChainError::Malformed { part: "result", .. })
        ));
    }

    fn chainer() -> (Chainer, Arc<JobQueue>) {
        let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::in_memory().unwrap());
        let queue = Arc::new(JobQueue::new(
            store,
            QueuesConfig::default(),
            Duration::from_millis(20),
            EventBus::default(),
        ));
        (Chainer::new(queue.clone(), "signer-1"), queue)
    }

    #[test]
    fn test_chain_is_deduplicated() {
        let (chainer, queue) = chainer();
        let job = completed(
            QueueName::Transcode,
            fixtures::transcode_payload(),
            transcode_output(),
        );

        let first = chainer.chain(&job).unwrap().unwrap();
        let second = chainer.chain(&job).unwrap().unwrap();
        assert!(first.is_created());
        assert!(!second.is_created());
        assert_eq!(first.job().id, second.job().id);

        let pins = queue.store().list_by_correlation("asset-1").unwrap();
        assert_eq!(pins.len(), 1);
        assert_eq!(pins[0].priority, 3);
        assert_eq!(pins[0].max_attempts, QueuesConfig::default().pin.max_attempts);
    }

    #[test]
    fn test_cancelled_run_is_not_chained() {
        let (chainer, queue) = chainer();
        let other = queue
            .enqueue(
                QueueName::Transcode,
                "asset-1",
                fixtures::transcode_payload(),
                EnqueueOptions::new(),
            )
            .unwrap();
        queue.cancel(&other.id).unwrap();

        let job = completed(
            QueueName::Transcode,
            fixtures::transcode_payload(),
            transcode_output(),
        );
        assert!(chainer.chain(&job).unwrap().is_none());
    }
}
