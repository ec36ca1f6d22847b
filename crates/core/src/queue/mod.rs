//! Durable work queues on top of the job store.
//!
//! `JobQueue` adds what the store alone does not provide: parking idle
//! workers until work may be available, per-queue concurrency and retry
//! policy, lease tokens, metrics and live events.

mod backoff;

pub use backoff::{RetryDecision, RetryPolicy};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, warn};

use crate::config::{QueueConfig, QueuesConfig};
use crate::events::{EventBus, PipelineEvent};
use crate::job::{
    ClaimRequest, EnqueueOptions, EnqueueOutcome, FailureReason, JobError, JobRecord, JobState,
    JobStore, NewJob, QueueName, RunEnqueue,
};
use crate::metrics;

/// Errors from queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] JobError),

    #[error("Failed to serialize payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl QueueError {
    /// Whether the worker lost ownership of the job it was acting on.
    pub fn is_lease_lost(&self) -> bool {
        matches!(self, Self::Store(JobError::LeaseLost(_)))
    }
}

/// A job claimed by one worker, with the lease token that proves ownership.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: JobRecord,
    pub lease: String,
}

impl ClaimedJob {
    pub fn id(&self) -> &str {
        &self.job.id
    }

    pub fn queue(&self) -> QueueName {
        self.job.queue
    }

    pub fn correlation_id(&self) -> &str {
        &self.job.correlation_id
    }
}

/// The four pipeline queues over one durable store.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    queues: QueuesConfig,
    wakers: [Arc<Notify>; 4],
    poll_interval: Duration,
    events: EventBus,
}

fn queue_index(queue: QueueName) -> usize {
    match queue {
        QueueName::Transcode => 0,
        QueueName::Pin => 1,
        QueueName::Mint => 2,
        QueueName::Notify => 3,
    }
}

impl JobQueue {
    pub fn new(
        store: Arc<dyn JobStore>,
        queues: QueuesConfig,
        poll_interval: Duration,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            queues,
            wakers: std::array::from_fn(|_| Arc::new(Notify::new())),
            poll_interval,
            events,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self, queue: QueueName) -> &QueueConfig {
        self.queues.get(queue)
    }

    pub fn policy(&self, queue: QueueName) -> RetryPolicy {
        RetryPolicy::from_config(self.config(queue))
    }

    /// Wake one parked worker of `queue`.
    pub fn wake(&self, queue: QueueName) {
        self.wakers[queue_index(queue)].notify_one();
    }

    /// Add a Waiting job to `queue`.
    pub fn enqueue(
        &self,
        queue: QueueName,
        correlation_id: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<JobRecord, QueueError> {
        let job = self.store.enqueue(NewJob {
            queue,
            correlation_id: correlation_id.to_string(),
            payload,
            options,
        })?;
        self.after_enqueue(&job);
        Ok(job)
    }

    /// Add a job unless the run already has a live one in `queue`.
    pub fn enqueue_unique(
        &self,
        queue: QueueName,
        correlation_id: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<EnqueueOutcome, QueueError> {
        let outcome = self.store.enqueue_unique(NewJob {
            queue,
            correlation_id: correlation_id.to_string(),
            payload,
            options,
        })?;
        if outcome.is_created() {
            self.after_enqueue(outcome.job());
        }
        Ok(outcome)
    }

    /// Start a new attempt of a run if `admit` accepts its current jobs.
    pub fn enqueue_run(
        &self,
        queue: QueueName,
        correlation_id: &str,
        payload: Value,
        options: EnqueueOptions,
        admit: &dyn Fn(&[JobRecord]) -> bool,
    ) -> Result<RunEnqueue, QueueError> {
        let outcome = self.store.enqueue_run(
            NewJob {
                queue,
                correlation_id: correlation_id.to_string(),
                payload,
                options,
            },
            admit,
        )?;
        if let RunEnqueue::Created(ref job) = outcome {
            self.after_enqueue(job);
        }
        Ok(outcome)
    }

    fn after_enqueue(&self, job: &JobRecord) {
        debug!(job_id = %job.id, queue = %job.queue, correlation_id = %job.correlation_id, "Enqueued job");
        metrics::JOBS_ENQUEUED
            .with_label_values(&[job.queue.as_str()])
            .inc();
        self.events.publish(PipelineEvent::job_updated(job));
        self.wake(job.queue);
    }

    /// Claim the next eligible job without waiting.
    pub fn try_claim(
        &self,
        queue: QueueName,
        worker_id: &str,
    ) -> Result<Option<ClaimedJob>, QueueError> {
        let config = self.config(queue);
        let lease = format!("{}:{}", worker_id, uuid::Uuid::new_v4());
        let request = ClaimRequest {
            queue,
            owner: lease.clone(),
            max_active: config.concurrency,
            serialize_lanes: config.serialize_lanes,
        };

        let Some(job) = self.store.claim(&request)? else {
            return Ok(None);
        };

        debug!(job_id = %job.id, queue = %queue, attempt = job.attempt, worker = worker_id, "Claimed job");
        metrics::JOBS_CLAIMED.with_label_values(&[queue.as_str()]).inc();
        self.events.publish(PipelineEvent::job_updated(&job));
        Ok(Some(ClaimedJob { job, lease }))
    }

    /// Park until a job can be claimed or shutdown is signalled.
    ///
    /// Wakes on enqueue/completion notifications and at least every poll
    /// interval, so delayed jobs become visible without busy spinning.
    pub async fn claim(
        &self,
        queue: QueueName,
        worker_id: &str,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<Option<ClaimedJob>, QueueError> {
        let waker = self.wakers[queue_index(queue)].clone();
        loop {
            if let Some(claimed) = self.try_claim(queue, worker_id)? {
                return Ok(Some(claimed));
            }

            tokio::select! {
                _ = shutdown_rx.recv() => return Ok(None),
                _ = waker.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Active -> Completed.
    pub fn complete(&self, claimed: &ClaimedJob, result: Value) -> Result<JobRecord, QueueError> {
        let job = self.store.complete(claimed.id(), &claimed.lease, result)?;
        metrics::JOBS_COMPLETED
            .with_label_values(&[job.queue.as_str()])
            .inc();
        self.events.publish(PipelineEvent::job_updated(&job));
        // A slot, lane or correlation just freed up
        self.wake(job.queue);
        Ok(job)
    }

    /// Record a failed attempt; the retry policy picks DelayedRetry or Failed.
    pub fn fail(
        &self,
        claimed: &ClaimedJob,
        reason: FailureReason,
    ) -> Result<JobRecord, QueueError> {
        let queue = claimed.queue();
        let kind = reason.kind;
        let retry_at = match self.policy(queue).decide(claimed.job.attempt, kind) {
            RetryDecision::Retry { delay } => Some(
                Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()),
            ),
            RetryDecision::GiveUp => None,
        };

        let job = self
            .store
            .fail(claimed.id(), &claimed.lease, reason, retry_at)?;

        let kind_label = kind_label(kind);
        match job.state {
            JobState::DelayedRetry => {
                warn!(
                    job_id = %job.id,
                    queue = %queue,
                    attempt = job.attempt,
                    max_attempts = job.max_attempts,
                    run_at = %job.run_at,
                    "Job failed, retry scheduled"
                );
                metrics::JOB_RETRIES
                    .with_label_values(&[queue.as_str(), kind_label])
                    .inc();
            }
            _ => {
                metrics::JOBS_FAILED
                    .with_label_values(&[queue.as_str(), kind_label])
                    .inc();
            }
        }

        self.events.publish(PipelineEvent::job_updated(&job));
        self.wake(queue);
        Ok(job)
    }

    /// Raise the progress of a claimed job. Returns false if nothing changed.
    pub fn report_progress(&self, claimed: &ClaimedJob, percent: u8) -> Result<bool, QueueError> {
        let changed = self
            .store
            .report_progress(claimed.id(), &claimed.lease, percent)?;
        if changed {
            self.events.publish(PipelineEvent::JobProgress {
                job_id: claimed.job.id.clone(),
                correlation_id: claimed.job.correlation_id.clone(),
                queue: claimed.queue(),
                progress: percent.min(100),
            });
        }
        Ok(changed)
    }

    /// Refresh the lease. Returns false if it is gone.
    pub fn heartbeat(&self, claimed: &ClaimedJob) -> Result<bool, QueueError> {
        Ok(self.store.heartbeat(claimed.id(), &claimed.lease)?)
    }

    /// Give a claimed job back without consuming a failure.
    pub fn release(
        &self,
        claimed: &ClaimedJob,
        reason: FailureReason,
    ) -> Result<JobRecord, QueueError> {
        let job = self.store.release(claimed.id(), &claimed.lease, reason)?;
        self.events.publish(PipelineEvent::job_updated(&job));
        self.wake(job.queue);
        Ok(job)
    }

    /// Waiting/DelayedRetry -> Cancelled.
    pub fn cancel(&self, job_id: &str) -> Result<JobRecord, QueueError> {
        let job = self.store.cancel(job_id)?;
        metrics::JOBS_CANCELLED
            .with_label_values(&[job.queue.as_str()])
            .inc();
        self.events.publish(PipelineEvent::job_updated(&job));
        Ok(job)
    }

    /// Cancel every cancellable job of a run.
    pub fn cancel_correlation(&self, correlation_id: &str) -> Result<Vec<JobRecord>, QueueError> {
        let jobs = self.store.cancel_correlation(correlation_id)?;
        for job in &jobs {
            metrics::JOBS_CANCELLED
                .with_label_values(&[job.queue.as_str()])
                .inc();
            self.events.publish(PipelineEvent::job_updated(job));
        }
        Ok(jobs)
    }
}

pub(crate) fn kind_label(kind: crate::job::FailureKind) -> &'static str {
    match kind {
        crate::job::FailureKind::Transient => "transient",
        crate::job::FailureKind::Permanent => "permanent",
        crate::job::FailureKind::Ambiguous => "ambiguous",
    }
}
