//! The onboarding pipeline: public entry point of the crate.
//!
//! `OnboardingPipeline` wires the store, queues, stages, chainer and runner
//! together and exposes the operations the HTTP API mirrors.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::info;

use crate::chainer::Chainer;
use crate::config::{PipelineConfig, QueuesConfig};
use crate::content_store::ContentStore;
use crate::events::{EventBus, PipelineEvent};
use crate::idempotency::IdempotencyGuard;
use crate::job::{
    EnqueueOptions, JobError, JobFilter, JobRecord, JobStore, QueueName, RunEnqueue,
};
use crate::ledger::LedgerClient;
use crate::notifier::NotificationSink;
use crate::orchestrator::{PipelineRunner, ReaperReport, RunnerStatus};
use crate::queue::{JobQueue, QueueError};
use crate::stage::{
    AssetMetadata, AssetRequest, MintStage, NotifyStage, PinStage, Stage, TranscodePayload,
    TranscodeStage,
};
use crate::status::{summarize_run, QueueStats, RunOutcome, RunStatus, StatusReporter};
use crate::transcoder::{RenditionFormat, Transcoder};

/// Royalties are expressed in basis points of the sale price.
pub const MAX_ROYALTY_BPS: u16 = 10_000;

const MAX_CORRELATION_ID_LEN: usize = 128;

/// Errors from pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Run {0} was cancelled and cannot be resubmitted")]
    RunCancelled(String),

    #[error("Nothing to cancel in run {0}: its jobs are running or finished")]
    NothingToCancel(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] JobError),
}

/// External collaborators of the four stages.
#[derive(Clone)]
pub struct PipelineServices {
    pub transcoder: Arc<dyn Transcoder>,
    pub content_store: Arc<dyn ContentStore>,
    pub ledger: Arc<dyn LedgerClient>,
    pub notifier: Arc<dyn NotificationSink>,
}

/// Request to onboard one uploaded asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub source_location: String,
    #[serde(default)]
    pub metadata: AssetMetadata,
    pub creator: String,
    #[serde(default)]
    pub royalty_bps: u16,
    #[serde(default)]
    pub recipient: Option<String>,
    /// Defaults to the configured target formats.
    #[serde(default)]
    pub target_formats: Option<Vec<RenditionFormat>>,
    /// Defaults to the configured priority.
    #[serde(default)]
    pub priority: Option<i32>,
    /// Upload id to use as the correlation id. Generated when absent.
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl SubmitRequest {
    pub fn new(source_location: impl Into<String>, creator: impl Into<String>) -> Self {
        Self {
            source_location: source_location.into(),
            metadata: AssetMetadata::default(),
            creator: creator.into(),
            royalty_bps: 0,
            recipient: None,
            target_formats: None,
            priority: None,
            correlation_id: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.metadata.title = title.into();
        self
    }

    pub fn with_royalty(mut self, royalty_bps: u16) -> Self {
        self.royalty_bps = royalty_bps;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.source_location.trim().is_empty() {
            return Err(PipelineError::InvalidRequest(
                "source_location must not be empty".to_string(),
            ));
        }
        if self.creator.trim().is_empty() {
            return Err(PipelineError::InvalidRequest(
                "creator must not be empty".to_string(),
            ));
        }
        if self.royalty_bps > MAX_ROYALTY_BPS {
            return Err(PipelineError::InvalidRequest(format!(
                "royalty_bps must be at most {}, got {}",
                MAX_ROYALTY_BPS, self.royalty_bps
            )));
        }
        if matches!(&self.target_formats, Some(formats) if formats.is_empty()) {
            return Err(PipelineError::InvalidRequest(
                "target_formats must not be empty when given".to_string(),
            ));
        }
        if let Some(id) = &self.correlation_id {
            if id.trim().is_empty() || id.len() > MAX_CORRELATION_ID_LEN {
                return Err(PipelineError::InvalidRequest(format!(
                    "correlation_id must be 1-{} characters",
                    MAX_CORRELATION_ID_LEN
                )));
            }
        }
        Ok(())
    }
}

/// Result of a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub correlation_id: String,
    /// The transcode job that starts the run.
    pub job_id: String,
    /// False when the run already existed and nothing was enqueued.
    pub created: bool,
}

/// Durable content-onboarding pipeline.
pub struct OnboardingPipeline {
    config: PipelineConfig,
    queue: Arc<JobQueue>,
    runner: PipelineRunner,
    reporter: StatusReporter,
}

impl OnboardingPipeline {
    pub fn new(
        config: PipelineConfig,
        queues: QueuesConfig,
        store: Arc<dyn JobStore>,
        services: PipelineServices,
    ) -> Self {
        let events = EventBus::default();
        let queue = Arc::new(JobQueue::new(
            store.clone(),
            queues.clone(),
            Duration::from_millis(config.poll_interval_ms),
            events,
        ));
        let guard = IdempotencyGuard::new(store.clone());
        let chainer = Arc::new(Chainer::new(queue.clone(), config.signing_identity.clone()));

        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(TranscodeStage::new(services.transcoder)),
            Arc::new(PinStage::new(services.content_store, guard.clone())),
            Arc::new(MintStage::new(
                services.ledger,
                guard,
                config.signing_identity.clone(),
            )),
            Arc::new(NotifyStage::new(services.notifier)),
        ];

        let runner = PipelineRunner::new(config.clone(), queue.clone(), chainer, stages);
        let reporter = StatusReporter::new(store, queues);

        Self {
            config,
            queue,
            runner,
            reporter,
        }
    }

    /// Start worker, reaper and maintenance loops.
    pub async fn start(&self) {
        self.runner.start().await;
    }

    pub async fn stop(&self) {
        self.runner.stop().await;
    }

    pub fn runner_status(&self) -> RunnerStatus {
        self.runner.status()
    }

    /// Run one recovery sweep immediately.
    pub async fn reap(&self) -> ReaperReport {
        self.runner.reap().await
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start a pipeline run for an uploaded asset.
    ///
    /// Submitting an existing correlation id is idempotent while the run is
    /// in progress or minted; a failed run starts a fresh attempt.
    pub fn submit_pipeline(&self, request: SubmitRequest) -> Result<SubmitResponse, PipelineError> {
        request.validate()?;

        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let payload = TranscodePayload {
            request: AssetRequest {
                source_location: request.source_location,
                metadata: request.metadata,
                creator: request.creator,
                royalty_bps: request.royalty_bps,
                recipient: request.recipient,
                target_formats: request
                    .target_formats
                    .unwrap_or_else(|| self.config.target_formats.clone()),
            },
        };
        let options = EnqueueOptions::new()
            .with_priority(request.priority.unwrap_or(self.config.default_priority))
            .with_max_attempts(self.queue.config(QueueName::Transcode).max_attempts);

        // A run with no jobs or a failed last attempt may start over
        let admit = |jobs: &[JobRecord]| {
            matches!(
                summarize_run(&correlation_id, jobs).map(|status| status.outcome),
                None | Some(RunOutcome::FailedAt { .. })
            )
        };
        let job = match self.queue.enqueue_run(
            QueueName::Transcode,
            &correlation_id,
            serde_json::to_value(payload).map_err(QueueError::from)?,
            options,
            &admit,
        )? {
            RunEnqueue::Created(job) => job,
            RunEnqueue::Declined(jobs) => {
                let status = summarize_run(&correlation_id, &jobs)
                    .ok_or_else(|| PipelineError::RunNotFound(correlation_id.clone()))?;
                if status.outcome == RunOutcome::Cancelled {
                    return Err(PipelineError::RunCancelled(correlation_id));
                }
                return Ok(SubmitResponse {
                    job_id: status.stages[0].job_id.clone().unwrap_or_default(),
                    correlation_id,
                    created: false,
                });
            }
        };

        info!(
            correlation_id = %correlation_id,
            job_id = %job.id,
            priority = job.priority,
            "Pipeline submitted"
        );
        Ok(SubmitResponse {
            correlation_id,
            job_id: job.id,
            created: true,
        })
    }

    pub fn run_status(&self, correlation_id: &str) -> Result<RunStatus, PipelineError> {
        self.reporter
            .run_status(correlation_id)?
            .ok_or_else(|| PipelineError::RunNotFound(correlation_id.to_string()))
    }

    pub fn queue_stats(&self, queue: QueueName) -> Result<QueueStats, PipelineError> {
        Ok(self.reporter.queue_stats(queue)?)
    }

    pub fn all_queue_stats(&self) -> Result<Vec<QueueStats>, PipelineError> {
        Ok(self.reporter.all_queue_stats()?)
    }

    /// Cancel every job of a run that has not started yet.
    pub fn cancel_run(&self, correlation_id: &str) -> Result<Vec<JobRecord>, PipelineError> {
        if self.queue.store().list_by_correlation(correlation_id)?.is_empty() {
            return Err(PipelineError::RunNotFound(correlation_id.to_string()));
        }
        let cancelled = self.queue.cancel_correlation(correlation_id)?;
        if cancelled.is_empty() {
            return Err(PipelineError::NothingToCancel(correlation_id.to_string()));
        }
        info!(correlation_id = %correlation_id, jobs = cancelled.len(), "Run cancelled");
        self.publish_outcome(correlation_id);
        Ok(cancelled)
    }

    /// Cancel one Waiting or DelayedRetry job.
    pub fn cancel_job(&self, job_id: &str) -> Result<JobRecord, PipelineError> {
        let job = self.queue.cancel(job_id).map_err(|e| match e {
            QueueError::Store(JobError::NotFound(id)) => PipelineError::JobNotFound(id),
            other => PipelineError::Queue(other),
        })?;
        self.publish_outcome(&job.correlation_id);
        Ok(job)
    }

    pub fn get_job(&self, job_id: &str) -> Result<JobRecord, PipelineError> {
        self.queue
            .store()
            .get(job_id)?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))
    }

    /// Every job of a run, oldest first.
    pub fn list_run_jobs(&self, correlation_id: &str) -> Result<Vec<JobRecord>, PipelineError> {
        let jobs = self.queue.store().list_by_correlation(correlation_id)?;
        if jobs.is_empty() {
            return Err(PipelineError::RunNotFound(correlation_id.to_string()));
        }
        Ok(jobs)
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, PipelineError> {
        Ok(self.queue.store().list(filter)?)
    }

    /// Delete terminal jobs last updated before `cutoff`. Effect receipts are kept.
    pub fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize, PipelineError> {
        let purged = self.queue.store().purge_terminal_before(cutoff)?;
        info!(purged, cutoff = %cutoff, "Purged terminal jobs");
        Ok(purged)
    }

    /// Live pipeline events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.queue.events().subscribe()
    }

    pub fn events(&self) -> &EventBus {
        self.queue.events()
    }

    fn publish_outcome(&self, correlation_id: &str) {
        if let Ok(Some(status)) = self.reporter.run_status(correlation_id) {
            if status.outcome.is_terminal() {
                self.queue.events().publish(PipelineEvent::RunFinished {
                    correlation_id: correlation_id.to_string(),
                    outcome: status.outcome,
                });
            }
        }
    }
}
