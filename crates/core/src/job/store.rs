//! Job storage trait and types.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use super::types::{
    ClaimRequest, EffectRecord, FailureReason, JobRecord, JobState, NewJob, QueueCounts,
    QueueName,
};

/// Error type for job store operations.
#[derive(Debug, Error)]
pub enum JobError {
    /// Job not found.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the job's current state.
    #[error("Cannot {operation} job {job_id}: current state is {current_state}")]
    InvalidState {
        job_id: String,
        current_state: JobState,
        operation: String,
    },

    /// The caller no longer owns the job (completed, reclaimed or released elsewhere).
    #[error("Lease on job {0} is no longer held by this worker")]
    LeaseLost(String),

    /// Effect record not found.
    #[error("Effect not found: {0}")]
    EffectNotFound(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Payload or result (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for JobError {
    fn from(e: rusqlite::Error) -> Self {
        JobError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for JobError {
    fn from(e: serde_json::Error) -> Self {
        JobError::Serialization(e.to_string())
    }
}

/// Outcome of a deduplicating enqueue.
#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
    /// A new job was inserted.
    Created(JobRecord),
    /// A live job for the same correlation and queue already existed.
    Existing(JobRecord),
}

impl EnqueueOutcome {
    pub fn job(&self) -> &JobRecord {
        match self {
            Self::Created(job) | Self::Existing(job) => job,
        }
    }

    pub fn into_job(self) -> JobRecord {
        match self {
            Self::Created(job) | Self::Existing(job) => job,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Outcome of starting a run attempt.
#[derive(Debug, Clone)]
pub enum RunEnqueue {
    /// The admission check passed and the job was inserted.
    Created(JobRecord),
    /// Not admitted; the run's jobs as they were when checked.
    Declined(Vec<JobRecord>),
}

/// Filter for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub queue: Option<QueueName>,
    pub state: Option<JobState>,
    pub correlation_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl JobFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            queue: None,
            state: None,
            correlation_id: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_queue(mut self, queue: QueueName) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Durable job storage.
///
/// Every state transition of an Active job is conditional on the caller's
/// lease token (`owner`), so a worker that lost its lease cannot overwrite
/// the outcome recorded by whoever holds it now.
pub trait JobStore: Send + Sync {
    /// Insert a new Waiting job.
    fn enqueue(&self, job: NewJob) -> Result<JobRecord, JobError>;

    /// Insert a new job unless a job for the same correlation and queue
    /// already exists in any state other than Failed or Cancelled. Only the
    /// run's current attempt counts: jobs created before its latest
    /// transcode job are ignored.
    fn enqueue_unique(&self, job: NewJob) -> Result<EnqueueOutcome, JobError>;

    /// Insert `job` only if `admit` accepts every existing job of its run.
    ///
    /// Check and insert happen in one write transaction, so concurrent
    /// callers for the same run see each other's jobs.
    fn enqueue_run(
        &self,
        job: NewJob,
        admit: &dyn Fn(&[JobRecord]) -> bool,
    ) -> Result<RunEnqueue, JobError>;

    /// Atomically claim the next eligible job, marking it Active.
    fn claim(&self, request: &ClaimRequest) -> Result<Option<JobRecord>, JobError>;

    /// Active -> Completed with the given result.
    fn complete(&self, id: &str, owner: &str, result: Value) -> Result<JobRecord, JobError>;

    /// Active -> DelayedRetry (when `retry_at` is set and attempts remain) or Failed.
    fn fail(
        &self,
        id: &str,
        owner: &str,
        reason: FailureReason,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<JobRecord, JobError>;

    /// Refresh the liveness timestamp. Returns false if the lease is gone.
    fn heartbeat(&self, id: &str, owner: &str) -> Result<bool, JobError>;

    /// Raise progress (never lowers it). Returns false if nothing was written.
    fn report_progress(&self, id: &str, owner: &str, percent: u8) -> Result<bool, JobError>;

    /// Waiting/DelayedRetry -> Cancelled.
    fn cancel(&self, id: &str) -> Result<JobRecord, JobError>;

    /// Cancel every cancellable job of a run. Returns the cancelled jobs.
    fn cancel_correlation(&self, correlation_id: &str) -> Result<Vec<JobRecord>, JobError>;

    /// Get a job by ID.
    fn get(&self, id: &str) -> Result<Option<JobRecord>, JobError>;

    /// All jobs of one run, oldest first.
    fn list_by_correlation(&self, correlation_id: &str) -> Result<Vec<JobRecord>, JobError>;

    /// List jobs matching the filter.
    fn list(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, JobError>;

    /// Job counts by state for one queue.
    fn counts(&self, queue: QueueName) -> Result<QueueCounts, JobError>;

    /// Active jobs whose last heartbeat is older than `stale_before`.
    fn abandoned(
        &self,
        queue: QueueName,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<JobRecord>, JobError>;

    /// Move the lease of a still-stale Active job to `new_owner`.
    fn take_over(
        &self,
        id: &str,
        stale_owner: &str,
        new_owner: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, JobError>;

    /// Return an Active job to Waiting (or Failed when no attempts remain).
    fn release(&self, id: &str, owner: &str, reason: FailureReason)
        -> Result<JobRecord, JobError>;

    /// Completed jobs in `queue` for which no job exists in the next queue.
    fn unchained(&self, queue: QueueName, limit: i64) -> Result<Vec<JobRecord>, JobError>;

    /// Delete terminal jobs last updated before `cutoff`.
    fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize, JobError>;

    /// Persist the intent to perform an effect. Idempotent per effect key.
    fn record_intent(
        &self,
        effect_key: &str,
        correlation_id: &str,
        queue: QueueName,
        job_id: &str,
    ) -> Result<EffectRecord, JobError>;

    /// Attach the external receipt to a recorded intent.
    fn confirm_effect(&self, effect_key: &str, receipt: Value) -> Result<EffectRecord, JobError>;

    /// Look up an effect by key.
    fn get_effect(&self, effect_key: &str) -> Result<Option<EffectRecord>, JobError>;
}
