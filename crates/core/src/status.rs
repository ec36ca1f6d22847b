//! Run status aggregation and queue statistics.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::QueuesConfig;
use crate::job::{FailureReason, JobError, JobRecord, JobState, JobStore, QueueCounts, QueueName};

/// Where a pipeline run stands as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    InProgress,
    /// Asset minted; notification delivered or given up on.
    Minted,
    FailedAt { stage: QueueName, reason: String },
    Cancelled,
}

impl RunOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// Effective state of one stage of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageStatus {
    pub queue: QueueName,
    /// None until the chainer has created a job for this stage.
    pub state: Option<JobState>,
    pub job_id: Option<String>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub progress: u8,
    pub failure_reason: Option<FailureReason>,
}

/// Aggregate view of every job sharing one correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatus {
    pub correlation_id: String,
    /// Furthest stage that has a job.
    pub current_stage: QueueName,
    /// Weighted over all four stages.
    pub progress: u8,
    pub outcome: RunOutcome,
    pub stages: Vec<StageStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Counts and configuration for one queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue: QueueName,
    pub counts: QueueCounts,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub serialize_lanes: bool,
}

/// Share of a stage counted as done, 0-100.
fn stage_completion(job: &JobRecord) -> u32 {
    match (job.queue, job.state) {
        (_, JobState::Completed) => 100,
        // Notification is best effort: giving up still finishes the run
        (QueueName::Notify, JobState::Failed) => 100,
        _ => u32::from(job.progress.min(100)),
    }
}

/// Fold the jobs of one run into its status.
///
/// `jobs` must all share `correlation_id`. A resubmitted run starts over
/// with a new transcode job; only jobs from that attempt onwards count,
/// and within a stage the most recently created job wins.
pub fn summarize_run(correlation_id: &str, jobs: &[JobRecord]) -> Option<RunStatus> {
    let first = jobs.first()?;
    let attempt_start = jobs
        .iter()
        .filter(|j| j.queue == QueueName::Transcode)
        .map(|j| j.created_at)
        .max();

    let mut effective: [Option<&JobRecord>; 4] = [None; 4];
    let mut created_at = first.created_at;
    let mut updated_at = first.updated_at;
    for job in jobs {
        created_at = created_at.min(job.created_at);
        updated_at = updated_at.max(job.updated_at);
        if attempt_start.map_or(false, |start| job.created_at < start) {
            continue;
        }
        let slot = &mut effective[stage_index(job.queue)];
        if slot.map_or(true, |current| job.created_at >= current.created_at) {
            *slot = Some(job);
        }
    }

    let mut weighted = 0u32;
    let mut current_stage = QueueName::Transcode;
    let mut cancelled = false;
    let mut failed: Option<&JobRecord> = None;
    let mut stages = Vec::with_capacity(4);

    for queue in QueueName::ALL {
        let job = effective[stage_index(queue)];
        if let Some(job) = job {
            current_stage = queue;
            weighted += queue.weight() * stage_completion(job);
            match job.state {
                JobState::Cancelled => cancelled = true,
                JobState::Failed if queue != QueueName::Notify && failed.is_none() => {
                    failed = Some(job)
                }
                _ => {}
            }
        }
        stages.push(StageStatus {
            queue,
            state: job.map(|j| j.state),
            job_id: job.map(|j| j.id.clone()),
            attempt: job.map_or(0, |j| j.attempt),
            max_attempts: job.map_or(0, |j| j.max_attempts),
            progress: job.map_or(0, |j| j.progress),
            failure_reason: job.and_then(|j| j.failure_reason.clone()),
        });
    }

    let notify_done = effective[stage_index(QueueName::Notify)]
        .map_or(false, |j| matches!(j.state, JobState::Completed | JobState::Failed));

    let outcome = if cancelled {
        RunOutcome::Cancelled
    } else if let Some(job) = failed {
        RunOutcome::FailedAt {
            stage: job.queue,
            reason: job
                .failure_reason
                .as_ref()
                .map(|r| r.message.clone())
                .unwrap_or_else(|| "unknown failure".to_string()),
        }
    } else if notify_done {
        RunOutcome::Minted
    } else {
        RunOutcome::InProgress
    };

    let progress = if outcome == RunOutcome::Minted {
        100
    } else {
        (weighted / 100).min(100) as u8
    };

    Some(RunStatus {
        correlation_id: correlation_id.to_string(),
        current_stage,
        progress,
        outcome,
        stages,
        created_at,
        updated_at,
    })
}

fn stage_index(queue: QueueName) -> usize {
    match queue {
        QueueName::Transcode => 0,
        QueueName::Pin => 1,
        QueueName::Mint => 2,
        QueueName::Notify => 3,
    }
}

/// Read-only views over the job store.
#[derive(Clone)]
pub struct StatusReporter {
    store: Arc<dyn JobStore>,
    queues: QueuesConfig,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn JobStore>, queues: QueuesConfig) -> Self {
        Self { store, queues }
    }

    /// Status of one run, or None if no job carries this correlation id.
    pub fn run_status(&self, correlation_id: &str) -> Result<Option<RunStatus>, JobError> {
        let jobs = self.store.list_by_correlation(correlation_id)?;
        Ok(summarize_run(correlation_id, &jobs))
    }

    pub fn queue_stats(&self, queue: QueueName) -> Result<QueueStats, JobError> {
        let config = self.queues.get(queue);
        Ok(QueueStats {
            queue,
            counts: self.store.counts(queue)?,
            concurrency: config.concurrency,
            max_attempts: config.max_attempts,
            serialize_lanes: config.serialize_lanes,
        })
    }

    pub fn all_queue_stats(&self) -> Result<Vec<QueueStats>, JobError> {
        QueueName::ALL
            .into_iter()
            .map(|queue| self.queue_stats(queue))
            .collect()
    }
}
