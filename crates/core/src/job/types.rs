//! Job record types.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The four pipeline queues, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Transcode,
    Pin,
    Mint,
    Notify,
}

impl QueueName {
    /// All queues in pipeline order.
    pub const ALL: [QueueName; 4] = [
        QueueName::Transcode,
        QueueName::Pin,
        QueueName::Mint,
        QueueName::Notify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transcode => "transcode",
            Self::Pin => "pin",
            Self::Mint => "mint",
            Self::Notify => "notify",
        }
    }

    /// The stage that follows this one, if any.
    pub fn next(&self) -> Option<QueueName> {
        match self {
            Self::Transcode => Some(Self::Pin),
            Self::Pin => Some(Self::Mint),
            Self::Mint => Some(Self::Notify),
            Self::Notify => None,
        }
    }

    /// Share of overall run progress attributed to this stage (sums to 100).
    pub fn weight(&self) -> u32 {
        match self {
            Self::Transcode => 20,
            Self::Pin => 20,
            Self::Mint => 50,
            Self::Notify => 10,
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transcode" => Ok(Self::Transcode),
            "pin" => Ok(Self::Pin),
            "mint" => Ok(Self::Mint),
            "notify" => Ok(Self::Notify),
            other => Err(format!("unknown queue: {}", other)),
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    DelayedRetry,
    Cancelled,
}

impl JobState {
    pub const ALL: [JobState; 6] = [
        JobState::Waiting,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
        JobState::DelayedRetry,
        JobState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::DelayedRetry => "delayed_retry",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the job will never run again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the job can still be cancelled.
    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Waiting | Self::DelayedRetry)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown job state: {}", s))
    }
}

/// How a failure should be treated by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Worth retrying after a backoff (network blips, rate limits, timeouts).
    Transient,
    /// Retrying cannot help (invalid input, unsupported codec, rejected tx).
    Permanent,
    /// Unknown whether the external effect happened. Guarded stages must
    /// reconcile before trying again.
    Ambiguous,
}

/// Last failure recorded against a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureReason {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Permanent, message)
    }

    pub fn ambiguous(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Ambiguous, message)
    }
}

/// A durable unit of work in one of the pipeline queues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Stable across retries.
    pub id: String,
    pub queue: QueueName,
    /// Upload id shared by every job of one pipeline run.
    pub correlation_id: String,
    /// Stage-specific input; opaque to the queue.
    pub payload: Value,
    pub state: JobState,
    /// Execution attempts so far.
    pub attempt: u32,
    pub max_attempts: u32,
    /// Lower values are claimed first.
    pub priority: i32,
    /// 0-100, never decreases while Active.
    pub progress: u8,
    /// Set iff `state == Completed`.
    pub result: Option<Value>,
    pub failure_reason: Option<FailureReason>,
    /// Serialization key; at most one Active job per lane in lane-serialized queues.
    pub lane: Option<String>,
    /// Lease token of the worker currently holding the job.
    pub owner: Option<String>,
    /// Earliest time the job may be claimed.
    pub run_at: DateTime<Utc>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Whether attempts remain after the current one.
    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Deserialize the payload into a stage-specific type.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Deserialize the result into a stage-specific type.
    pub fn result_as<T: serde::de::DeserializeOwned>(
        &self,
    ) -> Option<Result<T, serde_json::Error>> {
        self.result.clone().map(serde_json::from_value)
    }
}

/// Options accepted by `enqueue`.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub priority: i32,
    pub max_attempts: u32,
    /// Delay before the job becomes claimable.
    pub delay: Option<Duration>,
    pub lane: Option<String>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            max_attempts: 3,
            delay: None,
            lane: None,
        }
    }
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_lane(mut self, lane: impl Into<String>) -> Self {
        self.lane = Some(lane.into());
        self
    }
}

/// A new job to be inserted.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub queue: QueueName,
    pub correlation_id: String,
    pub payload: Value,
    pub options: EnqueueOptions,
}

/// Constraints applied by an atomic claim.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub queue: QueueName,
    /// Lease token stamped on the claimed job.
    pub owner: String,
    /// Maximum simultaneously Active jobs in the queue.
    pub max_active: usize,
    /// Refuse jobs whose lane already has an Active job.
    pub serialize_lanes: bool,
}

/// Job counts for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed_retry: u64,
    pub cancelled: u64,
}

impl QueueCounts {
    pub fn add(&mut self, state: JobState, count: u64) {
        match state {
            JobState::Waiting => self.waiting += count,
            JobState::Active => self.active += count,
            JobState::Completed => self.completed += count,
            JobState::Failed => self.failed += count,
            JobState::DelayedRetry => self.delayed_retry += count,
            JobState::Cancelled => self.cancelled += count,
        }
    }

    pub fn get(&self, state: JobState) -> u64 {
        match state {
            JobState::Waiting => self.waiting,
            JobState::Active => self.active,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
            JobState::DelayedRetry => self.delayed_retry,
            JobState::Cancelled => self.cancelled,
        }
    }

    pub fn total(&self) -> u64 {
        JobState::ALL.iter().map(|s| self.get(*s)).sum()
    }
}

/// Record of an irreversible external effect, keyed by effect key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectRecord {
    pub effect_key: String,
    pub correlation_id: String,
    pub queue: QueueName,
    pub job_id: String,
    /// External receipt once the effect is confirmed.
    pub receipt: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl EffectRecord {
    pub fn is_confirmed(&self) -> bool {
        self.receipt.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_order_and_weights() {
        assert_eq!(QueueName::Transcode.next(), Some(QueueName::Pin));
        assert_eq!(QueueName::Pin.next(), Some(QueueName::Mint));
        assert_eq!(QueueName::Mint.next(), Some(QueueName::Notify));
        assert_eq!(QueueName::Notify.next(), None);

        let total: u32 = QueueName::ALL.iter().map(|q| q.weight()).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_queue_name_parse() {
        assert_eq!("mint".parse::<QueueName>().unwrap(), QueueName::Mint);
        assert!("upload".parse::<QueueName>().is_err());
    }

    #[test]
    fn test_job_state_round_trip_str() {
        for state in JobState::ALL {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
    }

    #[test]
    fn test_job_state_classification() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::DelayedRetry.is_terminal());

        assert!(JobState::Waiting.can_cancel());
        assert!(JobState::DelayedRetry.can_cancel());
        assert!(!JobState::Active.can_cancel());
    }

    #[test]
    fn test_failure_reason_serialization() {
        let reason = FailureReason::permanent("unsupported codec");
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["kind"], "permanent");
        assert_eq!(json["message"], "unsupported codec");
    }

    #[test]
    fn test_queue_counts() {
        let mut counts = QueueCounts::default();
        counts.add(JobState::Waiting, 3);
        counts.add(JobState::Active, 1);
        counts.add(JobState::Waiting, 2);
        assert_eq!(counts.waiting, 5);
        assert_eq!(counts.get(JobState::Active), 1);
        assert_eq!(counts.total(), 6);
    }

    #[test]
    fn test_enqueue_options_builder() {
        let opts = EnqueueOptions::new()
            .with_priority(-5)
            .with_max_attempts(7)
            .with_lane("signer-1");
        assert_eq!(opts.priority, -5);
        assert_eq!(opts.max_attempts, 7);
        assert_eq!(opts.lane.as_deref(), Some("signer-1"));
        assert!(opts.delay.is_none());
    }
}
