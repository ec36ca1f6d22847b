//! Durable job records and the queue store behind them.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteJobStore;
pub use store::{EnqueueOutcome, JobError, JobFilter, JobStore, RunEnqueue};
pub use types::{
    ClaimRequest, EffectRecord, EnqueueOptions, FailureKind, FailureReason, JobRecord, JobState,
    NewJob, QueueCounts, QueueName,
};
