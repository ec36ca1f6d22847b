//! Types for the pipeline runner.

use serde::{Deserialize, Serialize};

use crate::job::QueueName;

/// Worker pool of one queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    pub queue: QueueName,
    /// Worker tasks spawned for this queue.
    pub workers: usize,
}

/// Current status of the runner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerStatus {
    /// Whether the worker and reaper loops are running.
    pub running: bool,
    pub pools: Vec<PoolStatus>,
}

/// What one reaper sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaperReport {
    /// Abandoned jobs completed from a confirmed effect.
    pub reconciled: usize,
    /// Abandoned jobs returned to Waiting.
    pub requeued: usize,
    /// Abandoned jobs with no attempts left.
    pub failed: usize,
    /// Completed jobs whose missing next stage was enqueued.
    pub rechained: usize,
}

impl ReaperReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
