//! Live pipeline events for external observers.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::job::{FailureReason, JobRecord, JobState, QueueName};
use crate::status::RunOutcome;

/// Something observable happened in the pipeline.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A job changed state.
    JobUpdated {
        job_id: String,
        correlation_id: String,
        queue: QueueName,
        state: JobState,
        attempt: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        failure_reason: Option<FailureReason>,
    },
    /// An Active job reported progress.
    JobProgress {
        job_id: String,
        correlation_id: String,
        queue: QueueName,
        progress: u8,
    },
    /// A pipeline run reached a terminal outcome.
    RunFinished {
        correlation_id: String,
        outcome: RunOutcome,
    },
}

impl PipelineEvent {
    pub fn job_updated(job: &JobRecord) -> Self {
        Self::JobUpdated {
            job_id: job.id.clone(),
            correlation_id: job.correlation_id.clone(),
            queue: job.queue,
            state: job.state,
            attempt: job.attempt,
            failure_reason: job.failure_reason.clone(),
        }
    }

    /// The run this event belongs to.
    pub fn correlation_id(&self) -> &str {
        match self {
            Self::JobUpdated { correlation_id, .. }
            | Self::JobProgress { correlation_id, .. }
            | Self::RunFinished { correlation_id, .. } => correlation_id,
        }
    }

    /// Short name used for metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JobUpdated { .. } => "job_updated",
            Self::JobProgress { .. } => "job_progress",
            Self::RunFinished { .. } => "run_finished",
        }
    }
}

/// Fan-out of pipeline events. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Dropped silently when nobody is listening.
    pub fn publish(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(PipelineEvent::JobProgress {
            job_id: "job-1".to_string(),
            correlation_id: "asset-1".to_string(),
            queue: QueueName::Transcode,
            progress: 40,
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.correlation_id(), "asset-1");
        assert_eq!(event.kind(), "job_progress");
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new(4);
        assert_eq!(bus.receiver_count(), 0);
        bus.publish(PipelineEvent::RunFinished {
            correlation_id: "asset-1".to_string(),
            outcome: RunOutcome::Minted,
        });
    }

    #[test]
    fn test_event_serialization() {
        let event = PipelineEvent::JobUpdated {
            job_id: "job-1".to_string(),
            correlation_id: "asset-1".to_string(),
            queue: QueueName::Mint,
            state: JobState::DelayedRetry,
            attempt: 2,
            failure_reason: Some(FailureReason::transient("rpc timeout")),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "job_updated");
        assert_eq!(json["queue"], "mint");
        assert_eq!(json["state"], "delayed_retry");
        assert_eq!(json["failure_reason"]["kind"], "transient");
    }
}
