//! Durable media onboarding pipeline: transcode, pin, mint and notify.
//!
//! Jobs live in a SQLite-backed queue per stage. Workers claim them under a
//! lease, the chainer enqueues each run's next stage, and the reaper recovers
//! work whose worker stopped heartbeating. Pin and mint are guarded by an
//! effect ledger so a retry never repeats an upload or a mint.

pub mod chainer;
pub mod config;
pub mod content_store;
pub mod events;
pub mod idempotency;
pub mod job;
pub mod ledger;
pub mod metrics;
pub mod notifier;
pub mod orchestrator;
pub mod pipeline;
pub mod queue;
pub mod stage;
pub mod status;
pub mod testing;
pub mod transcoder;

pub use chainer::{next_job, ChainError, Chainer, NextJob};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, NotifierBackend,
    PipelineConfig, QueueConfig, QueuesConfig, SanitizedConfig,
};
pub use content_store::{ContentStore, ContentStoreError, HttpContentStore};
pub use events::{EventBus, PipelineEvent};
pub use idempotency::{GuardCheck, IdempotencyGuard};
pub use job::{
    EffectRecord, EnqueueOptions, FailureKind, FailureReason, JobError, JobFilter, JobRecord,
    JobState, JobStore, QueueCounts, QueueName, RunEnqueue, SqliteJobStore,
};
pub use ledger::{HttpLedgerClient, LedgerClient, LedgerError};
pub use notifier::{create_notifier, LogNotifier, NotificationSink, NotifierError, WebhookNotifier};
pub use orchestrator::{PipelineRunner, ReaperReport, RunnerStatus};
pub use pipeline::{
    OnboardingPipeline, PipelineError, PipelineServices, SubmitRequest, SubmitResponse,
};
pub use queue::{JobQueue, QueueError, RetryPolicy};
pub use stage::{AssetMetadata, AssetRequest, IdempotencyClass, Stage, StageError};
pub use status::{summarize_run, QueueStats, RunOutcome, RunStatus, StageStatus, StatusReporter};
pub use transcoder::{FfmpegTranscoder, RenditionFormat, Transcoder, TranscoderConfig, TranscoderError};
