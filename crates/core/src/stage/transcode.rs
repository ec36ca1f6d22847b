//! Transcode stage: source media to web renditions.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::job::{JobRecord, QueueName};
use crate::metrics;
use crate::transcoder::{TranscodeProgress, TranscodeRequest, Transcoder};

use super::{IdempotencyClass, Stage, StageError, StageProgress, TranscodePayload};

pub struct TranscodeStage {
    transcoder: Arc<dyn Transcoder>,
}

impl TranscodeStage {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self { transcoder }
    }
}

#[async_trait]
impl Stage for TranscodeStage {
    fn queue(&self) -> QueueName {
        QueueName::Transcode
    }

    fn idempotency(&self) -> IdempotencyClass {
        // Output files are keyed by run, a rerun overwrites them
        IdempotencyClass::Safe
    }

    async fn execute(&self, job: &JobRecord, progress: StageProgress) -> Result<Value, StageError> {
        let payload: TranscodePayload = job.payload_as()?;
        if payload.request.target_formats.is_empty() {
            return Err(StageError::InvalidPayload(
                "no target formats requested".to_string(),
            ));
        }

        let request = TranscodeRequest {
            job_id: job.id.clone(),
            source_location: payload.request.source_location.clone(),
            target_formats: payload.request.target_formats.clone(),
            output_key: job.correlation_id.clone(),
        };

        info!(
            job_id = %job.id,
            source = %request.source_location,
            formats = request.target_formats.len(),
            transcoder = self.transcoder.name(),
            "Transcoding"
        );

        let (progress_tx, mut progress_rx) = mpsc::channel::<TranscodeProgress>(32);
        let forwarder = tokio::spawn(async move {
            while let Some(update) = progress_rx.recv().await {
                progress.report(update.percent.clamp(0.0, 100.0) as u8);
            }
        });

        let start = Instant::now();
        let result = self.transcoder.transcode(request, progress_tx).await;
        metrics::observe_external(
            "transcoder",
            "transcode",
            start.elapsed().as_secs_f64(),
            result.is_ok(),
        );
        let _ = forwarder.await;

        let output = result?;
        debug!(
            job_id = %job.id,
            renditions = output.renditions.len(),
            duration_seconds = output.duration_seconds,
            "Transcode finished"
        );
        Ok(serde_json::to_value(output)?)
    }
}
