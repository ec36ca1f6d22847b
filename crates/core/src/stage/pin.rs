//! Pin stage: rendition bytes and token metadata into the content store.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::content_store::{ContentMetadata, ContentStore, ContentStoreError, StoredContent};
use crate::idempotency::{GuardCheck, IdempotencyGuard};
use crate::job::{JobRecord, QueueName};
use crate::metrics;

use super::{
    IdempotencyClass, PinPayload, PinResult, PinnedRendition, Stage, StageError, StageProgress,
};

pub struct PinStage {
    store: Arc<dyn ContentStore>,
    guard: IdempotencyGuard,
}

impl PinStage {
    pub fn new(store: Arc<dyn ContentStore>, guard: IdempotencyGuard) -> Self {
        Self { store, guard }
    }

    async fn put(&self, bytes: Vec<u8>, metadata: ContentMetadata) -> Result<StoredContent, StageError> {
        let start = Instant::now();
        let result = self.store.put(bytes, metadata).await;
        metrics::observe_external(
            "content_store",
            "put",
            start.elapsed().as_secs_f64(),
            result.is_ok(),
        );
        Ok(result?)
    }

    fn effect_key(job: &JobRecord, payload: &PinPayload) -> Result<String, StageError> {
        let primary = payload
            .primary()
            .ok_or_else(|| StageError::InvalidPayload("no renditions to pin".to_string()))?;
        Ok(IdempotencyGuard::pin_effect_key(
            &job.correlation_id,
            &payload.request.source_location,
            &primary.location,
        ))
    }
}

#[async_trait]
impl Stage for PinStage {
    fn queue(&self) -> QueueName {
        QueueName::Pin
    }

    fn idempotency(&self) -> IdempotencyClass {
        IdempotencyClass::Guarded
    }

    async fn execute(&self, job: &JobRecord, progress: StageProgress) -> Result<Value, StageError> {
        let payload: PinPayload = job.payload_as()?;
        let effect_key = Self::effect_key(job, &payload)?;

        if let GuardCheck::Confirmed(receipt) = self.guard.check(&effect_key)? {
            info!(job_id = %job.id, "Pin already confirmed, reusing receipt");
            metrics::EFFECTS_REUSED
                .with_label_values(&[QueueName::Pin.as_str(), "local"])
                .inc();
            return Ok(receipt);
        }
        // A pending intent needs no reconciliation: re-adding the same bytes
        // yields the same content ids.
        self.guard.record_intent(&effect_key, job)?;

        let total = payload.renditions.len() + 1;
        let mut pinned = Vec::with_capacity(payload.renditions.len());
        for (index, rendition) in payload.renditions.iter().enumerate() {
            let bytes = tokio::fs::read(&rendition.location)
                .await
                .map_err(ContentStoreError::from)?;
            let file_name = Path::new(&rendition.location)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("rendition.{}", rendition.format.extension()));

            let stored = self
                .put(
                    bytes,
                    ContentMetadata {
                        file_name,
                        content_type: Some(content_type(rendition.format.extension()).to_string()),
                    },
                )
                .await?;
            debug!(job_id = %job.id, format = %rendition.format, content_id = %stored.content_id, "Pinned rendition");

            pinned.push((stored, rendition.format));
            progress.report((((index + 1) * 100) / total) as u8);
        }

        let Some((primary, _)) = pinned.first().cloned() else {
            return Err(StageError::InvalidPayload("no renditions to pin".to_string()));
        };

        let request = &payload.request;
        let document = json!({
            "name": request.metadata.title,
            "description": request.metadata.description,
            "tags": request.metadata.tags,
            "creator": request.creator,
            "animation_url": format!("ipfs://{}", primary.content_id),
            "duration_seconds": payload.duration_seconds,
            "renditions": pinned
                .iter()
                .map(|(stored, format)| json!({"format": format, "content_id": stored.content_id}))
                .collect::<Vec<_>>(),
        });
        let metadata = self
            .put(
                serde_json::to_vec(&document)?,
                ContentMetadata {
                    file_name: "metadata.json".to_string(),
                    content_type: Some("application/json".to_string()),
                },
            )
            .await?;

        let result = PinResult {
            content_id: primary.content_id.clone(),
            gateway_url: primary.gateway_url.clone(),
            metadata_uri: format!("ipfs://{}", metadata.content_id),
            renditions: pinned
                .into_iter()
                .map(|(stored, format)| PinnedRendition {
                    format,
                    content_id: stored.content_id,
                    size_bytes: stored.size_bytes,
                })
                .collect(),
            effect_key: effect_key.clone(),
        };
        self.guard.confirm(&effect_key, &result)?;
        progress.report(100);

        info!(job_id = %job.id, content_id = %result.content_id, "Pinned asset");
        Ok(serde_json::to_value(result)?)
    }

    async fn reconcile(&self, job: &JobRecord) -> Result<Option<Value>, StageError> {
        let payload: PinPayload = job.payload_as()?;
        let effect_key = Self::effect_key(job, &payload)?;
        match self.guard.check(&effect_key)? {
            GuardCheck::Confirmed(receipt) => Ok(Some(receipt)),
            GuardCheck::Pending(_) | GuardCheck::Fresh => Ok(None),
        }
    }
}

fn content_type(extension: &str) -> &'static str {
    match extension {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        _ => "application/octet-stream",
    }
}
