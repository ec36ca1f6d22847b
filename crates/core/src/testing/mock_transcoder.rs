//! Mock transcoder for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

use crate::transcoder::{
    MediaInfo, Rendition, TranscodeOutput, TranscodeProgress, TranscodeRequest, Transcoder,
    TranscoderError,
};

/// Mock implementation of the Transcoder trait.
///
/// Writes small placeholder files under `output_dir/<output_key>/` so the
/// pin stage has real bytes to read. Errors pushed with `push_error` are
/// returned by successive calls, one per call.
#[derive(Debug)]
pub struct MockTranscoder {
    output_dir: PathBuf,
    requests: Arc<RwLock<Vec<TranscodeRequest>>>,
    errors: Arc<RwLock<VecDeque<TranscoderError>>>,
    duration_seconds: Arc<RwLock<f64>>,
    delay: Arc<RwLock<Duration>>,
}

impl MockTranscoder {
    /// Create a mock writing renditions under `output_dir`.
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            requests: Arc::new(RwLock::new(Vec::new())),
            errors: Arc::new(RwLock::new(VecDeque::new())),
            duration_seconds: Arc::new(RwLock::new(12.5)),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
        }
    }

    /// Requests received so far, including failed ones.
    pub async fn recorded_requests(&self) -> Vec<TranscodeRequest> {
        self.requests.read().await.clone()
    }

    pub async fn request_count(&self) -> usize {
        self.requests.read().await.len()
    }

    /// Fail the next call with `error`.
    pub async fn push_error(&self, error: TranscoderError) {
        self.errors.write().await.push_back(error);
    }

    pub async fn set_duration(&self, seconds: f64) {
        *self.duration_seconds.write().await = seconds;
    }

    /// Simulated time spent per transcode.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }
}

#[async_trait]
impl Transcoder for MockTranscoder {
    fn name(&self) -> &str {
        "mock"
    }

    async fn probe(&self, source_location: &str) -> Result<MediaInfo, TranscoderError> {
        Ok(MediaInfo {
            location: source_location.to_string(),
            size_bytes: 10 * 1024 * 1024,
            duration_secs: *self.duration_seconds.read().await,
            format: "mov".to_string(),
            has_audio: true,
            has_video: true,
        })
    }

    async fn transcode(
        &self,
        request: TranscodeRequest,
        progress_tx: mpsc::Sender<TranscodeProgress>,
    ) -> Result<TranscodeOutput, TranscoderError> {
        self.requests.write().await.push(request.clone());
        if let Some(err) = self.errors.write().await.pop_front() {
            return Err(err);
        }

        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let duration_seconds = *self.duration_seconds.read().await;
        let dir = self.output_dir.join(&request.output_key);
        tokio::fs::create_dir_all(&dir).await?;

        let total = request.target_formats.len().max(1);
        let mut renditions = Vec::with_capacity(total);
        for (index, format) in request.target_formats.iter().enumerate() {
            let path = dir.join(format!("rendition.{}", format.extension()));
            let bytes = format!("mock {} rendition of {}", format, request.source_location);
            tokio::fs::write(&path, bytes.as_bytes()).await?;

            renditions.push(Rendition {
                format: *format,
                location: path.to_string_lossy().into_owned(),
                size_bytes: bytes.len() as u64,
            });

            let _ = progress_tx
                .send(TranscodeProgress {
                    job_id: request.job_id.clone(),
                    percent: ((index + 1) as f32 / total as f32) * 100.0,
                    time_secs: duration_seconds,
                    duration_secs: Some(duration_seconds),
                    speed: Some("10x".to_string()),
                })
                .await;
        }

        Ok(TranscodeOutput {
            renditions,
            duration_seconds,
        })
    }

    async fn validate(&self) -> Result<(), TranscoderError> {
        Ok(())
    }
}
