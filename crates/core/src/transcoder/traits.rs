//! Trait definitions for the transcoder module.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::TranscoderError;
use super::types::{MediaInfo, TranscodeOutput, TranscodeProgress, TranscodeRequest};

/// A transcoder that turns an uploaded source into playable renditions.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Returns the name of this transcoder implementation.
    fn name(&self) -> &str;

    /// Probes a source to get its information.
    async fn probe(&self, source_location: &str) -> Result<MediaInfo, TranscoderError>;

    /// Produces every requested rendition.
    ///
    /// Progress updates are sent on `progress_tx` during encoding.
    /// If the receiver is dropped, transcoding continues without progress reporting.
    async fn transcode(
        &self,
        request: TranscodeRequest,
        progress_tx: mpsc::Sender<TranscodeProgress>,
    ) -> Result<TranscodeOutput, TranscoderError>;

    /// Validates that the transcoder is properly configured and ready.
    async fn validate(&self) -> Result<(), TranscoderError>;
}
