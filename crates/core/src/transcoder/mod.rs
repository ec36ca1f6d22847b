//! Transcoder module for producing playable renditions of uploaded media.
//!
//! The `Transcoder` trait is the boundary to the encoding engine; the
//! pipeline only sees rendition locations and the source duration.
//!
//! # Example
//!
//! ```ignore
//! use mintline_core::transcoder::{FfmpegTranscoder, RenditionFormat, TranscodeRequest, Transcoder};
//!
//! let transcoder = FfmpegTranscoder::with_defaults();
//! transcoder.validate().await?;
//!
//! let (tx, mut rx) = tokio::sync::mpsc::channel(16);
//! let output = transcoder
//!     .transcode(
//!         TranscodeRequest {
//!             job_id: "job-1".to_string(),
//!             source_location: "/uploads/clip.mov".to_string(),
//!             target_formats: vec![RenditionFormat::Mp4, RenditionFormat::Webm],
//!             output_key: "asset-1".to_string(),
//!         },
//!         tx,
//!     )
//!     .await?;
//! println!("{} renditions, {}s", output.renditions.len(), output.duration_seconds);
//! ```

mod config;
mod error;
mod ffmpeg;
mod traits;
mod types;

pub use config::TranscoderConfig;
pub use error::TranscoderError;
pub use ffmpeg::FfmpegTranscoder;
pub use traits::Transcoder;
pub use types::{
    MediaInfo, Rendition, RenditionFormat, TranscodeOutput, TranscodeProgress, TranscodeRequest,
};
