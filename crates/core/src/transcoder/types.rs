//! Types for the transcoder module.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output rendition formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenditionFormat {
    /// H.264 + AAC in MP4. Plays everywhere.
    Mp4,
    /// VP9 + Opus in WebM.
    Webm,
    /// Audio-only MP3.
    Mp3,
    /// Audio-only Ogg Vorbis.
    Ogg,
}

impl RenditionFormat {
    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
        }
    }

    /// Returns whether the rendition drops the video stream.
    pub fn is_audio_only(&self) -> bool {
        matches!(self, Self::Mp3 | Self::Ogg)
    }

    /// Returns the ffmpeg codec arguments for this format.
    pub fn codec_args(&self) -> &'static [&'static str] {
        match self {
            Self::Mp4 => &[
                "-c:v", "libx264", "-preset", "medium", "-crf", "23", "-c:a", "aac", "-b:a",
                "160k", "-movflags", "+faststart",
            ],
            Self::Webm => &[
                "-c:v", "libvpx-vp9", "-crf", "32", "-b:v", "0", "-c:a", "libopus", "-b:a", "128k",
            ],
            Self::Mp3 => &["-vn", "-c:a", "libmp3lame", "-b:a", "256k"],
            Self::Ogg => &["-vn", "-c:a", "libvorbis", "-q:a", "6"],
        }
    }
}

impl fmt::Display for RenditionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for RenditionFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp4" => Ok(Self::Mp4),
            "webm" => Ok(Self::Webm),
            "mp3" => Ok(Self::Mp3),
            "ogg" => Ok(Self::Ogg),
            other => Err(format!("unsupported rendition format: {}", other)),
        }
    }
}

/// A request to produce renditions of one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeRequest {
    /// Job ID for tracking.
    pub job_id: String,
    /// Local path or http(s) URL of the uploaded media.
    pub source_location: String,
    /// Renditions to produce, primary first.
    pub target_formats: Vec<RenditionFormat>,
    /// Output subdirectory; stable per asset so retries overwrite.
    pub output_key: String,
}

/// Progress update during transcoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeProgress {
    /// Job ID.
    pub job_id: String,
    /// Progress across all renditions (0.0 - 100.0).
    pub percent: f32,
    /// Current time position in the rendition being written.
    pub time_secs: f64,
    /// Total source duration (if known).
    pub duration_secs: Option<f64>,
    /// Encoding speed (e.g., "2.5x").
    pub speed: Option<String>,
}

/// One produced rendition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rendition {
    pub format: RenditionFormat,
    pub location: String,
    pub size_bytes: u64,
}

/// Result of a successful transcode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeOutput {
    /// Renditions in request order.
    pub renditions: Vec<Rendition>,
    /// Duration of the source in seconds.
    pub duration_seconds: f64,
}

impl TranscodeOutput {
    /// Locations of all renditions in request order.
    pub fn rendition_locations(&self) -> Vec<String> {
        self.renditions.iter().map(|r| r.location.clone()).collect()
    }
}

/// Information about a media source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub location: String,
    pub size_bytes: u64,
    pub duration_secs: f64,
    /// Container format (e.g., "mov").
    pub format: String,
    pub has_audio: bool,
    pub has_video: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse_and_display() {
        assert_eq!("MP4".parse::<RenditionFormat>().unwrap(), RenditionFormat::Mp4);
        assert_eq!("webm".parse::<RenditionFormat>().unwrap(), RenditionFormat::Webm);
        assert!("avi".parse::<RenditionFormat>().is_err());
        assert_eq!(RenditionFormat::Ogg.to_string(), "ogg");
    }

    #[test]
    fn test_audio_only_formats_drop_video() {
        assert!(RenditionFormat::Mp3.is_audio_only());
        assert!(RenditionFormat::Mp3.codec_args().contains(&"-vn"));
        assert!(!RenditionFormat::Mp4.is_audio_only());
        assert!(RenditionFormat::Mp4.codec_args().contains(&"libx264"));
    }

    #[test]
    fn test_format_serialization() {
        let json = serde_json::to_string(&vec![RenditionFormat::Mp4, RenditionFormat::Mp3]).unwrap();
        assert_eq!(json, r#"["mp4","mp3"]"#);
    }

    #[test]
    fn test_rendition_locations() {
        let output = TranscodeOutput {
            renditions: vec![
                Rendition {
                    format: RenditionFormat::Mp4,
                    location: "/out/a/rendition.mp4".to_string(),
                    size_bytes: 10,
                },
                Rendition {
                    format: RenditionFormat::Webm,
                    location: "/out/a/rendition.webm".to_string(),
                    size_bytes: 8,
                },
            ],
            duration_seconds: 12.5,
        };
        assert_eq!(
            output.rendition_locations(),
            vec!["/out/a/rendition.mp4", "/out/a/rendition.webm"]
        );
    }
}
