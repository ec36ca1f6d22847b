//! FFmpeg-based transcoder implementation.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::debug;

use super::config::TranscoderConfig;
use super::error::TranscoderError;
use super::traits::Transcoder;
use super::types::{
    MediaInfo, Rendition, RenditionFormat, TranscodeOutput, TranscodeProgress, TranscodeRequest,
};

/// FFmpeg-based transcoder implementation.
pub struct FfmpegTranscoder {
    config: TranscoderConfig,
}

/// Position of one rendition within a multi-rendition request.
struct RenditionSlot<'a> {
    job_id: &'a str,
    index: usize,
    total: usize,
    duration_secs: Option<f64>,
}

/// Lines of diagnostics kept for the failure message.
const DIAGNOSTIC_LINES: usize = 20;

/// Accumulates one `-progress` block (`key=value` lines ending in `progress=...`).
#[derive(Debug, Default)]
struct ProgressBlock {
    out_time_secs: f64,
    speed: Option<String>,
    complete: bool,
}

impl ProgressBlock {
    /// Returns false if the line is not part of the progress stream.
    fn apply(&mut self, line: &str) -> bool {
        let Some((key, value)) = line.trim().split_once('=') else {
            return false;
        };
        match key {
            // Both are microseconds; `out_time_ms` is misnamed by ffmpeg
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "speed" => {
                let speed = value.trim();
                self.speed = (speed != "N/A").then(|| speed.to_string());
            }
            "progress" => self.complete = true,
            _ if key.contains(char::is_whitespace) => return false,
            _ => {}
        }
        true
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn reset_marker(&mut self) {
        self.complete = false;
    }
}

/// Last few non-progress lines ffmpeg printed.
#[derive(Debug, Default)]
struct DiagnosticTail(VecDeque<String>);

impl DiagnosticTail {
    fn push(&mut self, line: String) {
        if line.trim().is_empty() {
            return;
        }
        if self.0.len() == DIAGNOSTIC_LINES {
            self.0.pop_front();
        }
        self.0.push_back(line);
    }

    fn into_text(self) -> Option<String> {
        if self.0.is_empty() {
            None
        } else {
            Some(Vec::from(self.0).join("\n"))
        }
    }
}

impl FfmpegTranscoder {
    /// Creates a new FFmpeg transcoder with the given configuration.
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    /// Creates a transcoder with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(TranscoderConfig::default())
    }

    fn is_remote(location: &str) -> bool {
        location.starts_with("http://") || location.starts_with("https://")
    }

    /// Where a rendition of `output_key` is written. Stable, so a retry overwrites.
    fn output_path(&self, output_key: &str, format: RenditionFormat) -> PathBuf {
        let key: String = output_key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.config
            .output_dir
            .join(key)
            .join(format!("rendition.{}", format.extension()))
    }

    /// Builds ffmpeg arguments for one rendition.
    fn build_args(&self, input: &str, output_path: &Path, format: RenditionFormat) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-i".to_string(), input.to_string()];

        args.extend(format.codec_args().iter().map(|a| a.to_string()));

        // Log level and progress
        args.extend([
            "-loglevel".to_string(),
            self.config.ffmpeg_log_level.clone(),
            "-progress".to_string(),
            "pipe:2".to_string(),
        ]);

        // Extra args
        args.extend(self.config.extra_ffmpeg_args.iter().cloned());

        // Output
        args.push(output_path.to_string_lossy().to_string());

        args
    }

    /// Overall percent when rendition `index` of `total` is at `time_secs`.
    fn overall_percent(
        index: usize,
        total: usize,
        time_secs: f64,
        duration_secs: Option<f64>,
    ) -> f32 {
        let within = match duration_secs {
            Some(dur) if dur > 0.0 => (time_secs / dur).clamp(0.0, 1.0),
            _ => 0.0,
        };
        let total = total.max(1) as f64;
        (((index as f64 + within) / total) * 100.0).min(100.0) as f32
    }

    /// Parses ffprobe JSON output into MediaInfo.
    fn parse_probe_output(location: &str, output: &str) -> Result<MediaInfo, TranscoderError> {
        #[derive(Deserialize)]
        struct ProbeOutput {
            format: ProbeFormat,
            #[serde(default)]
            streams: Vec<ProbeStream>,
        }

        #[derive(Deserialize)]
        struct ProbeFormat {
            format_name: String,
            duration: Option<String>,
            size: Option<String>,
        }

        #[derive(Deserialize)]
        struct ProbeStream {
            codec_type: String,
        }

        let probe: ProbeOutput =
            serde_json::from_str(output).map_err(|e| TranscoderError::ParseError {
                reason: format!("Failed to parse ffprobe output: {}", e),
            })?;

        let duration_secs = probe
            .format
            .duration
            .as_ref()
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0);

        let size_bytes = probe
            .format
            .size
            .as_ref()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        let format_name = probe
            .format
            .format_name
            .split(',')
            .next()
            .unwrap_or("unknown");

        Ok(MediaInfo {
            location: location.to_string(),
            size_bytes,
            duration_secs,
            format: format_name.to_string(),
            has_audio: probe.streams.iter().any(|s| s.codec_type == "audio"),
            has_video: probe.streams.iter().any(|s| s.codec_type == "video"),
        })
    }

    /// Runs ffmpeg for one rendition, returning the output size.
    async fn run_rendition(
        &self,
        source: &str,
        output_path: &Path,
        format: RenditionFormat,
        slot: &RenditionSlot<'_>,
        progress_tx: &mpsc::Sender<TranscodeProgress>,
    ) -> Result<u64, TranscoderError> {
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|_| {
                TranscoderError::OutputDirectoryFailed {
                    path: parent.to_path_buf(),
                }
            })?;
        }

        let args = self.build_args(source, output_path, format);
        debug!(job_id = %slot.job_id, format = %format, "Running ffmpeg");

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TranscoderError::FfmpegNotFound {
                        path: self.config.ffmpeg_path.clone(),
                    }
                } else {
                    TranscoderError::Io(e)
                }
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TranscoderError::transcode_failed("ffmpeg stderr not captured", None))?;
        let mut lines = BufReader::new(stderr).lines();

        let read_output = async {
            let mut block = ProgressBlock::default();
            let mut diagnostics = DiagnosticTail::default();

            while let Some(line) = lines.next_line().await? {
                if !block.apply(&line) {
                    diagnostics.push(line);
                    continue;
                }
                if block.is_complete() {
                    let _ = progress_tx.try_send(TranscodeProgress {
                        job_id: slot.job_id.to_string(),
                        percent: Self::overall_percent(
                            slot.index,
                            slot.total,
                            block.out_time_secs,
                            slot.duration_secs,
                        ),
                        time_secs: block.out_time_secs,
                        duration_secs: slot.duration_secs,
                        speed: block.speed.clone(),
                    });
                    block.reset_marker();
                }
            }

            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, diagnostics.into_text()))
        };

        let result = timeout(Duration::from_secs(self.config.timeout_secs), read_output).await;
        match result {
            Ok(Ok((status, _))) if status.success() => {}
            Ok(Ok((status, diagnostics))) => {
                return Err(TranscoderError::transcode_failed(
                    format!("FFmpeg exited with code: {:?}", status.code()),
                    diagnostics,
                ));
            }
            Ok(Err(e)) => return Err(TranscoderError::Io(e)),
            Err(_) => {
                let _ = child.kill().await;
                return Err(TranscoderError::Timeout {
                    timeout_secs: self.config.timeout_secs,
                });
            }
        }

        let output_meta = tokio::fs::metadata(output_path)
            .await
            .map_err(|_| TranscoderError::transcode_failed("Output file not created", None))?;

        Ok(output_meta.len())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn probe(&self, source_location: &str) -> Result<MediaInfo, TranscoderError> {
        if !Self::is_remote(source_location) && !Path::new(source_location).exists() {
            return Err(TranscoderError::SourceNotFound {
                location: source_location.to_string(),
            });
        }

        let output = Command::new(&self.config.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(source_location)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TranscoderError::FfprobeNotFound {
                        path: self.config.ffprobe_path.clone(),
                    }
                } else {
                    TranscoderError::Io(e)
                }
            })?;

        if !output.status.success() {
            // ffprobe failing on a reachable source means the bytes are not media
            return Err(TranscoderError::UnsupportedSource {
                reason: format!(
                    "ffprobe rejected source: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Self::parse_probe_output(source_location, &stdout)
    }

    async fn transcode(
        &self,
        request: TranscodeRequest,
        progress_tx: mpsc::Sender<TranscodeProgress>,
    ) -> Result<TranscodeOutput, TranscoderError> {
        if request.target_formats.is_empty() {
            return Err(TranscoderError::UnsupportedSource {
                reason: "no target formats requested".to_string(),
            });
        }

        let info = self.probe(&request.source_location).await?;
        if !info.has_audio && !info.has_video {
            return Err(TranscoderError::UnsupportedSource {
                reason: "source has no audio or video streams".to_string(),
            });
        }
        if !info.has_video {
            if let Some(format) = request.target_formats.iter().find(|f| !f.is_audio_only()) {
                return Err(TranscoderError::UnsupportedSource {
                    reason: format!("{} rendition requires a video stream", format),
                });
            }
        }

        let duration_secs = (info.duration_secs > 0.0).then_some(info.duration_secs);
        let total = request.target_formats.len();
        let mut renditions = Vec::with_capacity(total);

        for (index, format) in request.target_formats.iter().copied().enumerate() {
            let output_path = self.output_path(&request.output_key, format);
            let slot = RenditionSlot {
                job_id: &request.job_id,
                index,
                total,
                duration_secs,
            };
            let size_bytes = self
                .run_rendition(
                    &request.source_location,
                    &output_path,
                    format,
                    &slot,
                    &progress_tx,
                )
                .await?;

            renditions.push(Rendition {
                format,
                location: output_path.to_string_lossy().to_string(),
                size_bytes,
            });
        }

        Ok(TranscodeOutput {
            renditions,
            duration_seconds: info.duration_secs,
        })
    }

    async fn validate(&self) -> Result<(), TranscoderError> {
        let ffmpeg_result = Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .output()
            .await;

        if let Err(e) = ffmpeg_result {
            if e.kind() == std::io::ErrorKind::NotFound {
                return Err(TranscoderError::FfmpegNotFound {
                    path: self.config.ffmpeg_path.clone(),
                });
            }
            return Err(TranscoderError::Io(e));
        }

        let ffprobe_result = Command::new(&self.config.ffprobe_path)
            .arg("-version")
            .output()
            .await;

        if let Err(e) = ffprobe_result {
            if e.kind() == std::io::ErrorKind::NotFound {
                return Err(TranscoderError::FfprobeNotFound {
                    path: self.config.ffprobe_path.clone(),
                });
            }
            return Err(TranscoderError::Io(e));
        }

        tokio::fs::create_dir_all(&self.config.output_dir).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args_mp4() {
        let transcoder = FfmpegTranscoder::with_defaults();
        let args = transcoder.build_args(
            "/uploads/clip.mov",
            Path::new("/out/asset-1/rendition.mp4"),
            RenditionFormat::Mp4,
        );

        assert_eq!(args[0], "-y");
        assert!(args.contains(&"-i".to_string()));
        assert!(args.contains(&"/uploads/clip.mov".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"pipe:2".to_string()));
        assert_eq!(args.last().unwrap(), "/out/asset-1/rendition.mp4");
    }

    #[test]
    fn test_build_args_includes_extra_args_before_output() {
        let mut config = TranscoderConfig::default();
        config.extra_ffmpeg_args = vec!["-threads".to_string(), "2".to_string()];
        let transcoder = FfmpegTranscoder::new(config);
        let args = transcoder.build_args("in.wav", Path::new("out.mp3"), RenditionFormat::Mp3);

        let threads = args.iter().position(|a| a == "-threads").unwrap();
        assert_eq!(args[threads + 1], "2");
        assert_eq!(args.last().unwrap(), "out.mp3");
        assert!(args.contains(&"-vn".to_string()));
    }

    #[test]
    fn test_output_path_is_stable_and_sanitized() {
        let transcoder = FfmpegTranscoder::new(
            TranscoderConfig::default().with_output_dir(PathBuf::from("/var/out")),
        );
        let path = transcoder.output_path("../asset 1", RenditionFormat::Webm);
        assert_eq!(path, PathBuf::from("/var/out/___asset_1/rendition.webm"));
        assert_eq!(path, transcoder.output_path("../asset 1", RenditionFormat::Webm));
    }

    #[test]
    fn test_overall_percent_spans_renditions() {
        assert_eq!(FfmpegTranscoder::overall_percent(0, 2, 5.0, Some(10.0)), 25.0);
        assert_eq!(FfmpegTranscoder::overall_percent(1, 2, 10.0, Some(10.0)), 100.0);
        assert_eq!(FfmpegTranscoder::overall_percent(1, 2, 0.0, None), 50.0);
        // Overshooting timestamps never exceed the rendition's share
        assert_eq!(FfmpegTranscoder::overall_percent(0, 1, 12.0, Some(10.0)), 100.0);
    }

    #[test]
    fn test_progress_block_reads_time_and_speed() {
        let mut block = ProgressBlock::default();
        for line in ["frame=120", "out_time_us=2500000", "speed=1.5x"] {
            assert!(block.apply(line));
            assert!(!block.is_complete());
        }
        assert!(block.apply("progress=continue"));
        assert!(block.is_complete());
        assert_eq!(block.out_time_secs, 2.5);
        assert_eq!(block.speed.as_deref(), Some("1.5x"));

        block.reset_marker();
        assert!(block.apply("speed=N/A"));
        assert!(block.speed.is_none());
        assert!(!block.is_complete());
    }

    #[test]
    fn test_progress_block_ignores_log_lines() {
        let mut block = ProgressBlock::default();
        assert!(!block.apply("Input #0, mov,mp4,m4a, from 'clip.mov':"));
        assert!(!block.apply("[libx264 @ 0x55d0] crf=23.0 qcomp=0.60"));
        assert!(!block.apply(""));
        assert_eq!(block.out_time_secs, 0.0);
    }

    #[test]
    fn test_diagnostic_tail_keeps_last_lines() {
        let mut tail = DiagnosticTail::default();
        assert!(DiagnosticTail::default().into_text().is_none());
        for i in 0..DIAGNOSTIC_LINES + 5 {
            tail.push(format!("line {}", i));
        }
        tail.push("   ".to_string());

        let text = tail.into_text().unwrap();
        assert_eq!(text.lines().count(), DIAGNOSTIC_LINES);
        assert!(text.starts_with("line 5\n"));
        assert!(text.ends_with(&format!("line {}", DIAGNOSTIC_LINES + 4)));
    }

    #[test]
    fn test_parse_probe_output() {
        let output = r#"{
            "format": {
                "filename": "/uploads/clip.mov",
                "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
                "duration": "42.500000",
                "size": "1048576"
            },
            "streams": [
                {"codec_type": "video", "codec_name": "prores"},
                {"codec_type": "audio", "codec_name": "pcm_s16le"}
            ]
        }"#;

        let info = FfmpegTranscoder::parse_probe_output("/uploads/clip.mov", output).unwrap();
        assert_eq!(info.format, "mov");
        assert_eq!(info.duration_secs, 42.5);
        assert_eq!(info.size_bytes, 1048576);
        assert!(info.has_video);
        assert!(info.has_audio);
    }

    #[test]
    fn test_parse_probe_output_invalid_json() {
        let result = FfmpegTranscoder::parse_probe_output("x", "not json");
        assert!(matches!(result, Err(TranscoderError::ParseError { .. })));
    }

    #[tokio::test]
    async fn test_probe_missing_local_source() {
        let transcoder = FfmpegTranscoder::with_defaults();
        let result = transcoder.probe("/nonexistent/upload.mov").await;
        assert!(matches!(result, Err(TranscoderError::SourceNotFound { .. })));
    }
}
