//! Video frame sampling.
//!
//! Decoding is delegated to a [`VideoDecoder`]; this module decides which
//! timestamps to sample and turns them into [`FrameUnit`]s in temporal order.

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::config::LimitsConfig;
use crate::error::PipelineError;
use crate::types::{FrameUnit, MediaDescriptor};

/// Which frames to pull out of a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SamplingPolicy {
    /// `frames` samples at the centres of equal-length segments.
    FixedCount { frames: u32 },
    /// One sample every `seconds`, starting at zero, capped at `max_frames`.
    Stride { seconds: f64, max_frames: u32 },
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        SamplingPolicy::FixedCount { frames: 5 }
    }
}

impl SamplingPolicy {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            SamplingPolicy::FixedCount { frames } if *frames == 0 => {
                Err("frames must be > 0".to_string())
            }
            SamplingPolicy::Stride { seconds, .. } if !(seconds.is_finite() && *seconds > 0.0) => {
                Err(format!("stride seconds must be > 0, got {seconds}"))
            }
            SamplingPolicy::Stride { max_frames, .. } if *max_frames == 0 => {
                Err("max_frames must be > 0".to_string())
            }
            _ => Ok(()),
        }
    }

    /// Timestamps (seconds) to sample from a video of `duration_secs`.
    ///
    /// Pure function of its inputs. Always returns at least one timestamp and
    /// the result is strictly increasing.
    pub fn plan(&self, duration_secs: f64, min_span_secs: f64) -> Vec<f64> {
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return vec![0.0];
        }
        if duration_secs < min_span_secs {
            return vec![duration_secs / 2.0];
        }

        match *self {
            SamplingPolicy::FixedCount { frames } => {
                let n = frames.max(1) as f64;
                let segment = duration_secs / n;
                (0..frames.max(1))
                    .map(|i| (i as f64 + 0.5) * segment)
                    .collect()
            }
            SamplingPolicy::Stride {
                seconds,
                max_frames,
            } => {
                let mut timestamps = Vec::new();
                let mut i = 0u32;
                while i < max_frames.max(1) {
                    let t = i as f64 * seconds;
                    if t >= duration_secs {
                        break;
                    }
                    timestamps.push(t);
                    i += 1;
                }
                timestamps
            }
        }
    }
}

/// Stream-level facts about a video needed for sampling.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
}

/// Video decoding capability.
///
/// Dropping a pending call abandons it: implementations must not leave work
/// running in the background once the caller stops waiting.
#[async_trait]
pub trait VideoDecoder: Send + Sync {
    /// Read duration and dimensions without decoding frames.
    async fn video_info(&self, path: &Path) -> Result<VideoInfo, PipelineError>;

    /// Decode the frame nearest to `timestamp_secs`.
    async fn frame_at(&self, path: &Path, timestamp_secs: f64)
        -> Result<DynamicImage, PipelineError>;
}

/// [`VideoDecoder`] backed by the `ffprobe` and `ffmpeg` executables.
///
/// Children are killed when the call that spawned them is dropped.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct MetadataOutput {
    #[serde(default)]
    streams: Vec<MetadataStream>,
    format: Option<MetadataFormat>,
}

#[derive(Deserialize)]
struct MetadataStream {
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Deserialize)]
struct MetadataFormat {
    duration: Option<String>,
}

impl FfmpegDecoder {
    /// Use `ffmpeg` and `ffprobe` from `PATH`.
    pub fn new() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }

    /// Use explicit executables.
    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Run a child to completion, collecting stdout and stderr together.
    async fn run(&self, program: &Path, args: &[&OsStr], path: &Path) -> Result<Vec<u8>, PipelineError> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PipelineError::Video {
                path: path.to_path_buf(),
                message: format!("failed to run {}: {}", program.display(), e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Video {
                path: path.to_path_buf(),
                message: format!(
                    "{} exited with {}: {}",
                    program.display(),
                    output.status,
                    stderr.trim()
                ),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl VideoDecoder for FfmpegDecoder {
    async fn video_info(&self, path: &Path) -> Result<VideoInfo, PipelineError> {
        let args: [&OsStr; 9] = [
            "-v".as_ref(),
            "error".as_ref(),
            "-select_streams".as_ref(),
            "v:0".as_ref(),
            "-show_entries".as_ref(),
            "stream=width,height,duration:format=duration".as_ref(),
            "-of".as_ref(),
            "json".as_ref(),
            path.as_os_str(),
        ];
        let output = self.run(&self.ffprobe, &args, path).await?;
        let parsed: MetadataOutput =
            serde_json::from_slice(&output).map_err(|e| PipelineError::Video {
                path: path.to_path_buf(),
                message: format!("unreadable ffprobe output: {}", e),
            })?;

        let stream = parsed.streams.first().ok_or_else(|| PipelineError::Video {
            path: path.to_path_buf(),
            message: "no video stream".to_string(),
        })?;

        let duration_secs = parsed
            .format
            .as_ref()
            .and_then(|f| f.duration.as_deref())
            .or(stream.duration.as_deref())
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0);

        Ok(VideoInfo {
            duration_secs,
            width: stream.width.unwrap_or(0),
            height: stream.height.unwrap_or(0),
        })
    }

    async fn frame_at(
        &self,
        path: &Path,
        timestamp_secs: f64,
    ) -> Result<DynamicImage, PipelineError> {
        let seek = format!("{:.3}", timestamp_secs);
        let args: [&OsStr; 14] = [
            "-v".as_ref(),
            "error".as_ref(),
            "-ss".as_ref(),
            seek.as_ref(),
            "-i".as_ref(),
            path.as_os_str(),
            "-frames:v".as_ref(),
            "1".as_ref(),
            "-f".as_ref(),
            "image2pipe".as_ref(),
            "-vcodec".as_ref(),
            "png".as_ref(),
            "-an".as_ref(),
            "-".as_ref(),
        ];
        let bytes = self.run(&self.ffmpeg, &args, path).await?;
        if bytes.is_empty() {
            return Err(PipelineError::Video {
                path: path.to_path_buf(),
                message: format!("no frame at {}s", seek),
            });
        }
        let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .map_err(|e| PipelineError::Video {
                path: path.to_path_buf(),
                message: format!("frame decode task failed: {}", e),
            })?;
        decoded.map_err(|e| PipelineError::Decode {
            path: path.to_path_buf(),
            message: format!("frame at {}s: {}", seek, e),
        })
    }
}

/// Turns a video descriptor into a sequence of sampled frames.
#[derive(Clone)]
pub struct FrameExtractor {
    decoder: Arc<dyn VideoDecoder>,
    policy: SamplingPolicy,
    min_span_secs: f64,
    limits: LimitsConfig,
}

impl FrameExtractor {
    pub fn new(
        decoder: Arc<dyn VideoDecoder>,
        policy: SamplingPolicy,
        min_span_secs: f64,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            decoder,
            policy,
            min_span_secs,
            limits,
        }
    }

    /// Read the video metadata and plan its samples.
    pub async fn open(&self, media: Arc<MediaDescriptor>) -> Result<FrameSequence, PipelineError> {
        let max_bytes = self.limits.max_video_size_mb * 1024 * 1024;
        if media.size > max_bytes {
            return Err(PipelineError::FileTooLarge {
                path: media.path.clone(),
                size_mb: media.size / (1024 * 1024),
                max_mb: self.limits.max_video_size_mb,
            });
        }

        let info = self.decoder.video_info(&media.path).await?;
        let timestamps = self.policy.plan(info.duration_secs, self.min_span_secs);
        tracing::debug!(
            "Sampling {} frames from {:?} ({:.1}s)",
            timestamps.len(),
            media.path,
            info.duration_secs
        );

        Ok(FrameSequence {
            decoder: Arc::clone(&self.decoder),
            media,
            pending: timestamps.into_iter().enumerate().collect(),
            dropped: 0,
        })
    }
}

/// Finite, single-pass sequence of frames from one video, in temporal order.
///
/// Frames that fail to decode are dropped with a warning; the sequence moves on.
/// Restarting means opening the video again.
pub struct FrameSequence {
    decoder: Arc<dyn VideoDecoder>,
    media: Arc<MediaDescriptor>,
    pending: VecDeque<(usize, f64)>,
    dropped: usize,
}

impl FrameSequence {
    /// Frames planned but not yet yielded.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// Frames that failed to decode so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

impl FrameSequence {
    /// Decode the next sampled frame. `None` once every sample was tried.
    pub async fn next_frame(&mut self) -> Option<FrameUnit> {
        while let Some((index, timestamp)) = self.pending.pop_front() {
            match self.decoder.frame_at(&self.media.path, timestamp).await {
                Ok(image) => {
                    return Some(FrameUnit {
                        media: Arc::clone(&self.media),
                        frame_index: index as u32,
                        timestamp_secs: Some(timestamp),
                        image,
                    })
                }
                Err(e) => {
                    tracing::warn!("Dropping frame {} of {:?}: {}", index, self.media.path, e);
                    self.dropped += 1;
                }
            }
        }
        None
    }
}
