//! Sub-configuration structs with their defaults.

use crate::inference::ExecutionProvider;
use crate::pipeline::preprocess::{ChannelOrder, ResizeMode, TensorLayout};
use crate::pipeline::video::SamplingPolicy;
use crate::tagging::aggregate::AggregationPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// SQLite file holding tag results
    pub store_path: PathBuf,

    /// Directory where models and label files are stored
    pub model_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("~/.taglens/tags.db"),
            model_dir: PathBuf::from("~/.taglens/models"),
        }
    }
}

/// How a media item's identity is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    /// BLAKE3 hash of the file contents
    #[default]
    Content,
    /// Modification time plus file size; cheap but path-sensitive to touches
    Metadata,
}

/// Discovery and worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Number of concurrent decode/preprocess workers
    pub parallel_workers: usize,

    /// Extensions treated as images when the signature is unrecognized
    pub image_extensions: Vec<String>,

    /// Extensions treated as videos when the signature is unrecognized
    pub video_extensions: Vec<String>,

    /// Fingerprint strategy
    pub fingerprint: FingerprintMode,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            parallel_workers: 4,
            image_extensions: ["jpg", "jpeg", "png", "webp", "gif", "bmp", "tif", "tiff"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            video_extensions: ["mp4", "m4v", "mov", "mkv", "webm", "avi", "flv", "ts"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            fingerprint: FingerprintMode::Content,
        }
    }
}

/// Pipeline settings for backpressure and retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Max prepared-but-unbatched units held between preprocessing and the batcher
    pub buffer_size: usize,

    /// Attempts to commit a media item before recording it as failed
    pub store_retry_attempts: u32,

    /// Base delay between store retries in milliseconds
    pub retry_delay_ms: u64,

    /// Consecutive batches failing in every unit before the run aborts
    pub max_failed_batches: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64,
            store_retry_attempts: 3,
            retry_delay_ms: 200,
            max_failed_batches: 3,
        }
    }
}

/// Resource limits to protect against problematic inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum image file size in megabytes
    pub max_file_size_mb: u64,

    /// Maximum video file size in megabytes
    pub max_video_size_mb: u64,

    /// Maximum image dimension (width or height)
    pub max_image_dimension: u32,

    /// Decode timeout in milliseconds
    pub decode_timeout_ms: u64,

    /// Timeout for probing a video and extracting its frames, in milliseconds
    pub video_timeout_ms: u64,

    /// Timeout for a single inference engine call, in milliseconds
    pub inference_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 100,
            max_video_size_mb: 8192,
            max_image_dimension: 10000,
            decode_timeout_ms: 5000,
            video_timeout_ms: 60000,
            inference_timeout_ms: 60000,
        }
    }
}

/// Optional per-field overrides for the model's preprocessing profile.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PreprocessOverrides {
    pub input_size: Option<u32>,
    pub layout: Option<TensorLayout>,
    pub channel_order: Option<ChannelOrder>,
    pub mean: Option<[f32; 3]>,
    pub std: Option<[f32; 3]>,
    pub resize: Option<ResizeMode>,
}

/// Classifier model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identity; recorded with every tag row and selects the preprocessing preset
    pub identity: String,

    /// ONNX file; defaults to `{model_dir}/{identity}/model.onnx`
    pub path: Option<PathBuf>,

    /// Label file; defaults to `{model_dir}/{identity}/selected_tags.csv`
    pub labels: Option<PathBuf>,

    /// Concurrent engine calls the session supports
    pub inference_concurrency: usize,

    /// ONNX Runtime backend: "cpu", "cuda", "tensorrt" or "coreml"
    pub execution_provider: ExecutionProvider,

    /// GPU index for CUDA and TensorRT
    pub device_id: i32,

    /// Preprocessing overrides on top of the identity preset
    pub preprocess: PreprocessOverrides,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            identity: "wd-swinv2-tagger-v3".to_string(),
            path: None,
            labels: None,
            inference_concurrency: 1,
            execution_provider: ExecutionProvider::Cpu,
            device_id: 0,
            preprocess: PreprocessOverrides::default(),
        }
    }
}

/// Tagging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaggingConfig {
    /// Minimum score for a label to be kept
    pub threshold: f32,

    /// Number of frames per inference call
    pub batch_size: usize,

    /// How frames are sampled from videos
    pub sampling: SamplingPolicy,

    /// Videos shorter than this are sampled once, at their midpoint
    pub min_video_span_secs: f64,

    /// How per-frame tags merge into one per-video tag set
    pub aggregation: AggregationPolicy,

    /// Replace underscores with spaces in labels (emoticon labels are kept)
    pub normalize_labels: bool,

    /// Label categories never emitted (e.g. "rating")
    pub exclude_categories: Vec<String>,
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            threshold: 0.35,
            batch_size: 8,
            sampling: SamplingPolicy::default(),
            min_video_span_secs: 1.0,
            aggregation: AggregationPolicy::default(),
            normalize_labels: true,
            exclude_categories: vec![],
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
